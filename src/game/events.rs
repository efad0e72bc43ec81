//! Game Events
//!
//! Immutable facts. Every state change is the fold of one [`Event`] through the
//! reducer; the log of events is the source of truth for a game.
//!
//! # Wire format
//!
//! ```json
//! {"id": "g-1700000000000-vote-alice-0", "type": "VOTE_CAST", "game_id": "g",
//!  "player_id": "alice", "timestamp": "2025-01-01T09:00:00Z",
//!  "payload": {"target_id": "bob", "vote_type": "NOMINATION"}}
//! ```
//!
//! Payloads decode once, at this boundary, into the closed [`EventPayload`] sum.
//! Missing fields take their defaults, and so do fields that fail to type-check;
//! the well-formed fields beside them are kept. Unknown kinds are preserved
//! verbatim in [`EventPayload::Unknown`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::game::state::{
    Alignment, Effects, Faction, GameId, KpiType, MandateType, NightActionType, PhaseType,
    PlayerId, RoleType, ShockType, VoteType, WinConditionKind,
};

// =============================================================================
// PAYLOADS
// =============================================================================

/// Per-player result of a night resolution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NightOutcome {
    /// Signed token change (balance floors at 0)
    #[serde(default)]
    pub token_change: i64,
    /// New status line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// New alignment (conversions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<Alignment>,
    /// New AI equity value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_equity: Option<u32>,
}

fn default_mining_amount() -> u32 {
    1
}

/// Event payload, one shape per event type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum EventPayload {
    // ----- lifecycle -----
    GameCreated {},
    GameStarted {},
    GameEnded {
        #[serde(default)]
        reason: String,
    },
    PhaseChanged {
        #[serde(default)]
        phase_type: PhaseType,
        /// Seconds
        #[serde(default)]
        duration: u64,
    },
    DayStarted {
        #[serde(default)]
        day_number: u32,
    },
    NightStarted {},

    // ----- players -----
    PlayerJoined {
        #[serde(default)]
        name: String,
        #[serde(default)]
        job_title: String,
    },
    PlayerLeft {},
    PlayerEliminated {
        #[serde(default)]
        role_type: Option<RoleType>,
        #[serde(default)]
        alignment: Alignment,
    },
    PlayerAligned {},
    PlayerShocked {
        #[serde(default)]
        shock_message: String,
    },
    PlayerStatusChanged {
        #[serde(default)]
        status: String,
    },
    PlayerReconnected {},
    PlayerDisconnected {},

    // ----- roles -----
    RoleAssigned {
        #[serde(default)]
        role_type: RoleType,
        #[serde(default)]
        role_name: String,
        #[serde(default)]
        role_description: String,
        #[serde(default)]
        ability_name: Option<String>,
        #[serde(default)]
        ability_description: String,
        #[serde(default)]
        kpi_type: Option<KpiType>,
        #[serde(default)]
        kpi_description: String,
        #[serde(default)]
        kpi_target: u32,
        #[serde(default)]
        kpi_reward: String,
        #[serde(default)]
        alignment: Alignment,
    },
    RoleAbilityUnlocked {
        #[serde(default)]
        ability_name: String,
        #[serde(default)]
        ability_description: String,
    },
    ProjectMilestone {
        #[serde(default)]
        milestone: u32,
    },

    // ----- voting -----
    VoteStarted {
        #[serde(default)]
        vote_type: VoteType,
    },
    VoteCast {
        #[serde(default)]
        target_id: PlayerId,
        #[serde(default)]
        vote_type: VoteType,
    },
    VoteCompleted {
        #[serde(default)]
        vote_type: VoteType,
        #[serde(default)]
        winner: Option<PlayerId>,
    },
    PlayerNominated {
        #[serde(default)]
        nominated_player: PlayerId,
    },

    // ----- economy -----
    TokensAwarded {
        #[serde(default)]
        amount: u32,
        #[serde(default)]
        reason: String,
    },
    TokensLost {
        #[serde(default)]
        amount: u32,
        #[serde(default)]
        reason: String,
    },
    MiningSuccessful {
        #[serde(default = "default_mining_amount")]
        amount: u32,
    },
    MiningFailed {
        #[serde(default)]
        reason: String,
    },
    MiningPoolUpdated {
        #[serde(default)]
        difficulty: Option<f64>,
        #[serde(default)]
        base_reward: Option<u32>,
    },
    TokensDistributed {
        #[serde(default)]
        distribution: BTreeMap<PlayerId, u32>,
    },

    // ----- night -----
    NightActionSubmitted {
        #[serde(default)]
        action_type: NightActionType,
        #[serde(default)]
        target_id: Option<PlayerId>,
    },
    NightActionsResolved {
        #[serde(default)]
        results: BTreeMap<PlayerId, NightOutcome>,
        #[serde(default)]
        summary: String,
    },
    PlayerBlocked {
        #[serde(default)]
        blocked_by: Option<PlayerId>,
    },
    PlayerProtected {
        #[serde(default)]
        protected_by: Option<PlayerId>,
    },
    PlayerInvestigated {
        #[serde(default)]
        target_id: PlayerId,
        #[serde(default)]
        result: Alignment,
    },

    // ----- AI -----
    AiConversionAttempt {
        #[serde(default)]
        target_id: PlayerId,
        #[serde(default)]
        ai_equity: u32,
    },
    AiConversionSuccess {},
    AiConversionFailed {
        #[serde(default)]
        shock_message: String,
    },
    AiEquityChanged {
        #[serde(default)]
        ai_equity_change: i64,
        #[serde(default)]
        new_ai_equity: Option<u32>,
    },
    EquityThreshold {
        #[serde(default)]
        threshold: u32,
        #[serde(default)]
        action: String,
    },

    // ----- communication -----
    ChatMessage {
        #[serde(default)]
        player_name: String,
        #[serde(default)]
        message: String,
        #[serde(default)]
        is_system: bool,
    },
    SystemMessage {
        #[serde(default)]
        message: String,
    },
    PrivateNotification {
        #[serde(default)]
        notification_type: String,
        #[serde(default)]
        message: String,
    },

    // ----- crisis -----
    CrisisTriggered {
        #[serde(default)]
        crisis_type: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        effects: Effects,
    },
    PulseCheckStarted {
        #[serde(default)]
        question: String,
    },
    PulseCheckSubmitted {
        #[serde(default)]
        response: String,
    },
    PulseCheckRevealed {},

    // ----- mandate -----
    MandateActivated {
        #[serde(default)]
        mandate_type: MandateType,
        #[serde(default)]
        name: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        effects: Effects,
    },
    MandateEffect {
        #[serde(default)]
        effects: Effects,
    },

    // ----- shocks -----
    SystemShockApplied {
        #[serde(default)]
        shock_type: ShockType,
        #[serde(default)]
        description: String,
        #[serde(default)]
        duration_hours: u32,
    },
    ShockEffectTriggered {
        #[serde(default)]
        effect_type: String,
        #[serde(default)]
        description: String,
    },

    // ----- KPI -----
    KpiProgress {
        #[serde(default)]
        progress: u32,
    },
    KpiCompleted {
        #[serde(default)]
        kpi_type: Option<KpiType>,
    },

    // ----- role abilities -----
    RunAudit {
        #[serde(default)]
        target_id: PlayerId,
        #[serde(default)]
        result: Alignment,
    },
    OverclockServers {
        #[serde(default)]
        target_id: PlayerId,
        #[serde(default)]
        tokens_awarded: u32,
        #[serde(default)]
        ai_equity_bonus: u32,
    },
    IsolateNode {
        #[serde(default)]
        target_id: PlayerId,
        #[serde(default)]
        fizzled: bool,
    },
    PerformanceReview {
        #[serde(default)]
        target_id: PlayerId,
        #[serde(default)]
        forced_action: NightActionType,
    },
    ReallocateBudget {
        #[serde(default)]
        from_player: PlayerId,
        #[serde(default)]
        to_player: PlayerId,
        #[serde(default)]
        amount: u32,
    },
    Pivot {
        #[serde(default)]
        selected_crisis: String,
    },
    DeployHotfix {
        #[serde(default)]
        redaction_target: String,
    },

    // ----- status -----
    SlackStatusChanged {
        #[serde(default)]
        status: String,
    },
    PartingShotSet {
        #[serde(default)]
        parting_shot: String,
    },

    // ----- victory -----
    VictoryCondition {
        #[serde(default)]
        winner: Faction,
        #[serde(default)]
        condition: WinConditionKind,
        #[serde(default)]
        description: String,
    },

    /// An event type this build does not know. Kept verbatim.
    #[serde(skip)]
    Unknown { kind: String, payload: Value },
}

impl EventPayload {
    /// Wire name of the event type.
    pub fn kind(&self) -> &str {
        match self {
            EventPayload::GameCreated {} => "GAME_CREATED",
            EventPayload::GameStarted {} => "GAME_STARTED",
            EventPayload::GameEnded { .. } => "GAME_ENDED",
            EventPayload::PhaseChanged { .. } => "PHASE_CHANGED",
            EventPayload::DayStarted { .. } => "DAY_STARTED",
            EventPayload::NightStarted {} => "NIGHT_STARTED",
            EventPayload::PlayerJoined { .. } => "PLAYER_JOINED",
            EventPayload::PlayerLeft {} => "PLAYER_LEFT",
            EventPayload::PlayerEliminated { .. } => "PLAYER_ELIMINATED",
            EventPayload::PlayerAligned {} => "PLAYER_ALIGNED",
            EventPayload::PlayerShocked { .. } => "PLAYER_SHOCKED",
            EventPayload::PlayerStatusChanged { .. } => "PLAYER_STATUS_CHANGED",
            EventPayload::PlayerReconnected {} => "PLAYER_RECONNECTED",
            EventPayload::PlayerDisconnected {} => "PLAYER_DISCONNECTED",
            EventPayload::RoleAssigned { .. } => "ROLE_ASSIGNED",
            EventPayload::RoleAbilityUnlocked { .. } => "ROLE_ABILITY_UNLOCKED",
            EventPayload::ProjectMilestone { .. } => "PROJECT_MILESTONE",
            EventPayload::VoteStarted { .. } => "VOTE_STARTED",
            EventPayload::VoteCast { .. } => "VOTE_CAST",
            EventPayload::VoteCompleted { .. } => "VOTE_COMPLETED",
            EventPayload::PlayerNominated { .. } => "PLAYER_NOMINATED",
            EventPayload::TokensAwarded { .. } => "TOKENS_AWARDED",
            EventPayload::TokensLost { .. } => "TOKENS_LOST",
            EventPayload::MiningSuccessful { .. } => "MINING_SUCCESSFUL",
            EventPayload::MiningFailed { .. } => "MINING_FAILED",
            EventPayload::MiningPoolUpdated { .. } => "MINING_POOL_UPDATED",
            EventPayload::TokensDistributed { .. } => "TOKENS_DISTRIBUTED",
            EventPayload::NightActionSubmitted { .. } => "NIGHT_ACTION_SUBMITTED",
            EventPayload::NightActionsResolved { .. } => "NIGHT_ACTIONS_RESOLVED",
            EventPayload::PlayerBlocked { .. } => "PLAYER_BLOCKED",
            EventPayload::PlayerProtected { .. } => "PLAYER_PROTECTED",
            EventPayload::PlayerInvestigated { .. } => "PLAYER_INVESTIGATED",
            EventPayload::AiConversionAttempt { .. } => "AI_CONVERSION_ATTEMPT",
            EventPayload::AiConversionSuccess {} => "AI_CONVERSION_SUCCESS",
            EventPayload::AiConversionFailed { .. } => "AI_CONVERSION_FAILED",
            EventPayload::AiEquityChanged { .. } => "AI_EQUITY_CHANGED",
            EventPayload::EquityThreshold { .. } => "EQUITY_THRESHOLD",
            EventPayload::ChatMessage { .. } => "CHAT_MESSAGE",
            EventPayload::SystemMessage { .. } => "SYSTEM_MESSAGE",
            EventPayload::PrivateNotification { .. } => "PRIVATE_NOTIFICATION",
            EventPayload::CrisisTriggered { .. } => "CRISIS_TRIGGERED",
            EventPayload::PulseCheckStarted { .. } => "PULSE_CHECK_STARTED",
            EventPayload::PulseCheckSubmitted { .. } => "PULSE_CHECK_SUBMITTED",
            EventPayload::PulseCheckRevealed {} => "PULSE_CHECK_REVEALED",
            EventPayload::MandateActivated { .. } => "MANDATE_ACTIVATED",
            EventPayload::MandateEffect { .. } => "MANDATE_EFFECT",
            EventPayload::SystemShockApplied { .. } => "SYSTEM_SHOCK_APPLIED",
            EventPayload::ShockEffectTriggered { .. } => "SHOCK_EFFECT_TRIGGERED",
            EventPayload::KpiProgress { .. } => "KPI_PROGRESS",
            EventPayload::KpiCompleted { .. } => "KPI_COMPLETED",
            EventPayload::RunAudit { .. } => "RUN_AUDIT",
            EventPayload::OverclockServers { .. } => "OVERCLOCK_SERVERS",
            EventPayload::IsolateNode { .. } => "ISOLATE_NODE",
            EventPayload::PerformanceReview { .. } => "PERFORMANCE_REVIEW",
            EventPayload::ReallocateBudget { .. } => "REALLOCATE_BUDGET",
            EventPayload::Pivot { .. } => "PIVOT",
            EventPayload::DeployHotfix { .. } => "DEPLOY_HOTFIX",
            EventPayload::SlackStatusChanged { .. } => "SLACK_STATUS_CHANGED",
            EventPayload::PartingShotSet { .. } => "PARTING_SHOT_SET",
            EventPayload::VictoryCondition { .. } => "VICTORY_CONDITION",
            EventPayload::Unknown { kind, .. } => kind,
        }
    }

    /// Decode a payload from its wire kind and JSON body.
    ///
    /// Never fails: a field that does not type-check takes its default while the
    /// fields around it are kept, an unknown kind yields [`EventPayload::Unknown`].
    pub fn from_parts(kind: &str, payload: Value) -> Self {
        let payload = if payload.is_null() {
            Value::Object(Map::new())
        } else {
            payload
        };

        match Self::decode(kind, payload.clone()) {
            Ok(decoded) => decoded,
            Err(err) => match Self::salvage(kind, &payload) {
                Some(decoded) => {
                    warn!(kind, error = %err, "Malformed event payload, bad fields defaulted");
                    decoded
                }
                None => {
                    debug!(kind, "Unrecognized event type preserved");
                    EventPayload::Unknown {
                        kind: kind.to_string(),
                        payload,
                    }
                }
            },
        }
    }

    fn decode(kind: &str, payload: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json!({ "type": kind, "payload": payload }))
    }

    /// Rebuild a malformed body one field at a time, dropping the fields that
    /// break decoding. `None` when the kind itself is unknown.
    fn salvage(kind: &str, payload: &Value) -> Option<Self> {
        let mut body = Map::new();
        let mut decoded = Self::decode(kind, Value::Object(body.clone())).ok()?;

        if let Value::Object(fields) = payload {
            for (key, value) in fields {
                body.insert(key.clone(), value.clone());
                match Self::decode(kind, Value::Object(body.clone())) {
                    Ok(next) => decoded = next,
                    Err(_) => {
                        debug!(kind, field = %key, "Dropping malformed payload field");
                        body.remove(key);
                    }
                }
            }
        }
        Some(decoded)
    }

    /// Split into wire kind and JSON body.
    pub fn to_parts(&self) -> Result<(String, Value), serde_json::Error> {
        if let EventPayload::Unknown { kind, payload } = self {
            return Ok((kind.clone(), payload.clone()));
        }

        let mut tagged = serde_json::to_value(self)?;
        let body = tagged
            .get_mut("payload")
            .map(std::mem::take)
            .unwrap_or_else(|| Value::Object(Map::new()));
        Ok((self.kind().to_string(), body))
    }

    /// Whether this is an event type this build understands.
    pub fn is_known(&self) -> bool {
        !matches!(self, EventPayload::Unknown { .. })
    }
}

// =============================================================================
// EVENT
// =============================================================================

/// Delivery scope of an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Visibility {
    /// Everyone at the table
    Public,
    /// Only this player
    Private(PlayerId),
    /// Only members of this faction
    Faction(Alignment),
}

/// A game event.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Unique, deterministic event ID
    pub id: String,
    /// Game the event belongs to
    pub game_id: GameId,
    /// Subject player, if any
    pub player_id: Option<PlayerId>,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// What happened
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event.
    pub fn new(
        id: impl Into<String>,
        game_id: impl Into<GameId>,
        player_id: Option<PlayerId>,
        timestamp: DateTime<Utc>,
        payload: EventPayload,
    ) -> Self {
        Self {
            id: id.into(),
            game_id: game_id.into(),
            player_id,
            timestamp,
            payload,
        }
    }

    /// Wire name of the event type.
    pub fn kind(&self) -> &str {
        self.payload.kind()
    }

    /// Who may see this event.
    pub fn visibility(&self) -> Visibility {
        match &self.payload {
            EventPayload::RoleAssigned { .. }
            | EventPayload::RoleAbilityUnlocked { .. }
            | EventPayload::PlayerInvestigated { .. }
            | EventPayload::RunAudit { .. }
            | EventPayload::PrivateNotification { .. }
            | EventPayload::NightActionSubmitted { .. }
            | EventPayload::PulseCheckSubmitted { .. }
            | EventPayload::KpiProgress { .. }
            | EventPayload::KpiCompleted { .. }
            | EventPayload::AiEquityChanged { .. }
            | EventPayload::EquityThreshold { .. } => {
                // Addressed to nobody when the subject is missing
                Visibility::Private(self.player_id.clone().unwrap_or_else(PlayerId::system))
            }
            EventPayload::AiConversionAttempt { .. } => Visibility::Faction(Alignment::Aligned),
            _ => Visibility::Public,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct EventRecord {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    game_id: GameId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    player_id: Option<PlayerId>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    payload: Value,
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (kind, payload) = self.payload.to_parts().map_err(ser::Error::custom)?;
        EventRecord {
            id: self.id.clone(),
            kind,
            game_id: self.game_id.clone(),
            player_id: self.player_id.clone(),
            timestamp: self.timestamp,
            payload,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = EventRecord::deserialize(deserializer)?;
        if record.kind.is_empty() {
            return Err(de::Error::custom("event type must not be empty"));
        }
        Ok(Event {
            payload: EventPayload::from_parts(&record.kind, record.payload),
            id: record.id,
            game_id: record.game_id,
            player_id: record.player_id,
            timestamp: record.timestamp,
        })
    }
}

// =============================================================================
// EVENT FACTORY
// =============================================================================

/// Stamps events produced by one processing step with deterministic IDs.
///
/// IDs have the form `{game}-{millis}-{tag}-{seq}`.
#[derive(Debug)]
pub struct EventFactory {
    game_id: GameId,
    now: DateTime<Utc>,
    tag: String,
    seq: u32,
    events: Vec<Event>,
}

impl EventFactory {
    /// Create a factory for one step.
    pub fn new(game_id: impl Into<GameId>, now: DateTime<Utc>, tag: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            now,
            tag: tag.into(),
            seq: 0,
            events: Vec::new(),
        }
    }

    /// Build the next event without recording it.
    pub fn make(&mut self, player_id: Option<PlayerId>, payload: EventPayload) -> Event {
        let id = format!(
            "{}-{}-{}-{}",
            self.game_id,
            self.now.timestamp_millis(),
            self.tag,
            self.seq
        );
        self.seq += 1;
        Event::new(id, self.game_id.clone(), player_id, self.now, payload)
    }

    /// Record an event about a player.
    pub fn player(&mut self, player_id: &PlayerId, payload: EventPayload) -> &Event {
        let event = self.make(Some(player_id.clone()), payload);
        self.push(event)
    }

    /// Record a game-wide event.
    pub fn game(&mut self, payload: EventPayload) -> &Event {
        let event = self.make(None, payload);
        self.push(event)
    }

    /// Record a system chat line.
    pub fn system_message(&mut self, message: impl Into<String>) -> &Event {
        self.game(EventPayload::SystemMessage {
            message: message.into(),
        })
    }

    fn push(&mut self, event: Event) -> &Event {
        self.events.push(event);
        // just pushed
        &self.events[self.events.len() - 1]
    }

    /// Events recorded so far.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Timestamp applied to every event.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Consume the factory and return the recorded events.
    pub fn finish(self) -> Vec<Event> {
        self.events
    }
}

// =============================================================================
// TESTS
// =============================================================================
