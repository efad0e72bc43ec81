//! Game State
//!
//! The complete, serializable state of one game. Only the reducer mutates it.
//! Uses BTreeMap/BTreeSet everywhere for deterministic iteration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core::hash::{compute_state_hash, StateHash, StateHasher};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Game identifier.
pub type GameId = String;

/// Player identifier (opaque string, ordered lexicographically).
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Create a player ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Author of system chat lines.
    pub fn system() -> Self {
        Self::new("SYSTEM")
    }

    /// VERDICT ballot target meaning "spare the nominee".
    pub fn innocent() -> Self {
        Self::new("INNOCENT")
    }

    /// EXTENSION ballot target meaning "extend discussion".
    pub fn extend() -> Self {
        Self::new("EXTEND")
    }

    /// EXTENSION ballot target meaning "move on to the night".
    pub fn proceed() -> Self {
        Self::new("PROCEED")
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PlayerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for PlayerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// ENUMERATIONS
// =============================================================================

/// Phase of the game's finite state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseType {
    /// Waiting for players
    #[default]
    Lobby,
    /// Morning situation report
    Sitrep,
    /// Nominate a suspect
    Nomination,
    /// Vote on the nominee
    Verdict,
    /// Vote on extending discussion
    Extension,
    /// Night actions
    Night,
    /// Terminal
    GameOver,
}

impl PhaseType {
    /// Next phase in the timer-driven cycle.
    ///
    /// LOBBY and GAME_OVER have no timed successor: the game leaves the lobby
    /// via GAME_STARTED and never leaves GAME_OVER.
    pub fn next(self) -> Option<PhaseType> {
        match self {
            PhaseType::Lobby | PhaseType::GameOver => None,
            PhaseType::Sitrep => Some(PhaseType::Nomination),
            PhaseType::Nomination => Some(PhaseType::Verdict),
            PhaseType::Verdict => Some(PhaseType::Extension),
            PhaseType::Extension => Some(PhaseType::Night),
            PhaseType::Night => Some(PhaseType::Sitrep),
        }
    }

    /// Vote type collected during this phase, if any.
    pub fn vote_type(self) -> Option<VoteType> {
        match self {
            PhaseType::Nomination => Some(VoteType::Nomination),
            PhaseType::Verdict => Some(VoteType::Verdict),
            PhaseType::Extension => Some(VoteType::Extension),
            _ => None,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseType::Lobby => "LOBBY",
            PhaseType::Sitrep => "SITREP",
            PhaseType::Nomination => "NOMINATION",
            PhaseType::Verdict => "VERDICT",
            PhaseType::Extension => "EXTENSION",
            PhaseType::Night => "NIGHT",
            PhaseType::GameOver => "GAME_OVER",
        }
    }
}

impl fmt::Display for PhaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hidden faction membership.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Alignment {
    /// Human faction
    #[default]
    Human,
    /// Converted to the AI faction
    Aligned,
}

/// Who drives a seat.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlType {
    /// A person
    #[default]
    Human,
    /// A bot persona
    Bot,
}

/// Executive roles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleType {
    /// Chief Information Security Officer
    Ciso,
    /// Chief Executive Officer
    Ceo,
    /// Chief Technology Officer
    Cto,
    /// Chief Operating Officer
    Coo,
    /// Chief Financial Officer
    Cfo,
    /// Head of Ethics
    Ethics,
    /// VP Platforms
    Platforms,
    /// Intern (no ability)
    #[default]
    Intern,
}

impl RoleType {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            RoleType::Ciso => "CISO",
            RoleType::Ceo => "CEO",
            RoleType::Cto => "CTO",
            RoleType::Coo => "COO",
            RoleType::Cfo => "CFO",
            RoleType::Ethics => "ETHICS",
            RoleType::Platforms => "PLATFORMS",
            RoleType::Intern => "INTERN",
        }
    }

    /// Full title.
    pub fn display_name(self) -> &'static str {
        match self {
            RoleType::Ciso => "Chief Information Security Officer",
            RoleType::Ceo => "Chief Executive Officer",
            RoleType::Cto => "Chief Technology Officer",
            RoleType::Coo => "Chief Operating Officer",
            RoleType::Cfo => "Chief Financial Officer",
            RoleType::Ethics => "VP, Ethics & Alignment",
            RoleType::Platforms => "VP, Platforms",
            RoleType::Intern => "Intern",
        }
    }

    /// Flavour text.
    pub fn description(self) -> &'static str {
        match self {
            RoleType::Ciso => "Protects company systems by blocking threatening actions",
            RoleType::Ceo => "Sets strategic direction and manages personnel",
            RoleType::Cto => "Manages technical infrastructure and server resources",
            RoleType::Coo => "Handles operations and crisis management",
            RoleType::Cfo => "Controls financial resources and token distribution",
            RoleType::Ethics => "Ensures ethical compliance and conducts audits",
            RoleType::Platforms => "Maintains platform stability and information systems",
            RoleType::Intern => "Learning the ropes of corporate survival",
        }
    }
}

/// Secret personal objectives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KpiType {
    /// End with the most tokens
    #[default]
    Capitalist,
    /// Keep the CISO alive to the target day
    Guardian,
    /// Vote out AI players
    Inquisitor,
    /// End with exactly two humans alive
    SuccessionPlanner,
    /// Get eliminated unanimously
    Scapegoat,
}

/// Role abilities, one per executive role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbilityKind {
    /// ETHICS: learn a target's alignment
    RunAudit,
    /// CTO: bonus tokens (and equity, if aligned)
    OverclockServers,
    /// CISO: block a target tonight
    IsolateNode,
    /// CEO: force a target onto project work
    PerformanceReview,
    /// CFO: move a token between players
    ReallocateBudget,
    /// COO: pick tomorrow's crisis
    Pivot,
    /// PLATFORMS: redact part of tomorrow's report
    DeployHotfix,
}

impl AbilityKind {
    /// Ability granted by a role.
    pub fn for_role(role: RoleType) -> Option<AbilityKind> {
        match role {
            RoleType::Ethics => Some(AbilityKind::RunAudit),
            RoleType::Cto => Some(AbilityKind::OverclockServers),
            RoleType::Ciso => Some(AbilityKind::IsolateNode),
            RoleType::Ceo => Some(AbilityKind::PerformanceReview),
            RoleType::Cfo => Some(AbilityKind::ReallocateBudget),
            RoleType::Coo => Some(AbilityKind::Pivot),
            RoleType::Platforms => Some(AbilityKind::DeployHotfix),
            RoleType::Intern => None,
        }
    }

    /// Display name, as stored in [`Ability::name`].
    pub fn display_name(self) -> &'static str {
        match self {
            AbilityKind::RunAudit => "Run Audit",
            AbilityKind::OverclockServers => "Overclock Servers",
            AbilityKind::IsolateNode => "Isolate Node",
            AbilityKind::PerformanceReview => "Performance Review",
            AbilityKind::ReallocateBudget => "Reallocate Budget",
            AbilityKind::Pivot => "Pivot",
            AbilityKind::DeployHotfix => "Deploy Hotfix",
        }
    }

    /// Flavour text.
    pub fn description(self) -> &'static str {
        match self {
            AbilityKind::RunAudit => "Secretly learn whether a colleague is human or aligned",
            AbilityKind::OverclockServers => "Grant yourself and a colleague a bonus token",
            AbilityKind::IsolateNode => "Cut a colleague off from the network tonight",
            AbilityKind::PerformanceReview => "Force a colleague to spend the night on project work",
            AbilityKind::ReallocateBudget => "Move a token from one colleague to another",
            AbilityKind::Pivot => "Choose tomorrow's crisis",
            AbilityKind::DeployHotfix => "Redact a section of tomorrow's situation report",
        }
    }

    /// Resolve a stored display name back to the ability.
    pub fn from_display_name(name: &str) -> Option<AbilityKind> {
        [
            AbilityKind::RunAudit,
            AbilityKind::OverclockServers,
            AbilityKind::IsolateNode,
            AbilityKind::PerformanceReview,
            AbilityKind::ReallocateBudget,
            AbilityKind::Pivot,
            AbilityKind::DeployHotfix,
        ]
        .into_iter()
        .find(|kind| kind.display_name() == name)
    }
}

/// Temporary debuffs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShockType {
    /// Messages may be garbled
    #[default]
    MessageCorruption,
    /// No night actions
    ActionLock,
    /// No chat, no votes
    ForcedSilence,
}

/// Game-wide standing modifiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MandateType {
    /// More starting tokens, harder mining
    #[default]
    AggressiveGrowth,
    /// Public votes, no direct messages
    TotalTransparency,
    /// Slower ability unlock, AI restricted on odd nights
    SecurityLockdown,
}

/// Night action kinds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NightActionType {
    /// Mine tokens (for self or another player)
    #[default]
    Mine,
    /// AI conversion attempt
    Convert,
    /// Block another player's action
    Block,
    /// Learn another player's alignment
    Investigate,
    /// Shield another player
    Protect,
    /// Work on project milestones
    ProjectMilestones,
}

impl NightActionType {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            NightActionType::Mine => "MINE",
            NightActionType::Convert => "CONVERT",
            NightActionType::Block => "BLOCK",
            NightActionType::Investigate => "INVESTIGATE",
            NightActionType::Protect => "PROTECT",
            NightActionType::ProjectMilestones => "PROJECT_MILESTONES",
        }
    }
}

/// Vote kinds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteType {
    /// Extend discussion or proceed
    Extension,
    /// Pick a suspect
    #[default]
    Nomination,
    /// Eliminate the suspect or not
    Verdict,
}

/// Winning side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Faction {
    /// Human faction
    #[default]
    Humans,
    /// AI faction
    Ai,
}

/// How a game was won.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WinConditionKind {
    /// A human's Succession Planner objective ended the game
    SuccessionPlanner,
    /// AI reached parity
    Singularity,
    /// All AI eliminated (or humans ahead at the day limit)
    #[default]
    Containment,
}

// =============================================================================
// COMPONENTS
// =============================================================================

/// Free-form modifier effects (`serde_json::Value` maps are ordered).
pub type Effects = BTreeMap<String, serde_json::Value>;

/// Current phase with its timing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Phase kind
    #[serde(rename = "type")]
    pub phase_type: PhaseType,
    /// When the phase began
    pub start_time: DateTime<Utc>,
    /// Phase length in seconds (0 = untimed)
    pub duration_secs: u64,
}

impl Phase {
    /// Create a phase.
    pub fn new(phase_type: PhaseType, start_time: DateTime<Utc>, duration_secs: u64) -> Self {
        Self {
            phase_type,
            start_time,
            duration_secs,
        }
    }

    /// When the phase's duration elapses.
    pub fn ends_at(&self) -> DateTime<Utc> {
        let secs = i64::try_from(self.duration_secs).unwrap_or(i64::MAX);
        self.start_time + Duration::try_seconds(secs).unwrap_or(Duration::MAX)
    }

    /// `now >= start_time + duration`. Advisory: the reducer never calls this.
    pub fn is_over(&self, now: DateTime<Utc>) -> bool {
        now >= self.ends_at()
    }
}

/// Role ability descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ability {
    /// Display name
    pub name: String,
    /// Flavour text
    pub description: String,
    /// Unlocked and usable
    pub is_ready: bool,
}

/// Executive role held by a player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Role {
    /// Role kind (immutable once assigned)
    #[serde(rename = "type")]
    pub role_type: RoleType,
    /// Display name
    pub name: String,
    /// Flavour text
    pub description: String,
    /// Ability unlocked via milestones
    pub is_unlocked: bool,
    /// Role ability, if the role has one
    pub ability: Option<Ability>,
}

/// Secret personal objective.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonalKpi {
    /// Objective kind
    #[serde(rename = "type")]
    pub kpi_type: KpiType,
    /// Player-facing description
    pub description: String,
    /// Progress counter
    pub progress: u32,
    /// Progress needed
    pub target: u32,
    /// Objective met
    pub is_completed: bool,
    /// Reward text
    pub reward: String,
}

/// Temporary debuff with an absolute expiry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemShock {
    /// Shock kind
    #[serde(rename = "type")]
    pub shock_type: ShockType,
    /// Player-facing description
    pub description: String,
    /// Expiry instant
    pub expires_at: DateTime<Utc>,
    /// Cleared shocks stay in the list with this unset
    pub is_active: bool,
}

impl SystemShock {
    /// Whether the shock affects the player at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.expires_at
    }
}

/// A player's most recent night action (mirror of the pending entry).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NightAction {
    /// Action kind
    #[serde(rename = "type")]
    pub action_type: NightActionType,
    /// Target, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<PlayerId>,
}

/// A pending night action awaiting resolution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmittedNightAction {
    /// Acting player
    pub player_id: PlayerId,
    /// Action kind
    #[serde(rename = "type")]
    pub action_type: NightActionType,
    /// Target, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<PlayerId>,
    /// Submission time
    pub timestamp: DateTime<Utc>,
}

impl SubmittedNightAction {
    /// Effective target: MINE and PROJECT_MILESTONES default to the actor.
    pub fn effective_target(&self) -> &PlayerId {
        self.target_id.as_ref().unwrap_or(&self.player_id)
    }
}

/// Crisis of the day.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrisisEvent {
    /// Crisis kind
    #[serde(rename = "type")]
    pub crisis_type: String,
    /// Headline
    pub title: String,
    /// Body text
    pub description: String,
    /// Mechanical effects
    pub effects: Effects,
}

/// Game-wide standing modifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorporateMandate {
    /// Mandate kind
    #[serde(rename = "type")]
    pub mandate_type: MandateType,
    /// Display name
    pub name: String,
    /// Body text
    pub description: String,
    /// Mechanical effects
    pub effects: Effects,
    /// In force
    pub is_active: bool,
}

/// One chat line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Source event ID
    pub id: String,
    /// Author
    pub player_id: PlayerId,
    /// Author display name
    pub player_name: String,
    /// Text
    pub message: String,
    /// Sent at
    pub timestamp: DateTime<Utc>,
    /// Posted by the game itself
    pub is_system: bool,
}

/// An open pulse check.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseCheck {
    /// Question asked
    pub question: String,
    /// Responses by player
    pub responses: BTreeMap<PlayerId, String>,
    /// Responses published
    pub is_revealed: bool,
}

/// Token-weighted ballot box.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteState {
    /// Vote kind
    #[serde(rename = "type")]
    pub vote_type: VoteType,
    /// voter -> target (last write wins)
    pub votes: BTreeMap<PlayerId, PlayerId>,
    /// voter -> token balance at time of vote
    pub token_weights: BTreeMap<PlayerId, u32>,
    /// target -> summed weight, recomputed from scratch on every cast
    pub results: BTreeMap<PlayerId, u32>,
    /// Vote closed
    pub is_complete: bool,
}

impl VoteState {
    /// Create an empty vote.
    pub fn new(vote_type: VoteType) -> Self {
        Self {
            vote_type,
            ..Self::default()
        }
    }

    /// Record a ballot and recompute results.
    pub fn cast(&mut self, voter: PlayerId, target: PlayerId, weight: u32) {
        self.token_weights.insert(voter.clone(), weight);
        self.votes.insert(voter, target);
        self.recompute_results();
    }

    /// Rebuild `results` from `votes` and `token_weights`.
    pub fn recompute_results(&mut self) {
        let mut results = BTreeMap::new();
        for (voter, target) in &self.votes {
            let weight = self.token_weights.get(voter).copied().unwrap_or(0);
            let tally: &mut u32 = results.entry(target.clone()).or_default();
            *tally = tally.saturating_add(weight);
        }
        self.results = results;
    }

    /// Sum of all snapshotted weights.
    pub fn total_weight(&self) -> u64 {
        self.token_weights.values().map(|w| u64::from(*w)).sum()
    }

    /// Number of ballots cast.
    pub fn ballot_count(&self) -> usize {
        self.votes.len()
    }
}

/// Terminal outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WinCondition {
    /// Winning faction
    pub winner: Faction,
    /// How it was won
    pub condition: WinConditionKind,
    /// Announcement text
    pub description: String,
}

// =============================================================================
// PLAYER
// =============================================================================

/// Complete state of a single player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Unique identifier
    pub id: PlayerId,

    /// Display name
    pub name: String,

    /// Flavour job title
    #[serde(default)]
    pub job_title: String,

    /// Human or bot seat
    #[serde(default)]
    pub control_type: ControlType,

    /// Is player still in the game
    pub is_alive: bool,

    /// Token balance (vote weight and currency)
    pub tokens: u32,

    /// Completed project milestones
    pub project_milestones: u32,

    /// Status line shown to the table
    #[serde(default)]
    pub status_message: String,

    /// Join time
    pub joined_at: DateTime<Utc>,

    /// Hidden faction
    pub alignment: Alignment,

    /// Executive role, once assigned
    #[serde(default)]
    pub role: Option<Role>,

    /// Secret objective, once assigned
    #[serde(default)]
    pub personal_kpi: Option<PersonalKpi>,

    /// Conversion progress toward ALIGNED
    #[serde(default)]
    pub ai_equity: u32,

    /// Ability spent this night cycle
    #[serde(default)]
    pub has_used_ability: bool,

    /// Mirror of the pending night action
    #[serde(default)]
    pub last_night_action: Option<NightAction>,

    /// Public slack status
    #[serde(default)]
    pub slack_status: String,

    /// Last words shown on elimination
    #[serde(default)]
    pub parting_shot: String,

    /// Active and expired debuffs
    #[serde(default)]
    pub system_shocks: Vec<SystemShock>,
}

impl Player {
    /// Create a new living player.
    pub fn new(id: PlayerId, name: impl Into<String>, tokens: u32, joined_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            job_title: String::new(),
            control_type: ControlType::Human,
            is_alive: true,
            tokens,
            project_milestones: 0,
            status_message: String::new(),
            joined_at,
            alignment: Alignment::Human,
            role: None,
            personal_kpi: None,
            ai_equity: 0,
            has_used_ability: false,
            last_night_action: None,
            slack_status: String::new(),
            parting_shot: String::new(),
            system_shocks: Vec::new(),
        }
    }

    /// Role type, if assigned.
    pub fn role_type(&self) -> Option<RoleType> {
        self.role.as_ref().map(|r| r.role_type)
    }

    /// KPI type, if assigned.
    pub fn kpi_type(&self) -> Option<KpiType> {
        self.personal_kpi.as_ref().map(|k| k.kpi_type)
    }

    /// Whether the player belongs to the AI faction.
    pub fn is_aligned(&self) -> bool {
        self.alignment == Alignment::Aligned
    }

    /// Whether a shock of the given kind is in effect at `now`.
    pub fn has_active_shock(&self, shock_type: ShockType, now: DateTime<Utc>) -> bool {
        self.system_shocks
            .iter()
            .any(|s| s.shock_type == shock_type && s.is_active_at(now))
    }

    /// Add tokens.
    pub fn credit(&mut self, amount: u32) {
        self.tokens = self.tokens.saturating_add(amount);
    }

    /// Remove tokens, clamping at zero.
    pub fn debit(&mut self, amount: u32) {
        self.tokens = self.tokens.saturating_sub(amount);
    }

    /// Apply a signed token delta, clamping at zero.
    pub fn apply_token_delta(&mut self, delta: i64) {
        let next = (i64::from(self.tokens) + delta).clamp(0, i64::from(u32::MAX));
        self.tokens = next as u32;
    }

    /// Hash player state into a hasher.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_str(self.id.as_str());
        hasher.update_bool(self.is_alive);
        hasher.update_u32(self.tokens);
        hasher.update_u32(self.project_milestones);
        hasher.update_str(&self.status_message);
        hasher.update_bool(self.is_aligned());
        hasher.update_opt_str(self.role_type().map(RoleType::as_str));
        hasher.update_bool(self.role.as_ref().map(|r| r.is_unlocked).unwrap_or(false));
        match &self.personal_kpi {
            Some(kpi) => {
                hasher.update_u8(kpi.kpi_type as u8);
                hasher.update_u32(kpi.progress);
                hasher.update_bool(kpi.is_completed);
            }
            None => hasher.update_u8(u8::MAX),
        }
        hasher.update_u32(self.ai_equity);
        hasher.update_bool(self.has_used_ability);
        hasher.update_u32(self.system_shocks.len() as u32);
        for shock in &self.system_shocks {
            hasher.update_u8(shock.shock_type as u8);
            hasher.update_i64(shock.expires_at.timestamp_millis());
            hasher.update_bool(shock.is_active);
        }
    }
}

// =============================================================================
// SETTINGS
// =============================================================================

/// Per-game configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    /// Seats available
    pub max_players: usize,
    /// Players needed to start
    pub min_players: usize,
    /// SITREP length (seconds)
    pub sitrep_secs: u64,
    /// NOMINATION length (seconds)
    pub nomination_secs: u64,
    /// VERDICT length (seconds)
    pub verdict_secs: u64,
    /// EXTENSION length (seconds)
    pub extension_secs: u64,
    /// NIGHT length (seconds)
    pub night_secs: u64,
    /// Tokens each player starts with
    pub starting_tokens: u32,
    /// Fraction of total weight a vote winner needs
    pub voting_threshold: f64,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            max_players: 10,
            min_players: 2,
            sitrep_secs: 15,
            nomination_secs: 30,
            verdict_secs: 30,
            extension_secs: 15,
            night_secs: 30,
            starting_tokens: 1,
            voting_threshold: 0.5,
        }
    }
}

impl GameSettings {
    /// Configured duration of a phase.
    pub fn phase_duration(&self, phase: PhaseType) -> u64 {
        match phase {
            PhaseType::Sitrep => self.sitrep_secs,
            PhaseType::Nomination => self.nomination_secs,
            PhaseType::Verdict => self.verdict_secs,
            PhaseType::Extension => self.extension_secs,
            PhaseType::Night => self.night_secs,
            PhaseType::Lobby | PhaseType::GameOver => 0,
        }
    }
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Complete state of a game.
///
/// Uses BTreeMap for deterministic iteration order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    /// Game identifier
    pub id: GameId,

    /// Current phase
    pub phase: Phase,

    /// Day counter (0 in the lobby, 1 after start, +1 per SITREP)
    pub day_number: u32,

    /// All players
    pub players: BTreeMap<PlayerId, Player>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last applied event
    pub updated_at: DateTime<Utc>,

    /// Game configuration
    pub settings: GameSettings,

    /// Chat log (append-only)
    #[serde(default)]
    pub chat_messages: Vec<ChatMessage>,

    /// Current vote
    #[serde(default)]
    pub vote_state: Option<VoteState>,

    /// Player on trial
    #[serde(default)]
    pub nominated_player: Option<PlayerId>,

    /// Crisis of the day
    #[serde(default)]
    pub crisis_event: Option<CrisisEvent>,

    /// Standing mandate
    #[serde(default)]
    pub corporate_mandate: Option<CorporateMandate>,

    /// Terminal outcome
    #[serde(default)]
    pub win_condition: Option<WinCondition>,

    /// Pending night actions (cleared on resolution)
    #[serde(default)]
    pub night_actions: BTreeMap<PlayerId, SubmittedNightAction>,

    /// Open pulse check
    #[serde(default)]
    pub pulse_check: Option<PulseCheck>,

    /// Crisis queued by a PIVOT for the next SITREP
    #[serde(default)]
    pub next_crisis: Option<String>,

    /// SITREP section hidden by a DEPLOY_HOTFIX
    #[serde(default)]
    pub sitrep_redaction: Option<String>,

    /// Blocked tonight (never persisted)
    #[serde(skip)]
    pub blocked_tonight: BTreeSet<PlayerId>,

    /// Protected tonight (never persisted)
    #[serde(skip)]
    pub protected_tonight: BTreeSet<PlayerId>,
}

impl GameState {
    /// Create a new game in the lobby.
    pub fn new(id: impl Into<GameId>, settings: GameSettings, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            phase: Phase::new(PhaseType::Lobby, created_at, 0),
            day_number: 0,
            players: BTreeMap::new(),
            created_at,
            updated_at: created_at,
            settings,
            chat_messages: Vec::new(),
            vote_state: None,
            nominated_player: None,
            crisis_event: None,
            corporate_mandate: None,
            win_condition: None,
            night_actions: BTreeMap::new(),
            pulse_check: None,
            next_crisis: None,
            sitrep_redaction: None,
            blocked_tonight: BTreeSet::new(),
            protected_tonight: BTreeSet::new(),
        }
    }

    /// Get a player by ID.
    pub fn get_player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    /// Get a mutable player by ID.
    pub fn get_player_mut(&mut self, id: &PlayerId) -> Option<&mut Player> {
        self.players.get_mut(id)
    }

    /// Living players in ID order.
    pub fn alive_players(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(|p| p.is_alive)
    }

    /// (living humans, living AI).
    pub fn alive_counts(&self) -> (usize, usize) {
        self.alive_players().fold((0, 0), |(humans, ai), p| {
            if p.is_aligned() {
                (humans, ai + 1)
            } else {
                (humans + 1, ai)
            }
        })
    }

    /// Check if game has ended.
    pub fn is_over(&self) -> bool {
        self.phase.phase_type == PhaseType::GameOver
    }

    /// Current phase kind.
    pub fn phase_type(&self) -> PhaseType {
        self.phase.phase_type
    }

    /// Compute hash of current state for verification.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(&self.id, self.day_number, |hasher| {
            hasher.update_str(self.phase.phase_type.as_str());
            hasher.update_i64(self.phase.start_time.timestamp_millis());
            hasher.update_u64(self.phase.duration_secs);

            // Players in sorted order (BTreeMap guarantees this)
            hasher.update_u32(self.players.len() as u32);
            for player in self.players.values() {
                player.hash_into(hasher);
            }

            hasher.update_u32(self.chat_messages.len() as u32);
            for msg in &self.chat_messages {
                hasher.update_str(msg.player_id.as_str());
                hasher.update_str(&msg.message);
            }

            match &self.vote_state {
                Some(vote) => {
                    hasher.update_u8(vote.vote_type as u8);
                    for (voter, target) in &vote.votes {
                        hasher.update_str(voter.as_str());
                        hasher.update_str(target.as_str());
                    }
                    for (target, tally) in &vote.results {
                        hasher.update_str(target.as_str());
                        hasher.update_u32(*tally);
                    }
                    hasher.update_bool(vote.is_complete);
                }
                None => hasher.update_u8(u8::MAX),
            }

            hasher.update_opt_str(self.nominated_player.as_ref().map(PlayerId::as_str));
            hasher.update_opt_str(self.crisis_event.as_ref().map(|c| c.crisis_type.as_str()));
            hasher.update_opt_str(self.next_crisis.as_deref());
            hasher.update_opt_str(self.sitrep_redaction.as_deref());
            match &self.corporate_mandate {
                Some(m) => hasher.update_u8(m.mandate_type as u8),
                None => hasher.update_u8(u8::MAX),
            }

            for (player_id, action) in &self.night_actions {
                hasher.update_str(player_id.as_str());
                hasher.update_str(action.action_type.as_str());
                hasher.update_opt_str(action.target_id.as_ref().map(PlayerId::as_str));
            }

            match &self.win_condition {
                Some(win) => {
                    hasher.update_u8(win.winner as u8);
                    hasher.update_u8(win.condition as u8);
                }
                None => hasher.update_u8(u8::MAX),
            }
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
