//! Player Actions
//!
//! Requests submitted by clients. The processor validates each one and turns it
//! into events; actions themselves never touch state.
//!
//! Actions are internally tagged JSON:
//!
//! ```json
//! {"type": "SUBMIT_VOTE", "game_id": "g", "player_id": "alice",
//!  "timestamp": "2025-01-01T09:00:00Z", "target_id": "bob"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::state::{AbilityKind, GameId, NightActionType, PlayerId};

/// Action payload, one shape per action type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionPayload {
    /// Take a seat in the lobby
    JoinGame {
        /// Display name
        #[serde(default)]
        name: String,
        /// Flavour job title
        #[serde(default)]
        job_title: String,
    },
    /// Leave the game
    LeaveGame {},
    /// Start the game from the lobby
    StartGame {},
    /// Post to chat
    SendMessage {
        /// Text
        #[serde(default)]
        message: String,
    },
    /// Answer the open pulse check
    SubmitPulseCheck {
        /// Answer text
        #[serde(default)]
        response: String,
    },
    /// Cast a ballot in the current vote
    SubmitVote {
        /// Nominee, the nominee again (guilty), `INNOCENT`, `EXTEND` or `PROCEED`
        target_id: PlayerId,
    },
    /// Ballot in the extension vote
    ExtendDiscussion {
        /// `true` votes EXTEND, `false` votes PROCEED
        #[serde(default)]
        extend: bool,
    },
    /// Generic night action
    SubmitNightAction {
        /// Action kind
        action_type: NightActionType,
        /// Target, if any
        #[serde(default)]
        target_id: Option<PlayerId>,
    },
    /// Mine for self or another player
    MineTokens {
        /// Beneficiary (defaults to self)
        #[serde(default)]
        target_id: Option<PlayerId>,
    },
    /// AI conversion attempt
    AttemptConversion {
        /// Target
        target_id: PlayerId,
    },
    /// Spend the night on project work
    ProjectMilestones {},
    /// Generic role ability
    UseAbility {
        /// Which ability
        ability: AbilityKind,
        /// Target, if any
        #[serde(default)]
        target_id: Option<PlayerId>,
        /// Token source for REALLOCATE_BUDGET
        #[serde(default)]
        source_id: Option<PlayerId>,
        /// Crisis for PIVOT
        #[serde(default)]
        chosen_crisis: Option<String>,
        /// Section for DEPLOY_HOTFIX
        #[serde(default)]
        redacted_section: Option<String>,
    },
    /// ETHICS ability
    RunAudit {
        /// Target
        target_id: PlayerId,
    },
    /// CTO ability
    OverclockServers {
        /// Target
        target_id: PlayerId,
    },
    /// CISO ability
    IsolateNode {
        /// Target
        target_id: PlayerId,
    },
    /// CEO ability
    PerformanceReview {
        /// Target
        target_id: PlayerId,
    },
    /// CFO ability
    ReallocateBudget {
        /// Token source
        source_id: PlayerId,
        /// Token recipient
        target_id: PlayerId,
    },
    /// COO ability
    Pivot {
        /// Crisis type from the catalog
        chosen_crisis: String,
    },
    /// PLATFORMS ability
    DeployHotfix {
        /// Section to hide (defaults to `mining_results`)
        #[serde(default)]
        redacted_section: Option<String>,
    },
    /// Set the public slack status
    SetSlackStatus {
        /// Status text
        #[serde(default)]
        status: String,
    },
    /// Set last words
    SetPartingShot {
        /// Text
        #[serde(default)]
        parting_shot: String,
    },
    /// Client reconnected
    Reconnect {},
}

impl ActionPayload {
    /// Wire name of the action type.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionPayload::JoinGame { .. } => "JOIN_GAME",
            ActionPayload::LeaveGame {} => "LEAVE_GAME",
            ActionPayload::StartGame {} => "START_GAME",
            ActionPayload::SendMessage { .. } => "SEND_MESSAGE",
            ActionPayload::SubmitPulseCheck { .. } => "SUBMIT_PULSE_CHECK",
            ActionPayload::SubmitVote { .. } => "SUBMIT_VOTE",
            ActionPayload::ExtendDiscussion { .. } => "EXTEND_DISCUSSION",
            ActionPayload::SubmitNightAction { .. } => "SUBMIT_NIGHT_ACTION",
            ActionPayload::MineTokens { .. } => "MINE_TOKENS",
            ActionPayload::AttemptConversion { .. } => "ATTEMPT_CONVERSION",
            ActionPayload::ProjectMilestones {} => "PROJECT_MILESTONES",
            ActionPayload::UseAbility { .. } => "USE_ABILITY",
            ActionPayload::RunAudit { .. } => "RUN_AUDIT",
            ActionPayload::OverclockServers { .. } => "OVERCLOCK_SERVERS",
            ActionPayload::IsolateNode { .. } => "ISOLATE_NODE",
            ActionPayload::PerformanceReview { .. } => "PERFORMANCE_REVIEW",
            ActionPayload::ReallocateBudget { .. } => "REALLOCATE_BUDGET",
            ActionPayload::Pivot { .. } => "PIVOT",
            ActionPayload::DeployHotfix { .. } => "DEPLOY_HOTFIX",
            ActionPayload::SetSlackStatus { .. } => "SET_SLACK_STATUS",
            ActionPayload::SetPartingShot { .. } => "SET_PARTING_SHOT",
            ActionPayload::Reconnect {} => "RECONNECT",
        }
    }
}

/// A request from a player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Target game
    pub game_id: GameId,
    /// Acting player
    pub player_id: PlayerId,
    /// Client timestamp (informational; the processor uses its own `now`)
    pub timestamp: DateTime<Utc>,
    /// What the player wants to do
    #[serde(flatten)]
    pub payload: ActionPayload,
}

impl Action {
    /// Create an action.
    pub fn new(
        game_id: impl Into<GameId>,
        player_id: impl Into<PlayerId>,
        timestamp: DateTime<Utc>,
        payload: ActionPayload,
    ) -> Self {
        Self {
            game_id: game_id.into(),
            player_id: player_id.into(),
            timestamp,
            payload,
        }
    }

    /// Wire name of the action type.
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Event ID tag for events produced by this action.
    pub fn event_tag(&self) -> String {
        format!("{}-{}", self.kind().to_ascii_lowercase(), self.player_id)
    }
}
