//! Role Abilities
//!
//! Each executive role carries one night-time ability, unlocked through project
//! milestones and usable once per night. Validation happens here; every
//! outcome (audit result, fizzle, token movement) is embedded in the emitted
//! event so the reducer only applies it.

use chrono::{DateTime, Utc};

use crate::game::events::{EventFactory, EventPayload};
use crate::game::modifiers;
use crate::game::processor::ActionRejection;
use crate::game::rules;
use crate::game::state::{
    AbilityKind, GameState, NightActionType, PhaseType, Player, PlayerId, ShockType,
};

/// Tokens granted to each side by OVERCLOCK_SERVERS.
pub const OVERCLOCK_TOKENS: u32 = 1;

/// Equity pushed onto the target when an aligned CTO overclocks.
pub const OVERCLOCK_EQUITY_BONUS: u32 = 2;

/// Tokens moved by REALLOCATE_BUDGET.
pub const REALLOCATE_AMOUNT: u32 = 1;

/// Section redacted by DEPLOY_HOTFIX when none is named.
pub const DEFAULT_REDACTION: &str = "mining_results";

/// A request to use a role ability.
#[derive(Clone, Debug, PartialEq)]
pub struct AbilityRequest {
    /// Which ability
    pub ability: AbilityKind,
    /// Primary target
    pub target_id: Option<PlayerId>,
    /// Token source (REALLOCATE_BUDGET)
    pub source_id: Option<PlayerId>,
    /// Crisis to queue (PIVOT)
    pub chosen_crisis: Option<String>,
    /// Section to redact (DEPLOY_HOTFIX)
    pub redacted_section: Option<String>,
}

impl AbilityRequest {
    /// Request with only an ability and a target.
    pub fn targeted(ability: AbilityKind, target_id: PlayerId) -> Self {
        Self {
            ability,
            target_id: Some(target_id),
            source_id: None,
            chosen_crisis: None,
            redacted_section: None,
        }
    }

    /// Request with no parameters.
    pub fn bare(ability: AbilityKind) -> Self {
        Self {
            ability,
            target_id: None,
            source_id: None,
            chosen_crisis: None,
            redacted_section: None,
        }
    }
}

/// Resolve a living player other than the actor.
fn other_living<'a>(
    state: &'a GameState,
    actor: &Player,
    target_id: Option<&PlayerId>,
) -> Result<&'a Player, ActionRejection> {
    let target_id = target_id.ok_or(ActionRejection::MissingTarget)?;
    let target = state
        .get_player(target_id)
        .ok_or_else(|| ActionRejection::PlayerNotFound(target_id.clone()))?;
    if target.id == actor.id || !target.is_alive {
        return Err(ActionRejection::InvalidTarget(target_id.clone()));
    }
    Ok(target)
}

/// Validate an ability use and record its events.
pub fn use_ability(
    state: &GameState,
    actor_id: &PlayerId,
    request: &AbilityRequest,
    now: DateTime<Utc>,
    events: &mut EventFactory,
) -> Result<(), ActionRejection> {
    if state.phase_type() != PhaseType::Night {
        return Err(ActionRejection::WrongPhase {
            action: "USE_ABILITY",
            phase: state.phase_type(),
        });
    }

    let actor = state
        .get_player(actor_id)
        .ok_or_else(|| ActionRejection::PlayerNotFound(actor_id.clone()))?;
    if !actor.is_alive {
        return Err(ActionRejection::PlayerEliminated(actor_id.clone()));
    }
    if actor.has_active_shock(ShockType::ActionLock, now) {
        return Err(ActionRejection::ActionLocked);
    }
    if modifiers::crisis_flag(state, "abilities_disabled") {
        return Err(ActionRejection::AbilitiesDisabled);
    }
    if !rules::can_afford_ability(actor, request.ability) {
        return Err(ActionRejection::AbilityUnavailable(request.ability));
    }

    match request.ability {
        AbilityKind::RunAudit => {
            let target = other_living(state, actor, request.target_id.as_ref())?;
            events.player(
                actor_id,
                EventPayload::RunAudit {
                    target_id: target.id.clone(),
                    result: target.alignment,
                },
            );
        }
        AbilityKind::OverclockServers => {
            let target = other_living(state, actor, request.target_id.as_ref())?;
            let ai_equity_bonus = if actor.is_aligned() {
                OVERCLOCK_EQUITY_BONUS
            } else {
                0
            };
            events.player(
                actor_id,
                EventPayload::OverclockServers {
                    target_id: target.id.clone(),
                    tokens_awarded: OVERCLOCK_TOKENS,
                    ai_equity_bonus,
                },
            );
            events.player(
                actor_id,
                EventPayload::TokensAwarded {
                    amount: OVERCLOCK_TOKENS,
                    reason: "Overclock bonus".to_string(),
                },
            );
        }
        AbilityKind::IsolateNode => {
            let target = other_living(state, actor, request.target_id.as_ref())?;
            // The network does not isolate its own nodes
            let fizzled = actor.is_aligned() && target.is_aligned();
            events.player(
                actor_id,
                EventPayload::IsolateNode {
                    target_id: target.id.clone(),
                    fizzled,
                },
            );
        }
        AbilityKind::PerformanceReview => {
            let target = other_living(state, actor, request.target_id.as_ref())?;
            let forced_action = NightActionType::ProjectMilestones;
            events.player(
                actor_id,
                EventPayload::PerformanceReview {
                    target_id: target.id.clone(),
                    forced_action,
                },
            );
            events.player(
                &target.id,
                EventPayload::NightActionSubmitted {
                    action_type: forced_action,
                    target_id: None,
                },
            );
        }
        AbilityKind::ReallocateBudget => {
            let source_id = request.source_id.as_ref().ok_or(ActionRejection::MissingTarget)?;
            let target_id = request.target_id.as_ref().ok_or(ActionRejection::MissingTarget)?;
            let source = state
                .get_player(source_id)
                .ok_or_else(|| ActionRejection::PlayerNotFound(source_id.clone()))?;
            let target = state
                .get_player(target_id)
                .ok_or_else(|| ActionRejection::PlayerNotFound(target_id.clone()))?;
            if source.id == target.id || !source.is_alive || !target.is_alive {
                return Err(ActionRejection::InvalidTarget(target_id.clone()));
            }
            if source.tokens < REALLOCATE_AMOUNT {
                return Err(ActionRejection::InsufficientTokens {
                    player: source_id.clone(),
                });
            }
            events.player(
                actor_id,
                EventPayload::ReallocateBudget {
                    from_player: source.id.clone(),
                    to_player: target.id.clone(),
                    amount: REALLOCATE_AMOUNT,
                },
            );
        }
        AbilityKind::Pivot => {
            let chosen = request
                .chosen_crisis
                .as_deref()
                .ok_or(ActionRejection::MissingTarget)?;
            if modifiers::crisis_by_type(chosen).is_none() {
                return Err(ActionRejection::UnknownCrisis(chosen.to_string()));
            }
            events.player(
                actor_id,
                EventPayload::Pivot {
                    selected_crisis: chosen.to_string(),
                },
            );
        }
        AbilityKind::DeployHotfix => {
            let redaction_target = request
                .redacted_section
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REDACTION.to_string());
            events.player(actor_id, EventPayload::DeployHotfix { redaction_target });
        }
    }

    Ok(())
}
