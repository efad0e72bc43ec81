//! State Reducer
//!
//! `apply(state, event) -> state'`: the only legal way a [`GameState`] changes.
//!
//! # Determinism
//!
//! The reducer is total and pure:
//! - Never reads the clock (expiries are computed from the event timestamp)
//! - Never rolls dice (outcomes arrive embedded in the payload)
//! - Iterates only BTreeMap/BTreeSet
//!
//! Events that reference a missing player, or that arrive after GAME_OVER and
//! are not in the terminal whitelist, leave the state unchanged and report
//! [`ApplyOutcome::Ignored`].

use chrono::Duration;
use tracing::{debug, warn};

use crate::game::events::{Event, EventPayload, NightOutcome};
use crate::game::modifiers;
use crate::game::rules;
use crate::game::state::{
    Ability, AbilityKind, Alignment, ChatMessage, CorporateMandate, CrisisEvent, GameState,
    PersonalKpi, Phase, PhaseType, Player, PlayerId, PulseCheck, Role, SubmittedNightAction,
    NightAction, SystemShock, VoteState, VoteType, WinCondition,
};

/// Display name of the game's own chat voice.
pub const SYSTEM_NAME: &str = "Loebmate";

/// Whether an event changed the state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Handler ran
    Applied,
    /// State passed through untouched
    Ignored,
}

/// Apply one event.
pub fn apply(state: GameState, event: &Event) -> GameState {
    apply_with_outcome(state, event).0
}

/// Apply one event and report whether it took effect.
pub fn apply_with_outcome(mut state: GameState, event: &Event) -> (GameState, ApplyOutcome) {
    let outcome = apply_mut(&mut state, event);
    (state, outcome)
}

/// In-place form of [`apply`], for owners that keep a long-lived state.
pub fn apply_mut(state: &mut GameState, event: &Event) -> ApplyOutcome {
    #[cfg(feature = "debug-tracing")]
    tracing::trace!(
        game_id = %state.id,
        event_id = %event.id,
        kind = event.kind(),
        player = ?event.player_id,
        "Applying event"
    );

    if state.is_over() && !applies_after_game_over(&event.payload) {
        debug!(game_id = %state.id, kind = event.kind(), "Ignoring event after game over");
        return ApplyOutcome::Ignored;
    }

    let outcome = apply_in_place(state, event);
    if outcome == ApplyOutcome::Applied {
        state.updated_at = event.timestamp;
    }
    outcome
}

/// Fold a sequence of events over an initial state.
pub fn replay<'a, I>(initial: &GameState, events: I) -> GameState
where
    I: IntoIterator<Item = &'a Event>,
{
    events
        .into_iter()
        .fold(initial.clone(), |state, event| apply(state, event))
}

/// Events still meaningful once the game is decided.
fn applies_after_game_over(payload: &EventPayload) -> bool {
    matches!(
        payload,
        EventPayload::ChatMessage { .. }
            | EventPayload::SystemMessage { .. }
            | EventPayload::PrivateNotification { .. }
            | EventPayload::SlackStatusChanged { .. }
            | EventPayload::PartingShotSet { .. }
            | EventPayload::PlayerReconnected {}
            | EventPayload::PlayerDisconnected {}
            | EventPayload::GameEnded { .. }
            | EventPayload::VictoryCondition { .. }
    )
}

// =============================================================================
// DISPATCH
// =============================================================================

fn apply_in_place(state: &mut GameState, event: &Event) -> ApplyOutcome {
    use ApplyOutcome::{Applied, Ignored};

    let ts = event.timestamp;

    match &event.payload {
        // ----- lifecycle -----
        EventPayload::GameCreated {} => Applied,
        EventPayload::GameStarted {} => {
            state.phase = Phase::new(PhaseType::Sitrep, ts, state.settings.sitrep_secs);
            state.day_number = 1;
            Applied
        }
        EventPayload::GameEnded { .. } => {
            state.phase = Phase::new(PhaseType::GameOver, ts, 0);
            Applied
        }
        EventPayload::PhaseChanged {
            phase_type,
            duration,
        } => {
            state.phase = Phase::new(*phase_type, ts, *duration);
            if *phase_type == PhaseType::Sitrep {
                state.day_number += 1;
                state.sitrep_redaction = None;
            }
            Applied
        }
        EventPayload::DayStarted { day_number } => {
            state.day_number = *day_number;
            state.phase = Phase::new(PhaseType::Sitrep, ts, state.settings.sitrep_secs);
            Applied
        }
        EventPayload::NightStarted {} => {
            state.phase = Phase::new(PhaseType::Night, ts, state.settings.night_secs);
            Applied
        }

        // ----- players -----
        EventPayload::PlayerJoined { name, job_title } => {
            let Some(id) = &event.player_id else {
                return Ignored;
            };
            if state.players.contains_key(id) {
                return Ignored;
            }
            let mut player = Player::new(id.clone(), name.clone(), state.settings.starting_tokens, ts);
            player.job_title = job_title.clone();
            state.players.insert(id.clone(), player);
            Applied
        }
        EventPayload::PlayerLeft {} => with_player(state, event, |p| p.is_alive = false),
        EventPayload::PlayerEliminated {
            role_type,
            alignment,
        } => with_player(state, event, |p| {
            p.is_alive = false;
            p.alignment = *alignment;
            if let (None, Some(role_type)) = (&p.role, role_type) {
                p.role = Some(Role {
                    role_type: *role_type,
                    name: role_type.display_name().to_string(),
                    description: role_type.description().to_string(),
                    is_unlocked: false,
                    ability: AbilityKind::for_role(*role_type).map(|kind| Ability {
                        name: kind.display_name().to_string(),
                        description: kind.description().to_string(),
                        is_ready: false,
                    }),
                });
            }
        }),
        EventPayload::PlayerAligned {} => with_player(state, event, |p| {
            p.alignment = Alignment::Aligned;
            p.status_message.clear();
        }),
        EventPayload::PlayerShocked { shock_message } => {
            with_player(state, event, |p| p.status_message = shock_message.clone())
        }
        EventPayload::PlayerStatusChanged { status } => {
            with_player(state, event, |p| p.status_message = status.clone())
        }
        EventPayload::PlayerReconnected {} | EventPayload::PlayerDisconnected {} => Applied,

        // ----- roles -----
        EventPayload::RoleAssigned {
            role_type,
            role_name,
            role_description,
            ability_name,
            ability_description,
            kpi_type,
            kpi_description,
            kpi_target,
            kpi_reward,
            alignment,
        } => {
            let eligible = event
                .player_id
                .as_ref()
                .and_then(|id| state.get_player(id))
                .map(rules::is_player_eligible_for_role)
                .unwrap_or(false);
            if !eligible {
                return Ignored;
            }
            with_player(state, event, |p| {
                p.role = Some(Role {
                    role_type: *role_type,
                    name: role_name.clone(),
                    description: role_description.clone(),
                    is_unlocked: false,
                    ability: ability_name.as_ref().map(|name| Ability {
                        name: name.clone(),
                        description: ability_description.clone(),
                        is_ready: false,
                    }),
                });
                p.personal_kpi = kpi_type.map(|kpi_type| PersonalKpi {
                    kpi_type,
                    description: kpi_description.clone(),
                    progress: 0,
                    target: *kpi_target,
                    is_completed: false,
                    reward: kpi_reward.clone(),
                });
                p.alignment = *alignment;
            })
        }
        EventPayload::RoleAbilityUnlocked { .. } => with_player(state, event, unlock_role),
        EventPayload::ProjectMilestone { milestone } => {
            let threshold = modifiers::milestones_for_abilities(state);
            with_player(state, event, |p| {
                p.project_milestones = *milestone;
                if *milestone >= threshold {
                    unlock_role(p);
                }
            })
        }

        // ----- voting -----
        EventPayload::VoteStarted { vote_type } => {
            state.vote_state = Some(VoteState::new(*vote_type));
            if *vote_type == VoteType::Nomination {
                state.nominated_player = None;
            }
            Applied
        }
        EventPayload::VoteCast {
            target_id,
            vote_type,
        } => {
            if target_id.as_str().is_empty() {
                debug!(event_id = %event.id, "Ballot without a target ignored");
                return Ignored;
            }
            let Some(voter) = event.player_id.as_ref().and_then(|id| state.get_player(id)) else {
                return Ignored;
            };
            let (voter_id, weight) = (voter.id.clone(), voter.tokens);
            state
                .vote_state
                .get_or_insert_with(|| VoteState::new(*vote_type))
                .cast(voter_id, target_id.clone(), weight);
            Applied
        }
        EventPayload::VoteCompleted { .. } => match state.vote_state.as_mut() {
            Some(vote) => {
                vote.is_complete = true;
                Applied
            }
            None => Ignored,
        },
        EventPayload::PlayerNominated { nominated_player } => {
            state.nominated_player = Some(nominated_player.clone());
            Applied
        }

        // ----- economy -----
        EventPayload::TokensAwarded { amount, .. } => with_player(state, event, |p| p.credit(*amount)),
        EventPayload::TokensLost { amount, .. } => with_player(state, event, |p| p.debit(*amount)),
        EventPayload::MiningSuccessful { amount } => with_player(state, event, |p| p.credit(*amount)),
        EventPayload::MiningFailed { reason } => with_player(state, event, |p| {
            p.status_message = if reason.is_empty() {
                "Mining attempt failed".to_string()
            } else {
                format!("Mining failed: {}", reason)
            };
        }),
        EventPayload::MiningPoolUpdated {
            difficulty,
            base_reward,
        } => {
            let Some(crisis) = state.crisis_event.as_mut() else {
                return Ignored;
            };
            if let Some(difficulty) = difficulty {
                crisis
                    .effects
                    .insert("mining_difficulty".to_string(), serde_json::json!(difficulty));
            }
            if let Some(base_reward) = base_reward {
                crisis
                    .effects
                    .insert("mining_base_reward".to_string(), serde_json::json!(base_reward));
            }
            Applied
        }
        EventPayload::TokensDistributed { distribution } => {
            for (id, amount) in distribution {
                if let Some(p) = state.get_player_mut(id) {
                    p.credit(*amount);
                }
            }
            Applied
        }

        // ----- night -----
        EventPayload::NightActionSubmitted {
            action_type,
            target_id,
        } => {
            let Some(id) = event.player_id.clone() else {
                return Ignored;
            };
            let Some(player) = state.get_player_mut(&id) else {
                return Ignored;
            };
            player.last_night_action = Some(NightAction {
                action_type: *action_type,
                target_id: target_id.clone(),
            });
            state.night_actions.insert(
                id.clone(),
                SubmittedNightAction {
                    player_id: id,
                    action_type: *action_type,
                    target_id: target_id.clone(),
                    timestamp: ts,
                },
            );
            Applied
        }
        EventPayload::NightActionsResolved { results, .. } => {
            state.blocked_tonight.clear();
            state.protected_tonight.clear();
            for (id, outcome) in results {
                if let Some(p) = state.get_player_mut(id) {
                    apply_night_outcome(p, outcome);
                }
            }
            for p in state.players.values_mut() {
                p.has_used_ability = false;
                p.last_night_action = None;
            }
            state.night_actions.clear();
            Applied
        }
        EventPayload::PlayerBlocked { blocked_by } => {
            let outcome = with_player(state, event, |p| {
                p.status_message = match blocked_by {
                    Some(by) => format!("Action blocked by {}", by),
                    None => "Action blocked".to_string(),
                };
            });
            if let (Applied, Some(id)) = (outcome, &event.player_id) {
                state.blocked_tonight.insert(id.clone());
            }
            outcome
        }
        EventPayload::PlayerProtected { protected_by } => {
            let outcome = with_player(state, event, |p| {
                p.status_message = match protected_by {
                    Some(by) => format!("Protected by {}", by),
                    None => "Protected".to_string(),
                };
            });
            if let (Applied, Some(id)) = (outcome, &event.player_id) {
                state.protected_tonight.insert(id.clone());
            }
            outcome
        }
        EventPayload::PlayerInvestigated { .. } => {
            with_player(state, event, |p| p.has_used_ability = true)
        }

        // ----- AI -----
        EventPayload::AiConversionAttempt {
            target_id,
            ai_equity,
        } => match state.get_player_mut(target_id) {
            Some(target) => {
                target.ai_equity = *ai_equity;
                Applied
            }
            None => Ignored,
        },
        EventPayload::AiConversionSuccess {} => with_player(state, event, |p| {
            p.alignment = Alignment::Aligned;
            p.status_message = "Conversion successful".to_string();
            p.ai_equity = 0;
        }),
        EventPayload::AiConversionFailed { shock_message } => with_player(state, event, |p| {
            p.status_message = if shock_message.is_empty() {
                "System shock: conversion failed".to_string()
            } else {
                shock_message.clone()
            };
            p.ai_equity = 0;
        }),
        EventPayload::AiEquityChanged {
            ai_equity_change,
            new_ai_equity,
        } => with_player(state, event, |p| {
            p.ai_equity = match new_ai_equity {
                Some(value) => *value,
                None => (i64::from(p.ai_equity) + ai_equity_change).clamp(0, i64::from(u32::MAX))
                    as u32,
            };
        }),
        EventPayload::EquityThreshold { threshold, action } => with_player(state, event, |p| {
            p.status_message = format!("AI Equity threshold {} reached - {}", threshold, action);
        }),

        // ----- communication -----
        EventPayload::ChatMessage {
            player_name,
            message,
            is_system,
        } => {
            state.chat_messages.push(ChatMessage {
                id: event.id.clone(),
                player_id: event.player_id.clone().unwrap_or_else(PlayerId::system),
                player_name: player_name.clone(),
                message: message.clone(),
                timestamp: ts,
                is_system: *is_system,
            });
            Applied
        }
        EventPayload::SystemMessage { message } => {
            state.chat_messages.push(ChatMessage {
                id: event.id.clone(),
                player_id: PlayerId::system(),
                player_name: SYSTEM_NAME.to_string(),
                message: message.clone(),
                timestamp: ts,
                is_system: true,
            });
            Applied
        }
        EventPayload::PrivateNotification { .. } => Applied,

        // ----- crisis -----
        EventPayload::CrisisTriggered {
            crisis_type,
            title,
            description,
            effects,
        } => {
            state.crisis_event = Some(CrisisEvent {
                crisis_type: crisis_type.clone(),
                title: title.clone(),
                description: description.clone(),
                effects: effects.clone(),
            });
            state.next_crisis = None;
            Applied
        }
        EventPayload::PulseCheckStarted { question } => {
            state.pulse_check = Some(PulseCheck {
                question: question.clone(),
                ..PulseCheck::default()
            });
            Applied
        }
        EventPayload::PulseCheckSubmitted { response } => {
            match (state.pulse_check.as_mut(), &event.player_id) {
                (Some(pulse), Some(id)) => {
                    pulse.responses.insert(id.clone(), response.clone());
                    Applied
                }
                _ => Ignored,
            }
        }
        EventPayload::PulseCheckRevealed {} => match state.pulse_check.as_mut() {
            Some(pulse) => {
                pulse.is_revealed = true;
                Applied
            }
            None => Ignored,
        },

        // ----- mandate -----
        EventPayload::MandateActivated {
            mandate_type,
            name,
            description,
            effects,
        } => {
            state.corporate_mandate = Some(CorporateMandate {
                mandate_type: *mandate_type,
                name: name.clone(),
                description: description.clone(),
                effects: effects.clone(),
                is_active: true,
            });
            Applied
        }
        EventPayload::MandateEffect { effects } => match state.corporate_mandate.as_mut() {
            Some(mandate) => {
                for (key, value) in effects {
                    mandate.effects.insert(key.clone(), value.clone());
                }
                Applied
            }
            None => Ignored,
        },

        // ----- shocks -----
        EventPayload::SystemShockApplied {
            shock_type,
            description,
            duration_hours,
        } => with_player(state, event, |p| {
            p.system_shocks.push(SystemShock {
                shock_type: *shock_type,
                description: description.clone(),
                expires_at: ts + Duration::hours(i64::from(*duration_hours)),
                is_active: true,
            });
        }),
        EventPayload::ShockEffectTriggered {
            effect_type,
            description,
        } => with_player(state, event, |p| {
            let detail = if description.is_empty() {
                effect_type
            } else {
                description
            };
            p.status_message = format!("System shock: {}", detail);
        }),

        // ----- KPI -----
        EventPayload::KpiProgress { progress } => with_player(state, event, |p| {
            if let Some(kpi) = p.personal_kpi.as_mut() {
                kpi.progress = *progress;
            }
        }),
        EventPayload::KpiCompleted { .. } => with_player(state, event, |p| {
            if let Some(kpi) = p.personal_kpi.as_mut() {
                kpi.is_completed = true;
            }
        }),

        // ----- role abilities -----
        EventPayload::RunAudit { target_id, .. } => {
            use_ability(state, event, format!("Audited {}", target_id))
        }
        EventPayload::OverclockServers {
            target_id,
            tokens_awarded,
            ai_equity_bonus,
        } => {
            let outcome = use_ability(state, event, "Servers overclocked".to_string());
            if outcome == Applied {
                if let Some(target) = state.get_player_mut(target_id) {
                    target.credit(*tokens_awarded);
                    target.ai_equity = target.ai_equity.saturating_add(*ai_equity_bonus);
                }
            }
            outcome
        }
        EventPayload::IsolateNode { target_id, fizzled } => {
            let status = if *fizzled {
                "Isolation attempt fizzled".to_string()
            } else {
                format!("Isolated {}", target_id)
            };
            let outcome = use_ability(state, event, status);
            if outcome == Applied && !*fizzled {
                if let Some(target) = state.get_player_mut(target_id) {
                    target.status_message = "Isolated from the network".to_string();
                    state.blocked_tonight.insert(target_id.clone());
                }
            }
            outcome
        }
        EventPayload::PerformanceReview {
            target_id,
            forced_action,
        } => {
            let outcome = use_ability(state, event, format!("Reviewed {}", target_id));
            if outcome == Applied {
                if let Some(target) = state.get_player_mut(target_id) {
                    target.status_message = format!(
                        "Under performance review: assigned to {}",
                        forced_action.as_str()
                    );
                }
            }
            outcome
        }
        EventPayload::ReallocateBudget {
            from_player,
            to_player,
            amount,
        } => {
            let outcome = use_ability(state, event, "Budget reallocated".to_string());
            if outcome == Applied {
                let moved = state
                    .get_player(from_player)
                    .map(|p| p.tokens.min(*amount))
                    .unwrap_or(0);
                if state.players.contains_key(to_player) {
                    if let Some(from) = state.get_player_mut(from_player) {
                        from.debit(moved);
                    }
                    if let Some(to) = state.get_player_mut(to_player) {
                        to.credit(moved);
                    }
                }
            }
            outcome
        }
        EventPayload::Pivot { selected_crisis } => {
            let outcome = use_ability(state, event, "Strategic pivot planned".to_string());
            if outcome == Applied {
                state.next_crisis = Some(selected_crisis.clone());
            }
            outcome
        }
        EventPayload::DeployHotfix { redaction_target } => {
            let outcome = use_ability(state, event, "Hotfix deployed".to_string());
            if outcome == Applied {
                state.sitrep_redaction = Some(redaction_target.clone());
            }
            outcome
        }

        // ----- status -----
        EventPayload::SlackStatusChanged { status } => {
            with_player(state, event, |p| p.slack_status = status.clone())
        }
        EventPayload::PartingShotSet { parting_shot } => {
            with_player(state, event, |p| p.parting_shot = parting_shot.clone())
        }

        // ----- victory -----
        EventPayload::VictoryCondition {
            winner,
            condition,
            description,
        } => {
            state.win_condition = Some(WinCondition {
                winner: *winner,
                condition: *condition,
                description: description.clone(),
            });
            state.phase = Phase::new(PhaseType::GameOver, ts, 0);
            Applied
        }

        EventPayload::Unknown { kind, .. } => {
            warn!(game_id = %state.id, kind = %kind, event_id = %event.id, "Unknown event type ignored");
            Ignored
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Run `f` on the event's subject player.
fn with_player<F>(state: &mut GameState, event: &Event, f: F) -> ApplyOutcome
where
    F: FnOnce(&mut Player),
{
    let player = event
        .player_id
        .as_ref()
        .and_then(|id| state.players.get_mut(id));
    match player {
        Some(p) => {
            f(p);
            ApplyOutcome::Applied
        }
        None => {
            debug!(
                game_id = %state.id,
                kind = event.kind(),
                player = ?event.player_id,
                "Event for unknown player ignored"
            );
            ApplyOutcome::Ignored
        }
    }
}

/// Mark the actor's ability spent and set their status.
fn use_ability(state: &mut GameState, event: &Event, status: String) -> ApplyOutcome {
    with_player(state, event, |p| {
        p.has_used_ability = true;
        p.status_message = status;
    })
}

fn unlock_role(player: &mut Player) {
    if let Some(role) = player.role.as_mut() {
        role.is_unlocked = true;
        if let Some(ability) = role.ability.as_mut() {
            ability.is_ready = true;
        }
    }
}

fn apply_night_outcome(player: &mut Player, outcome: &NightOutcome) {
    player.apply_token_delta(outcome.token_change);
    if let Some(status) = &outcome.status_message {
        player.status_message = status.clone();
    }
    if let Some(alignment) = outcome.alignment {
        player.alignment = alignment;
    }
    if let Some(ai_equity) = outcome.ai_equity {
        player.ai_equity = ai_equity;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::EventFactory;
    use crate::game::state::{
        Faction, GameSettings, KpiType, MandateType, NightActionType, RoleType, ShockType,
        WinConditionKind,
    };
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    fn factory() -> EventFactory {
        EventFactory::new("g", t0(), "test")
    }

    fn joined(names: &[&str]) -> GameState {
        let mut f = factory();
        for name in names {
            f.player(
                &(*name).into(),
                EventPayload::PlayerJoined {
                    name: name.to_string(),
                    job_title: String::new(),
                },
            );
        }
        replay(&GameState::new("g", GameSettings::default(), t0()), &f.finish())
    }

    fn one(state: GameState, player: Option<&str>, payload: EventPayload) -> GameState {
        let mut f = factory();
        let event = f.make(player.map(PlayerId::from), payload);
        apply(state, &event)
    }

    fn player<'a>(state: &'a GameState, id: &str) -> &'a Player {
        &state.players[&PlayerId::new(id)]
    }

    #[test]
    fn test_player_joined_defaults() {
        let state = joined(&["alice"]);
        let alice = player(&state, "alice");

        assert!(alice.is_alive);
        assert_eq!(alice.tokens, 1);
        assert_eq!(alice.alignment, Alignment::Human);
        assert_eq!(alice.control_type, crate::game::state::ControlType::Human);
    }

    #[test]
    fn test_duplicate_join_ignored() {
        let state = joined(&["alice"]);
        let state = one(state, Some("alice"), EventPayload::TokensAwarded { amount: 4, reason: String::new() });

        let mut f = factory();
        let rejoin = f.make(
            Some("alice".into()),
            EventPayload::PlayerJoined {
                name: "Alice again".into(),
                job_title: String::new(),
            },
        );
        let (state, outcome) = apply_with_outcome(state, &rejoin);
        assert_eq!(outcome, ApplyOutcome::Ignored);
        assert_eq!(player(&state, "alice").tokens, 5);
    }

    #[test]
    fn test_phase_changed_counts_days() {
        let state = joined(&["alice"]);
        let state = one(state, None, EventPayload::GameStarted {});
        assert_eq!(state.day_number, 1);
        assert_eq!(state.phase_type(), PhaseType::Sitrep);

        let state = one(
            state,
            None,
            EventPayload::PhaseChanged {
                phase_type: PhaseType::Night,
                duration: 30,
            },
        );
        assert_eq!(state.day_number, 1);

        let state = one(
            state,
            None,
            EventPayload::PhaseChanged {
                phase_type: PhaseType::Sitrep,
                duration: 15,
            },
        );
        assert_eq!(state.day_number, 2);
        assert_eq!(state.phase.duration_secs, 15);
    }

    #[test]
    fn test_vote_cast_recomputes() {
        let state = joined(&["alice", "bob", "carol"]);
        let state = one(state, Some("alice"), EventPayload::TokensAwarded { amount: 2, reason: String::new() });
        let cast = |state, voter: &str, target: &str| {
            one(
                state,
                Some(voter),
                EventPayload::VoteCast {
                    target_id: target.into(),
                    vote_type: VoteType::Nomination,
                },
            )
        };

        let state = cast(state, "alice", "carol");
        let state = cast(state, "bob", "carol");
        let vote = state.vote_state.clone().unwrap();
        assert_eq!(vote.results[&PlayerId::new("carol")], 4);
        assert_eq!(vote.token_weights[&PlayerId::new("alice")], 3);

        let state = cast(state, "alice", "bob");
        let vote = state.vote_state.clone().unwrap();
        assert_eq!(vote.results[&PlayerId::new("carol")], 1);
        assert_eq!(vote.results[&PlayerId::new("bob")], 3);
    }

    #[test]
    fn test_ballot_without_target_ignored() {
        let state = joined(&["alice", "bob"]);
        let mut f = factory();
        let ballot = f.make(
            Some("alice".into()),
            EventPayload::from_parts("VOTE_CAST", json!({"vote_type": "VERDICT"})),
        );

        let (after, outcome) = apply_with_outcome(state.clone(), &ballot);
        assert_eq!(outcome, ApplyOutcome::Ignored);
        assert_eq!(after.vote_state, None);
        assert_eq!(after, state);
    }

    #[test]
    fn test_vote_started_replaces() {
        let state = joined(&["alice", "bob"]);
        let state = one(
            state,
            Some("alice"),
            EventPayload::VoteCast {
                target_id: "bob".into(),
                vote_type: VoteType::Nomination,
            },
        );
        let state = one(state, None, EventPayload::VoteStarted { vote_type: VoteType::Verdict });

        let vote = state.vote_state.unwrap();
        assert_eq!(vote.vote_type, VoteType::Verdict);
        assert!(vote.votes.is_empty());
    }

    #[test]
    fn test_elimination_reveals() {
        let state = joined(&["alice"]);
        let state = one(
            state,
            Some("alice"),
            EventPayload::PlayerEliminated {
                role_type: Some(RoleType::Ciso),
                alignment: Alignment::Human,
            },
        );

        let alice = player(&state, "alice");
        assert!(!alice.is_alive);
        assert_eq!(alice.role_type(), Some(RoleType::Ciso));
        assert_eq!(alice.alignment, Alignment::Human);
    }

    #[test]
    fn test_role_assigned_once() {
        let assign = |role_type| EventPayload::RoleAssigned {
            role_type,
            role_name: role_type.display_name().into(),
            role_description: String::new(),
            ability_name: AbilityKind::for_role(role_type).map(|a| a.display_name().to_string()),
            ability_description: String::new(),
            kpi_type: Some(KpiType::Guardian),
            kpi_description: String::new(),
            kpi_target: 4,
            kpi_reward: String::new(),
            alignment: Alignment::Aligned,
        };

        let state = joined(&["alice"]);
        let state = one(state, Some("alice"), assign(RoleType::Cto));
        let alice = player(&state, "alice");
        assert_eq!(alice.role_type(), Some(RoleType::Cto));
        assert!(!alice.role.as_ref().unwrap().is_unlocked);
        assert_eq!(alice.personal_kpi.as_ref().unwrap().target, 4);
        assert!(alice.is_aligned());

        let state = one(state, Some("alice"), assign(RoleType::Ceo));
        assert_eq!(player(&state, "alice").role_type(), Some(RoleType::Cto));
    }

    #[test]
    fn test_milestone_unlock_threshold() {
        let mut state = joined(&["alice"]);
        if let Some(p) = state.get_player_mut(&"alice".into()) {
            p.role = Some(Role {
                role_type: RoleType::Cfo,
                name: String::new(),
                description: String::new(),
                is_unlocked: false,
                ability: Some(Ability {
                    name: "Reallocate Budget".into(),
                    description: String::new(),
                    is_ready: false,
                }),
            });
        }

        let state = one(state, Some("alice"), EventPayload::ProjectMilestone { milestone: 2 });
        assert!(!player(&state, "alice").role.as_ref().unwrap().is_unlocked);

        let state = one(state, Some("alice"), EventPayload::ProjectMilestone { milestone: 3 });
        let role = player(&state, "alice").role.clone().unwrap();
        assert!(role.is_unlocked);
        assert!(role.ability.unwrap().is_ready);

        // Lockdown raises the bar
        let mut locked = joined(&["bob"]);
        locked.corporate_mandate = Some(modifiers::mandate(MandateType::SecurityLockdown));
        if let Some(p) = locked.get_player_mut(&"bob".into()) {
            p.role = Some(Role {
                role_type: RoleType::Cfo,
                name: String::new(),
                description: String::new(),
                is_unlocked: false,
                ability: None,
            });
        }
        let locked = one(locked, Some("bob"), EventPayload::ProjectMilestone { milestone: 3 });
        assert!(!player(&locked, "bob").role.as_ref().unwrap().is_unlocked);
    }

    #[test]
    fn test_night_resolution_clears_state() {
        let mut state = joined(&["alice", "bob"]);
        for p in state.players.values_mut() {
            p.has_used_ability = true;
            p.last_night_action = Some(NightAction {
                action_type: NightActionType::Mine,
                target_id: None,
            });
        }
        state.night_actions.insert(
            "alice".into(),
            SubmittedNightAction {
                player_id: "alice".into(),
                action_type: NightActionType::Mine,
                target_id: None,
                timestamp: t0(),
            },
        );
        state.blocked_tonight.insert("bob".into());
        state.protected_tonight.insert("alice".into());

        let mut results = BTreeMap::new();
        results.insert(
            PlayerId::new("alice"),
            NightOutcome {
                token_change: -5,
                status_message: Some("Rough night".into()),
                alignment: Some(Alignment::Aligned),
                ai_equity: Some(0),
            },
        );
        let state = one(
            state,
            None,
            EventPayload::NightActionsResolved {
                results,
                summary: String::new(),
            },
        );

        assert!(state.night_actions.is_empty());
        assert!(state.blocked_tonight.is_empty());
        assert!(state.protected_tonight.is_empty());
        for p in state.players.values() {
            assert!(!p.has_used_ability);
            assert!(p.last_night_action.is_none());
        }
        let alice = player(&state, "alice");
        assert_eq!(alice.tokens, 0);
        assert_eq!(alice.status_message, "Rough night");
        assert!(alice.is_aligned());
    }

    #[test]
    fn test_block_and_protect_union() {
        let state = joined(&["alice", "bob"]);
        let blocked = || EventPayload::PlayerBlocked {
            blocked_by: Some("bob".into()),
        };
        let state = one(state, Some("alice"), blocked());
        let state = one(state, Some("alice"), blocked());
        assert_eq!(state.blocked_tonight.len(), 1);
        assert_eq!(player(&state, "alice").status_message, "Action blocked by bob");

        let state = one(state, Some("bob"), EventPayload::PlayerProtected { protected_by: None });
        assert!(state.protected_tonight.contains(&PlayerId::new("bob")));
        assert_eq!(player(&state, "bob").status_message, "Protected");
    }

    #[test]
    fn test_conversion_outcomes_reset_equity() {
        let state = joined(&["alice", "bob"]);
        let state = one(
            state,
            Some("alice"),
            EventPayload::AiConversionAttempt {
                target_id: "bob".into(),
                ai_equity: 40,
            },
        );
        assert_eq!(player(&state, "bob").ai_equity, 40);

        let failed = one(
            state.clone(),
            Some("bob"),
            EventPayload::AiConversionFailed {
                shock_message: "zap".into(),
            },
        );
        let bob = player(&failed, "bob");
        assert_eq!(bob.ai_equity, 0);
        assert_eq!(bob.alignment, Alignment::Human);
        assert_eq!(bob.status_message, "zap");

        let converted = one(state, Some("bob"), EventPayload::AiConversionSuccess {});
        let bob = player(&converted, "bob");
        assert_eq!(bob.ai_equity, 0);
        assert!(bob.is_aligned());
        assert_eq!(bob.status_message, "Conversion successful");
    }

    #[test]
    fn test_shock_expiry_from_event_time() {
        let state = joined(&["alice"]);
        let state = one(
            state,
            Some("alice"),
            EventPayload::SystemShockApplied {
                shock_type: ShockType::ForcedSilence,
                description: "muted".into(),
                duration_hours: 2,
            },
        );

        let shock = &player(&state, "alice").system_shocks[0];
        assert_eq!(shock.expires_at, t0() + Duration::hours(2));
        assert!(shock.is_active);
    }

    #[test]
    fn test_system_message_author() {
        let state = joined(&[]);
        let state = one(state, None, EventPayload::SystemMessage { message: "Welcome".into() });

        let msg = &state.chat_messages[0];
        assert_eq!(msg.player_id, PlayerId::system());
        assert_eq!(msg.player_name, "Loebmate");
        assert!(msg.is_system);
    }

    #[test]
    fn test_mandate_effect_merges() {
        let state = one(
            joined(&[]),
            None,
            EventPayload::MandateActivated {
                mandate_type: MandateType::TotalTransparency,
                name: "T".into(),
                description: String::new(),
                effects: modifiers::mandate(MandateType::TotalTransparency).effects,
            },
        );
        let mut effects = BTreeMap::new();
        effects.insert("public_voting_only".to_string(), json!(false));
        effects.insert("extra".to_string(), json!(1));
        let state = one(state, None, EventPayload::MandateEffect { effects });

        let fx = &state.corporate_mandate.unwrap().effects;
        assert_eq!(fx["public_voting_only"], json!(false));
        assert_eq!(fx["no_direct_messages"], json!(true));
        assert_eq!(fx["extra"], json!(1));
    }

    #[test]
    fn test_crisis_consumes_pivot() {
        let state = joined(&["carol"]);
        let state = one(
            state,
            Some("carol"),
            EventPayload::Pivot {
                selected_crisis: "PRESS_LEAK".into(),
            },
        );
        assert_eq!(state.next_crisis.as_deref(), Some("PRESS_LEAK"));
        assert!(player(&state, "carol").has_used_ability);

        let crisis = modifiers::crisis_by_type("PRESS_LEAK").unwrap();
        let state = one(
            state,
            None,
            EventPayload::CrisisTriggered {
                crisis_type: crisis.crisis_type,
                title: crisis.title,
                description: crisis.description,
                effects: crisis.effects,
            },
        );
        assert!(state.next_crisis.is_none());
        assert!(modifiers::crisis_flag(&state, "supermajority_required"));
    }

    #[test]
    fn test_ability_side_effects() {
        let state = joined(&["alice", "bob", "carol"]);

        let state = one(
            state,
            Some("alice"),
            EventPayload::OverclockServers {
                target_id: "bob".into(),
                tokens_awarded: 1,
                ai_equity_bonus: 2,
            },
        );
        assert_eq!(player(&state, "bob").tokens, 2);
        assert_eq!(player(&state, "bob").ai_equity, 2);

        let state = one(
            state,
            Some("carol"),
            EventPayload::IsolateNode {
                target_id: "bob".into(),
                fizzled: false,
            },
        );
        assert!(state.blocked_tonight.contains(&PlayerId::new("bob")));

        // Source has 1 token: only 1 moves
        let state = one(
            state,
            Some("carol"),
            EventPayload::ReallocateBudget {
                from_player: "alice".into(),
                to_player: "carol".into(),
                amount: 3,
            },
        );
        assert_eq!(player(&state, "alice").tokens, 0);
        assert_eq!(player(&state, "carol").tokens, 2);

        let state = one(
            state,
            Some("alice"),
            EventPayload::DeployHotfix {
                redaction_target: "mining_results".into(),
            },
        );
        assert_eq!(state.sitrep_redaction.as_deref(), Some("mining_results"));
    }

    #[test]
    fn test_terminal_guard() {
        let state = joined(&["alice"]);
        let state = one(
            state,
            None,
            EventPayload::VictoryCondition {
                winner: Faction::Humans,
                condition: WinConditionKind::Containment,
                description: "done".into(),
            },
        );
        assert!(state.is_over());

        let mut f = factory();
        let award = f.make(
            Some("alice".into()),
            EventPayload::TokensAwarded {
                amount: 5,
                reason: String::new(),
            },
        );
        let (state, outcome) = apply_with_outcome(state, &award);
        assert_eq!(outcome, ApplyOutcome::Ignored);
        assert_eq!(player(&state, "alice").tokens, 1);

        let chat = f.make(
            Some("alice".into()),
            EventPayload::ChatMessage {
                player_name: "alice".into(),
                message: "gg".into(),
                is_system: false,
            },
        );
        let (state, outcome) = apply_with_outcome(state, &chat);
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(state.chat_messages.len(), 1);
    }

    #[test]
    fn test_unknown_event_is_noop() {
        let state = joined(&["alice"]);
        let mut f = factory();
        let event = f.make(
            None,
            EventPayload::Unknown {
                kind: "QUARTERLY_BONUS".into(),
                payload: json!({"amount": 5}),
            },
        );

        let (after, outcome) = apply_with_outcome(state.clone(), &event);
        assert_eq!(outcome, ApplyOutcome::Ignored);
        assert_eq!(after, state);
    }

    #[test]
    fn test_missing_player_ignored() {
        let state = joined(&["alice"]);
        let mut f = factory();
        let event = f.make(
            Some("ghost".into()),
            EventPayload::TokensAwarded {
                amount: 1,
                reason: String::new(),
            },
        );
        let (after, outcome) = apply_with_outcome(state.clone(), &event);
        assert_eq!(outcome, ApplyOutcome::Ignored);
        assert_eq!(after, state);
    }

    // =========================================================================
    // PROPERTIES
    // =========================================================================

    fn token_event() -> impl Strategy<Value = EventPayload> {
        prop_oneof![
            (0u32..20).prop_map(|amount| EventPayload::TokensAwarded {
                amount,
                reason: String::new()
            }),
            (0u32..20).prop_map(|amount| EventPayload::TokensLost {
                amount,
                reason: String::new()
            }),
            (0u32..5).prop_map(|amount| EventPayload::MiningSuccessful { amount }),
            (-10i64..10).prop_map(|token_change| {
                let mut results = BTreeMap::new();
                results.insert(
                    PlayerId::new("bob"),
                    NightOutcome {
                        token_change,
                        ..NightOutcome::default()
                    },
                );
                EventPayload::NightActionsResolved {
                    results,
                    summary: String::new(),
                }
            }),
        ]
    }

    fn build_events(payloads: Vec<(bool, EventPayload)>) -> Vec<Event> {
        let mut f = factory();
        for (is_alice, payload) in payloads {
            let who: PlayerId = if is_alice { "alice".into() } else { "bob".into() };
            f.player(&who, payload);
        }
        f.finish()
    }

    proptest! {
        #[test]
        fn prop_token_floor(payloads in prop::collection::vec((any::<bool>(), token_event()), 0..40)) {
            let mut state = joined(&["alice", "bob"]);
            let mut expected: BTreeMap<PlayerId, i64> =
                [(PlayerId::new("alice"), 1), (PlayerId::new("bob"), 1)].into_iter().collect();

            for event in build_events(payloads) {
                let actor = event.player_id.clone().unwrap_or_default();
                match &event.payload {
                    EventPayload::TokensAwarded { amount, .. }
                    | EventPayload::MiningSuccessful { amount } => {
                        *expected.entry(actor).or_default() += i64::from(*amount);
                    }
                    EventPayload::TokensLost { amount, .. } => {
                        let balance = expected.entry(actor).or_default();
                        *balance = (*balance - i64::from(*amount)).max(0);
                    }
                    EventPayload::NightActionsResolved { results, .. } => {
                        for (id, outcome) in results {
                            let balance = expected.entry(id.clone()).or_default();
                            *balance = (*balance + outcome.token_change).max(0);
                        }
                    }
                    _ => {}
                }

                state = apply(state, &event);
                for (id, balance) in &expected {
                    prop_assert_eq!(i64::from(state.players[id].tokens), *balance);
                }
            }
        }

        #[test]
        fn prop_replay_split_matches_full(
            payloads in prop::collection::vec((any::<bool>(), token_event()), 0..30),
            split in 0usize..30,
        ) {
            let initial = joined(&["alice", "bob"]);
            let events = build_events(payloads);
            let k = split.min(events.len());

            let full = replay(&initial, &events);
            let resumed = replay(&replay(&initial, &events[..k]), &events[k..]);
            prop_assert_eq!(full.compute_hash(), resumed.compute_hash());
            prop_assert_eq!(full, resumed);
        }
    }
}
