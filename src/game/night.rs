//! Night Resolution
//!
//! Turns the pending night actions into events, in a fixed order:
//!
//! 1. BLOCK (plus anyone already isolated tonight)
//! 2. PROTECT, for actors who are not blocked
//! 3. CONVERT, for aligned actors who are not blocked
//! 4. MINE, INVESTIGATE and PROJECT_MILESTONES, for actors who are not blocked
//! 5. One NIGHT_ACTIONS_RESOLVED carrying the per-player results
//!
//! Actions within a step run in player ID order. All randomness comes from the
//! deterministic rolls in [`rules`], keyed by player and day.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::game::events::{EventFactory, EventPayload, NightOutcome};
use crate::game::modifiers;
use crate::game::rules::{self, RewardKind};
use crate::game::state::{
    Alignment, GameState, NightActionType, Player, PlayerId, ShockType, SubmittedNightAction,
};

/// Equity every conversion attempt starts from, on top of the target's own.
pub const BASE_CONVERSION_EQUITY: u32 = 30;

/// Equity per point of the crisis `ai_equity_bonus`.
pub const EQUITY_PER_CRISIS_BONUS: u32 = 10;

/// Length of the shock a failed conversion leaves behind.
pub const CONVERSION_SHOCK_HOURS: u32 = 24;

/// Shock text for a failed conversion.
pub const CONVERSION_SHOCK_MESSAGE: &str =
    "System integrity compromised - conversion attempt detected";

/// Working sets for one resolution pass.
struct Night<'a> {
    state: &'a GameState,
    blocked: BTreeSet<PlayerId>,
    protected: BTreeSet<PlayerId>,
    converted: BTreeSet<PlayerId>,
    results: BTreeMap<PlayerId, NightOutcome>,
}

impl<'a> Night<'a> {
    fn new(state: &'a GameState) -> Self {
        Self {
            state,
            blocked: state.blocked_tonight.clone(),
            protected: state.protected_tonight.clone(),
            converted: BTreeSet::new(),
            results: BTreeMap::new(),
        }
    }

    fn actions(&self, action_type: NightActionType) -> Vec<&'a SubmittedNightAction> {
        self.state
            .night_actions
            .values()
            .filter(|a| a.action_type == action_type)
            .filter(|a| {
                self.state
                    .get_player(&a.player_id)
                    .map(|p| p.is_alive)
                    .unwrap_or(false)
            })
            .collect()
    }

    fn outcome(&mut self, player_id: &PlayerId) -> &mut NightOutcome {
        self.results.entry(player_id.clone()).or_default()
    }

    fn status(&mut self, player_id: &PlayerId, status: impl Into<String>) {
        self.outcome(player_id).status_message = Some(status.into());
    }

    /// True (and recorded) when the actor's action is cancelled.
    fn is_blocked(&mut self, actor: &PlayerId) -> bool {
        if self.blocked.contains(actor) {
            self.status(actor, "Action blocked");
            true
        } else {
            false
        }
    }
}

/// Resolve every pending night action into `events`.
pub fn resolve_night(state: &GameState, events: &mut EventFactory) {
    let mut night = Night::new(state);

    resolve_blocks(&mut night, events);
    resolve_protects(&mut night, events);
    resolve_conversions(&mut night, events);
    resolve_standard(&mut night, events);

    let summary = format!(
        "{} night actions resolved: {} blocked, {} protected",
        state.night_actions.len(),
        night.blocked.len(),
        night.protected.len()
    );
    debug!(
        game_id = %state.id,
        day = state.day_number,
        actions = state.night_actions.len(),
        converted = night.converted.len(),
        "Night resolved"
    );

    events.game(EventPayload::NightActionsResolved {
        results: night.results,
        summary,
    });
}

// =============================================================================
// STEPS
// =============================================================================

fn resolve_blocks(night: &mut Night<'_>, events: &mut EventFactory) {
    for action in night.actions(NightActionType::Block) {
        let target = action.effective_target().clone();
        if night.blocked.insert(target.clone()) {
            events.player(
                &target,
                EventPayload::PlayerBlocked {
                    blocked_by: Some(action.player_id.clone()),
                },
            );
        }
        night.status(&action.player_id, format!("Blocked {}", target));
    }
}

fn resolve_protects(night: &mut Night<'_>, events: &mut EventFactory) {
    for action in night.actions(NightActionType::Protect) {
        if night.is_blocked(&action.player_id) {
            continue;
        }
        let target = action.effective_target().clone();
        if night.protected.insert(target.clone()) {
            events.player(
                &target,
                EventPayload::PlayerProtected {
                    protected_by: Some(action.player_id.clone()),
                },
            );
        }
        night.status(&action.player_id, format!("Protected {}", target));
    }
}

fn resolve_conversions(night: &mut Night<'_>, events: &mut EventFactory) {
    let state = night.state;
    let day = state.day_number;

    let veto = if modifiers::crisis_flag(state, "block_ai_conversions") {
        Some("AI conversion blocked by active crisis protocols")
    } else if modifiers::mandate_flag(state, "block_ai_odd_nights") && day % 2 == 1 {
        Some("AI conversion blocked by Security Lockdown Protocol on odd nights")
    } else {
        None
    };
    let crisis_bonus = modifiers::crisis_number(state, "ai_equity_bonus")
        .filter(|b| *b > 0.0)
        .map(|b| b as u32)
        .unwrap_or(0);

    for action in night.actions(NightActionType::Convert) {
        let actor_id = &action.player_id;
        let actor_aligned = state.get_player(actor_id).map(|p| p.is_aligned()).unwrap_or(false);
        if !actor_aligned || night.is_blocked(actor_id) {
            continue;
        }

        if let Some(message) = veto {
            events.player(
                actor_id,
                EventPayload::PrivateNotification {
                    notification_type: "conversion_blocked".to_string(),
                    message: message.to_string(),
                },
            );
            night.status(actor_id, "Conversion blocked");
            continue;
        }

        let target_id = action.effective_target();
        let Some(target) = state.get_player(target_id) else {
            continue;
        };
        if !target.is_alive || target.is_aligned() || night.converted.contains(target_id) {
            continue;
        }

        if night.protected.contains(target_id) {
            events.player(
                actor_id,
                EventPayload::PrivateNotification {
                    notification_type: "conversion_blocked".to_string(),
                    message: "Conversion attempt blocked by protection".to_string(),
                },
            );
            night.status(actor_id, "Conversion foiled");
            continue;
        }

        // The attempt occupies the target for the night
        night.blocked.insert(target_id.clone());

        let ai_equity =
            target.ai_equity + BASE_CONVERSION_EQUITY + EQUITY_PER_CRISIS_BONUS * crisis_bonus;
        events.player(
            actor_id,
            EventPayload::AiConversionAttempt {
                target_id: target_id.clone(),
                ai_equity,
            },
        );

        let probability = rules::conversion_success_probability(target, ai_equity);
        let roll = rules::conversion_roll(target_id, day);
        if roll < probability {
            events.player(target_id, EventPayload::AiConversionSuccess {});
            night.converted.insert(target_id.clone());
            let outcome = night.outcome(target_id);
            outcome.alignment = Some(Alignment::Aligned);
            outcome.ai_equity = Some(0);
        } else {
            events.player(
                target_id,
                EventPayload::AiConversionFailed {
                    shock_message: CONVERSION_SHOCK_MESSAGE.to_string(),
                },
            );
            events.player(
                target_id,
                EventPayload::SystemShockApplied {
                    shock_type: ShockType::ActionLock,
                    description: CONVERSION_SHOCK_MESSAGE.to_string(),
                    duration_hours: CONVERSION_SHOCK_HOURS,
                },
            );
            night.outcome(target_id).ai_equity = Some(0);
        }
        night.status(actor_id, "Conversion attempted");
    }
}

fn resolve_standard(night: &mut Night<'_>, events: &mut EventFactory) {
    let state = night.state;
    let day = state.day_number;

    let mut pending: Vec<&SubmittedNightAction> = state
        .night_actions
        .values()
        .filter(|a| {
            matches!(
                a.action_type,
                NightActionType::Mine
                    | NightActionType::Investigate
                    | NightActionType::ProjectMilestones
            )
        })
        .collect();
    pending.retain(|a| state.get_player(&a.player_id).map(|p| p.is_alive).unwrap_or(false));

    for action in pending {
        let actor_id = &action.player_id;
        if night.is_blocked(actor_id) {
            continue;
        }
        let Some(actor) = state.get_player(actor_id) else {
            continue;
        };

        match action.action_type {
            NightActionType::Mine => {
                let target_id = action.effective_target().clone();
                let probability = mining_probability(state, actor);
                let roll = rules::mining_roll(actor_id, day);
                if roll < probability {
                    let reward = rules::token_reward(RewardKind::Mining, actor, state);
                    night.outcome(&target_id).token_change += i64::from(reward);
                    if target_id == *actor_id {
                        night.status(actor_id, format!("Mined {} token(s)", reward));
                    } else {
                        night.status(actor_id, format!("Mined {} token(s) for {}", reward, target_id));
                    }
                } else {
                    night.status(actor_id, "Mining failed");
                }
            }
            NightActionType::Investigate => {
                let target_id = action.effective_target();
                let Some(target) = state.get_player(target_id) else {
                    continue;
                };
                events.player(
                    actor_id,
                    EventPayload::PlayerInvestigated {
                        target_id: target_id.clone(),
                        result: target.alignment,
                    },
                );
                night.status(actor_id, "Investigation complete");
            }
            NightActionType::ProjectMilestones => {
                let milestone = actor.project_milestones + 1;
                events.player(actor_id, EventPayload::ProjectMilestone { milestone });

                let unlocks = actor
                    .role
                    .as_ref()
                    .filter(|r| !r.is_unlocked)
                    .and_then(|r| r.ability.as_ref());
                if let Some(ability) = unlocks {
                    if milestone >= modifiers::milestones_for_abilities(state) {
                        events.player(
                            actor_id,
                            EventPayload::RoleAbilityUnlocked {
                                ability_name: ability.name.clone(),
                                ability_description: ability.description.clone(),
                            },
                        );
                    }
                }

                let reward = rules::token_reward(RewardKind::ProjectMilestone, actor, state);
                night.outcome(actor_id).token_change += i64::from(reward);
                night.status(actor_id, format!("Completed project milestone {}", milestone));
            }
            _ => {}
        }
    }
}

/// Mining odds after mandate and crisis modifiers, in `[0.1, 0.9]`.
pub fn mining_probability(state: &GameState, player: &Player) -> f64 {
    let base = rules::mining_success_probability(player, modifiers::mining_difficulty(state));
    let mandate = modifiers::mandate_number(state, "mining_success_modifier").unwrap_or(1.0);
    let pool = if modifiers::crisis_flag(state, "reduced_mining_pool") {
        0.5
    } else {
        1.0
    };
    (base * mandate * pool).clamp(0.1, 0.9)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::Event;
    use crate::game::state::{
        Ability, AbilityKind, GameSettings, MandateType, Phase, PhaseType, Role, RoleType,
    };
    use chrono::{DateTime, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    fn game() -> GameState {
        let mut state = GameState::new("g", GameSettings::default(), t0());
        state.phase = Phase::new(PhaseType::Night, t0(), 30);
        state.day_number = 1;
        for id in ["alice", "bob", "carol", "dave", "erin", "frank"] {
            let p = Player::new(id.into(), id, 1, t0());
            state.players.insert(p.id.clone(), p);
        }
        state
    }

    fn give_role(state: &mut GameState, id: &str, role_type: RoleType, unlocked: bool) {
        if let Some(p) = state.get_player_mut(&id.into()) {
            p.role = Some(Role {
                role_type,
                name: role_type.display_name().into(),
                description: String::new(),
                is_unlocked: unlocked,
                ability: AbilityKind::for_role(role_type).map(|k| Ability {
                    name: k.display_name().into(),
                    description: k.description().into(),
                    is_ready: unlocked,
                }),
            });
        }
    }

    fn submit(state: &mut GameState, actor: &str, action_type: NightActionType, target: Option<&str>) {
        state.night_actions.insert(
            actor.into(),
            SubmittedNightAction {
                player_id: actor.into(),
                action_type,
                target_id: target.map(PlayerId::from),
                timestamp: t0(),
            },
        );
    }

    fn resolve(state: &GameState) -> Vec<Event> {
        let mut events = EventFactory::new("g", t0(), "night");
        resolve_night(state, &mut events);
        events.finish()
    }

    fn results(events: &[Event]) -> BTreeMap<PlayerId, NightOutcome> {
        match &events.last().map(|e| &e.payload) {
            Some(EventPayload::NightActionsResolved { results, .. }) => results.clone(),
            other => panic!("expected NIGHT_ACTIONS_RESOLVED, got {:?}", other),
        }
    }

    fn kinds(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.kind()).collect()
    }

    #[test]
    fn test_empty_night_still_resolves() {
        let events = resolve(&game());
        assert_eq!(kinds(&events), vec!["NIGHT_ACTIONS_RESOLVED"]);
        assert!(results(&events).is_empty());
    }

    #[test]
    fn test_mining_rolls() {
        let mut state = game();
        // alice rolls 0.2949, erin 0.6733 against 0.65
        submit(&mut state, "alice", NightActionType::Mine, None);
        submit(&mut state, "erin", NightActionType::Mine, None);

        let r = results(&resolve(&state));
        assert_eq!(r[&PlayerId::new("alice")].token_change, 1);
        assert_eq!(r[&PlayerId::new("erin")].token_change, 0);
        assert_eq!(
            r[&PlayerId::new("erin")].status_message.as_deref(),
            Some("Mining failed")
        );
    }

    #[test]
    fn test_growth_mandate_slows_mining() {
        let mut state = game();
        state.corporate_mandate = Some(modifiers::mandate(MandateType::AggressiveGrowth));
        // 0.65 * 0.75 = 0.4875: bob (0.5557) fails, carol (0.3841) succeeds
        submit(&mut state, "bob", NightActionType::Mine, None);
        submit(&mut state, "carol", NightActionType::Mine, None);

        let r = results(&resolve(&state));
        assert_eq!(r[&PlayerId::new("bob")].token_change, 0);
        assert_eq!(r[&PlayerId::new("carol")].token_change, 1);
    }

    #[test]
    fn test_reduced_pool_halves_odds() {
        let mut state = game();
        state.crisis_event = modifiers::crisis_by_type("MAJOR_SERVICE_OUTAGE");
        assert!((mining_probability(&state, &state.players[&PlayerId::new("alice")]) - 0.325).abs() < 1e-9);

        // alice 0.2949 still under 0.325
        submit(&mut state, "alice", NightActionType::Mine, None);
        assert_eq!(results(&resolve(&state))[&PlayerId::new("alice")].token_change, 1);
    }

    #[test]
    fn test_mining_for_another_player() {
        let mut state = game();
        submit(&mut state, "alice", NightActionType::Mine, Some("bob"));

        let r = results(&resolve(&state));
        assert_eq!(r[&PlayerId::new("bob")].token_change, 1);
        assert_eq!(r[&PlayerId::new("alice")].token_change, 0);
    }

    #[test]
    fn test_block_cancels_mining() {
        let mut state = game();
        give_role(&mut state, "dave", RoleType::Ciso, true);
        submit(&mut state, "dave", NightActionType::Block, Some("alice"));
        submit(&mut state, "alice", NightActionType::Mine, None);

        let events = resolve(&state);
        assert_eq!(kinds(&events), vec!["PLAYER_BLOCKED", "NIGHT_ACTIONS_RESOLVED"]);
        assert_eq!(events[0].player_id, Some("alice".into()));

        let r = results(&events);
        assert_eq!(r[&PlayerId::new("alice")].token_change, 0);
        assert_eq!(
            r[&PlayerId::new("alice")].status_message.as_deref(),
            Some("Action blocked")
        );
    }

    #[test]
    fn test_isolated_player_stays_blocked() {
        let mut state = game();
        state.blocked_tonight.insert("alice".into());
        submit(&mut state, "alice", NightActionType::Mine, None);

        let r = results(&resolve(&state));
        assert_eq!(r[&PlayerId::new("alice")].token_change, 0);
    }

    #[test]
    fn test_blocked_protector_protects_nobody() {
        let mut state = game();
        give_role(&mut state, "dave", RoleType::Ciso, true);
        give_role(&mut state, "erin", RoleType::Ceo, true);
        submit(&mut state, "dave", NightActionType::Block, Some("erin"));
        submit(&mut state, "erin", NightActionType::Protect, Some("carol"));

        let events = resolve(&state);
        assert_eq!(kinds(&events), vec!["PLAYER_BLOCKED", "NIGHT_ACTIONS_RESOLVED"]);
    }

    #[test]
    fn test_conversion_success_and_failure() {
        let mut state = game();
        for id in ["alice", "dave"] {
            if let Some(p) = state.get_player_mut(&id.into()) {
                p.alignment = Alignment::Aligned;
            }
        }
        // Equity 30 gives 0.3: carol rolls 0.1985, bob 0.5431
        submit(&mut state, "alice", NightActionType::Convert, Some("carol"));
        submit(&mut state, "dave", NightActionType::Convert, Some("bob"));

        let events = resolve(&state);
        assert_eq!(
            kinds(&events),
            vec![
                "AI_CONVERSION_ATTEMPT",
                "AI_CONVERSION_SUCCESS",
                "AI_CONVERSION_ATTEMPT",
                "AI_CONVERSION_FAILED",
                "SYSTEM_SHOCK_APPLIED",
                "NIGHT_ACTIONS_RESOLVED",
            ]
        );
        assert_eq!(events[1].player_id, Some("carol".into()));
        assert_eq!(events[4].player_id, Some("bob".into()));

        let r = results(&events);
        assert_eq!(r[&PlayerId::new("carol")].alignment, Some(Alignment::Aligned));
        assert_eq!(r[&PlayerId::new("bob")].alignment, None);
        assert_eq!(r[&PlayerId::new("bob")].ai_equity, Some(0));
    }

    #[test]
    fn test_conversion_target_loses_action() {
        let mut state = game();
        if let Some(p) = state.get_player_mut(&"alice".into()) {
            p.alignment = Alignment::Aligned;
        }
        submit(&mut state, "alice", NightActionType::Convert, Some("carol"));
        submit(&mut state, "carol", NightActionType::Mine, None);

        let r = results(&resolve(&state));
        assert_eq!(r[&PlayerId::new("carol")].token_change, 0);
        assert_eq!(
            r[&PlayerId::new("carol")].status_message.as_deref(),
            Some("Action blocked")
        );
    }

    #[test]
    fn test_protection_foils_conversion() {
        let mut state = game();
        if let Some(p) = state.get_player_mut(&"alice".into()) {
            p.alignment = Alignment::Aligned;
        }
        give_role(&mut state, "erin", RoleType::Ceo, true);
        submit(&mut state, "erin", NightActionType::Protect, Some("carol"));
        submit(&mut state, "alice", NightActionType::Convert, Some("carol"));

        let events = resolve(&state);
        assert_eq!(
            kinds(&events),
            vec!["PLAYER_PROTECTED", "PRIVATE_NOTIFICATION", "NIGHT_ACTIONS_RESOLVED"]
        );
        assert!(results(&events)
            .get(&PlayerId::new("carol"))
            .and_then(|o| o.alignment)
            .is_none());
    }

    #[test]
    fn test_crisis_and_mandate_veto_conversion() {
        let mut state = game();
        if let Some(p) = state.get_player_mut(&"alice".into()) {
            p.alignment = Alignment::Aligned;
        }
        submit(&mut state, "alice", NightActionType::Convert, Some("carol"));

        state.crisis_event = modifiers::crisis_by_type("NIGHTMARE_SCENARIO");
        let events = resolve(&state);
        assert_eq!(kinds(&events), vec!["PRIVATE_NOTIFICATION", "NIGHT_ACTIONS_RESOLVED"]);

        // Lockdown only bites on odd nights
        state.crisis_event = None;
        state.corporate_mandate = Some(modifiers::mandate(MandateType::SecurityLockdown));
        let events = resolve(&state);
        assert_eq!(kinds(&events), vec!["PRIVATE_NOTIFICATION", "NIGHT_ACTIONS_RESOLVED"]);

        // Day 2: carol rolls 0.2158 against 0.3
        state.day_number = 2;
        let events = resolve(&state);
        assert_eq!(events[0].kind(), "AI_CONVERSION_ATTEMPT");
        assert_eq!(events[1].kind(), "AI_CONVERSION_SUCCESS");
    }

    #[test]
    fn test_tainted_data_raises_equity() {
        let mut state = game();
        if let Some(p) = state.get_player_mut(&"alice".into()) {
            p.alignment = Alignment::Aligned;
        }
        state.crisis_event = modifiers::crisis_by_type("TAINTED_TRAINING_DATA");
        submit(&mut state, "alice", NightActionType::Convert, Some("dave"));

        // 30 + 2 * 10 = 50 gives 0.5 against dave's 0.4634
        let events = resolve(&state);
        assert_eq!(
            events[0].payload,
            EventPayload::AiConversionAttempt {
                target_id: "dave".into(),
                ai_equity: 50
            }
        );
        assert_eq!(events[1].kind(), "AI_CONVERSION_SUCCESS");

        // Without the bonus the same roll misses
        state.crisis_event = None;
        assert_eq!(resolve(&state)[1].kind(), "AI_CONVERSION_FAILED");
    }

    #[test]
    fn test_investigate_reports_alignment() {
        let mut state = game();
        give_role(&mut state, "dave", RoleType::Ciso, true);
        if let Some(p) = state.get_player_mut(&"bob".into()) {
            p.alignment = Alignment::Aligned;
        }
        submit(&mut state, "dave", NightActionType::Investigate, Some("bob"));

        let events = resolve(&state);
        assert_eq!(
            events[0].payload,
            EventPayload::PlayerInvestigated {
                target_id: "bob".into(),
                result: Alignment::Aligned
            }
        );
        assert_eq!(events[0].player_id, Some("dave".into()));
    }

    #[test]
    fn test_milestone_unlocks_ability() {
        let mut state = game();
        give_role(&mut state, "frank", RoleType::Coo, false);
        if let Some(p) = state.get_player_mut(&"frank".into()) {
            p.project_milestones = 2;
        }
        submit(&mut state, "frank", NightActionType::ProjectMilestones, None);

        let events = resolve(&state);
        assert_eq!(
            kinds(&events),
            vec!["PROJECT_MILESTONE", "ROLE_ABILITY_UNLOCKED", "NIGHT_ACTIONS_RESOLVED"]
        );
        assert_eq!(results(&events)[&PlayerId::new("frank")].token_change, 1);

        // Lockdown needs a fourth milestone
        state.corporate_mandate = Some(modifiers::mandate(MandateType::SecurityLockdown));
        let events = resolve(&state);
        assert_eq!(kinds(&events), vec!["PROJECT_MILESTONE", "NIGHT_ACTIONS_RESOLVED"]);
    }

    #[test]
    fn test_dead_actors_are_skipped() {
        let mut state = game();
        submit(&mut state, "alice", NightActionType::Mine, None);
        if let Some(p) = state.get_player_mut(&"alice".into()) {
            p.is_alive = false;
        }
        assert!(results(&resolve(&state)).is_empty());
    }
}
