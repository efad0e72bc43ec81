//! Phase orchestration.
//!
//! [`advance`] is the scheduler's pure step: given a state whose phase has run
//! out, it produces the events that close that phase and open the next one.
//! The caller decides *when* (see `session::GameSession::tick`); this module
//! only decides *what*.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::core::rng::{roll_deterministic, seed_hash};
use crate::game::events::{Event, EventFactory, EventPayload};
use crate::game::kpi;
use crate::game::modifiers;
use crate::game::reducer;
use crate::game::rules;
use crate::game::state::{Alignment, CrisisEvent, GameState, PhaseType, PlayerId, VoteState, VoteType};

/// Chance per day (from day 2) that a random crisis hits.
pub const CRISIS_CHANCE: f64 = 0.5;

/// First day a random crisis may be drawn.
pub const FIRST_CRISIS_DAY: u32 = 2;

/// Discussion phases stretch by this factor under `extended_discussion`.
pub const EXTENDED_DISCUSSION_FACTOR: f64 = 1.5;

/// Sitrep section the hotfix can hide.
pub const MINING_RESULTS_SECTION: &str = "mining_results";

const PULSE_QUESTIONS: [&str; 4] = [
    "What is your immediate concern for the company?",
    "Which department do you trust least right now?",
    "How should leadership communicate during this crisis?",
    "Who is best equipped to handle what comes next?",
];

/// Duration of `phase` after crisis modifiers.
pub fn phase_duration(state: &GameState, phase: PhaseType) -> u64 {
    let mut secs = state.settings.phase_duration(phase) as f64;
    if let Some(factor) = modifiers::crisis_number(state, "reduced_phase_time") {
        if factor > 0.0 && factor < 1.0 {
            secs *= factor;
        }
    }
    if modifiers::crisis_flag(state, "extended_discussion")
        && matches!(phase, PhaseType::Sitrep | PhaseType::Nomination)
    {
        secs *= EXTENDED_DISCUSSION_FACTOR;
    }
    secs.round() as u64
}

/// Close the current phase and open the next.
///
/// Returns no events in LOBBY (the game has not started) and GAME_OVER.
/// Every non-empty batch is followed by a win check on the projected state;
/// a decided game ends with the game-end KPI events and VICTORY_CONDITION.
pub fn advance(state: &GameState, now: DateTime<Utc>) -> Vec<Event> {
    let phase = state.phase_type();
    if matches!(phase, PhaseType::Lobby | PhaseType::GameOver) {
        return Vec::new();
    }

    let tag = format!("advance-{}-d{}", phase.as_str().to_lowercase(), state.day_number);
    let mut events = EventFactory::new(state.id.clone(), now, tag);

    match phase {
        PhaseType::Sitrep => close_sitrep(state, &mut events),
        PhaseType::Nomination => close_nomination(state, &mut events),
        PhaseType::Verdict => close_verdict(state, &mut events),
        PhaseType::Extension => close_extension(state, &mut events),
        PhaseType::Night => close_night(state, &mut events),
        PhaseType::Lobby | PhaseType::GameOver => {}
    }

    let projected = reducer::replay(state, events.events());
    if let Some(win) = rules::check_win_condition(&projected) {
        info!(
            game_id = %state.id,
            winner = ?win.winner,
            condition = ?win.condition,
            day = projected.day_number,
            "Game decided"
        );
        kpi::check_game_end(&projected, &mut events);
        events.game(EventPayload::VictoryCondition {
            winner: win.winner,
            condition: win.condition,
            description: win.description,
        });
    }

    debug!(
        game_id = %state.id,
        from = phase.as_str(),
        events = events.events().len(),
        "Phase advanced"
    );
    events.finish()
}

// =============================================================================
// PER-PHASE STEPS
// =============================================================================

fn change_phase(state: &GameState, next: PhaseType, events: &mut EventFactory) {
    events.game(EventPayload::PhaseChanged {
        phase_type: next,
        duration: phase_duration(state, next),
    });
}

fn current_vote(state: &GameState, vote_type: VoteType) -> VoteState {
    state
        .vote_state
        .clone()
        .filter(|v| v.vote_type == vote_type)
        .unwrap_or_else(|| VoteState::new(vote_type))
}

fn player_name(state: &GameState, id: &PlayerId) -> String {
    state
        .get_player(id)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| id.to_string())
}

fn close_sitrep(state: &GameState, events: &mut EventFactory) {
    if state.pulse_check.as_ref().map(|p| !p.is_revealed).unwrap_or(false) {
        events.game(EventPayload::PulseCheckRevealed {});
    }
    events.game(EventPayload::VoteStarted {
        vote_type: VoteType::Nomination,
    });
    change_phase(state, PhaseType::Nomination, events);
}

fn close_nomination(state: &GameState, events: &mut EventFactory) {
    let vote = current_vote(state, VoteType::Nomination);
    let winner = rules::tally_vote_winner(&vote, modifiers::vote_threshold(state))
        .filter(|id| state.get_player(id).map(|p| p.is_alive).unwrap_or(false));

    match &winner {
        Some(nominee) => {
            events.game(EventPayload::PlayerNominated {
                nominated_player: nominee.clone(),
            });
            events.system_message(format!(
                "{} has been nominated for review",
                player_name(state, nominee)
            ));
        }
        None => {
            events.system_message("No nomination reached the required threshold");
        }
    }

    events.game(EventPayload::VoteCompleted {
        vote_type: VoteType::Nomination,
        winner,
    });
    events.game(EventPayload::VoteStarted {
        vote_type: VoteType::Verdict,
    });
    change_phase(state, PhaseType::Verdict, events);
}

fn close_verdict(state: &GameState, events: &mut EventFactory) {
    let vote = current_vote(state, VoteType::Verdict);
    let winner = rules::tally_vote_winner(&vote, modifiers::vote_threshold(state));

    let guilty = match (&winner, &state.nominated_player) {
        (Some(w), Some(nominee)) => w == nominee,
        _ => false,
    };

    if guilty {
        if let Some(nominee) = state
            .nominated_player
            .as_ref()
            .and_then(|id| state.get_player(id))
            .filter(|p| p.is_alive)
        {
            events.player(
                &nominee.id,
                EventPayload::PlayerEliminated {
                    role_type: nominee.role_type(),
                    alignment: nominee.alignment,
                },
            );
            let faction = match nominee.alignment {
                Alignment::Aligned => "an AI",
                Alignment::Human => "human",
            };
            events.system_message(format!(
                "{} has been let go. They were {}.",
                nominee.name, faction
            ));
            if !nominee.parting_shot.is_empty() {
                events.system_message(format!(
                    "{}'s parting shot: {}",
                    nominee.name, nominee.parting_shot
                ));
            }
            kpi::track_elimination(state, &nominee.id, &vote, events);
        }
    } else if state.nominated_player.is_some() {
        events.system_message("The verdict came back innocent");
    }

    events.game(EventPayload::VoteCompleted {
        vote_type: VoteType::Verdict,
        winner,
    });
    events.game(EventPayload::VoteStarted {
        vote_type: VoteType::Extension,
    });
    change_phase(state, PhaseType::Extension, events);
}

fn close_extension(state: &GameState, events: &mut EventFactory) {
    let vote = current_vote(state, VoteType::Extension);
    let winner = rules::tally_vote_winner(&vote, modifiers::vote_threshold(state));

    // Advisory only: night always follows
    let verdict = match &winner {
        Some(id) if *id == PlayerId::extend() => "more discussion requested",
        Some(id) if *id == PlayerId::proceed() => "proceed to night",
        _ => "no majority",
    };
    events.system_message(format!("Extension vote (advisory): {}", verdict));

    events.game(EventPayload::VoteCompleted {
        vote_type: VoteType::Extension,
        winner,
    });
    change_phase(state, PhaseType::Night, events);
}

fn close_night(state: &GameState, events: &mut EventFactory) {
    let dawn_day = state.day_number + 1;

    crate::game::night::resolve_night(state, events);
    let after_night = reducer::replay(state, events.events());
    kpi::track_night_survival(&after_night, dawn_day, events);

    events.system_message(sitrep_message(state, &after_night, dawn_day));
    change_phase(state, PhaseType::Sitrep, events);

    if let Some(crisis) = draw_crisis(state, dawn_day) {
        info!(game_id = %state.id, day = dawn_day, crisis = %crisis.crisis_type, "Crisis triggered");
        let question = format!("How should we respond to the {}?", crisis.title);
        events.game(EventPayload::CrisisTriggered {
            crisis_type: crisis.crisis_type,
            title: crisis.title,
            description: crisis.description,
            effects: crisis.effects,
        });
        events.game(EventPayload::PulseCheckStarted { question });
    } else {
        let pick = seed_hash(&[&state.id, &dawn_day, &"PULSE"]) as usize % PULSE_QUESTIONS.len();
        events.game(EventPayload::PulseCheckStarted {
            question: PULSE_QUESTIONS[pick].to_string(),
        });
    }
}

/// Pending pivot first, otherwise a deterministic draw from day 2.
fn draw_crisis(state: &GameState, day: u32) -> Option<CrisisEvent> {
    if let Some(chosen) = state.next_crisis.as_deref() {
        return modifiers::crisis_by_type(chosen);
    }
    if day < FIRST_CRISIS_DAY {
        return None;
    }
    if roll_deterministic(&[&state.id, &day, &"CRISIS"]) >= CRISIS_CHANCE {
        return None;
    }
    let catalog = modifiers::crisis_catalog();
    let index = seed_hash(&[&state.id, &day, &"CRISIS_TYPE"]) as usize % catalog.len();
    catalog.into_iter().nth(index)
}

/// Morning briefing. The mining line honours a hotfix redaction.
fn sitrep_message(before: &GameState, after: &GameState, day: u32) -> String {
    let (humans, ai) = after.alive_counts();
    let mined: i64 = after
        .players
        .values()
        .filter_map(|p| {
            before
                .get_player(&p.id)
                .map(|b| i64::from(p.tokens) - i64::from(b.tokens))
        })
        .filter(|delta| *delta > 0)
        .sum();

    let mining = if before.sitrep_redaction.as_deref() == Some(MINING_RESULTS_SECTION) {
        "[REDACTED]".to_string()
    } else {
        format!("{} token(s) produced overnight", mined)
    };

    format!(
        "SITREP Day {}: {} personnel active. Mining: {}",
        day,
        humans + ai,
        mining
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{
        Faction, GameSettings, KpiType, NightActionType, PersonalKpi, Phase, Player, Role, RoleType,
        SubmittedNightAction, WinConditionKind,
    };
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    /// Five humans and one AI, day 1, in the given phase.
    fn game(phase: PhaseType) -> GameState {
        let mut state = GameState::new("g", GameSettings::default(), t0());
        for id in ["alice", "bob", "carol", "dave", "erin", "frank"] {
            let mut p = Player::new(id.into(), id, 1, t0());
            if id == "frank" {
                p.alignment = Alignment::Aligned;
            }
            state.players.insert(p.id.clone(), p);
        }
        state.day_number = 1;
        state.phase = Phase::new(phase, t0(), 30);
        state
    }

    fn with_votes(mut state: GameState, vote_type: VoteType, ballots: &[(&str, &str)]) -> GameState {
        let mut vote = VoteState::new(vote_type);
        for (voter, target) in ballots {
            vote.cast((*voter).into(), (*target).into(), 1);
        }
        state.vote_state = Some(vote);
        state
    }

    fn kinds(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.kind()).collect()
    }

    #[test]
    fn test_lobby_and_game_over_do_nothing() {
        assert!(advance(&game(PhaseType::Lobby), t0()).is_empty());
        assert!(advance(&game(PhaseType::GameOver), t0()).is_empty());
    }

    #[test]
    fn test_phase_cycle_order() {
        let mut state = game(PhaseType::Sitrep);
        let mut seen = Vec::new();
        for _ in 0..5 {
            let events = advance(&state, t0());
            state = reducer::replay(&state, &events);
            seen.push(state.phase_type());
        }
        assert_eq!(
            seen,
            vec![
                PhaseType::Nomination,
                PhaseType::Verdict,
                PhaseType::Extension,
                PhaseType::Night,
                PhaseType::Sitrep,
            ]
        );
        assert_eq!(state.day_number, 2);
    }

    #[test]
    fn test_sitrep_opens_nomination() {
        let events = advance(&game(PhaseType::Sitrep), t0());
        assert_eq!(kinds(&events), vec!["VOTE_STARTED", "PHASE_CHANGED"]);
    }

    #[test]
    fn test_nomination_majority() {
        let state = with_votes(
            game(PhaseType::Nomination),
            VoteType::Nomination,
            &[("alice", "frank"), ("bob", "frank"), ("carol", "frank"), ("frank", "alice")],
        );
        let events = advance(&state, t0());
        assert_eq!(
            kinds(&events),
            vec![
                "PLAYER_NOMINATED",
                "SYSTEM_MESSAGE",
                "VOTE_COMPLETED",
                "VOTE_STARTED",
                "PHASE_CHANGED"
            ]
        );

        let after = reducer::replay(&state, &events);
        assert_eq!(after.nominated_player, Some(PlayerId::new("frank")));
        assert_eq!(after.vote_state.unwrap().vote_type, VoteType::Verdict);
    }

    #[test]
    fn test_nomination_without_threshold() {
        let state = with_votes(
            game(PhaseType::Nomination),
            VoteType::Nomination,
            &[
                ("alice", "bob"),
                ("bob", "carol"),
                ("carol", "dave"),
                ("dave", "erin"),
                ("erin", "frank"),
                ("frank", "alice"),
            ],
        );
        let events = advance(&state, t0());
        assert!(!kinds(&events).contains(&"PLAYER_NOMINATED"));
        let after = reducer::replay(&state, &events);
        assert!(after.nominated_player.is_none());
    }

    #[test]
    fn test_guilty_verdict_eliminates_ai_and_ends_game() {
        let mut state = with_votes(
            game(PhaseType::Verdict),
            VoteType::Verdict,
            &[("alice", "frank"), ("bob", "frank"), ("carol", "frank"), ("dave", "INNOCENT")],
        );
        state.nominated_player = Some("frank".into());

        let events = advance(&state, t0());
        let after = reducer::replay(&state, &events);

        assert!(!after.players[&PlayerId::new("frank")].is_alive);
        assert!(after.is_over());
        let win = after.win_condition.unwrap();
        assert_eq!(win.winner, Faction::Humans);
        assert_eq!(win.condition, WinConditionKind::Containment);
        assert_eq!(events.last().map(|e| e.kind()), Some("VICTORY_CONDITION"));
    }

    #[test]
    fn test_innocent_verdict_keeps_nominee() {
        let mut state = with_votes(
            game(PhaseType::Verdict),
            VoteType::Verdict,
            &[("alice", "INNOCENT"), ("bob", "INNOCENT"), ("carol", "INNOCENT"), ("dave", "frank")],
        );
        state.nominated_player = Some("frank".into());

        let events = advance(&state, t0());
        assert!(!kinds(&events).contains(&"PLAYER_ELIMINATED"));
        let after = reducer::replay(&state, &events);
        assert!(after.players[&PlayerId::new("frank")].is_alive);
        assert_eq!(after.phase_type(), PhaseType::Extension);
    }

    #[test]
    fn test_supermajority_crisis_blocks_simple_majority() {
        // 6 guilty vs 5 innocent: enough for floor(11 * 0.5) = 5, short of floor(11 * 0.66) = 7
        let mut state = game(PhaseType::Verdict);
        let mut vote = VoteState::new(VoteType::Verdict);
        vote.cast("alice".into(), "frank".into(), 3);
        vote.cast("bob".into(), "frank".into(), 2);
        vote.cast("carol".into(), "frank".into(), 1);
        vote.cast("dave".into(), PlayerId::innocent(), 5);
        state.vote_state = Some(vote);
        state.nominated_player = Some("frank".into());

        let events = advance(&state, t0());
        assert!(kinds(&events).contains(&"PLAYER_ELIMINATED"));

        state.crisis_event = modifiers::crisis_by_type("PRESS_LEAK");
        let events = advance(&state, t0());
        assert!(!kinds(&events).contains(&"PLAYER_ELIMINATED"));
    }

    #[test]
    fn test_extension_is_advisory() {
        let state = with_votes(
            game(PhaseType::Extension),
            VoteType::Extension,
            &[("alice", "EXTEND"), ("bob", "EXTEND"), ("carol", "EXTEND"), ("dave", "EXTEND")],
        );
        let events = advance(&state, t0());
        let after = reducer::replay(&state, &events);
        assert_eq!(after.phase_type(), PhaseType::Night);
    }

    #[test]
    fn test_night_resolves_then_dawns() {
        let mut state = game(PhaseType::Night);
        state.night_actions.insert(
            "alice".into(),
            SubmittedNightAction {
                player_id: "alice".into(),
                action_type: NightActionType::Mine,
                target_id: None,
                timestamp: t0(),
            },
        );

        let events = advance(&state, t0());
        let k = kinds(&events);
        let resolved = k.iter().position(|k| *k == "NIGHT_ACTIONS_RESOLVED").unwrap();
        let dawn = k.iter().position(|k| *k == "PHASE_CHANGED").unwrap();
        assert!(resolved < dawn);
        assert!(k.contains(&"PULSE_CHECK_STARTED"));

        let after = reducer::replay(&state, &events);
        assert_eq!(after.day_number, 2);
        assert_eq!(after.phase_type(), PhaseType::Sitrep);
        assert!(after.night_actions.is_empty());
        // alice's day-1 mining roll (.2949) is under 0.65
        assert_eq!(after.players[&PlayerId::new("alice")].tokens, 2);
        assert!(after.pulse_check.is_some());
    }

    #[test]
    fn test_pivot_crisis_always_triggers() {
        let mut state = game(PhaseType::Night);
        state.next_crisis = Some("NIGHTMARE_SCENARIO".into());

        let events = advance(&state, t0());
        let after = reducer::replay(&state, &events);
        assert_eq!(
            after.crisis_event.map(|c| c.crisis_type),
            Some("NIGHTMARE_SCENARIO".to_string())
        );
        assert!(after.next_crisis.is_none());
    }

    #[test]
    fn test_no_random_crisis_on_first_dawn() {
        let mut state = game(PhaseType::Night);
        state.day_number = 0;
        let events = advance(&state, t0());
        assert!(!kinds(&events).contains(&"CRISIS_TRIGGERED"));
    }

    #[test]
    fn test_crisis_draw_is_deterministic() {
        let state = game(PhaseType::Night);
        let a = draw_crisis(&state, 3).map(|c| c.crisis_type);
        let b = draw_crisis(&state, 3).map(|c| c.crisis_type);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hotfix_redacts_mining() {
        let mut state = game(PhaseType::Night);
        state.sitrep_redaction = Some(MINING_RESULTS_SECTION.into());

        let events = advance(&state, t0());
        let briefing = events
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::SystemMessage { message } if message.starts_with("SITREP") => {
                    Some(message.clone())
                }
                _ => None,
            })
            .unwrap();
        assert!(briefing.contains("[REDACTED]"));

        let after = reducer::replay(&state, &events);
        assert!(after.sitrep_redaction.is_none());
    }

    #[test]
    fn test_guardian_progress_at_dawn() {
        let mut state = game(PhaseType::Night);
        if let Some(p) = state.get_player_mut(&"alice".into()) {
            p.role = Some(Role {
                role_type: RoleType::Ciso,
                name: String::new(),
                description: String::new(),
                is_unlocked: false,
                ability: None,
            });
        }
        if let Some(p) = state.get_player_mut(&"bob".into()) {
            let (description, target, reward) = kpi::kpi_terms(KpiType::Guardian);
            p.personal_kpi = Some(PersonalKpi {
                kpi_type: KpiType::Guardian,
                description: description.into(),
                progress: 0,
                target,
                is_completed: false,
                reward: reward.into(),
            });
        }

        let events = advance(&state, t0());
        let after = reducer::replay(&state, &events);
        let kpi = after.players[&PlayerId::new("bob")].personal_kpi.clone().unwrap();
        assert_eq!(kpi.progress, 2);
    }

    #[test]
    fn test_day_limit_ends_game() {
        let mut state = game(PhaseType::Night);
        state.day_number = rules::DAY_LIMIT - 1;

        let events = advance(&state, t0());
        let after = reducer::replay(&state, &events);
        assert!(after.is_over());
        assert_eq!(after.win_condition.unwrap().winner, Faction::Humans);
    }

    #[test]
    fn test_phase_duration_modifiers() {
        let mut state = game(PhaseType::Sitrep);
        assert_eq!(phase_duration(&state, PhaseType::Night), 30);

        state.crisis_event = modifiers::crisis_by_type("VENDOR_SECURITY_BREACH");
        assert_eq!(phase_duration(&state, PhaseType::Night), 23);

        state.crisis_event = modifiers::crisis_by_type("REGULATORY_REVIEW");
        assert_eq!(phase_duration(&state, PhaseType::Nomination), 45);
        assert_eq!(phase_duration(&state, PhaseType::Night), 30);
    }
}
