//! Personal KPI tracking.
//!
//! Each helper inspects the state *before* the triggering events apply and
//! records progress/completion events (plus token rewards) into the factory.

use crate::game::events::{EventFactory, EventPayload};
use crate::game::rules::{self, RewardKind};
use crate::game::state::{GameState, KpiType, Player, PlayerId, RoleType, VoteState};

/// KPIs in assignment order.
pub const KPI_ORDER: [KpiType; 5] = [
    KpiType::Capitalist,
    KpiType::Guardian,
    KpiType::Inquisitor,
    KpiType::SuccessionPlanner,
    KpiType::Scapegoat,
];

/// Tokens per correct vote paid on Inquisitor completion.
pub const INQUISITOR_TOKENS_PER_VOTE: u32 = 2;

/// Description, target, and reward text of a KPI.
pub fn kpi_terms(kpi_type: KpiType) -> (&'static str, u32, &'static str) {
    match kpi_type {
        KpiType::Capitalist => (
            "End the game with the most tokens",
            1,
            "Alternate win condition: Win if you have the most tokens",
        ),
        KpiType::Guardian => (
            "Keep the CISO alive until Day 4",
            4,
            "Alternate win condition: Win if CISO survives to Day 4",
        ),
        KpiType::Inquisitor => (
            "Vote correctly on elimination votes 3 times",
            3,
            "Gain 2 extra tokens for each correct vote",
        ),
        KpiType::SuccessionPlanner => (
            "End the game with exactly 2 humans alive",
            1,
            "Alternate win condition: Win if exactly 2 humans remain",
        ),
        KpiType::Scapegoat => (
            "Get eliminated by unanimous vote",
            1,
            "Alternate win condition: Win if eliminated unanimously",
        ),
    }
}

fn open_kpi(player: &Player, kpi_type: KpiType) -> bool {
    player
        .personal_kpi
        .as_ref()
        .map(|k| k.kpi_type == kpi_type && !k.is_completed)
        .unwrap_or(false)
}

fn complete(state: &GameState, player: &Player, kpi_type: KpiType, events: &mut EventFactory) {
    events.player(
        &player.id,
        EventPayload::KpiCompleted {
            kpi_type: Some(kpi_type),
        },
    );
    let amount = rules::token_reward(RewardKind::KpiCompleted, player, state);
    events.player(
        &player.id,
        EventPayload::TokensAwarded {
            amount,
            reason: format!("{:?} KPI completed", kpi_type),
        },
    );
}

/// KPI consequences of a vote-out.
///
/// Inquisitors who are human and voted against an aligned player progress.
/// A unanimous elimination of a Scapegoat completes their objective.
pub fn track_elimination(
    state: &GameState,
    eliminated_id: &PlayerId,
    vote: &VoteState,
    events: &mut EventFactory,
) {
    let Some(eliminated) = state.get_player(eliminated_id) else {
        return;
    };

    if eliminated.is_aligned() {
        for (voter_id, target) in &vote.votes {
            if target != eliminated_id {
                continue;
            }
            let Some(voter) = state.get_player(voter_id) else {
                continue;
            };
            if voter.is_aligned() || !open_kpi(voter, KpiType::Inquisitor) {
                continue;
            }
            let Some(kpi) = &voter.personal_kpi else {
                continue;
            };

            let progress = kpi.progress + 1;
            events.player(voter_id, EventPayload::KpiProgress { progress });
            if progress >= kpi.target {
                events.player(
                    voter_id,
                    EventPayload::KpiCompleted {
                        kpi_type: Some(KpiType::Inquisitor),
                    },
                );
                events.player(
                    voter_id,
                    EventPayload::TokensAwarded {
                        amount: progress * INQUISITOR_TOKENS_PER_VOTE,
                        reason: "Inquisitor KPI completion bonus".to_string(),
                    },
                );
            }
        }
    }

    if open_kpi(eliminated, KpiType::Scapegoat) && rules::check_scapegoat_kpi(eliminated, vote) {
        complete(state, eliminated, KpiType::Scapegoat, events);
    }
}

/// Guardian progress once a night passes with the CISO alive.
///
/// `dawn_day` is the day about to begin.
pub fn track_night_survival(state: &GameState, dawn_day: u32, events: &mut EventFactory) {
    let ciso_alive = state
        .alive_players()
        .any(|p| p.role_type() == Some(RoleType::Ciso));
    if !ciso_alive {
        return;
    }

    for player in state.players.values() {
        if !open_kpi(player, KpiType::Guardian) {
            continue;
        }
        let Some(kpi) = &player.personal_kpi else {
            continue;
        };
        events.player(&player.id, EventPayload::KpiProgress { progress: dawn_day });
        if dawn_day >= kpi.target {
            complete(state, player, KpiType::Guardian, events);
        }
    }
}

/// Objectives judged when the game ends.
pub fn check_game_end(state: &GameState, events: &mut EventFactory) {
    let (humans, _) = state.alive_counts();

    // Ties keep the smallest ID
    let richest = state.alive_players().fold(None::<&Player>, |best, p| match best {
        Some(b) if b.tokens >= p.tokens => Some(b),
        _ => Some(p),
    });

    for player in state.players.values() {
        if humans == 2 && open_kpi(player, KpiType::SuccessionPlanner) {
            complete(state, player, KpiType::SuccessionPlanner, events);
        }
        if open_kpi(player, KpiType::Capitalist) && richest.map(|r| r.id == player.id).unwrap_or(false)
        {
            complete(state, player, KpiType::Capitalist, events);
        }
    }
}
