//! Rules Engine
//!
//! Pure predicates and scoring functions. Nothing here reads the clock or
//! mutates state; every time-dependent rule takes `now` explicitly. All
//! functions are safe to call concurrently on shared snapshots.

use chrono::{DateTime, Utc};

use crate::core::rng::roll_deterministic;
use crate::game::modifiers;
use crate::game::state::{
    AbilityKind, Faction, GameState, KpiType, NightActionType, Phase, PhaseType, Player,
    PlayerId, RoleType, ShockType, VoteState, WinCondition, WinConditionKind,
};

/// Day on which the game is forced to a decision.
pub const DAY_LIMIT: u32 = 7;

/// Chance a message is garbled while under MESSAGE_CORRUPTION.
pub const MESSAGE_CORRUPTION_CHANCE: f64 = 0.25;

/// Minimum ballots for a Scapegoat elimination to count.
pub const SCAPEGOAT_MIN_BALLOTS: usize = 3;

// =============================================================================
// ELIGIBILITY
// =============================================================================

fn is_silenced(player: &Player, now: DateTime<Utc>) -> bool {
    player.has_active_shock(ShockType::ForcedSilence, now)
}

/// Whether the player may vote in the given phase.
pub fn can_vote(player: &Player, phase: PhaseType, now: DateTime<Utc>) -> bool {
    if !player.is_alive || is_silenced(player, now) {
        return false;
    }
    matches!(
        phase,
        PhaseType::Nomination | PhaseType::Verdict | PhaseType::Extension
    )
}

/// Whether the player may post to chat.
pub fn can_send_message(player: &Player, now: DateTime<Utc>) -> bool {
    player.is_alive && !is_silenced(player, now)
}

/// Whether the player may submit the given night action.
pub fn can_use_night_action(player: &Player, action: NightActionType, now: DateTime<Utc>) -> bool {
    if !player.is_alive || player.has_active_shock(ShockType::ActionLock, now) {
        return false;
    }

    match action {
        NightActionType::Convert if player.is_aligned() => true,
        NightActionType::Mine | NightActionType::ProjectMilestones => true,
        _ => {
            let Some(role) = &player.role else {
                return false;
            };
            if !role.is_unlocked || player.has_used_ability {
                return false;
            }
            match role.role_type {
                RoleType::Ciso => matches!(
                    action,
                    NightActionType::Investigate | NightActionType::Block
                ),
                RoleType::Ceo => action == NightActionType::Protect,
                _ => false,
            }
        }
    }
}

/// Whether the player can spend their role ability right now.
pub fn can_afford_ability(player: &Player, ability: AbilityKind) -> bool {
    let Some(role) = &player.role else {
        return false;
    };
    if !role.is_unlocked || player.has_used_ability {
        return false;
    }
    if AbilityKind::for_role(role.role_type) != Some(ability) {
        return false;
    }
    role.ability.as_ref().map(|a| a.is_ready).unwrap_or(false)
}

/// Whether `target` is a legal target of `actor`'s night action.
pub fn is_valid_night_target(actor: &Player, target: &Player, action: NightActionType) -> bool {
    let self_target_allowed = matches!(
        action,
        NightActionType::Mine | NightActionType::ProjectMilestones
    );
    if actor.id == target.id && !self_target_allowed {
        return false;
    }
    if !target.is_alive {
        return false;
    }
    !(action == NightActionType::Convert && target.is_aligned())
}

/// A role can be assigned only once.
pub fn is_player_eligible_for_role(player: &Player) -> bool {
    player.role.is_none()
}

/// Whether the phase's duration has elapsed. Advisory, for the scheduler.
pub fn is_phase_over(phase: &Phase, now: DateTime<Utc>) -> bool {
    phase.is_over(now)
}

// =============================================================================
// VOTING
// =============================================================================

/// Determine the winner of a vote.
///
/// `required = floor(total_weight * threshold)`. Candidates are ranked by tally
/// (descending) then ID (ascending); the first reaching `required` wins.
pub fn tally_vote_winner(vote: &VoteState, threshold: f64) -> Option<PlayerId> {
    let required = (vote.total_weight() as f64 * threshold).floor() as u64;

    let mut ranked: Vec<(&PlayerId, u32)> = vote.results.iter().map(|(id, t)| (id, *t)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    ranked
        .into_iter()
        .find(|(_, tally)| u64::from(*tally) >= required)
        .map(|(id, _)| id.clone())
}

/// Whether the eliminated player earned the Scapegoat objective.
pub fn check_scapegoat_kpi(eliminated: &Player, vote: &VoteState) -> bool {
    if eliminated.kpi_type() != Some(KpiType::Scapegoat) {
        return false;
    }
    vote.votes.len() >= SCAPEGOAT_MIN_BALLOTS && vote.votes.values().all(|t| *t == eliminated.id)
}

// =============================================================================
// WIN CONDITIONS
// =============================================================================

/// Evaluate victory in strict priority order. `None` means play continues.
pub fn check_win_condition(state: &GameState) -> Option<WinCondition> {
    let (humans, ai) = state.alive_counts();

    // Succession Planner beats everything
    if humans == 2 {
        let planner = state.alive_players().find(|p| {
            !p.is_aligned() && p.kpi_type() == Some(KpiType::SuccessionPlanner)
        });
        if let Some(planner) = planner {
            return Some(WinCondition {
                winner: Faction::Humans,
                condition: WinConditionKind::SuccessionPlanner,
                description: format!(
                    "{} achieved succession plan with exactly 2 humans remaining",
                    planner.name
                ),
            });
        }
    }

    if ai > 0 && ai >= humans {
        return Some(WinCondition {
            winner: Faction::Ai,
            condition: WinConditionKind::Singularity,
            description: "AI has achieved majority control".to_string(),
        });
    }

    if ai == 0 && humans > 0 {
        return Some(WinCondition {
            winner: Faction::Humans,
            condition: WinConditionKind::Containment,
            description: "All AI threats have been contained".to_string(),
        });
    }

    if state.day_number >= DAY_LIMIT {
        return Some(if humans > ai {
            WinCondition {
                winner: Faction::Humans,
                condition: WinConditionKind::Containment,
                description: "Humans maintained control through time limit".to_string(),
            }
        } else {
            WinCondition {
                winner: Faction::Ai,
                condition: WinConditionKind::Singularity,
                description: "AI survived to time limit".to_string(),
            }
        });
    }

    None
}

// =============================================================================
// PROBABILITIES
// =============================================================================

/// Chance a mining attempt succeeds, in `[0.1, 0.9]`.
pub fn mining_success_probability(player: &Player, difficulty: f64) -> f64 {
    let token_bonus = (f64::from(player.tokens) * 0.05).min(0.3);
    let milestone_bonus = (f64::from(player.project_milestones) * 0.1).min(0.3);
    (0.6 + token_bonus + milestone_bonus - difficulty).clamp(0.1, 0.9)
}

/// Resistance a role gives against conversion.
pub fn role_resistance(role: Option<RoleType>) -> f64 {
    match role {
        Some(RoleType::Ciso) => 0.3,
        Some(RoleType::Ethics) => 0.25,
        Some(RoleType::Ceo) => 0.2,
        Some(_) => 0.1,
        None => 0.0,
    }
}

/// Chance a conversion attempt succeeds, in `[0.05, 0.8]`.
pub fn conversion_success_probability(target: &Player, ai_equity: u32) -> f64 {
    let wealth_penalty = if target.tokens >= 5 { 0.1 } else { 0.0 };
    (f64::from(ai_equity) / 100.0 - role_resistance(target.role_type()) - wealth_penalty)
        .clamp(0.05, 0.8)
}

/// Mining roll for a player on a day.
pub fn mining_roll(player_id: &PlayerId, day: u32) -> f64 {
    roll_deterministic(&[player_id, &day, &"MINE"])
}

/// Conversion roll for a target on a day.
pub fn conversion_roll(target_id: &PlayerId, day: u32) -> f64 {
    roll_deterministic(&[target_id, &day, &"CONVERSION"])
}

/// Corruption roll for a message.
pub fn message_roll(content: &str, player_id: &PlayerId) -> f64 {
    roll_deterministic(&[&content, player_id])
}

/// Whether a message comes out garbled.
pub fn is_message_corrupted(player: &Player, content: &str, now: DateTime<Utc>) -> bool {
    player.has_active_shock(ShockType::MessageCorruption, now)
        && message_roll(content, &player.id) < MESSAGE_CORRUPTION_CHANCE
}

// =============================================================================
// REWARDS
// =============================================================================

/// Things that pay tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RewardKind {
    /// Successful mining
    Mining,
    /// Project milestone completed
    ProjectMilestone,
    /// Personal KPI completed
    KpiCompleted,
}

/// Tokens paid for a reward.
pub fn token_reward(kind: RewardKind, player: &Player, state: &GameState) -> u32 {
    match kind {
        RewardKind::Mining => {
            let base = modifiers::crisis_number(state, "mining_base_reward")
                .filter(|r| *r >= 0.0)
                .map(|r| r as u32)
                .unwrap_or(1);
            base + player.project_milestones / 3
        }
        RewardKind::ProjectMilestone => 1,
        RewardKind::KpiCompleted => match player.kpi_type() {
            Some(KpiType::SuccessionPlanner) => 5,
            Some(KpiType::Scapegoat) => 4,
            _ => 3,
        },
    }
}

// =============================================================================
// TESTS
// =============================================================================
