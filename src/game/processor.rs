//! Action Processor
//!
//! Validates an [`Action`] against the rules and the current state and turns it
//! into events. Every random outcome is rolled here and embedded in the event
//! payload, so the reducer never decides anything.
//!
//! The processor holds no state. It reads a borrowed [`GameState`] and returns
//! either the events to append or an [`ActionRejection`]; nothing is mutated
//! on rejection.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::rng::DeterministicRng;
use crate::game::ability::{self, AbilityRequest};
use crate::game::action::{Action, ActionPayload};
use crate::game::events::{Event, EventFactory, EventPayload};
use crate::game::kpi::{kpi_terms, KPI_ORDER};
use crate::game::modifiers;
use crate::game::rules;
use crate::game::state::{
    AbilityKind, Alignment, GameId, GameState, MandateType, NightActionType, PhaseType, Player,
    PlayerId, RoleType, VoteType,
};

/// Executive roles dealt before anyone becomes an intern.
pub const EXECUTIVE_ROLES: [RoleType; 7] = [
    RoleType::Ciso,
    RoleType::Cto,
    RoleType::Ceo,
    RoleType::Cfo,
    RoleType::Coo,
    RoleType::Ethics,
    RoleType::Platforms,
];

/// One aligned seat per this many players (minimum one).
pub const PLAYERS_PER_AI: usize = 7;

/// What a corrupted message turns into.
pub const CORRUPTED_MESSAGE: &str = "lol";

// =============================================================================
// REJECTIONS
// =============================================================================

/// Why an action was refused. Rejections never mutate state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionRejection {
    /// Game has ended.
    #[error("Game is over")]
    GameOver,

    /// Action addressed to another game.
    #[error("Action for game {actual} submitted to game {expected}")]
    WrongGame {
        /// This game
        expected: GameId,
        /// The action's game
        actual: GameId,
    },

    /// Not allowed in the current phase.
    #[error("{action} is not allowed during {phase}")]
    WrongPhase {
        /// Action wire name
        action: &'static str,
        /// Current phase
        phase: PhaseType,
    },

    /// Unknown player.
    #[error("Player not found: {0}")]
    PlayerNotFound(PlayerId),

    /// Player already seated.
    #[error("Player already joined: {0}")]
    AlreadyJoined(PlayerId),

    /// No seats left.
    #[error("Game is full ({0} players)")]
    GameFull(usize),

    /// Lobby too small to start.
    #[error("Not enough players: need {needed}, have {have}")]
    NotEnoughPlayers {
        /// Minimum
        needed: usize,
        /// Seated
        have: usize,
    },

    /// Actor is out of the game.
    #[error("Player has been eliminated: {0}")]
    PlayerEliminated(PlayerId),

    /// Actor is under forced silence.
    #[error("Player is silenced")]
    Silenced,

    /// Blank chat line.
    #[error("Message is empty")]
    EmptyMessage,

    /// No pulse check to answer.
    #[error("No pulse check is open")]
    NoPulseCheck,

    /// Voter is dead, silenced, or out of a voting phase.
    #[error("Player cannot vote right now")]
    CannotVote,

    /// Ballot names something the current vote does not accept.
    #[error("Invalid vote target: {0}")]
    InvalidVoteTarget(PlayerId),

    /// Night action not available to this player.
    #[error("Night action not permitted: {}", .0.as_str())]
    NightActionNotAllowed(NightActionType),

    /// Target fails validation.
    #[error("Invalid target: {0}")]
    InvalidTarget(PlayerId),

    /// Target required but absent.
    #[error("Action requires a target")]
    MissingTarget,

    /// Ability locked, spent, or not the actor's.
    #[error("Ability unavailable: {}", .0.display_name())]
    AbilityUnavailable(AbilityKind),

    /// Crisis switched abilities off.
    #[error("Abilities are disabled by the active crisis")]
    AbilitiesDisabled,

    /// Actor is under an action lock shock.
    #[error("Player is under an action lock")]
    ActionLocked,

    /// Source of a token transfer is broke.
    #[error("Insufficient tokens: {player}")]
    InsufficientTokens {
        /// Player who cannot pay
        player: PlayerId,
    },

    /// Crisis type missing from the catalog.
    #[error("Unknown crisis: {0}")]
    UnknownCrisis(String),
}

// =============================================================================
// PROCESS
// =============================================================================

/// Validate an action and produce the events it causes.
pub fn process(
    state: &GameState,
    action: &Action,
    now: DateTime<Utc>,
) -> Result<Vec<Event>, ActionRejection> {
    if action.game_id != state.id {
        return Err(ActionRejection::WrongGame {
            expected: state.id.clone(),
            actual: action.game_id.clone(),
        });
    }
    if state.is_over() {
        return Err(ActionRejection::GameOver);
    }

    let mut events = EventFactory::new(state.id.clone(), now, action.event_tag());
    let actor_id = &action.player_id;

    match &action.payload {
        ActionPayload::JoinGame { name, job_title } => {
            require_phase(state, action, PhaseType::Lobby)?;
            if state.players.contains_key(actor_id) {
                return Err(ActionRejection::AlreadyJoined(actor_id.clone()));
            }
            if state.players.len() >= state.settings.max_players {
                return Err(ActionRejection::GameFull(state.settings.max_players));
            }
            let name = if name.trim().is_empty() {
                actor_id.to_string()
            } else {
                name.trim().to_string()
            };
            events.player(
                actor_id,
                EventPayload::PlayerJoined {
                    name,
                    job_title: job_title.clone(),
                },
            );
        }

        ActionPayload::LeaveGame {} => {
            find_player(state, actor_id)?;
            events.player(actor_id, EventPayload::PlayerLeft {});
        }

        ActionPayload::StartGame {} => {
            require_phase(state, action, PhaseType::Lobby)?;
            find_player(state, actor_id)?;
            let have = state.players.len();
            if have < state.settings.min_players {
                return Err(ActionRejection::NotEnoughPlayers {
                    needed: state.settings.min_players,
                    have,
                });
            }
            start_game(state, &mut events);
        }

        ActionPayload::SendMessage { message } => {
            let player = find_player(state, actor_id)?;
            if !player.is_alive {
                return Err(ActionRejection::PlayerEliminated(actor_id.clone()));
            }
            if !rules::can_send_message(player, now) {
                return Err(ActionRejection::Silenced);
            }
            let text = message.trim();
            if text.is_empty() {
                return Err(ActionRejection::EmptyMessage);
            }
            let message = if rules::is_message_corrupted(player, text, now) {
                CORRUPTED_MESSAGE.to_string()
            } else {
                text.to_string()
            };
            events.player(
                actor_id,
                EventPayload::ChatMessage {
                    player_name: player.name.clone(),
                    message,
                    is_system: false,
                },
            );
        }

        ActionPayload::SubmitPulseCheck { response } => {
            let player = find_player(state, actor_id)?;
            if !player.is_alive {
                return Err(ActionRejection::PlayerEliminated(actor_id.clone()));
            }
            match &state.pulse_check {
                Some(pulse) if !pulse.is_revealed => {}
                _ => return Err(ActionRejection::NoPulseCheck),
            }
            events.player(
                actor_id,
                EventPayload::PulseCheckSubmitted {
                    response: response.clone(),
                },
            );
        }

        ActionPayload::SubmitVote { target_id } => {
            let vote_type = state.phase_type().vote_type().ok_or(ActionRejection::WrongPhase {
                action: action.kind(),
                phase: state.phase_type(),
            })?;
            let voter = find_player(state, actor_id)?;
            if !rules::can_vote(voter, state.phase_type(), now) {
                return Err(ActionRejection::CannotVote);
            }
            validate_vote_target(state, vote_type, target_id)?;
            events.player(
                actor_id,
                EventPayload::VoteCast {
                    target_id: target_id.clone(),
                    vote_type,
                },
            );
        }

        ActionPayload::ExtendDiscussion { extend } => {
            require_phase(state, action, PhaseType::Extension)?;
            let voter = find_player(state, actor_id)?;
            if !rules::can_vote(voter, state.phase_type(), now) {
                return Err(ActionRejection::CannotVote);
            }
            let target_id = if *extend {
                PlayerId::extend()
            } else {
                PlayerId::proceed()
            };
            events.player(
                actor_id,
                EventPayload::VoteCast {
                    target_id,
                    vote_type: VoteType::Extension,
                },
            );
        }

        ActionPayload::SubmitNightAction {
            action_type,
            target_id,
        } => submit_night_action(state, action, *action_type, target_id.clone(), now, &mut events)?,
        ActionPayload::MineTokens { target_id } => submit_night_action(
            state,
            action,
            NightActionType::Mine,
            target_id.clone(),
            now,
            &mut events,
        )?,
        ActionPayload::AttemptConversion { target_id } => submit_night_action(
            state,
            action,
            NightActionType::Convert,
            Some(target_id.clone()),
            now,
            &mut events,
        )?,
        ActionPayload::ProjectMilestones {} => submit_night_action(
            state,
            action,
            NightActionType::ProjectMilestones,
            None,
            now,
            &mut events,
        )?,

        ActionPayload::UseAbility {
            ability,
            target_id,
            source_id,
            chosen_crisis,
            redacted_section,
        } => {
            let request = AbilityRequest {
                ability: *ability,
                target_id: target_id.clone(),
                source_id: source_id.clone(),
                chosen_crisis: chosen_crisis.clone(),
                redacted_section: redacted_section.clone(),
            };
            ability::use_ability(state, actor_id, &request, now, &mut events)?;
        }
        ActionPayload::RunAudit { target_id } => {
            let request = AbilityRequest::targeted(AbilityKind::RunAudit, target_id.clone());
            ability::use_ability(state, actor_id, &request, now, &mut events)?;
        }
        ActionPayload::OverclockServers { target_id } => {
            let request = AbilityRequest::targeted(AbilityKind::OverclockServers, target_id.clone());
            ability::use_ability(state, actor_id, &request, now, &mut events)?;
        }
        ActionPayload::IsolateNode { target_id } => {
            let request = AbilityRequest::targeted(AbilityKind::IsolateNode, target_id.clone());
            ability::use_ability(state, actor_id, &request, now, &mut events)?;
        }
        ActionPayload::PerformanceReview { target_id } => {
            let request =
                AbilityRequest::targeted(AbilityKind::PerformanceReview, target_id.clone());
            ability::use_ability(state, actor_id, &request, now, &mut events)?;
        }
        ActionPayload::ReallocateBudget {
            source_id,
            target_id,
        } => {
            let mut request =
                AbilityRequest::targeted(AbilityKind::ReallocateBudget, target_id.clone());
            request.source_id = Some(source_id.clone());
            ability::use_ability(state, actor_id, &request, now, &mut events)?;
        }
        ActionPayload::Pivot { chosen_crisis } => {
            let mut request = AbilityRequest::bare(AbilityKind::Pivot);
            request.chosen_crisis = Some(chosen_crisis.clone());
            ability::use_ability(state, actor_id, &request, now, &mut events)?;
        }
        ActionPayload::DeployHotfix { redacted_section } => {
            let mut request = AbilityRequest::bare(AbilityKind::DeployHotfix);
            request.redacted_section = redacted_section.clone();
            ability::use_ability(state, actor_id, &request, now, &mut events)?;
        }

        ActionPayload::SetSlackStatus { status } => {
            find_player(state, actor_id)?;
            events.player(
                actor_id,
                EventPayload::SlackStatusChanged {
                    status: status.clone(),
                },
            );
        }
        ActionPayload::SetPartingShot { parting_shot } => {
            find_player(state, actor_id)?;
            events.player(
                actor_id,
                EventPayload::PartingShotSet {
                    parting_shot: parting_shot.clone(),
                },
            );
        }
        ActionPayload::Reconnect {} => {
            find_player(state, actor_id)?;
            events.player(actor_id, EventPayload::PlayerReconnected {});
        }
    }

    Ok(events.finish())
}

// =============================================================================
// HELPERS
// =============================================================================

fn find_player<'a>(
    state: &'a GameState,
    player_id: &PlayerId,
) -> Result<&'a Player, ActionRejection> {
    state
        .get_player(player_id)
        .ok_or_else(|| ActionRejection::PlayerNotFound(player_id.clone()))
}

fn require_phase(state: &GameState, action: &Action, phase: PhaseType) -> Result<(), ActionRejection> {
    if state.phase_type() == phase {
        Ok(())
    } else {
        Err(ActionRejection::WrongPhase {
            action: action.kind(),
            phase: state.phase_type(),
        })
    }
}

fn validate_vote_target(
    state: &GameState,
    vote_type: VoteType,
    target_id: &PlayerId,
) -> Result<(), ActionRejection> {
    let valid = match vote_type {
        VoteType::Nomination => state
            .get_player(target_id)
            .map(|p| p.is_alive)
            .unwrap_or(false),
        VoteType::Verdict => {
            *target_id == PlayerId::innocent() || state.nominated_player.as_ref() == Some(target_id)
        }
        VoteType::Extension => *target_id == PlayerId::extend() || *target_id == PlayerId::proceed(),
    };
    if valid {
        Ok(())
    } else {
        Err(ActionRejection::InvalidVoteTarget(target_id.clone()))
    }
}

fn submit_night_action(
    state: &GameState,
    action: &Action,
    action_type: NightActionType,
    target_id: Option<PlayerId>,
    now: DateTime<Utc>,
    events: &mut EventFactory,
) -> Result<(), ActionRejection> {
    require_phase(state, action, PhaseType::Night)?;
    let actor = find_player(state, &action.player_id)?;
    if !actor.is_alive {
        return Err(ActionRejection::PlayerEliminated(actor.id.clone()));
    }
    if !rules::can_use_night_action(actor, action_type, now) {
        return Err(ActionRejection::NightActionNotAllowed(action_type));
    }

    // Project work has no target; mining defaults to the actor
    let target_id = match action_type {
        NightActionType::ProjectMilestones => None,
        NightActionType::Mine => Some(target_id.unwrap_or_else(|| actor.id.clone())),
        _ => Some(target_id.ok_or(ActionRejection::MissingTarget)?),
    };
    if let Some(id) = &target_id {
        let target = find_player(state, id)?;
        if !rules::is_valid_night_target(actor, target, action_type) {
            return Err(ActionRejection::InvalidTarget(id.clone()));
        }
    }

    events.player(
        &actor.id,
        EventPayload::NightActionSubmitted {
            action_type,
            target_id,
        },
    );
    Ok(())
}

/// Deal roles, KPIs, alignments and the mandate.
///
/// Everything is drawn from one xorshift stream seeded by the game ID and the
/// sorted player IDs, so a given lobby always deals the same hands.
fn start_game(state: &GameState, events: &mut EventFactory) {
    let ids: Vec<PlayerId> = state.players.keys().cloned().collect();
    let mut rng = DeterministicRng::for_game(&state.id, &ids);

    let mandates = modifiers::mandate_catalog();
    let mandate = rng
        .choose(&mandates)
        .cloned()
        .unwrap_or_else(|| modifiers::mandate(MandateType::AggressiveGrowth));

    let mut seats = ids.clone();
    rng.shuffle(&mut seats);
    let ai_count = (ids.len() / PLAYERS_PER_AI).max(1);
    let aligned: BTreeSet<&PlayerId> = seats.iter().take(ai_count).collect();

    let mut roles = EXECUTIVE_ROLES.to_vec();
    rng.shuffle(&mut roles);
    let kpi_offset = rng.next_int(KPI_ORDER.len() as u32) as usize;

    events.game(EventPayload::GameStarted {});
    events.game(EventPayload::MandateActivated {
        mandate_type: mandate.mandate_type,
        name: mandate.name.clone(),
        description: mandate.description.clone(),
        effects: mandate.effects.clone(),
    });

    for (i, id) in ids.iter().enumerate() {
        let role_type = roles.get(i).copied().unwrap_or(RoleType::Intern);
        let ability = AbilityKind::for_role(role_type);
        let kpi_type = KPI_ORDER[(kpi_offset + i) % KPI_ORDER.len()];
        let (kpi_description, kpi_target, kpi_reward) = kpi_terms(kpi_type);
        let alignment = if aligned.contains(id) {
            Alignment::Aligned
        } else {
            Alignment::Human
        };

        events.player(
            id,
            EventPayload::RoleAssigned {
                role_type,
                role_name: role_type.display_name().to_string(),
                role_description: role_type.description().to_string(),
                ability_name: ability.map(|a| a.display_name().to_string()),
                ability_description: ability.map(|a| a.description()).unwrap_or("").to_string(),
                kpi_type: Some(kpi_type),
                kpi_description: kpi_description.to_string(),
                kpi_target,
                kpi_reward: kpi_reward.to_string(),
                alignment,
            },
        );
    }

    let bonus = modifiers::starting_tokens_bonus(&mandate);
    if bonus > 0 {
        for id in &ids {
            events.player(
                id,
                EventPayload::TokensAwarded {
                    amount: bonus,
                    reason: format!("{} starting bonus", mandate.name),
                },
            );
        }
    }

    debug!(
        game_id = %state.id,
        players = ids.len(),
        ai = ai_count,
        mandate = %mandate.name,
        "Dealt roles"
    );
}

// =============================================================================
// TESTS
// =============================================================================
