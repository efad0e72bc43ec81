//! Alignment Simulator
//!
//! Plays one scripted game through the full stack (actor, processor, reducer,
//! stores) on a synthetic clock, then recovers it from the stores and checks
//! that the rebuilt state hashes the same.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use alignment::{
    game::state::{Alignment, Player},
    Action, ActionPayload, GameHandle, GameManager, GameSettings, GameState, PhaseType, PlayerId,
    SessionConfig, VERSION,
};

const CAST: [(&str, &str, &str); 6] = [
    ("alice", "Alice", "Security Lead"),
    ("bob", "Bob", "Platform Engineer"),
    ("carol", "Carol", "Product Manager"),
    ("dave", "Dave", "Finance Partner"),
    ("erin", "Erin", "Ethics Officer"),
    ("frank", "Frank", "Ops Director"),
];

/// Safety stop; the day limit ends a game well before this.
const MAX_PHASES: usize = 100;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Alignment simulator v{}", VERSION);

    let start = Utc
        .with_ymd_and_hms(2025, 1, 6, 9, 0, 0)
        .single()
        .context("invalid start time")?;
    let manager = GameManager::in_memory(SessionConfig {
        snapshot_interval: 25,
        ..Default::default()
    });
    let game = manager.create_game(GameSettings::default(), start).await?;
    let game_id = game.game_id().to_string();
    info!(game_id = %game_id, "Game created");

    for (id, name, title) in CAST {
        let join = ActionPayload::JoinGame {
            name: name.to_string(),
            job_title: title.to_string(),
        };
        game.submit(Action::new(game_id.as_str(), id, start, join), start).await?;
    }
    game.submit(Action::new(game_id.as_str(), CAST[0].0, start, ActionPayload::StartGame {}), start)
        .await?;

    let live = play(&game, start).await?;
    match &live.win_condition {
        Some(win) => info!(
            winner = ?win.winner,
            condition = ?win.condition,
            day = live.day_number,
            "{}",
            win.description
        ),
        None => info!(day = live.day_number, "Stopped without a winner"),
    }
    let stats = game.stats().await?;
    info!(
        applied = stats.applied,
        ignored = stats.ignored,
        rejected = stats.rejected,
        snapshots = stats.snapshots,
        "Session stats"
    );

    info!("=== Verifying Recovery ===");
    let recovered = manager.recover_game(&game_id).await?.state().await?;
    let live_hash = live.compute_hash();
    let recovered_hash = recovered.compute_hash();
    info!("Live State Hash:      {}", hex::encode(live_hash));
    info!("Recovered State Hash: {}", hex::encode(recovered_hash));

    if live_hash != recovered_hash {
        bail!("recovered state differs from live state");
    }
    info!("RECOVERY VERIFIED: Hashes match!");
    Ok(())
}

/// Drive phases until the game ends.
async fn play(game: &GameHandle, start: DateTime<Utc>) -> Result<GameState> {
    let mut clock = start;

    for _ in 0..MAX_PHASES {
        let state = game.state().await?;
        if state.is_over() {
            return Ok(state);
        }

        for action in scripted_actions(&state, clock) {
            let kind = action.kind();
            let player = action.player_id.clone();
            if let Err(e) = game.submit(action, clock).await {
                debug!(%player, kind, error = %e, "Scripted action refused");
            }
        }

        clock = state.phase.ends_at();
        let events = game.tick(clock).await?;
        info!(
            day = state.day_number,
            from = state.phase_type().as_str(),
            events = events.len(),
            "Phase closed"
        );
    }

    Ok(game.state().await?)
}

/// Fixed, non-strategic choices for every living player in the current phase.
fn scripted_actions(state: &GameState, now: DateTime<Utc>) -> Vec<Action> {
    let act = |id: &PlayerId, payload| Action::new(state.id.as_str(), id.clone(), now, payload);
    let alive: Vec<&Player> = state.alive_players().collect();

    match state.phase_type() {
        PhaseType::Sitrep => alive
            .iter()
            .flat_map(|p| {
                let mut actions = vec![act(
                    &p.id,
                    ActionPayload::SendMessage {
                        message: format!("{} checking in for day {}", p.name, state.day_number),
                    },
                )];
                if state.pulse_check.is_some() {
                    actions.push(act(
                        &p.id,
                        ActionPayload::SubmitPulseCheck {
                            response: "Stay the course".to_string(),
                        },
                    ));
                }
                actions
            })
            .collect(),

        // Everyone nominates the richest colleague (ties to the smallest ID)
        PhaseType::Nomination => alive
            .iter()
            .filter_map(|voter| {
                let target = alive
                    .iter()
                    .filter(|p| p.id != voter.id)
                    .fold(None::<&&Player>, |best, p| match best {
                        Some(b) if b.tokens >= p.tokens => Some(b),
                        _ => Some(p),
                    })?;
                Some(act(
                    &voter.id,
                    ActionPayload::SubmitVote {
                        target_id: target.id.clone(),
                    },
                ))
            })
            .collect(),

        // AI shields its own; humans convict
        PhaseType::Verdict => {
            let Some(nominee) = state.nominated_player.as_ref().and_then(|id| state.get_player(id)) else {
                return Vec::new();
            };
            alive
                .iter()
                .filter(|p| p.id != nominee.id)
                .map(|p| {
                    let target_id = if p.is_aligned() && nominee.is_aligned() {
                        PlayerId::innocent()
                    } else {
                        nominee.id.clone()
                    };
                    act(&p.id, ActionPayload::SubmitVote { target_id })
                })
                .collect()
        }

        PhaseType::Extension => alive
            .iter()
            .map(|p| act(&p.id, ActionPayload::ExtendDiscussion { extend: false }))
            .collect(),

        // AI converts the first human by ID; humans mine
        PhaseType::Night => {
            let first_human = alive
                .iter()
                .find(|p| p.alignment == Alignment::Human)
                .map(|p| p.id.clone());
            alive
                .iter()
                .filter_map(|p| {
                    if p.is_aligned() {
                        first_human.clone().map(|target_id| {
                            act(&p.id, ActionPayload::AttemptConversion { target_id })
                        })
                    } else {
                        Some(act(&p.id, ActionPayload::MineTokens { target_id: None }))
                    }
                })
                .collect()
        }

        PhaseType::Lobby | PhaseType::GameOver => Vec::new(),
    }
}
