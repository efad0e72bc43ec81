//! Game Logic Module
//!
//! Everything that decides what happens in a game. 100% deterministic: no
//! clock reads (time is passed in), no HashMap, no ambient randomness.
//!
//! ## Module Structure
//!
//! - `state`: Domain model (game, players, roles, votes)
//! - `events`: Event envelope and closed payload enum
//! - `action`: Player intents
//! - `rules`: Pure predicates, probabilities, win conditions
//! - `modifiers`: Crisis and mandate catalogs and effect lookups
//! - `processor`: Validate an action, emit events
//! - `reducer`: Fold events into state
//! - `night`: Night resolution
//! - `phase`: Phase transitions
//! - `kpi`: Personal objectives
//! - `ability`: Executive role abilities

pub mod ability;
pub mod action;
pub mod events;
pub mod kpi;
pub mod modifiers;
pub mod night;
pub mod phase;
pub mod processor;
pub mod reducer;
pub mod rules;
pub mod state;

// Re-export key types
pub use action::{Action, ActionPayload};
pub use events::{Event, EventFactory, EventPayload, NightOutcome, Visibility};
pub use phase::advance;
pub use processor::{process, ActionRejection};
pub use reducer::{apply, apply_mut, apply_with_outcome, replay, ApplyOutcome};
pub use state::{GameSettings, GameState, PhaseType, Player, PlayerId};
