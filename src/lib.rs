//! # Alignment Core
//!
//! Event-sourced, deterministic engine for *Alignment*, a corporate
//! social-deduction game in which humans try to unmask the AI-aligned
//! executives before the AI takes majority control.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ALIGNMENT CORE                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Seeded rolls and Xorshift128+ PRNG        │
//! │  └── hash.rs     - State hashing for verification            │
//! │                                                              │
//! │  game/           - Game logic (deterministic)                │
//! │  ├── state.rs    - Domain model                              │
//! │  ├── events.rs   - Event envelope and payloads               │
//! │  ├── action.rs   - Player intents                            │
//! │  ├── rules.rs    - Pure rules and probabilities              │
//! │  ├── processor.rs- Action -> events                          │
//! │  ├── reducer.rs  - (state, event) -> state                   │
//! │  ├── phase.rs    - Phase transitions                         │
//! │  ├── night.rs    - Night resolution                          │
//! │  ├── kpi.rs      - Personal objectives                       │
//! │  ├── ability.rs  - Executive abilities                       │
//! │  └── modifiers.rs- Crises and mandates                       │
//! │                                                              │
//! │  store/          - Persistence seams                         │
//! │  ├── wal.rs      - Append-only event log                     │
//! │  └── snapshot.rs - State snapshots                           │
//! │                                                              │
//! │  session/        - Runtime (non-deterministic)               │
//! │  ├── game.rs     - One game: commit, notify, snapshot        │
//! │  └── manager.rs  - Per-game tokio actors                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are **100% deterministic**:
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No clock reads (time is an argument)
//! - All randomness from SHA-256 seeded rolls or a seeded Xorshift128+
//!
//! Given the same event log, every replica folds to the same state and
//! the same state hash.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use core::rng::{roll_deterministic, DeterministicRng};
pub use game::action::{Action, ActionPayload};
pub use game::events::{Event, EventPayload};
pub use game::processor::{process, ActionRejection};
pub use game::reducer::{apply, replay};
pub use game::state::{GameSettings, GameState, PhaseType, PlayerId};
pub use session::{GameHandle, GameManager, GameSession, SessionConfig, SessionError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
