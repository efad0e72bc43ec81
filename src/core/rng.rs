//! Deterministic Randomness
//!
//! Two sources, both reproducible on every platform:
//!
//! - [`roll_deterministic`]: a stateless roll in `[0, 1)` derived from a SHA-256
//!   digest of `:`-joined seed parts. Used for every gameplay outcome (mining,
//!   conversion, message corruption, crisis draws).
//! - [`DeterministicRng`]: Xorshift128+ seeded from the game identity. Used for
//!   setup choices that need a sequence (role shuffle, KPI and mandate draw).

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::hash::StateHasher;

/// Resolution of [`roll_deterministic`]: outcomes are multiples of `1 / ROLL_RESOLUTION`.
pub const ROLL_RESOLUTION: u32 = 10_000;

/// Hash seed parts into a 32-bit value.
///
/// Parts are rendered with `Display` and joined with `:`, so
/// `seed_hash(&[&"player-1", &1, &"MINE"])` digests the string `"player-1:1:MINE"`.
/// The first four digest bytes are read big-endian.
pub fn seed_hash(parts: &[&dyn Display]) -> u32 {
    let mut data = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            data.push(':');
        }
        data.push_str(&part.to_string());
    }

    let digest = Sha256::digest(data.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Stable pseudo-random value in `[0, 1)` for the given seed parts.
///
/// # Example
///
/// ```
/// use alignment::core::rng::roll_deterministic;
///
/// let roll = roll_deterministic(&[&"player-1", &1, &"MINE"]);
/// assert_eq!(roll, 0.9824); // Always the same!
/// ```
pub fn roll_deterministic(parts: &[&dyn Display]) -> f64 {
    f64::from(seed_hash(parts) % ROLL_RESOLUTION) / f64::from(ROLL_RESOLUTION)
}

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// # Determinism Guarantee
///
/// Given the same seed, this RNG will produce the exact same sequence
/// of random numbers on any platform.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create RNG for a game's setup draws.
    ///
    /// See [`derive_game_seed`].
    pub fn for_game<S: AsRef<str>>(game_id: &str, sorted_player_ids: &[S]) -> Self {
        Self::new(derive_game_seed(game_id, sorted_player_ids))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // Simple modulo - slight bias for very large max, but acceptable
        (self.next_u64() % max as u64) as u32
    }

    /// Shuffle a slice in place using Fisher-Yates algorithm.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        let len = slice.len();
        for i in (1..len).rev() {
            let j = self.next_int((i + 1) as u32) as usize;
            slice.swap(i, j);
        }
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            slice.get(idx)
        }
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a game seed from the game identity and its roster.
///
/// `sorted_player_ids` MUST be sorted; `GameState::players` is a `BTreeMap`,
/// so its keys already are.
pub fn derive_game_seed<S: AsRef<str>>(game_id: &str, sorted_player_ids: &[S]) -> u64 {
    let mut hasher = StateHasher::for_game_seed();
    hasher.update_str(game_id);
    hasher.update_u32(sorted_player_ids.len() as u32);
    for pid in sorted_player_ids {
        hasher.update_str(pid.as_ref());
    }

    let hash = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roll_known_values() {
        // These values must never change!
        // If they do, existing game logs replay to different outcomes.
        assert_eq!(roll_deterministic(&[&"player-1", &1, &"MINE"]), 0.9824);
        assert_eq!(roll_deterministic(&[&"player-1", &2, &"MINE"]), 0.8997);
        assert_eq!(roll_deterministic(&[&"player-2", &1, &"MINE"]), 0.2033);
        assert_eq!(roll_deterministic(&[&"player-1", &1, &"CONVERSION"]), 0.1707);
        assert_eq!(seed_hash(&[&"player-1", &1, &"MINE"]), 3_090_309_824);
    }

    #[test]
    fn test_roll_stable_and_sensitive() {
        let a = roll_deterministic(&[&"player-1", &1, &"MINE"]);
        let b = roll_deterministic(&[&"player-1", &1, &"MINE"]);
        assert_eq!(a, b);

        // Vary each component
        assert_ne!(a, roll_deterministic(&[&"player-2", &1, &"MINE"]));
        assert_ne!(a, roll_deterministic(&[&"player-1", &2, &"MINE"]));
        assert_ne!(a, roll_deterministic(&[&"player-1", &1, &"CONVERSION"]));
    }

    #[test]
    fn test_roll_range() {
        for day in 0..500 {
            let roll = roll_deterministic(&[&"someone", &day, &"MINE"]);
            assert!((0.0..1.0).contains(&roll));
        }
    }

    #[test]
    fn test_rng_determinism() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_known_values() {
        let mut rng = DeterministicRng::new(2024);

        assert_eq!(rng.next_u64(), 13281608604107988903);
        assert_eq!(rng.next_u64(), 9802820252835208837);
        assert_eq!(rng.next_u64(), 4993079409577908803);
    }

    #[test]
    fn test_next_int() {
        let mut rng = DeterministicRng::new(1234);

        for _ in 0..1000 {
            assert!(rng.next_int(7) < 7);
        }

        assert_eq!(rng.next_int(0), 0);
        assert_eq!(rng.next_int(1), 0);
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut rng = DeterministicRng::new(1111);
        let mut roles = ["CISO", "CEO", "CTO", "COO", "CFO", "ETHICS"];
        rng.shuffle(&mut roles);

        let mut sorted = roles;
        sorted.sort();
        assert_eq!(sorted, ["CEO", "CFO", "CISO", "COO", "CTO", "ETHICS"]);
    }

    #[test]
    fn test_choose_empty() {
        let mut rng = DeterministicRng::new(1);
        let empty: [u8; 0] = [];
        assert!(rng.choose(&empty).is_none());
        assert_eq!(rng.choose(&[9]), Some(&9));
    }

    #[test]
    fn test_derive_game_seed() {
        let seed1 = derive_game_seed("game-1", &["alice", "bob"]);
        let seed2 = derive_game_seed("game-1", &["alice", "bob"]);
        assert_eq!(seed1, seed2);

        assert_ne!(seed1, derive_game_seed("game-2", &["alice", "bob"]));
        assert_ne!(seed1, derive_game_seed("game-1", &["alice", "carol"]));
    }
}
