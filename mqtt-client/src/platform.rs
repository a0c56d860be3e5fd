//! Monotonic clock and countdown helpers, plus client-id generation.
//!
//! The session never reaches for `Instant::now()` outside this module and
//! never seeds a process-wide RNG: every random client id is a pure function
//! of a caller-supplied seed (Design Notes, "Global state").

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A countdown-style deadline, armed once and polled repeatedly. Mirrors the
/// `cutdown(ms)` / `is_expired` / `remain_ms` platform primitive of §6.
#[derive(Debug, Clone, Copy)]
pub struct Countdown {
    deadline: Instant,
}

impl Countdown {
    /// Arms a new countdown `ms` milliseconds from now.
    pub fn new(ms: u64) -> Self {
        Countdown {
            deadline: Instant::now() + Duration::from_millis(ms),
        }
    }

    /// A countdown that has already expired; used as a sentinel before the
    /// first real deadline is armed.
    pub fn expired() -> Self {
        Countdown {
            deadline: Instant::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Milliseconds remaining, saturating at zero.
    pub fn remain_ms(&self) -> u64 {
        self.deadline
            .saturating_duration_since(Instant::now())
            .as_millis() as u64
    }

    /// Re-arms this countdown `ms` milliseconds from now.
    pub fn reset(&mut self, ms: u64) {
        self.deadline = Instant::now() + Duration::from_millis(ms);
    }
}

const CLIENT_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generates a random client-id of length `len`, deterministically from
/// `seed`. Callers that want a fresh id each run should derive `seed` from
/// the current time themselves; this function does not read the clock.
pub fn random_client_id(seed: u64, len: usize) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..CLIENT_ID_ALPHABET.len());
            CLIENT_ID_ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_starts_unexpired_and_expires() {
        let countdown = Countdown::new(20);
        assert!(!countdown.is_expired());
        std::thread::sleep(Duration::from_millis(40));
        assert!(countdown.is_expired());
        assert_eq!(countdown.remain_ms(), 0);
    }

    #[test]
    fn random_client_id_is_pure_function_of_seed() {
        let a = random_client_id(42, 12);
        let b = random_client_id(42, 12);
        let c = random_client_id(43, 12);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 12);
    }
}
