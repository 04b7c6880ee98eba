//! Time and identifier sources consumed by the validator.

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};

/// Source of the current UTC time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by [`Utc::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a single instant, for deterministic validity-window checks.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Generator of unique request identifiers.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> String;
}

/// 128 bits from the OS RNG, hex-encoded and prefixed with `_` so the
/// result is a valid XML ID.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn new_id(&self) -> String {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        format!("_{}", hex::encode(bytes))
    }
}
