//! Process-wide snowflake identifier source.
//!
//! Layout: 41 bits of milliseconds since the service epoch, 10 bits of
//! machine id, 12 bits of per-millisecond sequence. IDs are positive,
//! globally unique without coordination and roughly time-ordered, which the
//! storage indexes rely on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// 2024-01-01T00:00:00Z in unix milliseconds.
const EPOCH_MS: u64 = 1_704_067_200_000;

const MACHINE_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const MACHINE_MAX: u16 = (1 << MACHINE_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("machine id {0} exceeds the {MACHINE_MAX} maximum")]
    MachineIdOutOfRange(u16),
    #[error("id generator not initialized")]
    NotInitialized,
}

struct Generator {
    machine_id: u64,
    /// Packed `(millis << SEQUENCE_BITS) | sequence` of the last issued id.
    state: AtomicU64,
}

static GENERATOR: OnceLock<Generator> = OnceLock::new();

/// Initializes the generator once, keyed on `APP_MACHINE_ID`.
pub fn init(machine_id: u16) -> Result<(), IdError> {
    if machine_id > MACHINE_MAX {
        return Err(IdError::MachineIdOutOfRange(machine_id));
    }

    let _ = GENERATOR.get_or_init(|| Generator {
        machine_id: u64::from(machine_id),
        state: AtomicU64::new(0),
    });
    Ok(())
}

/// Returns the next identifier. Lock-free; safe from any task.
pub fn next_id() -> Result<i64, IdError> {
    let generator = GENERATOR.get().ok_or(IdError::NotInitialized)?;

    loop {
        let observed = generator.state.load(Ordering::Acquire);
        let now = current_millis();
        let last_millis = observed >> SEQUENCE_BITS;

        let candidate = if now > last_millis {
            now << SEQUENCE_BITS
        } else {
            // Clock stalled or rewound within the same millisecond window;
            // keep issuing from the sequence until it rolls over.
            let sequence = (observed & SEQUENCE_MASK) + 1;
            if sequence > SEQUENCE_MASK {
                (last_millis + 1) << SEQUENCE_BITS
            } else {
                (last_millis << SEQUENCE_BITS) | sequence
            }
        };

        if generator
            .state
            .compare_exchange(observed, candidate, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let millis = candidate >> SEQUENCE_BITS;
            let sequence = candidate & SEQUENCE_MASK;
            let id = (millis << (MACHINE_BITS + SEQUENCE_BITS))
                | (generator.machine_id << SEQUENCE_BITS)
                | sequence;
            return Ok(id as i64);
        }
    }
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
        .saturating_sub(EPOCH_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_positive_and_strictly_increasing() {
        init(1).unwrap();

        let mut previous = 0i64;
        for _ in 0..10_000 {
            let id = next_id().unwrap();
            assert!(id > 0);
            assert!(id > previous, "ids must be monotonic within a process");
            previous = id;
        }
    }

    #[test]
    fn machine_id_is_embedded() {
        init(1).unwrap();
        let id = next_id().unwrap() as u64;
        let machine = (id >> SEQUENCE_BITS) & u64::from(MACHINE_MAX);
        assert_eq!(machine, 1);
    }
}
