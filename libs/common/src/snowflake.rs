use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Custom epoch: 2024-01-01T00:00:00Z in milliseconds since Unix epoch.
const FLOOR_EPOCH_MS: u64 = 1_704_067_200_000;

const WORKER_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const MAX_WORKER_ID: u16 = (1 << WORKER_BITS) - 1;

struct State {
    last_ms: u64,
    sequence: u64,
}

/// 64-bit snowflake generator for event ids.
///
/// Layout (MSB → LSB):
/// - Bits 63–22: Timestamp (42 bits), ms since the floor epoch
/// - Bits 21–12: Worker ID (10 bits)
/// - Bits 11–0:  Sequence (12 bits), per-ms counter
///
/// IDs from one generator are strictly increasing. A clock that steps
/// backwards keeps issuing IDs from the last observed millisecond.
pub struct SnowflakeGenerator {
    worker_id: u64,
    state: Mutex<State>,
}

impl SnowflakeGenerator {
    /// Worker ids wider than 10 bits are masked.
    pub fn new(worker_id: u16) -> Self {
        Self {
            worker_id: (worker_id & MAX_WORKER_ID) as u64,
            state: Mutex::new(State {
                last_ms: 0,
                sequence: 0,
            }),
        }
    }

    pub fn generate(&self) -> u64 {
        let mut state = self.state.lock();

        let now_ms = current_ms().max(state.last_ms);

        if now_ms == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted: borrow the next millisecond.
                state.last_ms += 1;
            }
        } else {
            state.sequence = 0;
            state.last_ms = now_ms;
        }

        let ts = state.last_ms.saturating_sub(FLOOR_EPOCH_MS);
        (ts << (WORKER_BITS + SEQUENCE_BITS)) | (self.worker_id << SEQUENCE_BITS) | state.sequence
    }
}

fn current_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(FLOOR_EPOCH_MS)
}
