use crate::errors::{EngineError, EngineResult};
use std::sync::Mutex;
use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 2024-01-01T00:00:00Z in milliseconds.
const EPOCH_MILLIS: u64 = 1_704_067_200_000;
const NODE_ID_BITS: u8 = 10;
const SEQUENCE_BITS: u8 = 12;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

pub const MAX_NODE_ID: u16 = (1 << NODE_ID_BITS) - 1;

#[derive(Debug, Default)]
struct GeneratorState {
    last_timestamp: u64,
    sequence: u64,
}

/// Time-ordered 63-bit ids: 41 bits of milliseconds, 10 bits of node, 12 bits of sequence.
/// One instance per process, shared by every component that inserts rows.
#[derive(Debug)]
pub struct IdGenerator {
    node_id: u16,
    state: Mutex<GeneratorState>,
}

impl IdGenerator {
    pub fn new(node_id: u16) -> EngineResult<Self> {
        if node_id > MAX_NODE_ID {
            return Err(EngineError::Config(format!(
                "node id {} exceeds maximum {}",
                node_id, MAX_NODE_ID
            )));
        }
        Ok(Self {
            node_id,
            state: Mutex::new(GeneratorState::default()),
        })
    }

    /// Node id derived from the machine hostname so separate hosts do not collide.
    pub fn from_machine() -> Self {
        let node_id = machine_node_id();
        tracing::debug!(node_id, "id generator node selected");
        Self {
            node_id,
            state: Mutex::new(GeneratorState::default()),
        }
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    pub fn next_id(&self) -> EngineResult<i64> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| EngineError::Storage("id generator mutex poisoned".to_string()))?;

        let mut timestamp = current_millis();
        if timestamp < state.last_timestamp {
            // Clock went backwards; hold until it catches up.
            sleep(Duration::from_millis(state.last_timestamp - timestamp));
            timestamp = wait_next_millis(state.last_timestamp.saturating_sub(1));
        }

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                timestamp = wait_next_millis(state.last_timestamp);
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = timestamp;

        let elapsed = timestamp.saturating_sub(EPOCH_MILLIS);
        let id = (elapsed << (NODE_ID_BITS + SEQUENCE_BITS))
            | ((self.node_id as u64) << SEQUENCE_BITS)
            | state.sequence;
        Ok(id as i64)
    }
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(EPOCH_MILLIS)
}

fn wait_next_millis(last_timestamp: u64) -> u64 {
    loop {
        let timestamp = current_millis();
        if timestamp > last_timestamp {
            return timestamp;
        }
        sleep(Duration::from_micros(100));
    }
}

fn machine_node_id() -> u16 {
    match machine_hostname() {
        Some(hostname) => {
            let digest = blake3::hash(hostname.as_bytes());
            let bytes = digest.as_bytes();
            u16::from_le_bytes([bytes[0], bytes[1]]) & MAX_NODE_ID
        }
        None => rand::random::<u16>() & MAX_NODE_ID,
    }
}

#[cfg(unix)]
fn machine_hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.trim().is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
}

#[cfg(not(unix))]
fn machine_hostname() -> Option<String> {
    std::env::var("COMPUTERNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::{IdGenerator, MAX_NODE_ID, SEQUENCE_BITS};
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn ids_are_strictly_increasing() {
        let generator = IdGenerator::new(7).expect("generator");
        let mut previous = 0;
        for _ in 0..10_000 {
            let id = generator.next_id().expect("id");
            assert!(id > previous);
            previous = id;
        }
    }

    #[test]
    fn node_id_is_embedded() {
        let generator = IdGenerator::new(513).expect("generator");
        let id = generator.next_id().expect("id") as u64;
        assert_eq!((id >> SEQUENCE_BITS) & MAX_NODE_ID as u64, 513);
    }

    #[test]
    fn rejects_out_of_range_node_id() {
        assert!(IdGenerator::new(MAX_NODE_ID + 1).is_err());
    }

    #[test]
    fn machine_node_id_is_in_range() {
        let generator = IdGenerator::from_machine();
        assert!(generator.node_id() <= MAX_NODE_ID);
        assert!(generator.next_id().expect("id") > 0);
    }

    #[test]
    fn concurrent_callers_never_share_an_id() {
        let generator = Arc::new(IdGenerator::new(1).expect("generator"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || {
                    (0..2_000)
                        .map(|_| generator.next_id().expect("id"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("join") {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 8_000);
    }
}
