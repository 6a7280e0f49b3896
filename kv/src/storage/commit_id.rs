use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use uuid::{Context, Timestamp, Uuid};

/// Mints time-ordered, UUID-v1-style commit ids: a 128-bit identifier
/// combining a MAC-style node id with a timestamp, monotonic per process
/// under normal conditions. A single process-wide [`Context`] supplies the
/// clock sequence so that ids minted within the same timestamp tick still
/// sort monotonically; the "node id" half is a random 48 bits generated
/// once per process rather than a real MAC address, since this process has
/// no stable network identity to draw one from.
pub struct CommitIdGenerator {
    context: Context,
    node_id: [u8; 6],
}

impl CommitIdGenerator {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let mut node_id: [u8; 6] = rng.gen();
        // Set the multicast bit, the convention for locally-administered /
        // non-hardware node ids in RFC 4122 implementations.
        node_id[0] |= 0x01;
        Self { context: Context::new(rng.gen()), node_id }
    }

    pub fn next(&self) -> Uuid {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let ts = Timestamp::from_unix(&self.context, now.as_secs(), now.subsec_nanos());
        Uuid::new_v1(ts, &self.node_id)
    }
}

impl Default for CommitIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_ids_are_monotonic() {
        let gen = CommitIdGenerator::new();
        let mut prev = gen.next();
        for _ in 0..100 {
            let next = gen.next();
            assert!(next > prev, "commit ids must be monotonically increasing");
            prev = next;
        }
    }
}
