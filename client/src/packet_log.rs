//! Ordered buffer of local input packets not yet acknowledged by the server.

use shared::InputPacket;
use std::collections::VecDeque;
use std::time::Instant;

/// One logged input: the wire packet plus its local monotonic capture time,
/// which drives the replay deltas during reconciliation.
#[derive(Debug, Clone)]
pub struct LoggedInput {
    pub captured_at: Instant,
    pub packet: InputPacket,
}

#[derive(Debug, Default)]
pub struct PacketLog {
    entries: VecDeque<LoggedInput>,
}

impl PacketLog {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub fn append(&mut self, entry: LoggedInput) {
        self.entries.push_back(entry);
    }

    /// Drops every entry older than the acknowledged packet, keeping the
    /// acknowledged entry itself as the replay time anchor. An unknown id
    /// (already pruned, or from the future) leaves the log untouched: a
    /// stale snapshot is a no-op prune, not an error. Idempotent.
    pub fn prune_up_to(&mut self, packet_id: u32) {
        if let Some(index) = self
            .entries
            .iter()
            .position(|e| e.packet.packet_id == packet_id)
        {
            self.entries.drain(..index);
        }
    }

    /// Ordered, restartable view of the log contents at call time.
    pub fn entries(&self) -> impl Iterator<Item = &LoggedInput> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
