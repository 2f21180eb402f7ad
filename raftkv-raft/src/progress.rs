//! Per-peer leader replication state: `next_index` and `match_index`.

use std::collections::HashMap;

use crate::message::{LogIndex, NodeId};

#[derive(Debug, Clone, Copy)]
pub struct PeerProgress {
    pub next_index: LogIndex,
    pub match_index: LogIndex,
    /// The match index this peer will reach if its most recently sent,
    /// not-yet-acknowledged `AppendEntries` succeeds. Cleared the moment
    /// that request is acknowledged (successfully or not), so a reply
    /// is always matched against what was actually sent rather than
    /// whatever the log's tail happens to be when the reply arrives.
    pending_match: Option<LogIndex>,
}

#[derive(Debug, Default)]
pub struct ReplicationProgress {
    peers: HashMap<NodeId, PeerProgress>,
}

impl ReplicationProgress {
    /// Initialize progress for every peer other than `self_id`, with
    /// `next_index = log_size + 1` and `match_index = 0` per §4.5's
    /// "on entering leader" rule.
    pub fn new(peers: &[NodeId], self_id: &NodeId, log_size: LogIndex) -> ReplicationProgress {
        let mut map = HashMap::new();
        for p in peers {
            if p != self_id {
                map.insert(
                    p.clone(),
                    PeerProgress {
                        next_index: log_size.next(),
                        match_index: LogIndex(0),
                        pending_match: None,
                    },
                );
            }
        }
        ReplicationProgress { peers: map }
    }

    pub fn get(&self, peer: &NodeId) -> Option<PeerProgress> {
        self.peers.get(peer).copied()
    }

    pub fn set_success(&mut self, peer: &NodeId, match_index: LogIndex) {
        if let Some(p) = self.peers.get_mut(peer) {
            p.match_index = match_index;
            p.next_index = match_index.next();
        }
    }

    pub fn decrement_next(&mut self, peer: &NodeId) {
        if let Some(p) = self.peers.get_mut(peer) {
            p.next_index = LogIndex(p.next_index.0.saturating_sub(1).max(1));
        }
    }

    /// Record what a just-sent `AppendEntries` to `peer` would confirm if
    /// it succeeds -- the log's tail at the moment of sending, not
    /// whatever it grows to be by the time the reply is processed.
    pub fn record_sent(&mut self, peer: &NodeId, sent_upto: LogIndex) {
        if let Some(p) = self.peers.get_mut(peer) {
            p.pending_match = Some(sent_upto);
        }
    }

    /// Consume and return the match index a reply from `peer` confirms,
    /// if a request is still outstanding for it. `None` means there was
    /// nothing to correlate the reply with (e.g. a duplicate ack).
    pub fn take_pending_match(&mut self, peer: &NodeId) -> Option<LogIndex> {
        self.peers.get_mut(peer).and_then(|p| p.pending_match.take())
    }

    pub fn match_indices(&self) -> impl Iterator<Item = LogIndex> + '_ {
        self.peers.values().map(|p| p.match_index)
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.peers.keys()
    }
}
