//! Routes inbound messages to registered per-type handling or to the
//! reply path for an outstanding RPC, and mints fresh request ids.
//!
//! This node has exactly one logical consumer of messages -- the Raft
//! state machine -- so "handler" registration here exists purely to
//! catch programming bugs (registering the same type twice) the way
//! the spec requires, while the reply-id bookkeeping is what actually
//! does useful work: telling a stale, late-arriving reply apart from
//! one the node is still waiting on.

use std::collections::HashSet;

use raftkv_core::error::{Error, Result};

use crate::message::Body;

#[derive(Debug, Default)]
pub struct Dispatcher {
    registered: HashSet<&'static str>,
    outstanding: HashSet<u64>,
    next_msg_id: u64,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        Dispatcher::default()
    }

    /// Register that this node handles messages of type `tag`.
    /// Permanent: registering the same type twice is a programming bug.
    pub fn register(&mut self, tag: &'static str) {
        if !self.registered.insert(tag) {
            panic!("handler for message type {:?} registered twice", tag);
        }
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.registered.contains(tag)
    }

    /// Allocate a fresh monotonically increasing request id.
    fn next_id(&mut self) -> u64 {
        self.next_msg_id += 1;
        self.next_msg_id
    }

    /// Assign a fresh id to an outbound request body (a no-op on reply
    /// bodies) and record it as outstanding.
    pub fn mint(&mut self, body: &mut Body) {
        let id = self.next_id();
        match body {
            Body::RequestVote { msg_id, .. } | Body::AppendEntries { msg_id, .. } => {
                *msg_id = id;
                self.outstanding.insert(id);
            }
            _ => {}
        }
    }

    /// Resolve an inbound reply's correlation id. `Ok(())` if it was
    /// outstanding (and is now consumed, one-shot); `Err` if it's
    /// stale -- a tier-1 protocol error to be logged and discarded, not
    /// propagated.
    pub fn resolve_reply(&mut self, in_reply_to: u64) -> Result<()> {
        if self.outstanding.remove(&in_reply_to) {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "stale reply: no outstanding request with id {}",
                in_reply_to
            )))
        }
    }

    /// Look up (without consuming) whether a type tag has a registered
    /// handler; an unregistered type is a `NoHandler`-style protocol
    /// error for the caller to log and discard.
    pub fn dispatch_check(&self, tag: &str) -> Result<()> {
        if self.is_registered(tag) {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "no handler registered for message type {:?}",
                tag
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{LogIndex, NodeId, Term};

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let mut d = Dispatcher::new();
        d.register("append_entries");
        d.register("append_entries");
    }

    #[test]
    fn mint_assigns_increasing_ids_and_tracks_them() {
        let mut d = Dispatcher::new();
        let mut a = Body::RequestVote {
            msg_id: 0,
            term: Term(1),
            candidate_id: NodeId::from("n0"),
            last_log_index: LogIndex(0),
            last_log_term: Term(0),
        };
        let mut b = a.clone();
        d.mint(&mut a);
        d.mint(&mut b);
        let (ida, idb) = match (&a, &b) {
            (Body::RequestVote { msg_id: x, .. }, Body::RequestVote { msg_id: y, .. }) => (*x, *y),
            _ => unreachable!(),
        };
        assert!(idb > ida);
        assert!(d.resolve_reply(ida).is_ok());
        assert!(d.resolve_reply(ida).is_err(), "one-shot: second resolve is stale");
    }

    #[test]
    fn resolving_unknown_id_is_a_protocol_error() {
        let mut d = Dispatcher::new();
        assert!(d.resolve_reply(999).is_err());
    }
}
