//! The role state machine: the fields and behavior common to all three
//! roles, typed so that a given role's data (e.g. a leader's replication
//! progress) simply doesn't exist on a `Raft<Follower>`.

use std::time::{Duration, Instant};

use rand::Rng;
use slog::Logger;

use raftkv_core::error::{Error, Result};

use crate::candidate::Candidate;
use crate::config::RaftConfig;
use crate::follower::Follower;
use crate::leader::Leader;
use crate::log::Log;
use crate::message::{Body, LogIndex, Message, NodeId, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

/// Shared behavior every role implements.
pub trait Role: std::fmt::Debug {
    fn role(&self) -> RaftRole;
}

/// An event fed into the state machine: either a tick of the event
/// loop's timers, or an inbound message (already past the dispatcher's
/// staleness/registration checks).
#[derive(Debug)]
pub enum Event {
    Tick,
    Message(Message),
}

/// Volatile (and, in a durable variant, persistent) state common to all
/// roles.
#[derive(Debug, Clone)]
pub struct State {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub election_deadline: Instant,
}

impl State {
    pub(crate) fn new() -> State {
        State {
            current_term: Term(0),
            voted_for: None,
            commit_index: LogIndex(0),
            last_applied: LogIndex(0),
            election_deadline: Instant::now(),
        }
    }
}

/// The node, generic over its current role.
pub struct Raft<T: Role> {
    pub id: NodeId,
    pub peers: Vec<NodeId>,
    pub log: Log,
    pub state: State,
    pub config: RaftConfig,
    pub logger: Logger,
    pub role: T,
}

impl<T: Role> Raft<T> {
    pub fn needs_election(&self) -> bool {
        Instant::now() >= self.state.election_deadline
    }

    pub fn majority(&self) -> usize {
        self.peers.len() / 2 + 1
    }

    /// Draw a fresh randomized election deadline: base timeout times a
    /// uniform factor in [1, 2). Independent per node by construction
    /// (each node has its own `rand::thread_rng`).
    pub fn reset_election_deadline(&mut self) {
        let factor = rand::thread_rng().gen_range(1.0..2.0);
        let timeout = self.config.election_timeout.mul_f64(factor);
        self.state.election_deadline = Instant::now() + timeout;
    }

    /// Adopt a term observed on the wire. Per invariant 1, the term
    /// must never decrease; this is a tier-3 fatal violation if it
    /// would.
    pub fn observe_term(&mut self, term: Term) -> Result<()> {
        if term < self.state.current_term {
            return Err(Error::Fatal(format!(
                "{}: observed term {} is lower than current term {}",
                self.id, term, self.state.current_term
            )));
        }
        if term > self.state.current_term {
            self.state.current_term = term;
            self.state.voted_for = None;
        }
        Ok(())
    }

    pub fn reply(&self, dest: &NodeId, body: Body) -> Message {
        Message {
            src: self.id.clone(),
            dest: dest.clone(),
            body,
        }
    }

    fn log_event(&self, event: &Event) {
        match event {
            Event::Tick => {}
            Event::Message(m) => {
                debug!(self.logger, "handling message"; "type" => m.body.type_tag(), "src" => %m.src);
            }
        }
    }
}

/// Applying an event is the basic way the state machine moves forward.
/// Each role implements this to handle how it responds (or does not
/// respond) to a particular event, returning the (possibly
/// role-transitioned) handle and any outbound messages to send.
pub trait Apply {
    fn apply(self, event: Event) -> Result<(RaftHandle, Vec<Message>)>;
}

/// Since applying an event can transition to any of the three roles,
/// the result is type-erased into this enum, sized to the largest
/// variant.
pub enum RaftHandle {
    Follower(Raft<Follower>),
    Candidate(Raft<Candidate>),
    Leader(Raft<Leader>),
}

impl RaftHandle {
    /// A fresh instance in the follower role, as produced by
    /// initialization (`nascent -> follower`, per §4.5).
    pub fn new(id: NodeId, peers: Vec<NodeId>, config: RaftConfig, logger: Logger) -> RaftHandle {
        let mut raft = Raft {
            id,
            peers,
            log: Log::new(),
            state: State::new(),
            config,
            logger,
            role: Follower { leader_id: None },
        };
        raft.reset_election_deadline();
        RaftHandle::Follower(raft)
    }

    pub fn role(&self) -> RaftRole {
        match self {
            RaftHandle::Follower(_) => RaftRole::Follower,
            RaftHandle::Candidate(_) => RaftRole::Candidate,
            RaftHandle::Leader(_) => RaftRole::Leader,
        }
    }

    pub fn id(&self) -> &NodeId {
        match self {
            RaftHandle::Follower(r) => &r.id,
            RaftHandle::Candidate(r) => &r.id,
            RaftHandle::Leader(r) => &r.id,
        }
    }

    pub fn current_term(&self) -> Term {
        match self {
            RaftHandle::Follower(r) => r.state.current_term,
            RaftHandle::Candidate(r) => r.state.current_term,
            RaftHandle::Leader(r) => r.state.current_term,
        }
    }

    pub fn commit_index(&self) -> LogIndex {
        match self {
            RaftHandle::Follower(r) => r.state.commit_index,
            RaftHandle::Candidate(r) => r.state.commit_index,
            RaftHandle::Leader(r) => r.state.commit_index,
        }
    }

    pub fn last_applied(&self) -> LogIndex {
        match self {
            RaftHandle::Follower(r) => r.state.last_applied,
            RaftHandle::Candidate(r) => r.state.last_applied,
            RaftHandle::Leader(r) => r.state.last_applied,
        }
    }

    pub fn set_last_applied(&mut self, index: LogIndex) {
        match self {
            RaftHandle::Follower(r) => r.state.last_applied = index,
            RaftHandle::Candidate(r) => r.state.last_applied = index,
            RaftHandle::Leader(r) => r.state.last_applied = index,
        }
    }

    pub fn log(&self) -> &Log {
        match self {
            RaftHandle::Follower(r) => &r.log,
            RaftHandle::Candidate(r) => &r.log,
            RaftHandle::Leader(r) => &r.log,
        }
    }

    pub fn logger(&self) -> &Logger {
        match self {
            RaftHandle::Follower(r) => &r.logger,
            RaftHandle::Candidate(r) => &r.logger,
            RaftHandle::Leader(r) => &r.logger,
        }
    }
}

impl Apply for RaftHandle {
    fn apply(self, event: Event) -> Result<(RaftHandle, Vec<Message>)> {
        match self {
            RaftHandle::Follower(raft) => {
                raft.log_event(&event);
                raft.apply(event)
            }
            RaftHandle::Candidate(raft) => {
                raft.log_event(&event);
                raft.apply(event)
            }
            RaftHandle::Leader(raft) => {
                raft.log_event(&event);
                raft.apply(event)
            }
        }
    }
}

/// The replication tick period must stay strictly below the minimum
/// possible election timeout, so a leader's heartbeat always beats a
/// follower's timer even at the most pessimistic jitter draw.
pub fn min_possible_election_timeout(config: &RaftConfig) -> Duration {
    config.election_timeout
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> Logger {
        raftkv_core::logger::get_root_logger()
    }

    #[test]
    fn new_handle_starts_as_follower_at_term_zero() {
        let handle = RaftHandle::new(
            NodeId::from("n0"),
            vec![NodeId::from("n0"), NodeId::from("n1"), NodeId::from("n2")],
            RaftConfig::default(),
            logger(),
        );
        assert_eq!(handle.role(), RaftRole::Follower);
        assert_eq!(handle.current_term(), Term(0));
    }

    #[test]
    fn observing_a_lower_term_is_fatal() {
        let handle = RaftHandle::new(
            NodeId::from("n0"),
            vec![NodeId::from("n0")],
            RaftConfig::default(),
            logger(),
        );
        if let RaftHandle::Follower(mut raft) = handle {
            raft.state.current_term = Term(5);
            let err = raft.observe_term(Term(4)).unwrap_err();
            assert!(matches!(err, Error::Fatal(_)));
        } else {
            panic!("expected follower");
        }
    }
}
