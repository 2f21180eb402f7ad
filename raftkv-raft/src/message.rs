//! The wire protocol: a newline-delimited JSON envelope per message, one
//! line per message, on whatever duplex byte stream the transport is
//! given.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An id that uniquely identifies a node (or, on the client/dest side,
/// an opaque client identifier). Peers and clients share the same
/// namespace of strings, matching the wire protocol's untyped `src`/`dest`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

/// A term: monotonically increasing, only ever compared or replaced,
/// never decremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Term(pub u64);

impl Term {
    pub fn next(self) -> Term {
        Term(self.0 + 1)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 1-based log index. Index 0 refers to the sentinel entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct LogIndex(pub u64);

impl LogIndex {
    pub fn next(self) -> LogIndex {
        LogIndex(self.0 + 1)
    }

    pub fn prev(self) -> LogIndex {
        LogIndex(self.0.saturating_sub(1))
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A client-originated operation. Preserved verbatim through the log so
/// the state machine can address the reply to the right client after
/// apply, and the dispatcher can correlate the reply with the client's
/// own `msg_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Read {
        key: serde_json::Value,
        msg_id: u64,
        client: NodeId,
    },
    Write {
        key: serde_json::Value,
        value: serde_json::Value,
        msg_id: u64,
        client: NodeId,
    },
    Cas {
        key: serde_json::Value,
        from: serde_json::Value,
        to: serde_json::Value,
        msg_id: u64,
        client: NodeId,
    },
}

impl Operation {
    pub fn msg_id(&self) -> u64 {
        match self {
            Operation::Read { msg_id, .. } => *msg_id,
            Operation::Write { msg_id, .. } => *msg_id,
            Operation::Cas { msg_id, .. } => *msg_id,
        }
    }

    pub fn client(&self) -> &NodeId {
        match self {
            Operation::Read { client, .. } => client,
            Operation::Write { client, .. } => client,
            Operation::Cas { client, .. } => client,
        }
    }

    pub fn with_client(mut self, client: NodeId) -> Self {
        match &mut self {
            Operation::Read { client: c, .. } => *c = client,
            Operation::Write { client: c, .. } => *c = client,
            Operation::Cas { client: c, .. } => *c = client,
        }
        self
    }
}

/// An entry in the replicated log. Index 0 is the sentinel
/// (`term: 0, op: None`) and is never applied to the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub term: Term,
    pub op: Option<Operation>,
}

impl Entry {
    pub fn sentinel() -> Entry {
        Entry {
            term: Term(0),
            op: None,
        }
    }
}

/// Body of an inbound/outbound message. `type` tags the variant on the
/// wire; requests carry `msg_id`, replies carry `in_reply_to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Body {
    RaftInit {
        msg_id: u64,
        node_id: NodeId,
        node_ids: Vec<NodeId>,
    },
    RaftInitOk {
        in_reply_to: u64,
    },
    RequestVote {
        msg_id: u64,
        term: Term,
        candidate_id: NodeId,
        last_log_index: LogIndex,
        last_log_term: Term,
    },
    RequestVoteRes {
        in_reply_to: u64,
        term: Term,
        vote_granted: bool,
    },
    AppendEntries {
        msg_id: u64,
        term: Term,
        leader_id: NodeId,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<Entry>,
        leader_commit: LogIndex,
    },
    AppendEntriesRes {
        in_reply_to: u64,
        term: Term,
        success: bool,
    },
    Read {
        msg_id: u64,
        key: serde_json::Value,
    },
    ReadOk {
        in_reply_to: u64,
        value: serde_json::Value,
    },
    Write {
        msg_id: u64,
        key: serde_json::Value,
        value: serde_json::Value,
    },
    WriteOk {
        in_reply_to: u64,
    },
    Cas {
        msg_id: u64,
        key: serde_json::Value,
        from: serde_json::Value,
        to: serde_json::Value,
    },
    CasOk {
        in_reply_to: u64,
    },
    Error {
        in_reply_to: u64,
        code: u32,
        text: String,
    },
}

impl Body {
    /// The wire `type` tag, used for dispatcher registration and logging.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Body::RaftInit { .. } => "raft_init",
            Body::RaftInitOk { .. } => "raft_init_ok",
            Body::RequestVote { .. } => "request_vote",
            Body::RequestVoteRes { .. } => "request_vote_res",
            Body::AppendEntries { .. } => "append_entries",
            Body::AppendEntriesRes { .. } => "append_entries_res",
            Body::Read { .. } => "read",
            Body::ReadOk { .. } => "read_ok",
            Body::Write { .. } => "write",
            Body::WriteOk { .. } => "write_ok",
            Body::Cas { .. } => "cas",
            Body::CasOk { .. } => "cas_ok",
            Body::Error { .. } => "error",
        }
    }

    /// The correlation id this body replies to, if it is a reply.
    pub fn in_reply_to(&self) -> Option<u64> {
        match self {
            Body::RaftInitOk { in_reply_to }
            | Body::RequestVoteRes { in_reply_to, .. }
            | Body::AppendEntriesRes { in_reply_to, .. }
            | Body::ReadOk { in_reply_to, .. }
            | Body::WriteOk { in_reply_to }
            | Body::CasOk { in_reply_to }
            | Body::Error { in_reply_to, .. } => Some(*in_reply_to),
            _ => None,
        }
    }
}

/// The envelope every message is wrapped in: `{src, dest, body}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: Body,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_envelope_through_json() {
        let msg = Message {
            src: NodeId::from("n0"),
            dest: NodeId::from("n1"),
            body: Body::Read {
                msg_id: 3,
                key: serde_json::json!("x"),
            },
        };
        let line = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&line).unwrap();
        assert_eq!(back.src, NodeId::from("n0"));
        assert!(matches!(back.body, Body::Read { msg_id: 3, .. }));
    }

    #[test]
    fn reply_carries_in_reply_to() {
        let body = Body::ReadOk {
            in_reply_to: 7,
            value: serde_json::json!(1),
        };
        assert_eq!(body.in_reply_to(), Some(7));
        assert_eq!(body.type_tag(), "read_ok");
    }
}
