//! The pluggable deterministic state machine: a key/value map with
//! read/write/cas. Applying an operation is a pure function of the
//! current map plus the operation; the only side effect is the mapping
//! mutation, and the only output is the reply descriptor below.

use std::collections::HashMap;

use raftkv_core::error::KvError;
use serde_json::Value;

use crate::message::{Body, NodeId, Operation};

/// The reply an applied operation produces, and who it is addressed to.
pub struct Applied {
    pub client: NodeId,
    pub body: Body,
}

#[derive(Debug, Default)]
pub struct KvStore {
    map: HashMap<String, Value>,
}

fn key_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl KvStore {
    pub fn new() -> KvStore {
        KvStore::default()
    }

    /// Apply a single committed operation, producing the reply body
    /// that should be sent to `op.client()`.
    pub fn apply(&mut self, op: &Operation) -> Applied {
        match op {
            Operation::Read { key, msg_id, client } => {
                let body = match self.map.get(&key_string(key)) {
                    Some(v) => Body::ReadOk {
                        in_reply_to: *msg_id,
                        value: v.clone(),
                    },
                    None => {
                        let err = KvError::not_found();
                        Body::Error {
                            in_reply_to: *msg_id,
                            code: err.code,
                            text: err.text,
                        }
                    }
                };
                Applied {
                    client: client.clone(),
                    body,
                }
            }
            Operation::Write {
                key,
                value,
                msg_id,
                client,
            } => {
                self.map.insert(key_string(key), value.clone());
                Applied {
                    client: client.clone(),
                    body: Body::WriteOk {
                        in_reply_to: *msg_id,
                    },
                }
            }
            Operation::Cas {
                key,
                from,
                to,
                msg_id,
                client,
            } => {
                let k = key_string(key);
                let body = match self.map.get(&k) {
                    None => {
                        let err = KvError::not_found();
                        Body::Error {
                            in_reply_to: *msg_id,
                            code: err.code,
                            text: err.text,
                        }
                    }
                    Some(current) if current != from => {
                        let err = KvError::cas_mismatch(from, current);
                        Body::Error {
                            in_reply_to: *msg_id,
                            code: err.code,
                            text: err.text,
                        }
                    }
                    Some(_) => {
                        self.map.insert(k, to.clone());
                        Body::CasOk {
                            in_reply_to: *msg_id,
                        }
                    }
                };
                Applied {
                    client: client.clone(),
                    body,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op_write(k: &str, v: i64) -> Operation {
        Operation::Write {
            key: serde_json::json!(k),
            value: serde_json::json!(v),
            msg_id: 1,
            client: "c1".into(),
        }
    }

    fn op_read(k: &str) -> Operation {
        Operation::Read {
            key: serde_json::json!(k),
            msg_id: 2,
            client: "c1".into(),
        }
    }

    fn op_cas(k: &str, from: i64, to: i64) -> Operation {
        Operation::Cas {
            key: serde_json::json!(k),
            from: serde_json::json!(from),
            to: serde_json::json!(to),
            msg_id: 3,
            client: "c1".into(),
        }
    }

    #[test]
    fn read_missing_key_is_not_found() {
        let mut kv = KvStore::new();
        let applied = kv.apply(&op_read("missing"));
        match applied.body {
            Body::Error { code, .. } => assert_eq!(code, KvError::NOT_FOUND),
            other => panic!("expected error, got {:?}", std::mem::discriminant(&other)),
        }
    }

    #[test]
    fn write_then_read_returns_value() {
        let mut kv = KvStore::new();
        kv.apply(&op_write("k", 1));
        let applied = kv.apply(&op_read("k"));
        match applied.body {
            Body::ReadOk { value, .. } => assert_eq!(value, serde_json::json!(1)),
            _ => panic!("expected read_ok"),
        }
    }

    #[test]
    fn cas_succeeds_when_current_matches_from() {
        let mut kv = KvStore::new();
        kv.apply(&op_write("k", 1));
        let applied = kv.apply(&op_cas("k", 1, 2));
        assert!(matches!(applied.body, Body::CasOk { .. }));
        let applied = kv.apply(&op_read("k"));
        match applied.body {
            Body::ReadOk { value, .. } => assert_eq!(value, serde_json::json!(2)),
            _ => panic!("expected read_ok"),
        }
    }

    #[test]
    fn cas_mismatch_is_a_no_op() {
        let mut kv = KvStore::new();
        kv.apply(&op_write("k", 1));
        kv.apply(&op_cas("k", 2, 2));
        kv.apply(&op_write("k", 1)); // reassert baseline unaffected
        let applied = kv.apply(&op_read("k"));
        match applied.body {
            Body::ReadOk { value, .. } => assert_eq!(value, serde_json::json!(1)),
            _ => panic!("expected read_ok"),
        }
    }

    #[test]
    fn cas_on_missing_key_is_not_found() {
        let mut kv = KvStore::new();
        let applied = kv.apply(&op_cas("missing", 1, 2));
        match applied.body {
            Body::Error { code, .. } => assert_eq!(code, KvError::NOT_FOUND),
            _ => panic!("expected error"),
        }
    }
}
