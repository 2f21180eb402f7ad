use std::time::Instant;

use raftkv_core::error::Result;

use crate::follower::Follower;
use crate::message::{Body, Entry, LogIndex, Message, Operation, Term};
use crate::progress::ReplicationProgress;
use crate::raft::{Apply, Event, Raft, RaftHandle, RaftRole, Role};

#[derive(Debug)]
pub struct Leader {
    pub progress: ReplicationProgress,
    pub last_heartbeat: Instant,
}

impl Role for Leader {
    fn role(&self) -> RaftRole {
        RaftRole::Leader
    }
}

impl Raft<Leader> {
    /// Build one AppendEntries per peer from its current `next_index`
    /// and send immediately -- used both on becoming leader and on
    /// every replication tick. Records, per peer, the match index that
    /// request will confirm if it succeeds (the log's tail right now,
    /// before any later client write can grow it further).
    pub fn emit_heartbeats(&mut self) -> Vec<Message> {
        let sent_upto = self.log.last_index();
        let peers: Vec<_> = self.role.progress.peer_ids().cloned().collect();
        peers
            .into_iter()
            .map(|peer| {
                let next_index = self
                    .role
                    .progress
                    .get(&peer)
                    .map(|p| p.next_index)
                    .unwrap_or_else(|| self.log.last_index().next());
                let prev_log_index = next_index.prev();
                let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(Term(0));
                let entries = self.log.slice_from(next_index);
                self.role.progress.record_sent(&peer, sent_upto);
                self.reply(
                    &peer,
                    Body::AppendEntries {
                        msg_id: 0,
                        term: self.state.current_term,
                        leader_id: self.id.clone(),
                        prev_log_index,
                        prev_log_term,
                        entries,
                        leader_commit: self.state.commit_index,
                    },
                )
            })
            .collect()
    }

    /// The leader's commit rule (§4.5): advance `commit_index` to the
    /// highest N > commit_index with `log[N].term == current_term` and
    /// a majority (including self) at `match_index >= N`.
    pub fn advance_commit_index(&mut self) {
        let majority = self.majority();
        let mut candidates: Vec<LogIndex> = self
            .role
            .progress
            .match_indices()
            .chain(std::iter::once(self.log.last_index()))
            .filter(|n| *n > self.state.commit_index)
            .collect();
        candidates.sort_by(|a, b| b.cmp(a));
        for n in candidates {
            if self.log.term_at(n) != Some(self.state.current_term) {
                continue;
            }
            let count = self
                .role
                .progress
                .match_indices()
                .chain(std::iter::once(self.log.last_index()))
                .filter(|m| *m >= n)
                .count();
            if count >= majority {
                self.state.commit_index = n;
                break;
            }
        }
    }
}

impl Apply for Raft<Leader> {
    fn apply(mut self, event: Event) -> Result<(RaftHandle, Vec<Message>)> {
        match event {
            Event::Tick => {
                if self.role.last_heartbeat.elapsed() >= self.config.replication_tick {
                    let out = self.emit_heartbeats();
                    self.role.last_heartbeat = Instant::now();
                    Ok((RaftHandle::Leader(self), out))
                } else {
                    Ok((RaftHandle::Leader(self), vec![]))
                }
            }

            Event::Message(Message {
                src,
                body:
                    Body::AppendEntriesRes {
                        term,
                        success,
                        ..
                    },
                ..
            }) => {
                if term > self.state.current_term {
                    self.observe_term(term)?;
                    return Ok((RaftHandle::Follower(Raft::from(self)), vec![]));
                }
                if term != self.state.current_term {
                    return Ok((RaftHandle::Leader(self), vec![]));
                }
                // Correlate the reply with what was actually sent, not
                // with the log's tail at the moment the reply happens to
                // arrive -- a client write appended between send and
                // reply must not be credited to a peer that never saw it.
                let pending = self.role.progress.take_pending_match(&src);
                if success {
                    if let Some(matched) = pending {
                        self.role.progress.set_success(&src, matched);
                        self.advance_commit_index();
                    }
                } else {
                    self.role.progress.decrement_next(&src);
                }
                Ok((RaftHandle::Leader(self), vec![]))
            }

            Event::Message(Message {
                src,
                body:
                    Body::RequestVote {
                        msg_id,
                        term,
                        candidate_id,
                        last_log_index,
                        last_log_term,
                    },
                ..
            }) => {
                if term > self.state.current_term {
                    self.observe_term(term)?;
                    let follower: Raft<Follower> = Raft::from(self);
                    let dest = follower.id.clone();
                    return follower.apply(Event::Message(Message {
                        src,
                        dest,
                        body: Body::RequestVote {
                            msg_id,
                            term,
                            candidate_id,
                            last_log_index,
                            last_log_term,
                        },
                    }));
                }
                let reply = self.reply(
                    &src,
                    Body::RequestVoteRes {
                        in_reply_to: msg_id,
                        term: self.state.current_term,
                        vote_granted: false,
                    },
                );
                Ok((RaftHandle::Leader(self), vec![reply]))
            }

            Event::Message(Message {
                src,
                body:
                    Body::AppendEntries {
                        msg_id,
                        term,
                        leader_id,
                        prev_log_index,
                        prev_log_term,
                        entries,
                        leader_commit,
                    },
                ..
            }) => {
                // Two leaders cannot coexist in the same term (Election
                // Safety), so a higher term always means step down; an
                // equal or lower term from another self-proclaimed
                // leader is stale and gets a plain rejection.
                if term > self.state.current_term {
                    self.observe_term(term)?;
                    let follower: Raft<Follower> = Raft::from(self);
                    let dest = follower.id.clone();
                    return follower.apply(Event::Message(Message {
                        src,
                        dest,
                        body: Body::AppendEntries {
                            msg_id,
                            term,
                            leader_id,
                            prev_log_index,
                            prev_log_term,
                            entries,
                            leader_commit,
                        },
                    }));
                }
                let reply = self.reply(
                    &src,
                    Body::AppendEntriesRes {
                        in_reply_to: msg_id,
                        term: self.state.current_term,
                        success: false,
                    },
                );
                Ok((RaftHandle::Leader(self), vec![reply]))
            }

            Event::Message(Message {
                src,
                body: Body::Read { key, msg_id },
                ..
            }) => {
                let op = Operation::Read {
                    key,
                    msg_id,
                    client: src,
                };
                self.append_client_op(op);
                // A cluster with no peers (majority == 1) is committed
                // by the leader's own log position alone; recompute
                // immediately rather than waiting for a peer reply that
                // will never come.
                self.advance_commit_index();
                Ok((RaftHandle::Leader(self), vec![]))
            }
            Event::Message(Message {
                src,
                body: Body::Write { key, value, msg_id },
                ..
            }) => {
                let op = Operation::Write {
                    key,
                    value,
                    msg_id,
                    client: src,
                };
                self.append_client_op(op);
                // A cluster with no peers (majority == 1) is committed
                // by the leader's own log position alone; recompute
                // immediately rather than waiting for a peer reply that
                // will never come.
                self.advance_commit_index();
                Ok((RaftHandle::Leader(self), vec![]))
            }
            Event::Message(Message {
                src,
                body:
                    Body::Cas {
                        key,
                        from,
                        to,
                        msg_id,
                    },
                ..
            }) => {
                let op = Operation::Cas {
                    key,
                    from,
                    to,
                    msg_id,
                    client: src,
                };
                self.append_client_op(op);
                // A cluster with no peers (majority == 1) is committed
                // by the leader's own log position alone; recompute
                // immediately rather than waiting for a peer reply that
                // will never come.
                self.advance_commit_index();
                Ok((RaftHandle::Leader(self), vec![]))
            }

            Event::Message(_) => Ok((RaftHandle::Leader(self), vec![])),
        }
    }
}

impl Raft<Leader> {
    fn append_client_op(&mut self, op: Operation) {
        self.log.append(vec![Entry {
            term: self.state.current_term,
            op: Some(op),
        }]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RaftConfig;
    use crate::message::NodeId;

    fn new_leader(id: &str, peers: Vec<&str>) -> Raft<Leader> {
        let peers: Vec<NodeId> = peers.into_iter().map(NodeId::from).collect();
        let progress = ReplicationProgress::new(&peers, &NodeId::from(id), LogIndex(0));
        Raft {
            id: NodeId::from(id),
            peers,
            log: crate::log::Log::new(),
            state: crate::raft::State::new(),
            config: RaftConfig::default(),
            logger: raftkv_core::logger::get_root_logger(),
            role: Leader {
                progress,
                last_heartbeat: Instant::now(),
            },
        }
    }

    #[test]
    fn client_write_is_appended_to_the_log_not_applied_directly() {
        let leader = new_leader("n0", vec!["n0", "n1", "n2"]);
        let (handle, out) = leader
            .apply(Event::Message(Message {
                src: NodeId::from("c1"),
                dest: NodeId::from("n0"),
                body: Body::Write {
                    msg_id: 1,
                    key: serde_json::json!("k"),
                    value: serde_json::json!(1),
                },
            }))
            .unwrap();
        assert!(out.is_empty(), "no reply until the entry commits");
        assert_eq!(handle.log().size(), LogIndex(1));
    }

    #[test]
    fn commit_index_advances_once_current_term_entry_has_a_majority() {
        let mut leader = new_leader("n0", vec!["n0", "n1", "n2"]);
        leader.state.current_term = Term(1);
        leader.log.append(vec![Entry {
            term: Term(1),
            op: None,
        }]);
        leader.role.progress.set_success(&NodeId::from("n1"), LogIndex(1));
        leader.advance_commit_index();
        assert_eq!(leader.state.commit_index, LogIndex(1));
    }

    #[test]
    fn stale_append_entries_ack_does_not_credit_entries_sent_after_it() {
        let mut leader = new_leader("n0", vec!["n0", "n1", "n2"]);
        leader.state.current_term = Term(1);
        // Round 1: both peers are sent the (still empty) log.
        leader.emit_heartbeats();
        // A client write grows the leader's log before either peer's
        // reply to that round arrives.
        let (handle, _) = leader
            .apply(Event::Message(Message {
                src: NodeId::from("c1"),
                dest: NodeId::from("n0"),
                body: Body::Write {
                    msg_id: 1,
                    key: serde_json::json!("k"),
                    value: serde_json::json!(1),
                },
            }))
            .unwrap();
        let leader = match handle {
            RaftHandle::Leader(l) => l,
            _ => panic!("expected leader"),
        };
        // n1's ack for the round-1 (empty) request arrives now -- it
        // must not be read as confirming the entry written afterward.
        let (handle, _) = leader
            .apply(Event::Message(Message {
                src: NodeId::from("n1"),
                dest: NodeId::from("n0"),
                body: Body::AppendEntriesRes {
                    in_reply_to: 0,
                    term: Term(1),
                    success: true,
                },
            }))
            .unwrap();
        assert_eq!(
            handle.commit_index(),
            LogIndex(0),
            "n1 never actually saw the new entry, so it cannot count toward its commit"
        );
    }

    #[test]
    fn prior_term_entries_are_not_committed_by_replication_alone() {
        let mut leader = new_leader("n0", vec!["n0", "n1", "n2"]);
        leader.state.current_term = Term(2);
        leader.log.append(vec![Entry {
            term: Term(1),
            op: None,
        }]);
        leader.role.progress.set_success(&NodeId::from("n1"), LogIndex(1));
        leader.advance_commit_index();
        assert_eq!(leader.state.commit_index, LogIndex(0));
    }
}
