use raftkv_core::error::{KvError, Result};

use crate::candidate::Candidate;
use crate::message::{Body, Entry, LogIndex, Message, Term};
use crate::raft::{Apply, Event, Raft, RaftHandle, RaftRole, Role};

#[derive(Debug)]
pub struct Follower {
    pub leader_id: Option<crate::message::NodeId>,
}

impl Role for Follower {
    fn role(&self) -> RaftRole {
        RaftRole::Follower
    }
}

impl Apply for Raft<Follower> {
    fn apply(mut self, event: Event) -> Result<(RaftHandle, Vec<Message>)> {
        match event {
            Event::Tick => {
                if self.needs_election() {
                    return Ok(crate::candidate::campaign(self));
                }
                Ok((RaftHandle::Follower(self), vec![]))
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
                if term < self.state.current_term {
                    let reply = self.reply(
                        &src,
                        Body::RequestVoteRes {
                            in_reply_to: msg_id,
                            term: self.state.current_term,
                            vote_granted: false,
                        },
                    );
                    return Ok((RaftHandle::Follower(self), vec![reply]));
                }
                self.observe_term(term)?;

                let can_vote = self.state.voted_for.is_none()
                    || self.state.voted_for.as_ref() == Some(&candidate_id);
                let up_to_date = self
                    .log
                    .is_candidate_up_to_date(last_log_term, last_log_index);
                let granted = can_vote && up_to_date;

                if granted {
                    self.state.voted_for = Some(candidate_id.clone());
                    self.reset_election_deadline();
                }

                let reply = self.reply(
                    &src,
                    Body::RequestVoteRes {
                        in_reply_to: msg_id,
                        term: self.state.current_term,
                        vote_granted: granted,
                    },
                );
                Ok((RaftHandle::Follower(self), vec![reply]))
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
            }) => self.handle_append_entries(
                src,
                msg_id,
                term,
                leader_id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            ),

            Event::Message(Message {
                src,
                body: Body::Read { msg_id, .. },
                ..
            }) => {
                let err = KvError::not_leader();
                let reply = self.reply(
                    &src,
                    Body::Error {
                        in_reply_to: msg_id,
                        code: err.code,
                        text: err.text,
                    },
                );
                Ok((RaftHandle::Follower(self), vec![reply]))
            }
            Event::Message(Message {
                src,
                body: Body::Write { msg_id, .. },
                ..
            }) => {
                let err = KvError::not_leader();
                let reply = self.reply(
                    &src,
                    Body::Error {
                        in_reply_to: msg_id,
                        code: err.code,
                        text: err.text,
                    },
                );
                Ok((RaftHandle::Follower(self), vec![reply]))
            }
            Event::Message(Message {
                src,
                body: Body::Cas { msg_id, .. },
                ..
            }) => {
                let err = KvError::not_leader();
                let reply = self.reply(
                    &src,
                    Body::Error {
                        in_reply_to: msg_id,
                        code: err.code,
                        text: err.text,
                    },
                );
                Ok((RaftHandle::Follower(self), vec![reply]))
            }

            // Stray replies, or messages irrelevant to a follower: no-op.
            Event::Message(_) => Ok((RaftHandle::Follower(self), vec![])),
        }
    }
}

impl Raft<Follower> {
    #[allow(clippy::too_many_arguments)]
    fn handle_append_entries(
        mut self,
        src: crate::message::NodeId,
        msg_id: u64,
        term: Term,
        leader_id: crate::message::NodeId,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<Entry>,
        leader_commit: LogIndex,
    ) -> Result<(RaftHandle, Vec<Message>)> {
        if term < self.state.current_term {
            let reply = self.reply(
                &src,
                Body::AppendEntriesRes {
                    in_reply_to: msg_id,
                    term: self.state.current_term,
                    success: false,
                },
            );
            return Ok((RaftHandle::Follower(self), vec![reply]));
        }
        self.observe_term(term)?;
        self.role.leader_id = Some(leader_id);
        self.reset_election_deadline();

        if prev_log_index.0 > 0 {
            match self.log.term_at(prev_log_index) {
                Some(t) if t == prev_log_term => {}
                _ => {
                    let reply = self.reply(
                        &src,
                        Body::AppendEntriesRes {
                            in_reply_to: msg_id,
                            term: self.state.current_term,
                            success: false,
                        },
                    );
                    return Ok((RaftHandle::Follower(self), vec![reply]));
                }
            }
        }

        let mut next_index = prev_log_index.next();
        for entry in entries {
            match self.log.term_at(next_index) {
                Some(t) if t != entry.term => {
                    self.log.truncate_from(next_index);
                    self.log.append(vec![entry]);
                }
                Some(_) => {
                    // Entry already present and matches: nothing to do.
                }
                None => {
                    self.log.append(vec![entry]);
                }
            }
            next_index = next_index.next();
        }

        if leader_commit > self.state.commit_index {
            let last_new_index = self.log.last_index();
            self.state.commit_index = LogIndex(leader_commit.0.min(last_new_index.0));
        }

        let reply = self.reply(
            &src,
            Body::AppendEntriesRes {
                in_reply_to: msg_id,
                term: self.state.current_term,
                success: true,
            },
        );
        Ok((RaftHandle::Follower(self), vec![reply]))
    }
}

impl From<Raft<Candidate>> for Raft<Follower> {
    fn from(val: Raft<Candidate>) -> Raft<Follower> {
        Raft {
            id: val.id,
            peers: val.peers,
            log: val.log,
            state: val.state,
            config: val.config,
            logger: val.logger.new(o!("role" => "follower")),
            role: Follower { leader_id: None },
        }
    }
}

impl From<Raft<crate::leader::Leader>> for Raft<Follower> {
    fn from(val: Raft<crate::leader::Leader>) -> Raft<Follower> {
        Raft {
            id: val.id,
            peers: val.peers,
            log: val.log,
            state: val.state,
            config: val.config,
            logger: val.logger.new(o!("role" => "follower")),
            role: Follower { leader_id: None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RaftConfig;
    use crate::message::NodeId;

    fn new_follower(id: &str, peers: Vec<&str>) -> Raft<Follower> {
        let mut raft = Raft {
            id: NodeId::from(id),
            peers: peers.into_iter().map(NodeId::from).collect(),
            log: crate::log::Log::new(),
            state: crate::raft::State::new(),
            config: RaftConfig::default(),
            logger: raftkv_core::logger::get_root_logger(),
            role: Follower { leader_id: None },
        };
        raft.reset_election_deadline();
        raft
    }

    #[test]
    fn grants_vote_when_log_is_up_to_date_and_unvoted() {
        let follower = new_follower("n0", vec!["n0", "n1"]);
        let (handle, msgs) = follower
            .apply(Event::Message(Message {
                src: NodeId::from("n1"),
                dest: NodeId::from("n0"),
                body: Body::RequestVote {
                    msg_id: 1,
                    term: Term(1),
                    candidate_id: NodeId::from("n1"),
                    last_log_index: LogIndex(0),
                    last_log_term: Term(0),
                },
            }))
            .unwrap();
        assert_eq!(handle.role(), RaftRole::Follower);
        match &msgs[0].body {
            Body::RequestVoteRes { vote_granted, .. } => assert!(vote_granted),
            _ => panic!("expected vote response"),
        }
    }

    #[test]
    fn rejects_append_entries_on_log_mismatch() {
        let follower = new_follower("n0", vec!["n0", "n1"]);
        let (handle, msgs) = follower
            .apply(Event::Message(Message {
                src: NodeId::from("n1"),
                dest: NodeId::from("n0"),
                body: Body::AppendEntries {
                    msg_id: 1,
                    term: Term(1),
                    leader_id: NodeId::from("n1"),
                    prev_log_index: LogIndex(5),
                    prev_log_term: Term(1),
                    entries: vec![],
                    leader_commit: LogIndex(0),
                },
            }))
            .unwrap();
        assert_eq!(handle.role(), RaftRole::Follower);
        match &msgs[0].body {
            Body::AppendEntriesRes { success, .. } => assert!(!success),
            _ => panic!("expected append response"),
        }
    }

    #[test]
    fn client_write_on_follower_is_not_a_leader_error() {
        let follower = new_follower("n0", vec!["n0", "n1"]);
        let (_, msgs) = follower
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
        match &msgs[0].body {
            Body::Error { code, .. } => assert_eq!(*code, KvError::NOT_LEADER),
            _ => panic!("expected not-a-leader error"),
        }
    }
}
