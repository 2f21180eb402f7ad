use raftkv_core::error::{KvError, Result};

use crate::election::{Election, ElectionStatus};
use crate::follower::Follower;
use crate::leader::Leader;
use crate::message::{Body, Message, NodeId};
use crate::raft::{Apply, Event, Raft, RaftHandle, RaftRole, Role};

#[derive(Debug)]
pub struct Candidate {
    pub election: Election,
}

impl Role for Candidate {
    fn role(&self) -> RaftRole {
        RaftRole::Candidate
    }
}

/// Begin a candidacy: increment the term, vote for self, reset the
/// election deadline, and broadcast `request_vote` to every other peer.
/// Shared by the `follower -> candidate` and `candidate -> candidate`
/// (re-campaign on a second timeout) transitions.
fn start_campaign(mut raft: Raft<Candidate>) -> (RaftHandle, Vec<Message>) {
    raft.state.current_term = raft.state.current_term.next();
    raft.state.voted_for = Some(raft.id.clone());
    raft.reset_election_deadline();
    raft.role.election = Election::new(raft.peers.len());
    raft.role.election.vote(raft.id.clone(), true);

    // A single-node cluster (or any cluster where a strict majority is
    // just the self-vote) is already elected the moment it votes for
    // itself -- there is no peer left to send a RequestVote to, and
    // thus no reply that would otherwise drive the Candidate -> Leader
    // check below.
    if raft.role.election.status() == ElectionStatus::Elected {
        let term = raft.state.current_term;
        info!(raft.logger, "elected unopposed"; "term" => term.0);
        let mut leader: Raft<Leader> = Raft::from(raft);
        let out = leader.emit_heartbeats();
        return (RaftHandle::Leader(leader), out);
    }

    let term = raft.state.current_term;
    let last_log_index = raft.log.last_index();
    let last_log_term = raft.log.last_term();
    let candidate_id = raft.id.clone();

    let mut out = Vec::new();
    for peer in raft.peers.iter().filter(|p| **p != raft.id) {
        out.push(raft.reply(
            peer,
            Body::RequestVote {
                msg_id: 0,
                term,
                candidate_id: candidate_id.clone(),
                last_log_index,
                last_log_term,
            },
        ));
    }

    info!(raft.logger, "seeking election"; "term" => term.0);
    (RaftHandle::Candidate(raft), out)
}

/// `follower -> candidate`: the election deadline expired.
pub fn campaign(follower: Raft<Follower>) -> (RaftHandle, Vec<Message>) {
    let candidate = Raft {
        id: follower.id,
        peers: follower.peers,
        log: follower.log,
        state: follower.state,
        config: follower.config,
        logger: follower.logger.new(o!("role" => "candidate")),
        role: Candidate {
            election: Election::new(0),
        },
    };
    start_campaign(candidate)
}

impl Apply for Raft<Candidate> {
    fn apply(mut self, event: Event) -> Result<(RaftHandle, Vec<Message>)> {
        match event {
            Event::Tick => {
                if self.needs_election() {
                    match self.role.election.status() {
                        ElectionStatus::Elected => {
                            // Should have already transitioned on the
                            // deciding vote; nothing to do here.
                            Ok((RaftHandle::Candidate(self), vec![]))
                        }
                        ElectionStatus::Voting | ElectionStatus::Defeated => {
                            Ok(start_campaign(self))
                        }
                    }
                } else {
                    Ok((RaftHandle::Candidate(self), vec![]))
                }
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
                // Already voted for self this term: deny everyone else.
                let reply = self.reply(
                    &src,
                    Body::RequestVoteRes {
                        in_reply_to: msg_id,
                        term: self.state.current_term,
                        vote_granted: false,
                    },
                );
                Ok((RaftHandle::Candidate(self), vec![reply]))
            }

            Event::Message(Message {
                body:
                    Body::RequestVoteRes {
                        term,
                        vote_granted,
                        ..
                    },
                src,
                ..
            }) => {
                if term > self.state.current_term {
                    self.observe_term(term)?;
                    return Ok((RaftHandle::Follower(Raft::from(self)), vec![]));
                }
                if term != self.state.current_term || !vote_granted {
                    return Ok((RaftHandle::Candidate(self), vec![]));
                }
                self.role.election.vote(src, true);
                match self.role.election.status() {
                    ElectionStatus::Elected => {
                        let mut leader: Raft<Leader> = Raft::from(self);
                        let out = leader.emit_heartbeats();
                        Ok((RaftHandle::Leader(leader), out))
                    }
                    ElectionStatus::Voting => Ok((RaftHandle::Candidate(self), vec![])),
                    ElectionStatus::Defeated => Ok((RaftHandle::Follower(Raft::from(self)), vec![])),
                }
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
                if term >= self.state.current_term {
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
                Ok((RaftHandle::Candidate(self), vec![reply]))
            }

            Event::Message(Message {
                src,
                body: Body::Read { msg_id, .. },
                ..
            })
            | Event::Message(Message {
                src,
                body: Body::Write { msg_id, .. },
                ..
            })
            | Event::Message(Message {
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
                Ok((RaftHandle::Candidate(self), vec![reply]))
            }

            Event::Message(_) => Ok((RaftHandle::Candidate(self), vec![])),
        }
    }
}

impl From<Raft<Candidate>> for Raft<Leader> {
    fn from(val: Raft<Candidate>) -> Raft<Leader> {
        let progress = crate::progress::ReplicationProgress::new(&val.peers, &val.id, val.log.last_index());
        Raft {
            id: val.id,
            peers: val.peers,
            log: val.log,
            state: val.state,
            config: val.config,
            logger: val.logger.new(o!("role" => "leader")),
            role: Leader {
                progress,
                last_heartbeat: std::time::Instant::now(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RaftConfig;
    use crate::message::Term;

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
    fn campaign_votes_for_self_and_broadcasts() {
        let follower = new_follower("n0", vec!["n0", "n1", "n2"]);
        let (handle, msgs) = campaign(follower);
        assert_eq!(handle.role(), RaftRole::Candidate);
        assert_eq!(handle.current_term(), Term(1));
        assert_eq!(msgs.len(), 2);
        for m in &msgs {
            assert!(matches!(m.body, Body::RequestVote { .. }));
        }
    }

    #[test]
    fn becomes_leader_on_majority_of_votes() {
        let follower = new_follower("n0", vec!["n0", "n1", "n2"]);
        let (handle, _) = campaign(follower);
        let candidate = match handle {
            RaftHandle::Candidate(c) => c,
            _ => panic!("expected candidate"),
        };
        let term = candidate.state.current_term;
        let (handle, _) = candidate
            .apply(Event::Message(Message {
                src: NodeId::from("n1"),
                dest: NodeId::from("n0"),
                body: Body::RequestVoteRes {
                    in_reply_to: 1,
                    term,
                    vote_granted: true,
                },
            }))
            .unwrap();
        assert_eq!(handle.role(), RaftRole::Leader);
    }

    #[test]
    fn steps_down_on_higher_term_append_entries() {
        let follower = new_follower("n0", vec!["n0", "n1", "n2"]);
        let (handle, _) = campaign(follower);
        let candidate = match handle {
            RaftHandle::Candidate(c) => c,
            _ => panic!("expected candidate"),
        };
        let higher = candidate.state.current_term.next();
        let (handle, _) = candidate
            .apply(Event::Message(Message {
                src: NodeId::from("n1"),
                dest: NodeId::from("n0"),
                body: Body::AppendEntries {
                    msg_id: 1,
                    term: higher,
                    leader_id: NodeId::from("n1"),
                    prev_log_index: crate::message::LogIndex(0),
                    prev_log_term: Term(0),
                    entries: vec![],
                    leader_commit: crate::message::LogIndex(0),
                },
            }))
            .unwrap();
        assert_eq!(handle.role(), RaftRole::Follower);
        assert_eq!(handle.current_term(), higher);
    }
}
