//! The event loop: the one place that owns a `Transport`, a
//! `Dispatcher`, a `RaftHandle` and a `KvStore` together, and ties them
//! into the single-threaded cooperative loop described in the design
//! (transport -> dispatch -> consensus core -> apply, repeat).
//!
//! Before `raft_init` arrives the node is `nascent`: it has no
//! `RaftHandle` yet (`self.raft` is `None`), and any message other than
//! `raft_init` is a fatal protocol violation, matching the reference
//! scaffold this was distilled from.

use std::thread;

use slog::Logger;

use raftkv_core::error::{Error, Result};

use crate::config::RaftConfig;
use crate::dispatch::Dispatcher;
use crate::message::{Body, Message, NodeId};
use crate::raft::{Apply, Event, RaftHandle, RaftRole};
use crate::state_machine::KvStore;
use crate::transport::Transport;

/// Every wire message type this node ever receives as a fresh request
/// (as opposed to a reply correlated by `in_reply_to`). Registered once
/// at construction so the dispatcher can tell an unknown type apart
/// from a stale reply.
const REQUEST_TYPES: &[&str] = &[
    "raft_init",
    "request_vote",
    "append_entries",
    "read",
    "write",
    "cas",
];

pub struct Node<T: Transport> {
    transport: T,
    dispatcher: Dispatcher,
    kv: KvStore,
    config: RaftConfig,
    logger: Logger,
    /// `None` until `raft_init` arrives (the `nascent` role of §3).
    raft: Option<RaftHandle>,
}

impl<T: Transport> Node<T> {
    pub fn new(config: RaftConfig, logger: Logger, transport: T) -> Node<T> {
        let mut dispatcher = Dispatcher::new();
        for tag in REQUEST_TYPES {
            dispatcher.register(tag);
        }
        Node {
            transport,
            dispatcher,
            kv: KvStore::new(),
            config,
            logger,
            raft: None,
        }
    }

    /// Run the event loop until end-of-input (clean exit) or a fatal
    /// invariant violation (propagated to the caller, which exits
    /// non-zero).
    pub fn run(mut self) -> Result<()> {
        info!(self.logger, "Online.");
        loop {
            match self.step() {
                Ok(_) => {}
                Err(Error::Eof) => {
                    info!(self.logger, "end of input, shutting down");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Access to the transport, for harnesses that need to inject
    /// inbound messages or inspect what was sent (e.g. `ChannelTransport`
    /// in integration tests).
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The current role handle, if past `raft_init`.
    pub fn raft(&self) -> Option<&RaftHandle> {
        self.raft.as_ref()
    }

    /// One iteration: drain at most one inbound message, fire due
    /// timers, advance commit and apply newly-committed entries, and
    /// report whether any of that did real work (so the caller knows
    /// whether to idle-sleep). Public so integration-test harnesses can
    /// single-step a `Node` without blocking in `run()`.
    pub fn step(&mut self) -> Result<bool> {
        let mut did_work = false;

        match self.transport.try_receive() {
            Ok(Some(msg)) => {
                did_work = true;
                self.handle_message(msg)?;
            }
            Ok(None) => {}
            Err(Error::Protocol(e)) => {
                // A malformed line fails to parse into a message; it is
                // reported (not silently dropped) but does not bring
                // down the node -- tier 1 per the error design.
                warn!(self.logger, "discarding malformed input line"; "error" => %e);
            }
            Err(e) => return Err(e),
        }

        if let Some(handle) = self.raft.take() {
            let (handle, out) = handle.apply(Event::Tick)?;
            did_work = did_work || !out.is_empty();
            self.raft = Some(handle);
            self.send_all(out)?;
        }

        if self.drain_apply_queue()? {
            did_work = true;
        }

        if !did_work {
            thread::sleep(self.config.idle_sleep);
        }

        Ok(did_work)
    }

    fn handle_message(&mut self, msg: Message) -> Result<()> {
        match (&self.raft, &msg.body) {
            (None, Body::RaftInit { .. }) => return self.handle_init(msg),
            (None, other) => {
                return Err(Error::Fatal(format!(
                    "received {} before raft_init",
                    other.type_tag()
                )));
            }
            (Some(_), Body::RaftInit { .. }) => {
                return Err(Error::Fatal(
                    "received a second raft_init after initialization".to_string(),
                ));
            }
            _ => {}
        }

        if let Some(id) = msg.body.in_reply_to() {
            if let Err(e) = self.dispatcher.resolve_reply(id) {
                warn!(self.logger, "discarding stale reply"; "error" => %e);
                return Ok(());
            }
        } else {
            let tag = msg.body.type_tag();
            if let Err(e) = self.dispatcher.dispatch_check(tag) {
                warn!(self.logger, "discarding message with no handler"; "error" => %e);
                return Ok(());
            }
        }

        let handle = self.raft.take().expect("checked initialized above");
        let (handle, out) = handle.apply(Event::Message(msg))?;
        self.raft = Some(handle);
        self.send_all(out)
    }

    fn handle_init(&mut self, msg: Message) -> Result<()> {
        let (msg_id, node_id, node_ids) = match msg.body {
            Body::RaftInit {
                msg_id,
                node_id,
                node_ids,
            } => (msg_id, node_id, node_ids),
            _ => unreachable!("guarded by handle_message"),
        };
        info!(self.logger, "initializing"; "node_id" => %node_id, "peers" => node_ids.len());
        let reply_src = node_id.clone();
        self.raft = Some(RaftHandle::new(
            node_id,
            node_ids,
            self.config,
            self.logger.clone(),
        ));
        let reply = Message {
            src: reply_src,
            dest: msg.src,
            body: Body::RaftInitOk {
                in_reply_to: msg_id,
            },
        };
        self.transport.send(&reply)
    }

    /// Mint fresh ids for outbound requests and send every message.
    fn send_all(&mut self, mut out: Vec<Message>) -> Result<()> {
        for msg in out.iter_mut() {
            self.dispatcher.mint(&mut msg.body);
        }
        for msg in &out {
            self.transport.send(msg)?;
        }
        Ok(())
    }

    /// After any change to `commit_index`, apply newly-committed
    /// entries in strict order; if this node is the leader, emit the
    /// state machine's reply to the originating client. Returns
    /// whether anything was applied.
    fn drain_apply_queue(&mut self) -> Result<bool> {
        let mut raft = match self.raft.take() {
            Some(r) => r,
            None => return Ok(false),
        };

        let commit_index = raft.commit_index();
        let is_leader = raft.role() == RaftRole::Leader;
        let self_id: NodeId = raft.id().clone();
        let mut replies = Vec::new();
        let mut applied_any = false;

        while raft.last_applied() < commit_index {
            let next = raft.last_applied().next();
            let entry = raft.log().get(next).cloned().ok_or_else(|| {
                Error::Fatal(format!("missing committed entry at index {}", next))
            })?;
            raft.set_last_applied(next);
            applied_any = true;
            if let Some(op) = entry.op {
                let applied = self.kv.apply(&op);
                if is_leader {
                    replies.push(Message {
                        src: self_id.clone(),
                        dest: applied.client,
                        body: applied.body,
                    });
                }
            }
        }

        self.raft = Some(raft);
        self.send_all(replies)?;
        Ok(applied_any)
    }
}
