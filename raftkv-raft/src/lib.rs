//! The consensus engine: role state machine, replicated log, pluggable
//! state machine, dispatcher and transport, and the event loop that
//! wires them together into a running node.

#[macro_use]
extern crate slog;

pub mod candidate;
pub mod config;
pub mod dispatch;
pub mod election;
pub mod follower;
pub mod leader;
pub mod log;
pub mod message;
pub mod node;
pub mod progress;
pub mod raft;
pub mod state_machine;
pub mod transport;
