//! Non-blocking line I/O: newline-delimited JSON on a duplex byte
//! stream. One message per line in, one message per line out.

use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use raftkv_core::error::{Error, Result};

use crate::message::Message;

pub trait Transport {
    /// The next inbound message, if one is currently available without
    /// blocking. `Ok(None)` means "nothing right now", not EOF.
    fn try_receive(&mut self) -> Result<Option<Message>>;

    fn send(&mut self, msg: &Message) -> Result<()>;
}

enum ReaderEvent {
    Line(String),
    Eof,
}

/// A `Transport` over stdin/stdout. A dedicated reader thread does the
/// blocking `read_line` and forwards decoded lines over a channel; it
/// owns no consensus state, so it is the one thread besides the event
/// loop's own that this process ever runs.
pub struct StdioTransport {
    rx: Receiver<ReaderEvent>,
    stdout: std::io::Stdout,
}

impl StdioTransport {
    pub fn new() -> StdioTransport {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut lines = stdin.lock().lines();
            loop {
                match lines.next() {
                    Some(Ok(line)) => {
                        if tx.send(ReaderEvent::Line(line)).is_err() {
                            break;
                        }
                    }
                    Some(Err(_)) | None => {
                        let _ = tx.send(ReaderEvent::Eof);
                        break;
                    }
                }
            }
        });
        StdioTransport {
            rx,
            stdout: std::io::stdout(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        StdioTransport::new()
    }
}

impl Transport for StdioTransport {
    fn try_receive(&mut self) -> Result<Option<Message>> {
        match self.rx.try_recv() {
            Ok(ReaderEvent::Line(line)) => {
                let msg: Message = serde_json::from_str(&line).map_err(|e| {
                    Error::Protocol(format!("malformed message line {:?}: {}", line, e))
                })?;
                Ok(Some(msg))
            }
            Ok(ReaderEvent::Eof) => Err(Error::Eof),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::Eof),
        }
    }

    fn send(&mut self, msg: &Message) -> Result<()> {
        let line = serde_json::to_string(msg)?;
        writeln!(self.stdout, "{}", line)?;
        self.stdout.flush()?;
        Ok(())
    }
}

/// An in-memory transport for tests: a FIFO of inbound messages and a
/// log of everything sent, so integration tests can hand-deliver
/// messages between nodes without a real byte stream.
#[derive(Default)]
pub struct ChannelTransport {
    pub inbox: std::collections::VecDeque<Message>,
    pub outbox: Vec<Message>,
}

impl Transport for ChannelTransport {
    fn try_receive(&mut self) -> Result<Option<Message>> {
        Ok(self.inbox.pop_front())
    }

    fn send(&mut self, msg: &Message) -> Result<()> {
        self.outbox.push(msg.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Body, NodeId};

    #[test]
    fn channel_transport_delivers_in_fifo_order() {
        let mut t = ChannelTransport::default();
        let msg = Message {
            src: NodeId::from("n0"),
            dest: NodeId::from("n1"),
            body: Body::WriteOk { in_reply_to: 1 },
        };
        t.send(&msg).unwrap();
        t.inbox.push_back(msg.clone());
        assert!(t.try_receive().unwrap().is_some());
        assert_eq!(t.outbox.len(), 1);
    }
}
