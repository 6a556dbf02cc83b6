//! FIFO request/response pipeline.
//!
//! PostgreSQL pipelines requests but answers them strictly in order, so
//! every inbound message belongs to the oldest request that has not yet
//! signalled completion. The pipeline owns two queues: outgoing messages
//! not yet written to the transport, and one expectation per outstanding
//! request. It performs no I/O itself; the connection moves bytes and
//! calls [`Pipeline::dispatch`] for each decoded message.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::protocol::Message;

/// Per-message callback of an outstanding request. Returns `true` once
/// the request's response stream is complete, `false` to keep receiving.
/// An error fails the request and skips the rest of its stream.
pub(crate) type Handler = Box<dyn FnMut(Message) -> Result<bool> + Send>;

struct Expectation {
    handler: Handler,
    done: oneshot::Sender<Result<()>>,
}

/// Completion handle for one enqueued request. The first poll that
/// returns `Some` carries the request's outcome; the handle stays
/// settled afterwards, answering `Ok(())` for a request that succeeded
/// and [`Error::ConnectionBroken`] for one whose error was already
/// taken.
pub(crate) struct RequestHandle {
    done: oneshot::Receiver<Result<()>>,
    // Some once the oneshot has yielded, true for success. A drained
    // receiver reports Closed, which is not a broken connection.
    settled: Option<bool>,
}

impl RequestHandle {
    /// Poll for completion without blocking. `None` while the request is
    /// still in flight.
    pub(crate) fn try_ready(&mut self) -> Option<Result<()>> {
        if let Some(succeeded) = self.settled {
            return Some(if succeeded {
                Ok(())
            } else {
                Err(Error::ConnectionBroken)
            });
        }
        match self.done.try_recv() {
            Ok(result) => {
                self.settled = Some(result.is_ok());
                Some(result)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.settled = Some(false);
                Some(Err(Error::ConnectionBroken))
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct Pipeline {
    outbound: VecDeque<Message>,
    expectations: VecDeque<Expectation>,
    // Set after a request fails mid-stream. The rest of that request's
    // response stream is consumed without dispatching, up to and
    // including the ReadyForQuery that realigns the connection.
    draining: bool,
}

impl Pipeline {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a request: its outgoing messages plus the handler that will
    /// consume its response stream. Never blocks; the messages are
    /// written to the transport by the connection's flush.
    pub(crate) fn enqueue(&mut self, messages: Vec<Message>, handler: Handler) -> RequestHandle {
        let (done, receiver) = oneshot::channel();
        self.outbound.extend(messages);
        self.expectations.push_back(Expectation { handler, done });
        RequestHandle {
            done: receiver,
            settled: None,
        }
    }

    /// Encode all queued outgoing messages into `buf`, in enqueue order.
    pub(crate) fn write_outbound(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        while let Some(message) = self.outbound.pop_front() {
            message.encode(buf)?;
        }
        Ok(())
    }

    pub(crate) fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Number of requests still awaiting completion.
    pub(crate) fn pending(&self) -> usize {
        self.expectations.len()
    }

    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        self.expectations.is_empty() && !self.draining
    }

    /// Route one inbound message to the head request.
    ///
    /// A server ErrorResponse fails the head request here, before its
    /// handler runs, so it can never be swallowed. The failed request's
    /// remaining messages are then drained until ReadyForQuery.
    pub(crate) fn dispatch(&mut self, message: Message) -> Result<()> {
        if self.draining {
            if matches!(message, Message::ReadyForQuery(_)) {
                self.draining = false;
            }
            return Ok(());
        }

        if let Message::ErrorResponse(fields) = message {
            self.fail_head(Error::Server(fields))?;
            return Ok(());
        }

        let Some(head) = self.expectations.front_mut() else {
            return Err(Error::Protocol(format!(
                "unexpected {} while idle",
                message.kind()
            )));
        };

        match (head.handler)(message) {
            Ok(true) => {
                if let Some(expectation) = self.expectations.pop_front() {
                    let _ = expectation.done.send(Ok(()));
                }
            }
            Ok(false) => {}
            Err(error) => self.fail_head(error)?,
        }
        Ok(())
    }

    fn fail_head(&mut self, error: Error) -> Result<()> {
        let Some(expectation) = self.expectations.pop_front() else {
            // Nothing to attribute the failure to.
            return Err(error);
        };
        let _ = expectation.done.send(Err(error));
        self.draining = true;
        Ok(())
    }

    /// Fail every outstanding request. Called when the transport dies.
    pub(crate) fn fail_all(&mut self, mut make_error: impl FnMut() -> Error) {
        self.outbound.clear();
        self.draining = false;
        while let Some(expectation) = self.expectations.pop_front() {
            let _ = expectation.done.send(Err(make_error()));
        }
    }
}
