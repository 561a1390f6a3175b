//! Transport seam between the dispatcher and a message broker.
//!
//! The dispatcher only needs three things from a broker client: a way to
//! publish a request, the name of the queue replies come back on, and a
//! blocking primitive that waits for broker activity and hands every reply
//! that arrived to a callback. [`crate::amqp::AmqpTransport`] provides these
//! over AMQP; [`MemoryTransport`] answers requests in-process.
use std::collections::VecDeque;
use std::fmt;
use tracing::trace;

use crate::errors::{ClientError, ClientResult};
use crate::protocol::{Request, RequestEnvelope};

/// Callback invoked once per delivered reply body
pub type ReplyHandler<'a> = dyn FnMut(&[u8]) -> ClientResult<()> + 'a;

/// A broker client as seen by the dispatcher
pub trait Transport {
    /// Name of the exclusive queue replies are delivered to
    fn reply_channel(&self) -> &str;

    /// Publishes one request
    fn publish(&mut self, envelope: RequestEnvelope) -> ClientResult<()>;

    /// Blocks until the broker delivers something, then calls `on_reply` for
    /// every reply received. May return after zero replies (heartbeats and
    /// other broker events); callers loop on their own condition.
    fn process_events(&mut self, on_reply: &mut ReplyHandler<'_>) -> ClientResult<()>;
}

/// Produces the reply body for a request
pub type Responder = Box<dyn FnMut(&Request) -> Vec<u8> + Send>;

/// In-process transport: every published request is answered immediately
/// by a responder and the reply is queued until `process_events` runs.
pub struct MemoryTransport {
    reply_channel: String,
    responder: Responder,
    pending: VecDeque<Vec<u8>>,
    published: Vec<RequestEnvelope>,
    batch_size: usize,
    newest_first: bool,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("reply_channel", &self.reply_channel)
            .field("pending", &self.pending.len())
            .field("published", &self.published.len())
            .field("batch_size", &self.batch_size)
            .field("newest_first", &self.newest_first)
            .finish()
    }
}

impl MemoryTransport {
    pub fn new(responder: impl FnMut(&Request) -> Vec<u8> + Send + 'static) -> Self {
        Self {
            reply_channel: "amq.gen-memory".to_string(),
            responder: Box::new(responder),
            pending: VecDeque::new(),
            published: Vec::new(),
            batch_size: usize::MAX,
            newest_first: false,
        }
    }

    /// Answers file requests with `OK!` and control requests with a fixed text
    pub fn echo() -> Self {
        Self::new(|request| {
            let reply = match request {
                Request::File(task) => serde_json::json!({
                    "filename": task.filename,
                    "display": "OK!",
                }),
                Request::Control { action } => serde_json::json!({
                    "display": format!("{action:?}").to_lowercase(),
                }),
            };
            reply.to_string().into_bytes()
        })
    }

    /// Limits how many replies a single `process_events` call delivers
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Delivers the most recently queued reply first
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    /// Every envelope published so far, in publish order
    pub fn published(&self) -> &[RequestEnvelope] {
        &self.published
    }

    /// Number of replies queued but not yet delivered
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Transport for MemoryTransport {
    fn reply_channel(&self) -> &str {
        &self.reply_channel
    }

    fn publish(&mut self, envelope: RequestEnvelope) -> ClientResult<()> {
        let request: Request = serde_json::from_slice(&envelope.body)?;
        let reply = (self.responder)(&request);
        self.pending.push_back(reply);
        self.published.push(envelope);
        Ok(())
    }

    fn process_events(&mut self, on_reply: &mut ReplyHandler<'_>) -> ClientResult<()> {
        if self.pending.is_empty() {
            return Err(ClientError::transport(
                "memory transport has no pending replies",
            ));
        }

        let count = self.batch_size.min(self.pending.len());
        trace!("Delivering {} queued replies", count);
        for _ in 0..count {
            let reply = if self.newest_first {
                self.pending.pop_back()
            } else {
                self.pending.pop_front()
            };
            if let Some(body) = reply {
                on_reply(&body)?;
            }
        }
        Ok(())
    }
}
