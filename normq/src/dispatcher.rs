use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::errors::ClientResult;
use crate::protocol::{ControlAction, FileTask, Request, RequestEnvelope};
use crate::sink::ResultSink;
use crate::transport::Transport;

/// Number of requests published but not yet answered
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn increment(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrements unless already zero; returns false when nothing was in flight
    pub fn decrement(&self) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Counts reported by a dispatcher after a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub files_submitted: usize,
    pub controls_submitted: usize,
    /// Files left unsubmitted because the server asked to stop
    pub files_skipped: usize,
}

/// Publishes requests and bounds how many are unanswered at once.
///
/// Replies are pulled by the submitting thread itself: whenever the
/// in-flight count reaches capacity, or when draining, the dispatcher blocks
/// in [`Transport::process_events`] and feeds every delivered body to the
/// [`ResultSink`], which decrements the count.
pub struct Dispatcher<T: Transport> {
    transport: T,
    sink: Arc<ResultSink>,
    in_flight: InFlight,
    capacity: NonZeroUsize,
    correlation_id: String,
    stats: DispatchStats,
}

impl<T: Transport> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("in_flight", &self.in_flight.get())
            .field("capacity", &self.capacity)
            .field("correlation_id", &self.correlation_id)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<T: Transport> Dispatcher<T> {
    /// Creates a dispatcher with a fresh session correlation id
    pub fn new(transport: T, sink: Arc<ResultSink>, capacity: NonZeroUsize) -> Self {
        let in_flight = sink.in_flight().clone();
        let correlation_id = Uuid::new_v4().to_string();
        debug!(
            "Dispatcher session {} replying on {} (capacity {})",
            correlation_id,
            transport.reply_channel(),
            capacity
        );
        Self {
            transport,
            sink,
            in_flight,
            capacity,
            correlation_id,
            stats: DispatchStats::default(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Publishes a file check request
    pub fn submit(&mut self, task: FileTask) -> ClientResult<()> {
        trace!("Submitting {}", task.filename);
        self.publish(&Request::File(task))?;
        self.stats.files_submitted += 1;
        Ok(())
    }

    /// Publishes a control request through the same path as files
    pub fn submit_control(&mut self, action: ControlAction) -> ClientResult<()> {
        debug!("Submitting control action {:?}", action);
        self.publish(&Request::Control { action })?;
        self.stats.controls_submitted += 1;
        Ok(())
    }

    fn publish(&mut self, request: &Request) -> ClientResult<()> {
        let envelope = RequestEnvelope {
            body: request.to_json()?,
            correlation_id: self.correlation_id.clone(),
            reply_to: self.transport.reply_channel().to_string(),
        };
        // Counted before publishing: the reply may be handled on another
        // thread before `publish` returns.
        self.in_flight.increment();
        if let Err(err) = self.transport.publish(envelope) {
            self.in_flight.decrement();
            return Err(err);
        }
        Ok(())
    }

    /// Blocks until fewer than `capacity` requests are in flight
    pub fn throttle(&mut self) -> ClientResult<()> {
        while self.in_flight.get() >= self.capacity.get() {
            trace!("In flight at capacity ({}), waiting for replies", self.capacity);
            self.process_events()?;
        }
        Ok(())
    }

    /// Blocks until every published request has been answered.
    ///
    /// There is no timeout: a broker that never replies blocks forever.
    pub fn drain(&mut self) -> ClientResult<()> {
        debug!("Draining {} outstanding replies", self.in_flight.get());
        while self.in_flight.get() != 0 {
            self.process_events()?;
        }
        Ok(())
    }

    /// Loads, submits and throttles each file in order.
    ///
    /// Once the server has asked to stop, the remaining files are left
    /// unsubmitted; replies already owed are still collected by [`Self::drain`].
    pub fn dispatch_files(&mut self, files: &[PathBuf], rules: &[String]) -> ClientResult<()> {
        for (index, path) in files.iter().enumerate() {
            if self.sink.stop_requested() {
                let skipped = files.len() - index;
                info!("Stop requested, skipping {} remaining files", skipped);
                self.stats.files_skipped += skipped;
                break;
            }
            let task = FileTask::load(path, rules)?;
            self.submit(task)?;
            self.throttle()?;
        }
        Ok(())
    }

    fn process_events(&mut self) -> ClientResult<()> {
        let sink = &self.sink;
        self.transport
            .process_events(&mut |body: &[u8]| sink.on_reply(body))
    }
}
