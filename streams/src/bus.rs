//! Per-workflow bounded event queues with multi-consumer replay.
//!
//! Each workflow owns a ring buffer of recent events plus a dense sequence
//! counter. Subscribers hold their own cursor over the shared buffer, so any
//! number of consumers can replay retained history without duplicating
//! events. A full buffer slows the producer for a bounded interval, then
//! displaces the oldest event — orchestrator liveness wins over strict
//! history.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use protocol::{EventType, StreamEvent};

use crate::error::{StreamError, StreamResult};

/// Tuning for the stream bus.
#[derive(Debug, Clone)]
pub struct StreamBusConfig {
    /// Events retained per workflow.
    pub queue_capacity: usize,
    /// Upper bound on live workflow streams.
    pub max_streams: usize,
    /// How long a publish may wait on a full queue before displacing the
    /// oldest event.
    pub publish_deadline: Duration,
    /// Window after close during which late subscribers can still replay
    /// the stream.
    pub close_grace: Duration,
    /// Idle streams beyond this age are reaped.
    pub idle_ttl: Duration,
}

impl Default for StreamBusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            max_streams: 100,
            publish_deadline: Duration::from_millis(250),
            close_grace: Duration::from_secs(5),
            idle_ttl: Duration::from_secs(3600),
        }
    }
}

struct StreamState {
    buffer: VecDeque<Arc<StreamEvent>>,
    next_seq: u64,
    dropped: u64,
    closed: bool,
    last_event_at: Instant,
}

struct WorkflowStream {
    workflow_id: Uuid,
    state: Mutex<StreamState>,
    notify: Notify,
}

impl WorkflowStream {
    fn new(workflow_id: Uuid) -> Self {
        Self {
            workflow_id,
            state: Mutex::new(StreamState {
                buffer: VecDeque::new(),
                next_seq: 0,
                dropped: 0,
                closed: false,
                last_event_at: Instant::now(),
            }),
            notify: Notify::new(),
        }
    }

    /// Append under the caller's lock, assigning the next sequence number.
    fn push(&self, state: &mut StreamState, event_type: EventType, payload: Value) -> Arc<StreamEvent> {
        let event = Arc::new(StreamEvent::new(
            self.workflow_id,
            state.next_seq,
            event_type,
            payload,
        ));
        state.next_seq += 1;
        state.last_event_at = Instant::now();
        state.buffer.push_back(Arc::clone(&event));
        self.notify.notify_waiters();
        event
    }

    fn first_retained(state: &StreamState) -> u64 {
        state.next_seq - state.buffer.len() as u64
    }
}

/// Process-wide fan-out point for workflow lifecycle events.
///
/// Referenced by the supervisor (publish side) and the SSE endpoint
/// (subscribe side); owned by process bootstrap, shared by handle.
pub struct StreamBus {
    streams: Arc<DashMap<Uuid, Arc<WorkflowStream>>>,
    config: StreamBusConfig,
}

impl StreamBus {
    pub fn new(config: StreamBusConfig) -> Self {
        Self {
            streams: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Open a stream for a workflow. Idempotent for an already-open stream.
    pub fn open(&self, workflow_id: Uuid) -> StreamResult<()> {
        if self.streams.contains_key(&workflow_id) {
            return Ok(());
        }
        if self.streams.len() >= self.config.max_streams {
            return Err(StreamError::TooManyStreams(self.config.max_streams));
        }
        self.streams
            .insert(workflow_id, Arc::new(WorkflowStream::new(workflow_id)));
        Ok(())
    }

    /// Publish an event, assigning the workflow's next sequence number.
    ///
    /// On a full queue this waits up to the configured deadline, then
    /// displaces the oldest retained event and counts the drop. Returns the
    /// published event.
    pub async fn publish(
        &self,
        workflow_id: Uuid,
        event_type: EventType,
        payload: Value,
    ) -> StreamResult<Arc<StreamEvent>> {
        let stream = self.get_or_open(workflow_id)?;

        {
            let mut state = stream.state.lock();
            if state.closed {
                return Err(StreamError::Closed(workflow_id));
            }
            if state.buffer.len() < self.config.queue_capacity {
                return Ok(stream.push(&mut state, event_type, payload));
            }
        }

        // Full queue: give consumers the deadline, then favour liveness.
        tokio::time::sleep(self.config.publish_deadline).await;

        let mut state = stream.state.lock();
        if state.closed {
            return Err(StreamError::Closed(workflow_id));
        }
        if state.buffer.len() >= self.config.queue_capacity {
            state.buffer.pop_front();
            state.dropped += 1;
        }
        Ok(stream.push(&mut state, event_type, payload))
    }

    /// Subscribe to a workflow's stream.
    ///
    /// Replays from `from_seq` when still retained; otherwise starts at the
    /// oldest retained event. Each subscriber owns an independent cursor.
    pub fn subscribe(
        &self,
        workflow_id: Uuid,
        from_seq: Option<u64>,
    ) -> StreamResult<StreamSubscription> {
        let stream = self
            .streams
            .get(&workflow_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(StreamError::UnknownStream(workflow_id))?;

        let cursor = {
            let state = stream.state.lock();
            let first = WorkflowStream::first_retained(&state);
            match from_seq {
                Some(seq) => seq.clamp(first, state.next_seq),
                None => first,
            }
        };
        Ok(StreamSubscription { stream, cursor })
    }

    /// Close a workflow's stream.
    ///
    /// Marks the stream terminal immediately (subscribers drain the retained
    /// buffer and then observe end-of-stream); the queue itself is released
    /// after the grace window so late subscribers can still attach.
    pub fn close(&self, workflow_id: Uuid) {
        let Some(stream) = self.streams.get(&workflow_id).map(|s| Arc::clone(s.value())) else {
            return;
        };
        {
            let mut state = stream.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        stream.notify.notify_waiters();
        debug!(workflow_id = %workflow_id, "Stream closed, release scheduled");

        let streams = Arc::clone(&self.streams);
        let grace = self.config.close_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            streams.remove(&workflow_id);
        });
    }

    /// Close and release streams idle beyond the TTL.
    pub fn reap(&self) -> usize {
        let ttl = self.config.idle_ttl;
        let stale: Vec<Uuid> = self
            .streams
            .iter()
            .filter(|entry| entry.value().state.lock().last_event_at.elapsed() > ttl)
            .map(|entry| *entry.key())
            .collect();
        for workflow_id in &stale {
            warn!(workflow_id = %workflow_id, "Reaping idle stream");
            self.close(*workflow_id);
        }
        stale.len()
    }

    /// Events displaced from a workflow's queue so far.
    pub fn dropped_events(&self, workflow_id: Uuid) -> Option<u64> {
        self.streams
            .get(&workflow_id)
            .map(|s| s.state.lock().dropped)
    }

    /// Highest sequence number assigned so far, if the stream exists.
    pub fn current_seq(&self, workflow_id: Uuid) -> Option<u64> {
        self.streams
            .get(&workflow_id)
            .map(|s| s.state.lock().next_seq)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn get_or_open(&self, workflow_id: Uuid) -> StreamResult<Arc<WorkflowStream>> {
        if let Some(stream) = self.streams.get(&workflow_id) {
            return Ok(Arc::clone(stream.value()));
        }
        self.open(workflow_id)?;
        self.streams
            .get(&workflow_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(StreamError::UnknownStream(workflow_id))
    }
}

/// One consumer's cursor over a workflow stream.
pub struct StreamSubscription {
    stream: Arc<WorkflowStream>,
    cursor: u64,
}

impl StreamSubscription {
    /// Next event, suspending until one is available.
    ///
    /// Returns `None` once the stream is closed and the retained buffer is
    /// drained. A cursor that fell behind a displaced event skips forward to
    /// the oldest retained event.
    pub async fn next(&mut self) -> Option<Arc<StreamEvent>> {
        loop {
            let notified = self.stream.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.stream.state.lock();
                let first = WorkflowStream::first_retained(&state);
                if self.cursor < first {
                    self.cursor = first;
                }
                if self.cursor < state.next_seq {
                    let index = (self.cursor - first) as usize;
                    let event = Arc::clone(&state.buffer[index]);
                    self.cursor += 1;
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Sequence number the next `next()` call will try to read.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }
}
