// crates/core/src/jobs/broadcast.rs
//! Per-job multicast of [`StatusEvent`]s to live subscribers.
//!
//! Every subscriber owns a bounded queue. Publishing never waits on a
//! subscriber: when a queue is full its oldest event is dropped. The terminal
//! event is always the last one pushed, so it survives any overflow.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::Stream;
use tokio::sync::Notify;

use super::registry::JobRegistry;
use super::state::OpaqueValue;
use super::types::{JobId, JobStatus, StatusEvent};
use crate::error::JobError;

/// Default per-subscriber buffer capacity.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

pub type SubscriberId = u64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| {
        tracing::error!("Mutex poisoned in status broadcaster: {e}");
        e.into_inner()
    })
}

#[derive(Debug, Default)]
struct QueueState {
    events: VecDeque<StatusEvent>,
    /// No further events will be pushed; drain what is left, then end.
    finished: bool,
    dropped: u64,
}

#[derive(Debug)]
struct SubscriberQueue {
    id: SubscriberId,
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl SubscriberQueue {
    fn new(id: SubscriberId, capacity: usize) -> Self {
        Self {
            id,
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Non-blocking hand-off. Overflow drops the oldest buffered events.
    fn push(&self, event: StatusEvent) -> Result<(), JobError> {
        let mut dropped = 0;
        {
            let mut state = lock(&self.state);
            if state.finished {
                return Ok(());
            }
            while state.events.len() >= self.capacity {
                state.events.pop_front();
                dropped += 1;
            }
            state.finished = event.is_terminal();
            state.events.push_back(event);
            state.dropped += dropped;
        }
        self.notify.notify_one();

        if dropped > 0 {
            Err(JobError::DeliveryOverflow { dropped })
        } else {
            Ok(())
        }
    }

    /// Discard everything and end the stream.
    fn close(&self) {
        {
            let mut state = lock(&self.state);
            state.finished = true;
            state.events.clear();
        }
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Result<StatusEvent, bool> {
        let mut state = lock(&self.state);
        state.events.pop_front().ok_or(state.finished)
    }

    async fn pop(&self) -> Option<StatusEvent> {
        loop {
            match self.try_pop() {
                Ok(event) => return Some(event),
                Err(true) => return None,
                Err(false) => self.notify.notified().await,
            }
        }
    }

    fn dropped(&self) -> u64 {
        lock(&self.state).dropped
    }
}

#[derive(Debug, Default)]
struct JobChannel {
    subscribers: Vec<Arc<SubscriberQueue>>,
    /// Most recently published event; replayed to late subscribers.
    last: Option<StatusEvent>,
}

impl JobChannel {
    fn is_closed(&self) -> bool {
        self.last.as_ref().is_some_and(StatusEvent::is_terminal)
    }
}

/// Registry of per-job subscriber sets.
///
/// `publish`, `subscribe` and `unsubscribe` all serialize on one internal
/// lock, so a subscriber is registered either entirely before or entirely
/// after any given publish.
pub struct StatusBroadcaster {
    registry: Arc<JobRegistry>,
    capacity: usize,
    next_subscriber: AtomicU64,
    channels: Mutex<HashMap<JobId, JobChannel>>,
}

impl fmt::Debug for StatusBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channels = lock(&self.channels);
        f.debug_struct("StatusBroadcaster")
            .field("capacity", &self.capacity)
            .field("channel_count", &channels.len())
            .field(
                "subscriber_count",
                &channels.values().map(|c| c.subscribers.len()).sum::<usize>(),
            )
            .finish()
    }
}

impl StatusBroadcaster {
    /// Create a broadcaster whose subscribers buffer at most `capacity`
    /// events each (minimum 1). `registry` supplies the replay for jobs that
    /// have not published anything yet.
    pub fn new(registry: Arc<JobRegistry>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            registry,
            capacity: capacity.max(1),
            next_subscriber: AtomicU64::new(1),
            channels: Mutex::new(HashMap::new()),
        })
    }

    /// Handle through which one job's executor publishes.
    pub fn publisher(self: &Arc<Self>, job_id: JobId) -> JobPublisher {
        JobPublisher {
            job_id,
            broadcaster: Arc::clone(self),
        }
    }

    /// Register a subscriber for `job_id`.
    ///
    /// The first event it receives is a replay of the last known status:
    /// the last published event, or the registry record if nothing has been
    /// published yet. If that status is terminal the subscription yields
    /// exactly that one event and then ends.
    pub fn subscribe(self: &Arc<Self>, job_id: JobId) -> Result<Subscription, JobError> {
        let mut channels = lock(&self.channels);
        let last = channels.get(&job_id).and_then(|c| c.last.clone());
        let replay = match last {
            Some(last) if last.is_terminal() => last,
            last => match self.registry.get(job_id) {
                // The registry turns terminal just before the final publish.
                Ok(record) if record.status.is_terminal() => StatusEvent::from_record(&record),
                Ok(record) => last.unwrap_or_else(|| StatusEvent::from_record(&record)),
                Err(err) => last.ok_or(err)?,
            },
        };

        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(id, self.capacity));
        let terminal = replay.is_terminal();
        // A fresh queue cannot overflow on its first event.
        let _ = queue.push(replay);
        if !terminal {
            channels
                .entry(job_id)
                .or_default()
                .subscribers
                .push(Arc::clone(&queue));
        }
        tracing::debug!(job_id = %job_id, subscriber = id, terminal, "subscriber registered");

        Ok(Subscription {
            job_id,
            queue,
            broadcaster: Arc::clone(self),
        })
    }

    /// Deliver `event` to every current subscriber of its job.
    ///
    /// Returns how many subscribers it was handed to. After a terminal event
    /// the job's channel is closed and further publishes are ignored.
    pub fn publish(&self, event: StatusEvent) -> usize {
        let mut channels = lock(&self.channels);
        let channel = channels.entry(event.job_id).or_default();
        if channel.is_closed() {
            tracing::warn!(
                job_id = %event.job_id,
                status = %event.status,
                "publish after terminal status ignored"
            );
            return 0;
        }

        for subscriber in &channel.subscribers {
            if let Err(JobError::DeliveryOverflow { dropped }) = subscriber.push(event.clone()) {
                metrics::counter!("research_events_dropped_total").increment(dropped);
                tracing::debug!(
                    job_id = %event.job_id,
                    subscriber = subscriber.id,
                    dropped,
                    "subscriber buffer full, dropped oldest events"
                );
            }
        }
        let delivered = channel.subscribers.len();
        if event.is_terminal() {
            channel.subscribers.clear();
        }
        channel.last = Some(event);
        delivered
    }

    /// Remove a subscriber. Safe to call repeatedly or after the job ended.
    pub fn unsubscribe(&self, job_id: JobId, subscriber: SubscriberId) {
        let mut channels = lock(&self.channels);
        if let Some(channel) = channels.get_mut(&job_id) {
            channel.subscribers.retain(|s| {
                if s.id == subscriber {
                    s.close();
                    false
                } else {
                    true
                }
            });
        }
    }

    /// Number of live subscribers for `job_id`.
    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        lock(&self.channels)
            .get(&job_id)
            .map_or(0, |c| c.subscribers.len())
    }

    /// The last event published for `job_id`, if any.
    pub fn last_event(&self, job_id: JobId) -> Option<StatusEvent> {
        lock(&self.channels).get(&job_id).and_then(|c| c.last.clone())
    }
}

/// Publishing handle bound to a single job id.
#[derive(Debug, Clone)]
pub struct JobPublisher {
    job_id: JobId,
    broadcaster: Arc<StatusBroadcaster>,
}

impl JobPublisher {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Publish an event, forcing its job id to this publisher's job.
    pub fn publish(&self, mut event: StatusEvent) -> usize {
        event.job_id = self.job_id;
        self.broadcaster.publish(event)
    }

    /// Publish an intermediate `processing` event.
    pub fn progress(&self, message: impl Into<String>, result: serde_json::Value) -> usize {
        self.publish(
            StatusEvent::new(self.job_id, JobStatus::Processing, message).with_result(result),
        )
    }
}

impl OpaqueValue for JobPublisher {
    fn describe(&self) -> String {
        format!("JobPublisher({})", self.job_id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A live subscription to one job's events. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    job_id: JobId,
    queue: Arc<SubscriberQueue>,
    broadcaster: Arc<StatusBroadcaster>,
}

impl Subscription {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn id(&self) -> SubscriberId {
        self.queue.id
    }

    /// Next event, or `None` once the terminal event has been delivered or
    /// the subscription was closed.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.queue.pop().await
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<StatusEvent> {
        self.queue.try_pop().ok()
    }

    /// Events discarded from this subscriber's buffer so far.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn unsubscribe(&self) {
        self.broadcaster.unsubscribe(self.job_id, self.queue.id);
        self.queue.close();
    }

    /// Consume the subscription as a stream ending after the terminal event.
    pub fn into_stream(self) -> impl Stream<Item = StatusEvent> + Send + 'static {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
