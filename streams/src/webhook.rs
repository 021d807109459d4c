//! At-least-once webhook delivery with HMAC signing.
//!
//! One registration per workflow. Every stream event destined for a
//! registered URL is queued and POSTed with bounded exponential retries;
//! delivery never blocks the orchestrator and never affects workflow
//! status.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use backoff::{backoff::Backoff, ExponentialBackoffBuilder};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use protocol::StreamEvent;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Dreamwalker-Signature";
pub const WORKFLOW_ID_HEADER: &str = "X-Dreamwalker-Workflow-Id";
pub const EVENT_HEADER: &str = "X-Dreamwalker-Event";

/// Tuning for webhook delivery.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Total POST attempts per event.
    pub max_retries: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Per-request timeout, independent of workflow deadlines.
    pub request_timeout: Duration,
    /// Bound on the in-memory delivery queue.
    pub queue_capacity: usize,
    /// Queued entries older than this are dropped.
    pub max_entry_age: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            queue_capacity: 256,
            max_entry_age: Duration::from_secs(3600),
        }
    }
}

/// Per-workflow delivery target.
pub struct WebhookRegistration {
    pub workflow_id: Uuid,
    pub url: String,
    pub secret: Option<String>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of a registration's delivery counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookStats {
    pub delivered: u64,
    pub failed: u64,
}

struct PendingDelivery {
    registration: Arc<WebhookRegistration>,
    event: Arc<StreamEvent>,
    enqueued_at: Instant,
}

/// Dispatches stream events to registered webhook URLs.
pub struct WebhookDispatcher {
    registrations: DashMap<Uuid, Arc<WebhookRegistration>>,
    tx: mpsc::Sender<PendingDelivery>,
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookDispatcher {
    /// Create the dispatcher and spawn its delivery worker.
    pub fn new(config: WebhookConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let dispatcher = Arc::new(Self {
            registrations: DashMap::new(),
            tx,
            client: reqwest::Client::new(),
            config,
        });
        dispatcher.spawn_worker(rx);
        dispatcher
    }

    pub fn register(&self, workflow_id: Uuid, url: impl Into<String>, secret: Option<String>) {
        self.registrations.insert(
            workflow_id,
            Arc::new(WebhookRegistration {
                workflow_id,
                url: url.into(),
                secret,
                delivered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        );
    }

    pub fn unregister(&self, workflow_id: Uuid) {
        self.registrations.remove(&workflow_id);
    }

    pub fn stats(&self, workflow_id: Uuid) -> Option<WebhookStats> {
        self.registrations.get(&workflow_id).map(|r| WebhookStats {
            delivered: r.delivered.load(Ordering::Relaxed),
            failed: r.failed.load(Ordering::Relaxed),
        })
    }

    /// Queue an event for delivery if its workflow has a registration.
    ///
    /// Fire-and-queue: never blocks the caller. A full queue drops the
    /// delivery with a warning.
    pub fn dispatch(&self, event: &Arc<StreamEvent>) {
        let Some(registration) = self
            .registrations
            .get(&event.workflow_id)
            .map(|r| Arc::clone(r.value()))
        else {
            return;
        };
        let delivery = PendingDelivery {
            registration: Arc::clone(&registration),
            event: Arc::clone(event),
            enqueued_at: Instant::now(),
        };
        if self.tx.try_send(delivery).is_err() {
            warn!(
                workflow_id = %event.workflow_id,
                event = %event.event_type,
                "Webhook queue full, dropping delivery"
            );
            registration.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn spawn_worker(self: &Arc<Self>, mut rx: mpsc::Receiver<PendingDelivery>) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                if delivery.enqueued_at.elapsed() > dispatcher.config.max_entry_age {
                    warn!(
                        workflow_id = %delivery.registration.workflow_id,
                        event = %delivery.event.event_type,
                        "Dropping stale webhook delivery"
                    );
                    delivery
                        .registration
                        .failed
                        .fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                let worker = Arc::clone(&dispatcher);
                tokio::spawn(async move { worker.deliver(delivery).await });
            }
        });
    }

    async fn deliver(&self, delivery: PendingDelivery) {
        let registration = &delivery.registration;
        let event = &delivery.event;

        let body = match serde_json::to_vec(event.as_ref()) {
            Ok(body) => body,
            Err(err) => {
                warn!(workflow_id = %registration.workflow_id, "Failed to serialise event: {err}");
                registration.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let mut policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.backoff_base)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();

        for attempt in 1..=self.config.max_retries {
            let mut request = self
                .client
                .post(&registration.url)
                .timeout(self.config.request_timeout)
                .header("Content-Type", "application/json")
                .header(WORKFLOW_ID_HEADER, registration.workflow_id.to_string())
                .header(EVENT_HEADER, event.event_type.as_str());
            if let Some(secret) = &registration.secret {
                request = request.header(SIGNATURE_HEADER, sign(secret, &body));
            }

            match request.body(body.clone()).send().await {
                Ok(response) if response.status().is_success() => {
                    registration.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        workflow_id = %registration.workflow_id,
                        event = %event.event_type,
                        attempt,
                        "Webhook delivered"
                    );
                    return;
                }
                Ok(response) => {
                    let status = response.status();
                    let retryable = status.is_server_error()
                        || matches!(status.as_u16(), 408 | 425 | 429);
                    if !retryable {
                        warn!(
                            workflow_id = %registration.workflow_id,
                            status = %status,
                            "Webhook rejected, not retrying"
                        );
                        break;
                    }
                    warn!(
                        workflow_id = %registration.workflow_id,
                        status = %status,
                        attempt,
                        "Webhook attempt failed"
                    );
                }
                Err(err) => {
                    warn!(
                        workflow_id = %registration.workflow_id,
                        attempt,
                        "Webhook attempt errored: {err}"
                    );
                }
            }

            if attempt < self.config.max_retries {
                if let Some(delay) = policy.next_backoff() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        registration.failed.fetch_add(1, Ordering::Relaxed);
        warn!(
            workflow_id = %registration.workflow_id,
            event = %event.event_type,
            attempts = self.config.max_retries,
            "Webhook delivery gave up"
        );
    }
}

/// HMAC-SHA256 of `body` under `secret`, encoded as lowercase hex.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
