// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

//! Batching ingester.
//!
//! Any number of [`Ingester`] handles feed a bounded queue. A single
//! background [`IngesterService`] owns the batch buffer and ships a batch
//! when it reaches `batch_size` events or when the flush interval ticks with
//! a non-empty buffer.
//!
//! ```text
//!   enqueue ──┐
//!   enqueue ──┼──> bounded queue (batch_size) ──> IngesterService ──> IngestTransport
//!   enqueue ──┘                                    size │ tick │ close
//! ```
//!
//! A full queue blocks producers. [`Ingester::close`] stops intake, ships
//! what is left under a separate drain deadline and reports the totals.

mod service;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::encoding::ContentEncoding;
use crate::error::Error;
use crate::event::Event;
use crate::ingest::IngestStatus;

pub use service::IngesterService;

pub const DEFAULT_BATCH_SIZE: usize = 1024;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(15);

/// Ships one batch of events to the backend.
#[async_trait]
pub trait IngestTransport: Send + Sync + 'static {
    async fn ingest_batch(
        &self,
        dataset: &str,
        events: Vec<Event>,
        encoding: ContentEncoding,
    ) -> Result<IngestStatus, Error>;
}

#[async_trait]
impl<T: IngestTransport + ?Sized> IngestTransport for Arc<T> {
    async fn ingest_batch(
        &self,
        dataset: &str,
        events: Vec<Event>,
        encoding: ContentEncoding,
    ) -> Result<IngestStatus, Error> {
        (**self).ingest_batch(dataset, events, encoding).await
    }
}

#[derive(Debug, Clone)]
pub struct IngesterConfig {
    /// Events per batch, also the queue capacity.
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Time allowed for shipping what is left once closing starts.
    pub drain_timeout: Duration,
    /// Upper bound for [`Ingester::flush`].
    pub flush_timeout: Duration,
    pub content_encoding: ContentEncoding,
    /// Cancelling this token closes the ingester and aborts in-flight sends.
    pub cancel: Option<CancellationToken>,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            content_encoding: ContentEncoding::default(),
            cancel: None,
        }
    }
}

impl IngesterConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.batch_size == 0 {
            return Err(Error::ConfigInvalid(
                "batch size must be greater than 0".to_string(),
            ));
        }
        for (name, value) in [
            ("flush interval", self.flush_interval),
            ("drain timeout", self.drain_timeout),
            ("flush timeout", self.flush_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::ConfigInvalid(format!(
                    "{name} must be greater than 0"
                )));
            }
        }
        Ok(())
    }
}

/// Totals reported once the ingester has shut down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseSummary {
    /// Events taken off the queue.
    pub accepted: u64,
    /// Events the server reported as ingested.
    pub ingested: u64,
    /// Events the server rejected.
    pub failed: u64,
    /// Events never acknowledged: transport errors, aborted sends and
    /// whatever was left when the drain deadline passed.
    pub dropped: u64,
    pub drain_timed_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngesterState {
    Running,
    Closing,
    Closed,
}

#[derive(Debug)]
pub(crate) enum IngesterCommand {
    Event(Event),
    Flush(oneshot::Sender<()>),
}

/// Handle to a running ingester. Clones share the same queue.
#[derive(Clone, Debug)]
pub struct Ingester {
    tx: mpsc::Sender<IngesterCommand>,
    closing: CancellationToken,
    summary: watch::Receiver<Option<CloseSummary>>,
    flush_timeout: Duration,
}

impl Ingester {
    /// Spawns the background service on the current tokio runtime.
    pub fn start<T: IngestTransport>(
        transport: T,
        dataset: &str,
        config: IngesterConfig,
    ) -> Result<Self, Error> {
        let (service, ingester) = IngesterService::new(transport, dataset, config)?;
        tokio::spawn(service.run().in_current_span());
        Ok(ingester)
    }

    /// Queues an event, waiting for room when the queue is full.
    ///
    /// Dropping the returned future gives up on the event.
    pub async fn enqueue(&self, event: Event) -> Result<(), Error> {
        self.send(IngesterCommand::Event(event), None).await
    }

    /// Like [`Ingester::enqueue`], but gives up with [`Error::Cancelled`]
    /// once `cancel` fires.
    pub async fn enqueue_with_cancel(
        &self,
        event: Event,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.send(IngesterCommand::Event(event), Some(cancel)).await
    }

    /// Queues an event only if there is room right now.
    pub fn try_enqueue(&self, event: Event) -> Result<(), Error> {
        if self.closing.is_cancelled() {
            return Err(Error::IngesterClosed);
        }
        self.tx
            .try_send(IngesterCommand::Event(event))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::QueueFull,
                mpsc::error::TrySendError::Closed(_) => Error::IngesterClosed,
            })
    }

    /// Queues every event in order and returns how many were queued. Stops
    /// at the first error.
    pub async fn enqueue_iter<I>(&self, events: I) -> Result<usize, Error>
    where
        I: IntoIterator<Item = Event>,
    {
        let mut count = 0;
        for event in events {
            self.enqueue(event).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Ships everything queued before this call and waits for the send to
    /// finish, bounded by the configured flush timeout.
    pub async fn flush(&self) -> Result<(), Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let timeout = self.flush_timeout;
        tokio::time::timeout(timeout, async {
            self.send(IngesterCommand::Flush(reply_tx), None).await?;
            reply_rx.await.map_err(|_| Error::IngesterClosed)
        })
        .await
        .map_err(|_| Error::DrainTimeout(timeout))?
    }

    /// Stops intake, drains the queue and returns the final totals.
    ///
    /// Safe to call more than once and from several handles; every caller
    /// waits for the same drain and gets the same summary.
    pub async fn close(&self) -> CloseSummary {
        self.closing.cancel();
        let mut summary = self.summary.clone();
        let result = summary.wait_for(Option::is_some).await.map(|s| *s);
        match result {
            Ok(Some(summary)) => summary,
            // The service is gone without publishing, report what we have.
            _ => self.summary.borrow().unwrap_or_default(),
        }
    }

    pub fn state(&self) -> IngesterState {
        if self.summary.borrow().is_some() {
            IngesterState::Closed
        } else if self.closing.is_cancelled() {
            IngesterState::Closing
        } else {
            IngesterState::Running
        }
    }

    async fn send(
        &self,
        command: IngesterCommand,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), Error> {
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let permit = tokio::select! {
            biased;
            () = self.closing.cancelled() => return Err(Error::IngesterClosed),
            () = cancelled => return Err(Error::Cancelled),
            permit = self.tx.reserve() => permit.map_err(|_| Error::IngesterClosed)?,
        };
        permit.send(command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::to_event;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingTransport {
        batches: Mutex<Vec<(Instant, Vec<Event>)>>,
        delay: Option<Duration>,
        fail: AtomicBool,
        reject_all: AtomicBool,
    }

    impl RecordingTransport {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Default::default()
            }
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batches
                .lock()
                .unwrap()
                .iter()
                .map(|(_, events)| events.len())
                .collect()
        }

        fn batch_times(&self) -> Vec<Instant> {
            self.batches
                .lock()
                .unwrap()
                .iter()
                .map(|(at, _)| *at)
                .collect()
        }

        fn events(&self) -> Vec<Event> {
            self.batches
                .lock()
                .unwrap()
                .iter()
                .flat_map(|(_, events)| events.clone())
                .collect()
        }
    }

    #[async_trait]
    impl IngestTransport for RecordingTransport {
        async fn ingest_batch(
            &self,
            _dataset: &str,
            events: Vec<Event>,
            _encoding: ContentEncoding,
        ) -> Result<IngestStatus, Error> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::PayloadEncode("boom".to_string()));
            }
            let n = events.len() as u64;
            self.batches.lock().unwrap().push((Instant::now(), events));
            if self.reject_all.load(Ordering::SeqCst) {
                return Ok(IngestStatus {
                    failed: n,
                    failures: vec![crate::ingest::IngestFailure {
                        timestamp: "2024-01-01T00:00:00Z".to_string(),
                        error: "field limit exceeded".to_string(),
                    }],
                    ..Default::default()
                });
            }
            Ok(IngestStatus {
                ingested: n,
                ..Default::default()
            })
        }
    }

    fn event(i: usize) -> Event {
        to_event(&json!({"i": i})).unwrap()
    }

    fn config(batch_size: usize) -> IngesterConfig {
        IngesterConfig {
            batch_size,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_flush_without_tick() {
        let transport = Arc::new(RecordingTransport::default());
        let ingester = Ingester::start(transport.clone(), "logs", config(4)).unwrap();
        let start = Instant::now();

        ingester.enqueue_iter((0..4).map(event)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(transport.batch_sizes(), vec![4]);
        assert!(transport.batch_times()[0] - start < DEFAULT_FLUSH_INTERVAL);
        ingester.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_flush() {
        let transport = Arc::new(RecordingTransport::default());
        let ingester = Ingester::start(transport.clone(), "logs", config(4)).unwrap();

        ingester.enqueue(event(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(transport.batch_sizes().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.batch_sizes(), vec![1]);
        ingester.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_tick_sends_nothing() {
        let transport = Arc::new(RecordingTransport::default());
        let ingester = Ingester::start(transport.clone(), "logs", config(4)).unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(transport.batch_sizes().is_empty());
        ingester.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_batch() {
        let transport = Arc::new(RecordingTransport::default());
        let ingester = Ingester::start(transport.clone(), "logs", config(4)).unwrap();

        ingester.enqueue_iter((0..5).map(event)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.batch_sizes(), vec![4]);

        tokio::time::sleep(DEFAULT_FLUSH_INTERVAL).await;
        assert_eq!(transport.batch_sizes(), vec![4, 1]);
        ingester.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_is_preserved() {
        let transport = Arc::new(RecordingTransport::default());
        let ingester = Ingester::start(transport.clone(), "logs", config(3)).unwrap();

        ingester.enqueue_iter((0..8).map(event)).await.unwrap();
        ingester.close().await;

        let seen: Vec<u64> = transport
            .events()
            .iter()
            .map(|e| e["i"].as_u64().unwrap())
            .collect();
        assert_eq!(seen, (0..8).collect::<Vec<u64>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_keep_their_order() {
        const PRODUCERS: u64 = 8;
        const PER_PRODUCER: u64 = 500;

        let transport = Arc::new(RecordingTransport::default());
        let ingester = Ingester::start(transport.clone(), "logs", config(16)).unwrap();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let ingester = ingester.clone();
                tokio::spawn(async move {
                    let mut sent = 0u64;
                    for i in 0..PER_PRODUCER {
                        let event = to_event(&json!({"p": p, "i": i})).unwrap();
                        match ingester.enqueue(event).await {
                            Ok(()) => sent += 1,
                            Err(Error::IngesterClosed) => break,
                            Err(e) => panic!("unexpected enqueue error: {e}"),
                        }
                    }
                    sent
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let summary = ingester.close().await;

        let mut sent = 0;
        for producer in producers {
            sent += producer.await.unwrap();
        }

        let events = transport.events();
        let delivered = events.len() as u64;
        assert_eq!(summary.accepted, delivered);
        assert_eq!(summary.ingested, delivered);
        assert_eq!(summary.dropped, 0);
        assert_eq!(sent, delivered);

        let mut last: Vec<Option<u64>> = vec![None; PRODUCERS as usize];
        for event in &events {
            let p = event["p"].as_u64().unwrap() as usize;
            let i = event["i"].as_u64().unwrap();
            assert!(last[p].map_or(true, |prev| prev < i), "producer {p} out of order at {i}");
            last[p] = Some(i);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_drains() {
        let transport = Arc::new(RecordingTransport::default());
        let ingester = Ingester::start(transport.clone(), "logs", config(10)).unwrap();

        ingester.enqueue_iter((0..3).map(event)).await.unwrap();
        let summary = ingester.close().await;

        assert_eq!(transport.batch_sizes(), vec![3]);
        assert_eq!(
            summary,
            CloseSummary {
                accepted: 3,
                ingested: 3,
                failed: 0,
                dropped: 0,
                drain_timed_out: false,
            }
        );
        assert_eq!(ingester.state(), IngesterState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let transport = Arc::new(RecordingTransport::with_delay(Duration::from_millis(100)));
        let ingester = Ingester::start(transport.clone(), "logs", config(10)).unwrap();
        ingester.enqueue(event(0)).await.unwrap();

        let other = ingester.clone();
        let (first, second) = tokio::join!(ingester.close(), other.close());
        let third = ingester.close().await;

        assert_eq!(first, second);
        assert_eq!(first, third);
        assert_eq!(first.ingested, 1);
        assert_eq!(transport.batch_sizes(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_close() {
        let transport = Arc::new(RecordingTransport::default());
        let ingester = Ingester::start(transport, "logs", config(4)).unwrap();
        ingester.close().await;

        assert!(matches!(
            ingester.enqueue(event(0)).await,
            Err(Error::IngesterClosed)
        ));
        assert!(matches!(
            ingester.try_enqueue(event(0)),
            Err(Error::IngesterClosed)
        ));
        assert!(matches!(ingester.flush().await, Err(Error::IngesterClosed)));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_drain_deadline() {
        let transport = Arc::new(RecordingTransport::with_delay(Duration::from_secs(60)));
        let ingester = Ingester::start(transport.clone(), "logs", config(4)).unwrap();
        ingester.enqueue_iter((0..6).map(event)).await.unwrap();

        let start = Instant::now();
        let summary = ingester.close().await;

        assert!(Instant::now() - start <= DEFAULT_DRAIN_TIMEOUT + Duration::from_millis(10));
        assert!(summary.drain_timed_out);
        assert_eq!(summary.accepted, 6);
        assert_eq!(summary.dropped, 6);
        assert_eq!(summary.ingested, 0);
        assert!(logs_contain("drain deadline"));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_transport_error_is_logged_and_counted() {
        let transport = Arc::new(RecordingTransport::default());
        transport.fail.store(true, Ordering::SeqCst);
        let ingester = Ingester::start(transport.clone(), "logs", config(2)).unwrap();

        ingester.enqueue_iter((0..2).map(event)).await.unwrap();
        let summary = ingester.close().await;

        assert_eq!(summary.dropped, 2);
        assert!(logs_contain("Failed to ingest batch of 2 events"));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_rejected_events_are_logged() {
        let transport = Arc::new(RecordingTransport::default());
        transport.reject_all.store(true, Ordering::SeqCst);
        let ingester = Ingester::start(transport.clone(), "logs", config(2)).unwrap();

        ingester.enqueue_iter((0..2).map(event)).await.unwrap();
        let summary = ingester.close().await;

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.dropped, 0);
        assert!(logs_contain("field limit exceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush() {
        let transport = Arc::new(RecordingTransport::default());
        let ingester = Ingester::start(transport.clone(), "logs", config(10)).unwrap();

        ingester.enqueue_iter((0..2).map(event)).await.unwrap();
        ingester.flush().await.unwrap();

        assert_eq!(transport.batch_sizes(), vec![2]);
        ingester.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_timeout() {
        let transport = Arc::new(RecordingTransport::with_delay(Duration::from_secs(60)));
        let ingester = Ingester::start(transport, "logs", config(10)).unwrap();

        ingester.enqueue(event(0)).await.unwrap();
        assert!(matches!(
            ingester.flush().await,
            Err(Error::DrainTimeout(d)) if d == DEFAULT_FLUSH_TIMEOUT
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_enqueue_full_queue() {
        let transport = Arc::new(RecordingTransport::with_delay(Duration::from_secs(60)));
        let ingester = Ingester::start(transport, "logs", config(2)).unwrap();

        // The first two fill a batch that is stuck in the slow transport.
        ingester.enqueue_iter((0..2).map(event)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        ingester.try_enqueue(event(2)).unwrap();
        ingester.try_enqueue(event(3)).unwrap();
        assert!(matches!(
            ingester.try_enqueue(event(4)),
            Err(Error::QueueFull)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_enqueue_is_released_by_close() {
        let transport = Arc::new(RecordingTransport::with_delay(Duration::from_secs(60)));
        let ingester = Ingester::start(transport, "logs", config(1)).unwrap();

        ingester.enqueue(event(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        ingester.enqueue(event(1)).await.unwrap();

        let producer = {
            let ingester = ingester.clone();
            tokio::spawn(async move { ingester.enqueue(event(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!producer.is_finished());

        let summary = ingester.close().await;
        assert!(matches!(producer.await.unwrap(), Err(Error::IngesterClosed)));
        assert_eq!(summary.accepted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_with_cancel() {
        let transport = Arc::new(RecordingTransport::with_delay(Duration::from_secs(60)));
        let ingester = Ingester::start(transport, "logs", config(1)).unwrap();

        ingester.enqueue(event(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        ingester.enqueue(event(1)).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            ingester.enqueue_with_cancel(event(2), &cancel).await,
            Err(Error::Cancelled)
        ));
        assert_eq!(ingester.state(), IngesterState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_closes() {
        let transport = Arc::new(RecordingTransport::default());
        let parent = CancellationToken::new();
        let ingester = Ingester::start(
            transport.clone(),
            "logs",
            IngesterConfig {
                batch_size: 10,
                cancel: Some(parent.clone()),
                ..Default::default()
            },
        )
        .unwrap();

        ingester.enqueue_iter((0..3).map(event)).await.unwrap();
        parent.cancel();

        assert!(matches!(
            ingester.enqueue(event(3)).await,
            Err(Error::IngesterClosed)
        ));
        let summary = ingester.close().await;
        assert_eq!(summary.ingested, 3);
        assert_eq!(transport.batch_sizes(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_all_handles_drains() {
        let transport = Arc::new(RecordingTransport::default());
        let ingester = Ingester::start(transport.clone(), "logs", config(10)).unwrap();

        ingester.enqueue_iter((0..3).map(event)).await.unwrap();
        drop(ingester);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(transport.batch_sizes(), vec![3]);
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let transport = Arc::new(RecordingTransport::default());
        assert!(matches!(
            Ingester::start(transport.clone(), "logs", config(0)),
            Err(Error::ConfigInvalid(_))
        ));
        assert!(matches!(
            Ingester::start(transport, "", config(1)),
            Err(Error::ConfigInvalid(_))
        ));
    }
}
