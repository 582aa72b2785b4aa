// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

use std::mem;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{CloseSummary, IngestTransport, Ingester, IngesterCommand, IngesterConfig};
use crate::encoding::ContentEncoding;
use crate::error::Error;
use crate::event::Event;
use crate::ingest::IngestStatus;

enum Outcome {
    Sent(Result<IngestStatus, Error>),
    Aborted,
    TimedOut,
}

/// The single consumer of an ingester's queue.
pub struct IngesterService<T> {
    transport: T,
    dataset: String,
    rx: mpsc::Receiver<IngesterCommand>,
    buffer: Vec<Event>,
    batch_size: usize,
    flush_interval: Duration,
    drain_timeout: Duration,
    encoding: ContentEncoding,
    parent: CancellationToken,
    closing: CancellationToken,
    drain_deadline: Option<Instant>,
    totals: CloseSummary,
    summary_tx: watch::Sender<Option<CloseSummary>>,
}

impl<T: IngestTransport> IngesterService<T> {
    /// Builds the service and its first handle. The service does nothing
    /// until [`IngesterService::run`] is polled.
    pub fn new(
        transport: T,
        dataset: &str,
        config: IngesterConfig,
    ) -> Result<(Self, Ingester), Error> {
        config.validate()?;
        if dataset.is_empty() {
            return Err(Error::ConfigInvalid("dataset must not be empty".to_string()));
        }

        let (tx, rx) = mpsc::channel(config.batch_size);
        let (summary_tx, summary_rx) = watch::channel(None);
        let parent = config.cancel.unwrap_or_default();
        let closing = parent.child_token();

        let service = Self {
            transport,
            dataset: dataset.to_string(),
            rx,
            buffer: Vec::with_capacity(config.batch_size),
            batch_size: config.batch_size,
            flush_interval: config.flush_interval,
            drain_timeout: config.drain_timeout,
            encoding: config.content_encoding,
            parent,
            closing: closing.clone(),
            drain_deadline: None,
            totals: CloseSummary::default(),
            summary_tx,
        };
        let handle = Ingester {
            tx,
            closing,
            summary: summary_rx,
            flush_timeout: config.flush_timeout,
        };
        Ok((service, handle))
    }

    pub async fn run(mut self) {
        debug!("INGESTER | Started for dataset {}", self.dataset);

        let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.closing.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(IngesterCommand::Event(event)) => {
                        self.totals.accepted += 1;
                        self.buffer.push(event);
                        if self.buffer.len() >= self.batch_size {
                            self.flush_buffer().await;
                        }
                    }
                    Some(IngesterCommand::Flush(reply)) => {
                        self.flush_buffer().await;
                        let _ = reply.send(());
                    }
                    // Every handle is gone.
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.buffer.is_empty() {
                        self.flush_buffer().await;
                    }
                }
            }
        }

        self.drain().await;

        let totals = self.totals;
        if totals.dropped > 0 {
            warn!(
                "INGESTER | Closed dataset {} with {} of {} events dropped",
                self.dataset, totals.dropped, totals.accepted
            );
        } else {
            debug!(
                "INGESTER | Closed dataset {}: {} accepted, {} ingested, {} failed",
                self.dataset, totals.accepted, totals.ingested, totals.failed
            );
        }
        self.summary_tx.send_replace(Some(totals));
    }

    async fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        self.dispatch(batch).await;
    }

    /// Stops intake and ships everything left under the drain deadline.
    async fn drain(&mut self) {
        if self.drain_deadline.is_none() {
            self.drain_deadline = Some(Instant::now() + self.drain_timeout);
        }
        self.rx.close();

        let mut waiting = Vec::new();
        while let Some(command) = self.rx.recv().await {
            match command {
                IngesterCommand::Event(event) => {
                    self.totals.accepted += 1;
                    self.buffer.push(event);
                }
                IngesterCommand::Flush(reply) => waiting.push(reply),
            }
        }

        while !self.buffer.is_empty() {
            let rest = if self.buffer.len() > self.batch_size {
                self.buffer.split_off(self.batch_size)
            } else {
                Vec::new()
            };
            let batch = mem::replace(&mut self.buffer, rest);
            self.dispatch(batch).await;
        }

        for reply in waiting {
            let _ = reply.send(());
        }
    }

    async fn dispatch(&mut self, batch: Vec<Event>) {
        let n = batch.len() as u64;
        if self.drain_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            self.expire(n);
            return;
        }

        debug!("INGESTER | Sending {n} events to dataset {}", self.dataset);
        let mut send = self
            .transport
            .ingest_batch(&self.dataset, batch, self.encoding);
        let outcome = loop {
            match self.drain_deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, &mut send).await {
                    Ok(result) => break Outcome::Sent(result),
                    Err(_) => break Outcome::TimedOut,
                },
                None => tokio::select! {
                    biased;
                    () = self.parent.cancelled() => {
                        self.drain_deadline = Some(Instant::now() + self.drain_timeout);
                        break Outcome::Aborted;
                    }
                    // An in-flight send keeps going, now bounded by the drain deadline.
                    () = self.closing.cancelled() => {
                        self.drain_deadline = Some(Instant::now() + self.drain_timeout);
                    }
                    result = &mut send => break Outcome::Sent(result),
                },
            }
        };
        drop(send);

        match outcome {
            Outcome::Sent(Ok(status)) => self.record(n, status),
            Outcome::Sent(Err(e)) => {
                self.totals.dropped += n;
                error!(
                    "INGESTER | Failed to ingest batch of {n} events into {}: {e}",
                    self.dataset
                );
            }
            Outcome::Aborted => {
                self.totals.dropped += n;
                warn!("INGESTER | Send of {n} events aborted by cancellation");
            }
            Outcome::TimedOut => self.expire(n),
        }
    }

    fn expire(&mut self, n: u64) {
        self.totals.dropped += n;
        self.totals.drain_timed_out = true;
        warn!(
            "INGESTER | Dropped {n} events: drain deadline of {:?} exceeded",
            self.drain_timeout
        );
    }

    fn record(&mut self, n: u64, status: IngestStatus) {
        self.totals.ingested += status.ingested;
        self.totals.failed += status.failed;
        if status.failed == 0 {
            return;
        }
        match status.failures.first() {
            Some(first) => warn!(
                "INGESTER | {} of {n} events rejected by the server, first at {}: {}",
                status.failed, first.timestamp, first.error
            ),
            None => warn!(
                "INGESTER | {} of {n} events rejected by the server",
                status.failed
            ),
        }
    }
}
