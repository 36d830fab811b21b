use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::format::{build_message, split_message};
use super::{ChannelSender, Notifier};
use crate::config::MESSAGE_LIMIT;
use crate::error::AppError;
use crate::types::CandidateListing;

/// Producer side of the delivery queue. Cheap to clone; every clone feeds the
/// same single worker.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<String>,
    segment_limit: usize,
}

/// Owner of the delivery worker task.
pub struct DeliveryHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Final state of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered,
    Dropped,
    /// Shutdown arrived while the segment was waiting for its send slot.
    Interrupted,
}

impl NotificationQueue {
    /// Start the delivery worker and return the producer handle.
    pub fn spawn(
        sender: Arc<dyn ChannelSender>,
        capacity: usize,
        min_interval: Duration,
    ) -> (Self, DeliveryHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let worker = DeliveryWorker::new(rx, sender, min_interval, cancel.clone());
        let join = tokio::spawn(worker.run());

        let queue = Self {
            tx,
            segment_limit: MESSAGE_LIMIT,
        };
        (queue, DeliveryHandle { cancel, join })
    }

    /// Format, segment and buffer an alert. Returns `false` if it was dropped.
    pub fn enqueue(&self, listing: &CandidateListing) -> bool {
        self.enqueue_text(&build_message(listing))
    }

    /// Buffer all segments of `text`, or none of them.
    pub fn enqueue_text(&self, text: &str) -> bool {
        let segments = split_message(text, self.segment_limit);
        let count = segments.len();

        match self.tx.try_reserve_many(count) {
            Ok(permits) => {
                for (permit, segment) in permits.zip(segments) {
                    permit.send(segment);
                }
                debug!(segments = count, "[telegram] alert queued");
                true
            }
            Err(TrySendError::Full(())) => {
                warn!(segments = count, "[telegram] queue full, dropping alert");
                false
            }
            Err(TrySendError::Closed(())) => {
                warn!(segments = count, "[telegram] queue closed, dropping alert");
                false
            }
        }
    }
}

impl Notifier for NotificationQueue {
    fn send_alert(&self, listing: &CandidateListing) {
        self.enqueue(listing);
    }
}

impl DeliveryHandle {
    /// Stop the worker. Buffered segments are dropped; a worker that does not
    /// exit within `timeout` is aborted.
    pub async fn shutdown(mut self, timeout: Duration) {
        self.cancel.cancel();
        match tokio::time::timeout(timeout, &mut self.join).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("[telegram] delivery worker ended abnormally: {e}"),
            Err(_) => {
                warn!(?timeout, "[telegram] delivery worker did not stop in time, aborting");
                self.join.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Single consumer of the queue. It alone knows when the last successful
/// send happened.
struct DeliveryWorker {
    rx: mpsc::Receiver<String>,
    sender: Arc<dyn ChannelSender>,
    min_interval: Duration,
    last_sent: Option<Instant>,
    cancel: CancellationToken,
}

impl DeliveryWorker {
    fn new(
        rx: mpsc::Receiver<String>,
        sender: Arc<dyn ChannelSender>,
        min_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx,
            sender,
            min_interval,
            last_sent: None,
            cancel,
        }
    }

    async fn run(mut self) {
        let mut dropped = 0usize;
        loop {
            let segment = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(s) => s,
                    None => break,
                },
            };

            if self.deliver(&segment).await == Delivery::Interrupted {
                dropped += 1;
                break;
            }
        }

        self.rx.close();
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "[telegram] delivery stopped with undelivered segments");
        }
        info!("[telegram] delivery worker stopped");
    }

    async fn deliver(&mut self, text: &str) -> Delivery {
        if let Some(last) = self.last_sent {
            if !self.wait_until(last + self.min_interval).await {
                return Delivery::Interrupted;
            }
        }

        match self.sender.send(text).await {
            Ok(()) => {
                self.last_sent = Some(Instant::now());
                info!("[telegram] alert sent");
                Delivery::Delivered
            }
            Err(AppError::RateLimited(retry_after)) => {
                warn!(?retry_after, "[telegram] rate limited, retrying once");
                if !self.wait_until(Instant::now() + retry_after).await {
                    return Delivery::Interrupted;
                }
                match self.sender.send(text).await {
                    Ok(()) => {
                        self.last_sent = Some(Instant::now());
                        info!("[telegram] alert sent after retry");
                        Delivery::Delivered
                    }
                    Err(e) => {
                        warn!(error = %e, "[telegram] retry failed, dropping segment");
                        Delivery::Dropped
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "[telegram] send failed, dropping segment");
                Delivery::Dropped
            }
        }
    }

    /// `false` if shutdown arrived first.
    async fn wait_until(&self, deadline: Instant) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep_until(deadline) => true,
        }
    }
}
