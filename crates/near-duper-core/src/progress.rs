use crate::model::SearchType;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::path::Path;
use std::thread;

/// Trait for reporting search progress.
///
/// The CLI implements it with indicatif. All methods have default no-op
/// implementations. Delivery is best-effort: counts may be skipped when the
/// reporter falls behind the workers.
pub trait ProgressReporter: Send + Sync {
    fn on_search_start(&self, _search: SearchType, _total_files: usize) {}
    fn on_signature_progress(&self, _processed: usize, _total: usize) {}
    fn on_signature_complete(&self, _groups: usize, _duration_secs: f64) {}
    fn on_link_start(&self, _groups: usize) {}
    fn on_link_progress(&self, _linked: usize, _total: usize) {}
    fn on_consolidate_complete(&self, _clusters: usize, _duration_secs: f64) {}
    fn on_file_error(&self, _path: &Path, _reason: &str) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    Signature { processed: usize, total: usize },
    Link { linked: usize, total: usize },
}

impl Tick {
    fn deliver(self, reporter: &dyn ProgressReporter) {
        match self {
            Tick::Signature { processed, total } => {
                reporter.on_signature_progress(processed, total)
            }
            Tick::Link { linked, total } => reporter.on_link_progress(linked, total),
        }
    }
}

/// Single-slot progress channel. Publishing never blocks: when the slot is
/// occupied the stale tick is discarded in favour of the new one.
pub(crate) struct ProgressTicker {
    tx: Sender<Tick>,
    rx: Receiver<Tick>,
}

impl ProgressTicker {
    pub(crate) fn new() -> (Self, Receiver<Tick>) {
        let (tx, rx) = bounded(1);
        let consumer = rx.clone();
        (Self { tx, rx }, consumer)
    }

    pub(crate) fn publish(&self, tick: Tick) {
        match self.tx.try_send(tick) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(tick)) => {
                let _ = self.rx.try_recv();
                let _ = self.tx.try_send(tick);
            }
        }
    }
}

/// Runs `work` with a ticker whose ticks are forwarded to `reporter` on a
/// dedicated thread. Returns once `work` is done and the forwarder drained.
pub(crate) fn with_ticker<R>(
    reporter: &dyn ProgressReporter,
    work: impl FnOnce(&ProgressTicker) -> R,
) -> R {
    let (ticker, consumer) = ProgressTicker::new();
    thread::scope(|s| {
        s.spawn(move || {
            for tick in consumer.iter() {
                tick.deliver(reporter);
            }
        });
        let out = work(&ticker);
        drop(ticker);
        out
    })
}
