use claimcheck_common::types::{ProgressEvent, Stage};
use tokio::sync::mpsc;

/// Non-blocking sender for pipeline progress. Events are dropped when the
/// receiver lags or has gone away; progress never slows the pipeline.
#[derive(Clone, Default)]
pub struct ProgressSender {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSender {
    /// Sender with a bounded buffer, and the receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// Sender that only logs.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, stage: Stage, message: impl Into<String>) {
        let event = ProgressEvent::new(stage, message);
        tracing::debug!(stage = stage.label(), message = %event.message, "Progress");
        if let Some(tx) = &self.tx {
            if tx.try_send(event).is_err() {
                metrics::counter!("pipeline.progress.dropped").increment(1);
            }
        }
    }
}
