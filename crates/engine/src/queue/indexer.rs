use std::sync::Arc;
use std::time::Duration;

use claimcheck_common::types::ScreeningLesson;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::LessonQueue;
use crate::screening::ScreeningAdvisor;

/// Lessons read per indexing batch.
const BATCH_SIZE: usize = 32;

/// How long a Redis read blocks before re-checking shutdown.
const BLOCK_MS: u64 = 5000;

/// Where the indexer reads lessons from.
pub enum LessonSource {
    Redis {
        queue: Arc<LessonQueue>,
        consumer: String,
    },
    Channel(mpsc::UnboundedReceiver<ScreeningLesson>),
}

/// Out-of-band task that embeds published lessons into screening memory.
pub struct LessonIndexer {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl LessonIndexer {
    pub fn start(source: LessonSource, advisor: Arc<ScreeningAdvisor>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = match source {
            LessonSource::Redis { queue, consumer } => {
                tokio::spawn(redis_loop(queue, consumer, advisor, shutdown_rx))
            }
            LessonSource::Channel(rx) => tokio::spawn(channel_loop(rx, advisor, shutdown_rx)),
        };
        tracing::info!("Lesson indexer started");
        Self {
            handle,
            shutdown_tx,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        tracing::info!("Lesson indexer shutdown signaled");
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

async fn index(advisor: &ScreeningAdvisor, lessons: &[ScreeningLesson]) -> bool {
    match advisor.remember(lessons).await {
        Ok(count) => {
            metrics::counter!("advisor.lessons.indexed").increment(count as u64);
            tracing::debug!(count, "Indexed screening lessons");
            true
        }
        Err(e) => {
            tracing::warn!(count = lessons.len(), error = %e, "Failed to index screening lessons");
            false
        }
    }
}

async fn redis_loop(
    queue: Arc<LessonQueue>,
    consumer: String,
    advisor: Arc<ScreeningAdvisor>,
    shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            tracing::info!(consumer = %consumer, "Lesson indexer shutting down");
            break;
        }

        let batch = match queue.read_lessons(&consumer, BATCH_SIZE, Some(BLOCK_MS)).await {
            Ok(batch) if batch.is_empty() => continue,
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(consumer = %consumer, error = %e, "Failed to read lessons");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        let (entry_ids, lessons): (Vec<String>, Vec<ScreeningLesson>) = batch.into_iter().unzip();

        // Unacknowledged entries are re-read as pending on the next pass.
        if !index(&advisor, &lessons).await {
            tokio::time::sleep(Duration::from_secs(5)).await;
            continue;
        }

        if let Err(e) = queue.ack(&entry_ids).await {
            tracing::warn!(consumer = %consumer, error = %e, "Failed to ack lessons");
        }
    }
}

async fn channel_loop(
    mut rx: mpsc::UnboundedReceiver<ScreeningLesson>,
    advisor: Arc<ScreeningAdvisor>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let first = tokio::select! {
            lesson = rx.recv() => lesson,
            _ = shutdown_rx.changed() => None,
        };
        let Some(first) = first else {
            tracing::info!("Lesson indexer shutting down");
            break;
        };

        let mut lessons = vec![first];
        while lessons.len() < BATCH_SIZE {
            match rx.try_recv() {
                Ok(lesson) => lessons.push(lesson),
                Err(_) => break,
            }
        }

        // In-process lessons are best effort; a failed batch is dropped.
        index(&advisor, &lessons).await;
    }
}
