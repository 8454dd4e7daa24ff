mod indexer;

use claimcheck_common::types::ScreeningLesson;
use futures::future::BoxFuture;
use redis::aio::MultiplexedConnection;
use tokio::sync::mpsc;

pub use indexer::{LessonIndexer, LessonSource};

/// Stream carrying finished-run lessons for the screening advisor.
pub const LESSON_STREAM: &str = "screening:lessons";

/// Consumer group of the out-of-band advisor indexers.
pub const INDEXER_GROUP: &str = "advisor-indexers";

/// Append-only destination for learning-loop lessons.
pub trait LessonSink: Send + Sync {
    fn publish(&self, lesson: ScreeningLesson) -> BoxFuture<'_, Result<(), QueueError>>;
}

/// Redis stream client for the learning loop.
pub struct LessonQueue {
    conn: MultiplexedConnection,
}

impl LessonQueue {
    /// Connect to Redis.
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        tracing::info!("Connecting to Redis");

        let client =
            redis::Client::open(redis_url).map_err(|e| QueueError::Connection(e.to_string()))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let queue = Self { conn };
        queue.health_check().await?;
        tracing::info!("Redis connection established");

        Ok(queue)
    }

    /// Verify the connection is alive (PING).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        if pong != "PONG" {
            return Err(QueueError::Command(format!(
                "Unexpected PING response: {}",
                pong
            )));
        }
        Ok(())
    }

    /// Create the lesson stream and indexer consumer group.
    /// Safe to run on every startup; ignores "already exists" errors.
    pub async fn initialize_stream(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();

        // XGROUP CREATE <stream> <group> 0 MKSTREAM
        // 0 = index lessons published before the group existed too.
        let result: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(LESSON_STREAM)
            .arg(INDEXER_GROUP)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                tracing::info!(stream = LESSON_STREAM, group = INDEXER_GROUP, "Created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                tracing::debug!(stream = LESSON_STREAM, "Consumer group already exists, skipping");
                Ok(())
            }
            Err(e) => Err(QueueError::Command(format!(
                "Failed to create consumer group for {}: {}",
                LESSON_STREAM, e
            ))),
        }
    }

    /// Append a lesson to the stream. Returns the stream entry ID.
    pub async fn publish_lesson(&self, lesson: &ScreeningLesson) -> Result<String, QueueError> {
        let mut conn = self.conn.clone();
        let data = serde_json::to_string(lesson).map_err(|e| QueueError::Command(e.to_string()))?;

        let entry_id: String = redis::cmd("XADD")
            .arg(LESSON_STREAM)
            .arg("*")
            .arg("data")
            .arg(&data)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        tracing::debug!(entry_id = %entry_id, lesson_id = %lesson.id, "Published screening lesson");
        Ok(entry_id)
    }

    /// Read up to `count` lessons for `consumer`.
    /// Pending (delivered but unacknowledged) entries come first, then new ones,
    /// blocking for `block_ms` when there are none.
    pub async fn read_lessons(
        &self,
        consumer: &str,
        count: usize,
        block_ms: Option<u64>,
    ) -> Result<Vec<(String, ScreeningLesson)>, QueueError> {
        let mut conn = self.conn.clone();

        let pending: Option<redis::Value> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(INDEXER_GROUP)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(LESSON_STREAM)
            .arg("0")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        let reclaimed = parse_xreadgroup_response(pending);
        if !reclaimed.is_empty() {
            tracing::debug!(consumer, count = reclaimed.len(), "Reclaimed pending lessons");
            return Ok(reclaimed);
        }

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(INDEXER_GROUP).arg(consumer);
        if let Some(ms) = block_ms {
            cmd.arg("BLOCK").arg(ms);
        }
        cmd.arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(LESSON_STREAM)
            .arg(">");

        let result: Option<redis::Value> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        Ok(parse_xreadgroup_response(result))
    }

    /// Acknowledge indexed entries (XACK).
    pub async fn ack(&self, entry_ids: &[String]) -> Result<(), QueueError> {
        if entry_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();

        let _: i64 = redis::cmd("XACK")
            .arg(LESSON_STREAM)
            .arg(INDEXER_GROUP)
            .arg(entry_ids)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        Ok(())
    }
}

impl LessonSink for LessonQueue {
    fn publish(&self, lesson: ScreeningLesson) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move { self.publish_lesson(&lesson).await.map(|_| ()) })
    }
}

/// In-process lesson sink used when Redis is not configured.
pub struct ChannelLessonSink {
    tx: mpsc::UnboundedSender<ScreeningLesson>,
}

impl ChannelLessonSink {
    /// Create a sink and the receiver the indexer consumes.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScreeningLesson>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LessonSink for ChannelLessonSink {
    fn publish(&self, lesson: ScreeningLesson) -> BoxFuture<'_, Result<(), QueueError>> {
        let result = self
            .tx
            .send(lesson)
            .map_err(|_| QueueError::Closed);
        Box::pin(async move { result })
    }
}

/// Parse an XREADGROUP response into (entry_id, lesson) pairs.
/// Redis returns: [[stream_name, [[entry_id, [field, value, ...]], ...]]]
fn parse_xreadgroup_response(value: Option<redis::Value>) -> Vec<(String, ScreeningLesson)> {
    let mut lessons = Vec::new();

    let streams = match value {
        Some(redis::Value::Array(arr)) => arr,
        _ => return lessons,
    };

    for stream_pair in streams {
        let pair = match stream_pair {
            redis::Value::Array(p) if p.len() >= 2 => p,
            _ => continue,
        };

        let entries = match &pair[1] {
            redis::Value::Array(e) => e,
            _ => continue,
        };

        for entry in entries {
            let entry_pair = match entry {
                redis::Value::Array(ep) if ep.len() >= 2 => ep,
                _ => continue,
            };

            let entry_id = match &entry_pair[0] {
                redis::Value::BulkString(b) => String::from_utf8_lossy(b).to_string(),
                _ => continue,
            };

            let fields = match &entry_pair[1] {
                redis::Value::Array(f) => f,
                _ => continue,
            };

            if let Some(lesson) = extract_data_field(fields) {
                lessons.push((entry_id, lesson));
            }
        }
    }

    lessons
}

/// Extract the "data" field from a stream entry's field/value pairs.
fn extract_data_field(fields: &[redis::Value]) -> Option<ScreeningLesson> {
    for pair in fields.chunks(2) {
        let [redis::Value::BulkString(key), redis::Value::BulkString(data)] = pair else {
            continue;
        };
        if key.as_slice() != b"data" {
            continue;
        }
        return match serde_json::from_slice(data) {
            Ok(lesson) => Some(lesson),
            Err(e) => {
                tracing::error!(error = %e, "Failed to deserialize screening lesson from Redis stream");
                None
            }
        };
    }
    None
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Lesson channel closed")]
    Closed,
}

impl From<QueueError> for claimcheck_common::ClaimCheckError {
    fn from(e: QueueError) -> Self {
        claimcheck_common::ClaimCheckError::Redis(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use claimcheck_common::types::AdvisorLabel;

    use super::*;

    fn bulk(s: &str) -> redis::Value {
        redis::Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn test_parse_xreadgroup_response() {
        let lesson = ScreeningLesson::new("Some text", AdvisorLabel::Verifiable);
        let data = serde_json::to_string(&lesson).unwrap();
        let value = redis::Value::Array(vec![redis::Value::Array(vec![
            bulk(LESSON_STREAM),
            redis::Value::Array(vec![
                redis::Value::Array(vec![
                    bulk("1-0"),
                    redis::Value::Array(vec![bulk("data"), bulk(&data)]),
                ]),
                redis::Value::Array(vec![
                    bulk("2-0"),
                    redis::Value::Array(vec![bulk("data"), bulk("not json")]),
                ]),
            ]),
        ])]);

        let parsed = parse_xreadgroup_response(Some(value));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, "1-0");
        assert_eq!(parsed[0].1, lesson);
    }

    #[test]
    fn test_parse_nil_response() {
        assert!(parse_xreadgroup_response(None).is_empty());
        assert!(parse_xreadgroup_response(Some(redis::Value::Nil)).is_empty());
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelLessonSink::new();
        sink.publish(ScreeningLesson::new("t", AdvisorLabel::Opinion))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().label, AdvisorLabel::Opinion);

        drop(rx);
        assert!(matches!(
            sink.publish(ScreeningLesson::new("t", AdvisorLabel::Opinion)).await,
            Err(QueueError::Closed)
        ));
    }
}
