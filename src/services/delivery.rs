use log::{error, info, warn};

use crate::output::publisher::PublishChannel;
use crate::storage::MessageQueue;

pub const DEFAULT_MAX_BATCH: usize = 100;
pub const DEFAULT_RETAIN_SENT: u32 = 5000;

/// Drains the queue against a channel in bounded, strictly ordered batches.
#[derive(Debug, Clone)]
pub struct DeliveryEngine {
    max_batch: usize,
    retain_sent: u32,
}

impl Default for DeliveryEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCH, DEFAULT_RETAIN_SENT)
    }
}

impl DeliveryEngine {
    pub fn new(max_batch: usize, retain_sent: u32) -> Self {
        Self { max_batch, retain_sent }
    }

    /// Publishes pending records oldest first and returns how many were delivered.
    ///
    /// The batch stops at the first record that cannot be published or marked,
    /// so a record is never marked sent while an older one is still unsent.
    /// Retention pruning runs after every batch, whatever its outcome.
    pub async fn flush(&self, queue: &MessageQueue, channel: &dyn PublishChannel) -> usize {
        let records = match queue.pending(self.max_batch).await {
            Ok(records) => records,
            Err(e) => {
                error!("Read DB queue failed: {}", e);
                return 0;
            }
        };

        let mut sent_count = 0;

        if !records.is_empty() {
            info!("Start flushing DB queue, count={} ...", records.len());

            for record in &records {
                if let Err(e) = channel.publish(&record.topic, &record.payload).await {
                    warn!("Flush DB queue publish failed (id={}): {}", record.id, e);
                    break;
                }

                if let Err(e) = queue.mark_sent(record.id).await {
                    // Published but not recorded: it will be sent again later.
                    error!("Mark sent failed (id={}): {}", record.id, e);
                    break;
                }
                sent_count += 1;
            }

            if sent_count < records.len() {
                warn!(
                    "Flush stopped after {}/{} records, the rest stays queued",
                    sent_count,
                    records.len()
                );
            } else {
                info!("Flushed {} records", sent_count);
            }
        }

        if let Err(e) = queue.prune(self.retain_sent).await {
            error!("Cleanup DB queue failed: {}", e);
        }

        sent_count
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::queue::tests::open_temp;
    use crate::utils::error::PublishError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records payloads; fails the publish attempts whose 1-based index is listed.
    #[derive(Default)]
    pub(crate) struct ScriptedChannel {
        pub fail_attempts: HashSet<usize>,
        pub fail_all: AtomicBool,
        pub attempts: AtomicUsize,
        pub published: Mutex<Vec<String>>,
        pub disconnected: AtomicBool,
    }

    impl ScriptedChannel {
        pub fn failing_at(attempts: &[usize]) -> Self {
            Self {
                fail_attempts: attempts.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl PublishChannel for ScriptedChannel {
        async fn publish(&self, _topic: &str, payload: &str) -> Result<(), PublishError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_all.load(Ordering::SeqCst) || self.fail_attempts.contains(&attempt) {
                return Err(PublishError::AckTimeout(1));
            }
            self.published.lock().unwrap().push(payload.to_string());
            Ok(())
        }

        fn is_connected(&self) -> bool {
            !self.disconnected.load(Ordering::SeqCst)
        }

        async fn close(&mut self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    async fn sent_flags(queue: &MessageQueue) -> Vec<(i64, bool)> {
        sqlx::query_as::<_, (i64, bool)>("SELECT id, sent FROM queue ORDER BY id")
            .fetch_all(queue.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_failure_at_fourth_record_stops_batch() {
        let (_dir, queue) = open_temp().await;
        for i in 1..=10 {
            queue.enqueue("t", &format!("r{}", i), "ts").await.unwrap();
        }
        let channel = ScriptedChannel::failing_at(&[4]);

        let delivered = DeliveryEngine::default().flush(&queue, &channel).await;

        assert_eq!(delivered, 3);
        let flags = sent_flags(&queue).await;
        assert!(flags[..3].iter().all(|(_, sent)| *sent));
        assert!(flags[3..].iter().all(|(_, sent)| !*sent));
        // nothing after the failing record was even attempted
        assert_eq!(channel.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(*channel.published.lock().unwrap(), vec!["r1", "r2", "r3"]);
    }

    #[tokio::test]
    async fn test_mark_failure_stops_batch() {
        let (_dir, queue) = open_temp().await;
        for i in 1..=4 {
            queue.enqueue("t", &format!("r{}", i), "ts").await.unwrap();
        }
        sqlx::query(
            "CREATE TRIGGER refuse_mark BEFORE UPDATE ON queue WHEN NEW.id = 2 \
             BEGIN SELECT RAISE(ABORT, 'read-only row'); END",
        )
        .execute(queue.pool())
        .await
        .unwrap();
        let channel = ScriptedChannel::default();

        let delivered = DeliveryEngine::default().flush(&queue, &channel).await;

        assert_eq!(delivered, 1);
        // r2 went out but could not be recorded, so nothing after it is tried
        assert_eq!(*channel.published.lock().unwrap(), vec!["r1", "r2"]);
        let flags = sent_flags(&queue).await;
        assert_eq!(flags, vec![(1, true), (2, false), (3, false), (4, false)]);
    }

    #[tokio::test]
    async fn test_sent_flags_stay_a_prefix_under_any_failures() {
        let (_dir, queue) = open_temp().await;
        for i in 1..=12 {
            queue.enqueue("t", &format!("r{}", i), "ts").await.unwrap();
        }
        let engine = DeliveryEngine::new(5, DEFAULT_RETAIN_SENT);
        let channel = ScriptedChannel::failing_at(&[2, 3, 7, 8, 9, 13]);

        for _ in 0..8 {
            engine.flush(&queue, &channel).await;
            let flags = sent_flags(&queue).await;
            let first_unsent = flags.iter().position(|(_, sent)| !*sent).unwrap_or(flags.len());
            assert!(
                flags[first_unsent..].iter().all(|(_, sent)| !*sent),
                "out-of-order sent flags: {:?}",
                flags
            );
        }

        assert_eq!(queue.pending_count().await.unwrap(), 0);
        let published = channel.published.lock().unwrap().clone();
        let expected: Vec<String> = (1..=12).map(|i| format!("r{}", i)).collect();
        assert_eq!(published, expected);
    }

    #[tokio::test]
    async fn test_batch_size_bounds_each_flush() {
        let (_dir, queue) = open_temp().await;
        for i in 0..7 {
            queue.enqueue("t", &i.to_string(), "ts").await.unwrap();
        }
        let engine = DeliveryEngine::new(3, DEFAULT_RETAIN_SENT);
        let channel = ScriptedChannel::default();

        assert_eq!(engine.flush(&queue, &channel).await, 3);
        assert_eq!(engine.flush(&queue, &channel).await, 3);
        assert_eq!(engine.flush(&queue, &channel).await, 1);
        assert_eq!(engine.flush(&queue, &channel).await, 0);
    }

    #[tokio::test]
    async fn test_flush_prunes_with_empty_backlog() {
        let (_dir, queue) = open_temp().await;
        for i in 0..4 {
            let id = queue.enqueue("t", &i.to_string(), "ts").await.unwrap();
            queue.mark_sent(id).await.unwrap();
        }

        let delivered = DeliveryEngine::new(10, 2).flush(&queue, &ScriptedChannel::default()).await;

        assert_eq!(delivered, 0);
        assert_eq!(queue.stats().await.unwrap().sent, 2);
    }

    #[tokio::test]
    async fn test_flush_prunes_even_when_nothing_delivered() {
        let (_dir, queue) = open_temp().await;
        for i in 0..4 {
            let id = queue.enqueue("t", &i.to_string(), "ts").await.unwrap();
            queue.mark_sent(id).await.unwrap();
        }
        queue.enqueue("t", "stuck", "ts").await.unwrap();

        let channel = ScriptedChannel::default();
        channel.fail_all.store(true, Ordering::SeqCst);
        let delivered = DeliveryEngine::new(10, 1).flush(&queue, &channel).await;

        assert_eq!(delivered, 0);
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.pending, 1);
    }
}
