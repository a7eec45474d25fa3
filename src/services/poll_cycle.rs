use log::{debug, error, info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::Config;
use crate::devices::{DeviceReader, RegisterCatalogue};
use crate::output::payload::{now_string, PayloadCodec};
use crate::output::publisher::{ChannelConnector, PublishChannel};
use crate::services::delivery::DeliveryEngine;
use crate::storage::MessageQueue;

/// Per-cycle inputs that come straight from configuration.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub place: String,
    pub device_ids: Vec<u8>,
    pub topic: String,
    pub interval: Duration,
}

impl PollSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            place: config.place.place.clone(),
            device_ids: config.place.device_ids.clone(),
            topic: config.mqtt.topic.clone(),
            // validated finite and non-negative
            interval: Duration::from_secs_f64(config.poll.sleep_time_secs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub devices: usize,
    pub enqueued: usize,
    pub enqueue_failures: usize,
    pub published_immediately: usize,
    pub flushed: usize,
}

/// Read every device, persist each reading, then drain the backlog.
///
/// A reading is committed to the queue before any publish is attempted,
/// and records are only ever delivered in ascending id order.
pub struct PollCycle {
    settings: PollSettings,
    catalogue: RegisterCatalogue,
    reader: DeviceReader,
    queue: MessageQueue,
    connector: Box<dyn ChannelConnector>,
    channel: Option<Box<dyn PublishChannel>>,
    delivery: DeliveryEngine,
}

impl PollCycle {
    pub fn new(
        settings: PollSettings,
        catalogue: RegisterCatalogue,
        reader: DeviceReader,
        queue: MessageQueue,
        connector: Box<dyn ChannelConnector>,
        delivery: DeliveryEngine,
    ) -> Self {
        Self {
            settings,
            catalogue,
            reader,
            queue,
            connector,
            channel: None,
            delivery,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.channel.as_ref().map_or(false, |c| c.is_connected())
    }

    async fn reconnect(&mut self) {
        match self.connector.connect().await {
            Ok(channel) => self.channel = Some(channel),
            Err(e) => {
                error!("MQTT connect failed: {}", e);
                self.channel = None;
            }
        }
    }

    /// A lost session is closed and forgotten; the next cycle opens a new one.
    async fn drop_channel_if_lost(&mut self) {
        if self.channel.as_ref().map_or(false, |c| !c.is_connected()) {
            if let Some(mut channel) = self.channel.take() {
                channel.close().await;
            }
            warn!("MQTT connection lost, will reconnect on next reading");
        }
    }

    /// Publishes a freshly queued record right away, but only when nothing
    /// older is still waiting. Otherwise the flush delivers it in turn.
    async fn publish_now(&mut self, id: i64, payload: &str) -> bool {
        let Some(channel) = self.channel.as_ref() else {
            warn!("MQTT not connected, data will stay in local queue.");
            return false;
        };

        match self.queue.pending(1).await {
            Ok(oldest) if oldest.first().map(|r| r.id) == Some(id) => {}
            Ok(_) => {
                debug!("Backlog ahead of id={}, leaving it to the flush", id);
                return false;
            }
            Err(e) => {
                error!("Read DB queue failed: {}", e);
                return false;
            }
        }

        let result = channel.publish(&self.settings.topic, payload).await;
        match result {
            Ok(()) => {
                if let Err(e) = self.queue.mark_sent(id).await {
                    error!("Mark sent failed (id={}): {}", id, e);
                    return false;
                }
                true
            }
            Err(e) => {
                warn!("MQTT publish error: {}", e);
                self.drop_channel_if_lost().await;
                false
            }
        }
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        let device_ids = self.settings.device_ids.clone();
        let mut report = CycleReport {
            devices: device_ids.len(),
            ..CycleReport::default()
        };
        info!("Processing {} devices: {:?}", device_ids.len(), device_ids);

        for device_id in device_ids {
            let (reading, any_valid) = self.reader.read(device_id, &self.catalogue).await;
            if any_valid {
                info!("📊 Dev {}: {}", device_id, reading);
            }

            let payload = PayloadCodec::encode(&reading, &self.settings.place, device_id);
            info!("[Topic] {} | [Payload] {}", self.settings.topic, payload);

            let queued = match self
                .queue
                .enqueue(&self.settings.topic, &payload, &now_string())
                .await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    error!("Enqueue to DB failed (dev {}): {}", device_id, e);
                    report.enqueue_failures += 1;
                    None
                }
            };

            // a session that died while idle must not hold up this reading
            self.drop_channel_if_lost().await;
            if self.channel.is_none() {
                warn!("MQTT client is None, try reconnect...");
                self.reconnect().await;
            }

            if let Some(id) = queued {
                report.enqueued += 1;
                if self.publish_now(id, &payload).await {
                    report.published_immediately += 1;
                }
            }
        }

        match self.channel.as_deref() {
            Some(channel) => {
                report.flushed = self.delivery.flush(&self.queue, channel).await;
            }
            None => warn!("MQTT not connected, skip flushing DB queue"),
        }

        if report.flushed == 0 {
            if let Ok(stats) = self.queue.stats().await {
                if stats.pending > 0 {
                    warn!(
                        "{} records waiting in local queue (oldest id={:?}, newest id={:?})",
                        stats.pending, stats.oldest_pending_id, stats.max_id
                    );
                }
            }
        }
        self.drop_channel_if_lost().await;

        report
    }

    async fn cycle_and_sleep(&mut self) {
        let report = self.run_cycle().await;
        debug!("Cycle report: {:?}", report);
        info!(
            "Cycle completed, sleeping for {} seconds...",
            self.settings.interval.as_secs_f64()
        );
        sleep(self.settings.interval).await;
    }

    /// Runs cycles until `shutdown` resolves, then releases the channel and queue.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "🚀 Polling {} device(s) at '{}' every {:?}",
            self.settings.device_ids.len(),
            self.settings.place,
            self.settings.interval
        );

        match self.queue.pending_count().await {
            Ok(pending) if pending > 0 => info!("📦 {} records pending from earlier runs", pending),
            Ok(_) => {}
            Err(e) => error!("Read DB queue failed: {}", e),
        }

        let mut stopping = tokio::select! {
            biased;
            _ = &mut shutdown => true,
            _ = self.reconnect() => false,
        };

        while !stopping {
            stopping = tokio::select! {
                biased;
                _ = &mut shutdown => true,
                _ = self.cycle_and_sleep() => false,
            };
        }

        info!("🛑 Stopping...");
        self.shutdown().await;
    }

    pub async fn shutdown(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        self.queue.close().await;
    }
}
