use async_trait::async_trait;
use log::{debug, error, info, warn};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::settings::MqttConfig;
use crate::utils::error::{ConnectError, PublishError};

/// A live broker session. Publishing never retries; callers own the policy.
#[async_trait]
pub trait PublishChannel: Send + Sync {
    /// QoS 1 publish that returns once the broker acknowledged it.
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError>;

    /// False once the session is lost. A lost session is never revived.
    fn is_connected(&self) -> bool;

    /// Idempotent.
    async fn close(&mut self);
}

/// Opens new sessions. Every reconnect is an explicit `connect` call.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn PublishChannel>, ConnectError>;
}

type AckSender = oneshot::Sender<Result<(), PublishError>>;

/// Pairs the single in-flight publish with its packet id and PUBACK.
///
/// Once failed, the tracker is closed for good: a late packet id or PUBACK
/// from an abandoned publish can never resolve a later one.
#[derive(Default)]
struct AckTracker {
    waiter: Option<AckSender>,
    pkid: Option<u16>,
    closed: bool,
}

impl AckTracker {
    fn begin(&mut self, waiter: AckSender) {
        if self.closed {
            let _ = waiter.send(Err(PublishError::AckDropped("session abandoned".to_string())));
            return;
        }
        if let Some(stale) = self.waiter.replace(waiter) {
            let _ = stale.send(Err(PublishError::AckDropped("superseded".to_string())));
        }
        self.pkid = None;
    }

    fn assigned(&mut self, pkid: u16) {
        if !self.closed && self.waiter.is_some() && self.pkid.is_none() {
            self.pkid = Some(pkid);
        }
    }

    fn acked(&mut self, pkid: u16) -> bool {
        if !self.closed && self.pkid == Some(pkid) {
            self.pkid = None;
            if let Some(waiter) = self.waiter.take() {
                return waiter.send(Ok(())).is_ok();
            }
        }
        false
    }

    fn fail(&mut self, reason: &str) {
        self.closed = true;
        self.pkid = None;
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(Err(PublishError::AckDropped(reason.to_string())));
        }
    }
}

pub struct MqttChannel {
    client: Option<AsyncClient>,
    network_loop: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
    acks: Arc<Mutex<AckTracker>>,
    ack_timeout_secs: u64,
    broker: String,
}

impl MqttChannel {
    pub fn options(config: &MqttConfig) -> Result<MqttOptions, ConnectError> {
        let mut options = MqttOptions::new(config.effective_client_id(), &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_clean_session(true);

        if !config.username.is_empty() {
            options.set_credentials(&config.username, &config.password);
        }

        // Certificate validation is always on; there is no plaintext or insecure mode.
        let transport = match &config.ca_file {
            Some(path) => {
                let ca = std::fs::read(path).map_err(|e| ConnectError::TlsMaterial {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                Transport::tls(ca, None, None)
            }
            None => Transport::tls_with_default_config(),
        };
        options.set_transport(transport);
        Ok(options)
    }

    pub async fn connect(config: &MqttConfig) -> Result<Self, ConnectError> {
        let broker = format!("{}:{}", config.host, config.port);
        info!("🔌 Connecting to MQTT broker {}", broker);

        let options = Self::options(config)?;
        let (client, mut eventloop) = AsyncClient::new(options, 10);

        let wait = Duration::from_secs(config.connect_timeout_secs);
        match timeout(wait, Self::await_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(ConnectError::Timeout(config.connect_timeout_secs)),
        }

        info!("✅ MQTT connected to {}", broker);
        Ok(Self::start(client, eventloop, config.ack_timeout_secs, broker))
    }

    /// Wraps a session and spawns its network loop.
    fn start(client: AsyncClient, eventloop: EventLoop, ack_timeout_secs: u64, broker: String) -> Self {
        let connected = Arc::new(AtomicBool::new(true));
        let acks = Arc::new(Mutex::new(AckTracker::default()));
        let network_loop = tokio::spawn(Self::run_network_loop(
            eventloop,
            Arc::clone(&connected),
            Arc::clone(&acks),
        ));

        Self {
            client: Some(client),
            network_loop: Some(network_loop),
            connected,
            acks,
            ack_timeout_secs,
            broker,
        }
    }

    /// Gives up on the session after a publish went unanswered. Its packet ids
    /// can no longer be trusted, so the caller has to reconnect.
    fn abandon(&self, reason: &str) {
        warn!("Abandoning MQTT session to {}: {}", self.broker, reason);
        self.connected.store(false, Ordering::SeqCst);
        if let Ok(mut tracker) = self.acks.lock() {
            tracker.fail(reason);
        }
        if let Some(handle) = &self.network_loop {
            handle.abort();
        }
    }

    async fn await_connack(eventloop: &mut EventLoop) -> Result<(), ConnectError> {
        loop {
            match eventloop.poll().await? {
                Event::Incoming(Packet::ConnAck(ack)) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(ConnectError::Refused(format!("{:?}", ack.code)))
                    };
                }
                other => debug!("MQTT event before CONNACK: {:?}", other),
            }
        }
    }

    /// Runs until the first connection error. Touches only session state and acks.
    async fn run_network_loop(
        mut eventloop: EventLoop,
        connected: Arc<AtomicBool>,
        acks: Arc<Mutex<AckTracker>>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    if let Ok(mut tracker) = acks.lock() {
                        tracker.assigned(pkid);
                    }
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    let matched = acks.lock().map(|mut t| t.acked(ack.pkid)).unwrap_or(false);
                    if !matched {
                        debug!("Unmatched PUBACK pkid={}", ack.pkid);
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("MQTT disconnect sent");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT connection lost: {}", e);
                    break;
                }
            }
        }

        connected.store(false, Ordering::SeqCst);
        if let Ok(mut tracker) = acks.lock() {
            tracker.fail("connection closed");
        }
    }
}

#[async_trait]
impl PublishChannel for MqttChannel {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let client = self.client.as_ref().ok_or(PublishError::NotConnected)?;
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        self.acks
            .lock()
            .map_err(|_| PublishError::AckDropped("ack tracker poisoned".to_string()))?
            .begin(tx);

        if let Err(e) = client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .await
        {
            self.abandon("publish request rejected");
            return Err(PublishError::Client(e));
        }

        match timeout(Duration::from_secs(self.ack_timeout_secs), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PublishError::AckDropped("network loop stopped".to_string())),
            Err(_) => {
                self.abandon("PUBACK timeout");
                Err(PublishError::AckTimeout(self.ack_timeout_secs))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        if self.is_connected() {
            if let Err(e) = client.disconnect().await {
                warn!("Error while closing MQTT: {}", e);
            }
        }

        if let Some(mut handle) = self.network_loop.take() {
            if timeout(Duration::from_secs(2), &mut handle).await.is_err() {
                handle.abort();
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        info!("🔒 MQTT client for {} disconnected", self.broker);
    }
}

/// Connects with the configured broker settings.
pub struct MqttConnector {
    config: MqttConfig,
}

impl MqttConnector {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ChannelConnector for MqttConnector {
    async fn connect(&self) -> Result<Box<dyn PublishChannel>, ConnectError> {
        let channel = MqttChannel::connect(&self.config).await?;
        Ok(Box::new(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MqttConfig {
        MqttConfig {
            host: "broker.example.com".to_string(),
            port: 8883,
            username: String::new(),
            password: String::new(),
            topic: "site/spm1".to_string(),
            client_id: String::new(),
            ca_file: None,
            keep_alive_secs: 60,
            connect_timeout_secs: 1,
            ack_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_ack_resolves_only_matching_packet() {
        let mut tracker = AckTracker::default();
        let (tx, rx) = oneshot::channel();
        tracker.begin(tx);
        tracker.assigned(7);
        // a later outgoing id must not overwrite the in-flight one
        tracker.assigned(8);

        assert!(!tracker.acked(8));
        assert!(tracker.acked(7));
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_failing_tracker_reports_dropped_ack() {
        let mut tracker = AckTracker::default();
        let (tx, rx) = oneshot::channel();
        tracker.begin(tx);
        tracker.assigned(1);
        tracker.fail("connection closed");

        assert!(matches!(rx.await.unwrap(), Err(PublishError::AckDropped(_))));
        assert!(!tracker.acked(1));
    }

    #[test]
    fn test_missing_ca_file_is_a_connect_error() {
        let mut config = config();
        config.ca_file = Some("/nonexistent/ca.pem".to_string());
        assert!(matches!(
            MqttChannel::options(&config),
            Err(ConnectError::TlsMaterial { .. })
        ));
    }

    #[test]
    fn test_credentials_only_when_username_set() {
        let mut config = config();
        let mut with_ca = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut with_ca, b"-----BEGIN CERTIFICATE-----\n").unwrap();
        config.ca_file = Some(with_ca.path().display().to_string());

        let anonymous = MqttChannel::options(&config).unwrap();
        assert!(anonymous.credentials().is_none());

        config.username = "meter".to_string();
        config.password = "secret".to_string();
        let authenticated = MqttChannel::options(&config).unwrap();
        assert_eq!(
            authenticated.credentials(),
            Some(("meter".to_string(), "secret".to_string()))
        );
        assert_eq!(authenticated.keep_alive(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_to_connect() {
        let mut config = config();
        config.host = "127.0.0.1".to_string();
        config.port = 1;
        let mut with_ca = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut with_ca, b"-----BEGIN CERTIFICATE-----\n").unwrap();
        config.ca_file = Some(with_ca.path().display().to_string());

        assert!(MqttConnector::new(config).connect().await.is_err());
    }

    #[tokio::test]
    async fn test_stale_ack_cannot_resolve_next_publish() {
        let mut tracker = AckTracker::default();
        let (tx1, _rx1) = oneshot::channel();
        tracker.begin(tx1);
        tracker.fail("PUBACK timeout");

        let (tx2, rx2) = oneshot::channel();
        tracker.begin(tx2);
        // late events from the abandoned publish
        tracker.assigned(41);
        assert!(!tracker.acked(41));
        assert!(matches!(rx2.await.unwrap(), Err(PublishError::AckDropped(_))));
    }

    fn plain_session(port: u16, ack_timeout_secs: u64) -> MqttChannel {
        let options = MqttOptions::new("spm-bridge-test", "127.0.0.1", port);
        let (client, eventloop) = AsyncClient::new(options, 10);
        MqttChannel::start(client, eventloop, ack_timeout_secs, format!("127.0.0.1:{}", port))
    }

    async fn wait_disconnected(channel: &MqttChannel) {
        for _ in 0..100 {
            if !channel.is_connected() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("channel still reports connected");
    }

    #[tokio::test]
    async fn test_network_loop_end_marks_channel_disconnected() {
        let mut channel = plain_session(1, 1);

        wait_disconnected(&channel).await;
        assert!(matches!(
            channel.publish("t", "p").await,
            Err(PublishError::NotConnected)
        ));

        channel.close().await;
        channel.close().await;
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn test_ack_timeout_abandons_session() {
        // accepts TCP but never answers CONNECT
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut channel = plain_session(port, 1);

        assert!(matches!(
            channel.publish("t", "first").await,
            Err(PublishError::AckTimeout(1))
        ));
        assert!(!channel.is_connected());
        assert!(matches!(
            channel.publish("t", "second").await,
            Err(PublishError::NotConnected)
        ));

        channel.close().await;
        drop(listener);
    }
}
