use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tracing::{debug, info, warn};

use crate::config::MqttSettings;
use crate::publisher::{MessageBus, PublishError};

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error("broker refused the connection: {0:?}")]
    Refused(ConnectReturnCode),
    #[error("connection to broker failed: {0}")]
    Connection(String),
    #[error("no answer from broker within {0:?}")]
    Timeout(Duration),
}

/// MQTT client used by the poll loop. Every publish is retained.
///
/// The `rumqttc` event loop runs on its own task; it keeps reconnecting after
/// a broker outage and maintains the `connected` flag that publishes check.
pub struct MqttBus {
    client: AsyncClient,
    qos: QoS,
    connected: Arc<AtomicBool>,
    publish_timeout: Duration,
}

impl MqttBus {
    /// Connects and waits for the broker's CONNACK before handing back the bus.
    pub async fn connect(settings: &MqttSettings) -> Result<Self, ConnectError> {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        if let Some(username) = &settings.username {
            options.set_credentials(username, settings.password.clone().unwrap_or_default());
        }
        options.set_keep_alive(KEEP_ALIVE);

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        tokio::time::timeout(settings.connect_timeout, wait_for_connack(&mut event_loop))
            .await
            .map_err(|_| ConnectError::Timeout(settings.connect_timeout))??;
        info!(host = %settings.host, port = settings.port, "connected to MQTT broker");

        let connected = Arc::new(AtomicBool::new(true));
        tokio::spawn(drive_event_loop(event_loop, connected.clone()));

        Ok(Self {
            client,
            qos: qos_from_level(settings.qos),
            connected,
            publish_timeout: settings.publish_timeout,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish_retained(&self, topic: &str, payload: String) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }

        let publish = self
            .client
            .publish(topic, self.qos, true, payload.into_bytes());
        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PublishError::Send {
                topic: topic.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(PublishError::Timeout {
                topic: topic.to_string(),
            }),
        }
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), ConnectError> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(ConnectError::Refused(code)),
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(ConnectError::Connection(e.to_string())),
        }
    }
}

async fn drive_event_loop(mut event_loop: EventLoop, connected: Arc<AtomicBool>) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let success = ack.code == ConnectReturnCode::Success;
                if success {
                    info!("reconnected to MQTT broker");
                } else {
                    warn!(code = ?ack.code, "broker refused reconnect");
                }
                connected.store(success, Ordering::Relaxed);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("broker sent disconnect");
                connected.store(false, Ordering::Relaxed);
            }
            Ok(event) => debug!(?event, "MQTT event"),
            Err(e) => {
                if connected.swap(false, Ordering::Relaxed) {
                    warn!(error = %e, "MQTT connection lost");
                } else {
                    debug!(error = %e, "MQTT reconnect failed");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}
