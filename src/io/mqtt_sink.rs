//! MQTT sink for measurement batches
//!
//! One message per field group, published to `<device_id>/<topic>` with
//! QoS 1 and no retain. The payload is the group's line-protocol line.
//! A delivery succeeds once the broker has acknowledged every message.
//!
//! The event loop numbers outgoing publishes in request order and reports
//! the number of each acknowledged one, so a delivery only counts
//! acknowledgements for its own messages.

use crate::domain::measurement::MeasurementBatch;
use crate::infra::config::MqttConfig;
use crate::io::line_protocol::encode_group;
use crate::io::sink::{Sink, SinkError, SinkKind};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upper bound on flushing DISCONNECT when the sink closes
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// A single publish request
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

/// Pair topics with field groups positionally
pub fn broker_messages(
    batch: &MeasurementBatch,
    topics: &[String],
    device_id: &str,
) -> Result<Vec<BrokerMessage>, SinkError> {
    if topics.len() != batch.groups.len() {
        return Err(SinkError::TopicMismatch { topics: topics.len(), groups: batch.groups.len() });
    }

    Ok(batch
        .groups
        .iter()
        .zip(topics)
        .map(|(group, topic)| BrokerMessage {
            topic: format!("{}/{}", device_id, topic),
            payload: encode_group(group, &batch.tags, batch.timestamp_ns),
            qos: QoS::AtLeastOnce,
            retain: false,
        })
        .collect())
}

fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let client_id = config
        .client_id
        .clone()
        .unwrap_or_else(|| format!("bnoflux-{}", std::process::id()));
    let mut options = MqttOptions::new(client_id, config.broker.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    options.set_clean_session(true);

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username.clone(), password.clone());
    }
    options
}

/// Drive the connection until DISCONNECT has been flushed.
///
/// Publishes are numbered in the order they leave the client. A
/// retransmission keeps the number its packet id was first given.
async fn drive_connection(
    mut eventloop: EventLoop,
    acks: mpsc::UnboundedSender<u64>,
    broker: String,
) {
    let mut inflight: HashMap<u16, u64> = HashMap::new();
    let mut sent: u64 = 0;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(broker = %broker, "mqtt_connected");
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                inflight.entry(pkid).or_insert_with(|| {
                    sent += 1;
                    sent - 1
                });
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                let Some(seq) = inflight.remove(&ack.pkid) else {
                    debug!(pkid = %ack.pkid, "mqtt_unexpected_puback");
                    continue;
                };
                if acks.send(seq).is_err() {
                    return;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!(broker = %broker, "mqtt_disconnected");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!(broker = %broker, "mqtt_disconnect_sent");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(broker = %broker, error = %e, "mqtt_error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

pub struct MqttSink {
    client: AsyncClient,
    acks: mpsc::UnboundedReceiver<u64>,
    eventloop: JoinHandle<()>,
    /// Number the next publish will be given by the event loop
    next_seq: u64,
    device_id: String,
    topics: Vec<String>,
}

impl MqttSink {
    /// Create the client and start driving its connection.
    ///
    /// The connection is established in the background; publishes made
    /// before it is up are queued by the client.
    pub fn connect(config: &MqttConfig, device_id: &str, topics: &[String]) -> Self {
        let (client, eventloop) = AsyncClient::new(mqtt_options(config), 100);
        let (ack_tx, acks) = mpsc::unbounded_channel();
        let broker = format!("{}:{}", config.broker, config.port);
        let eventloop = tokio::spawn(drive_connection(eventloop, ack_tx, broker));

        Self {
            client,
            acks,
            eventloop,
            next_seq: 0,
            device_id: device_id.to_string(),
            topics: topics.to_vec(),
        }
    }
}

#[async_trait]
impl Sink for MqttSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Broker
    }

    async fn deliver(&mut self, batch: &MeasurementBatch) -> Result<(), SinkError> {
        let messages = broker_messages(batch, &self.topics, &self.device_id)?;

        let first = self.next_seq;
        for msg in &messages {
            self.client
                .publish(msg.topic.as_str(), msg.qos, msg.retain, msg.payload.clone())
                .await?;
            self.next_seq += 1;
        }

        // Acks below `first` belong to deliveries that already gave up
        let expected = messages.len();
        let mut acked = 0;
        while acked < expected {
            match self.acks.recv().await {
                Some(seq) if seq >= first => acked += 1,
                Some(seq) => debug!(seq = %seq, "mqtt_late_puback"),
                None => return Err(SinkError::AckChannelClosed { acked, expected }),
            }
        }

        debug!(messages = %expected, "mqtt_batch_acked");
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "mqtt_disconnect_failed");
        }
        if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut self.eventloop).await.is_err() {
            warn!("mqtt_disconnect_timeout");
            self.eventloop.abort();
        }
        info!("mqtt_closed");
    }
}
