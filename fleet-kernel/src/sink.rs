//! Outbound event sinks.
//!
//! The coordinator publishes fleet events through `EventSink`. Publishing is
//! synchronous and non-blocking: the MQTT sink hands the payload to the
//! rumqttc request queue and a background task drives the connection.

use crate::config::MqttConf;
use crate::error::{FleetError, Result};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub trait EventSink: Send + Sync {
    fn publish(&self, topic: &str, payload: &Value) -> Result<()>;

    fn is_connected(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

/// Publishes to an MQTT broker
pub struct MqttEventSink {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttEventSink {
    /// Creates the client and spawns the event loop; needs a tokio runtime
    pub fn connect(conf: &MqttConf) -> Self {
        let mut opts = MqttOptions::new(conf.client_id.clone(), conf.host.clone(), conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 64);
        let connected = Arc::new(AtomicBool::new(false));

        let flag = connected.clone();
        let endpoint = format!("{}:{}", conf.host, conf.port);
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        flag.store(true, Ordering::Relaxed);
                        info!("mqtt connected to {}", endpoint);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if flag.swap(false, Ordering::Relaxed) {
                            warn!("mqtt connection lost: {:?}", e);
                        } else {
                            debug!("mqtt still unreachable: {:?}", e);
                        }
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        Self { client, connected }
    }
}

impl EventSink for MqttEventSink {
    fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(payload)?;
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, bytes)
            .map_err(|e| FleetError::Sink(format!("publish on {topic} failed: {e}")))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

/// Standalone mode: events only go to the log
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        info!(topic, "event {}", payload);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishedEvent {
    pub topic: String,
    pub payload: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
}

/// Keeps every published event in memory
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PublishedEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().clone()
    }

    pub fn by_topic(&self, topic: &str) -> Vec<PublishedEvent> {
        self.events.lock().iter().filter(|e| e.topic == topic).cloned().collect()
    }

    pub fn last(&self, topic: &str) -> Option<Value> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|e| e.topic == topic)
            .map(|e| e.payload.clone())
    }

    pub fn count(&self, topic: &str) -> usize {
        self.events.lock().iter().filter(|e| e.topic == topic).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        self.events.lock().push(PublishedEvent {
            topic: topic.to_string(),
            payload: payload.clone(),
            published_at: OffsetDateTime::now_utc(),
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
