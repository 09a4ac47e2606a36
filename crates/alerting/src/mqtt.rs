//! MQTT alert dispatcher

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{AlertDispatcher, DispatchError};
use crate::obligation::AlertObligation;

/// MQTT broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Alerts go to `{topic_prefix}/{node_id}/alerts`
    pub topic_prefix: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "methane-monitor".to_string(),
            topic_prefix: "methane".to_string(),
            keep_alive_secs: 30,
        }
    }
}

#[derive(Serialize)]
struct AlertMessage<'a> {
    event: &'static str,
    idempotency_key: String,
    alert: &'a AlertObligation,
}

/// QoS 1 publishes waiting for the broker's PUBACK
#[derive(Debug, Default)]
struct AckTracker {
    /// Handed to the client in order, packet id not yet assigned
    queued: VecDeque<oneshot::Sender<()>>,
    inflight: HashMap<u16, oneshot::Sender<()>>,
}

impl AckTracker {
    fn sent(&mut self, pkid: u16) {
        if let Some(waiter) = self.queued.pop_front() {
            self.inflight.insert(pkid, waiter);
        }
    }

    fn acked(&mut self, pkid: u16) {
        if let Some(waiter) = self.inflight.remove(&pkid) {
            let _ = waiter.send(());
        }
    }

    /// Dropping the senders fails every waiting publish
    fn fail_all(&mut self) {
        let pending = self.queued.len() + self.inflight.len();
        if pending > 0 {
            warn!("MQTT connection lost with {} unacknowledged alert(s)", pending);
        }
        self.queued.clear();
        self.inflight.clear();
    }
}

fn lock(acks: &Mutex<AckTracker>) -> MutexGuard<'_, AckTracker> {
    match acks.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Publishes alerts to an MQTT broker
///
/// A delivery succeeds only once the broker acknowledges it.
pub struct MqttDispatcher {
    config: MqttConfig,
    client: AsyncClient,
    acks: Arc<Mutex<AckTracker>>,
}

impl MqttDispatcher {
    /// Create the client and spawn its event loop
    pub fn connect(config: MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let acks = Arc::new(Mutex::new(AckTracker::default()));

        let tracker = Arc::clone(&acks);
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => lock(&tracker).sent(pkid),
                    Ok(Event::Incoming(Packet::PubAck(ack))) => lock(&tracker).acked(ack.pkid),
                    Ok(Event::Incoming(incoming)) => {
                        debug!("MQTT incoming: {:?}", incoming);
                    }
                    Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        error!("MQTT error: {}", e);
                        lock(&tracker).fail_all();
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        info!("MQTT dispatcher targeting {}:{}", config.host, config.port);
        Self {
            config,
            client,
            acks,
        }
    }

    fn topic(&self, alert: &AlertObligation) -> String {
        format!("{}/{}/alerts", self.config.topic_prefix, alert.node_id)
    }

    async fn publish(&self, event: &'static str, alert: &AlertObligation) -> Result<(), DispatchError> {
        let message = AlertMessage {
            event,
            idempotency_key: alert.idempotency_key(),
            alert,
        };
        let payload =
            serde_json::to_vec(&message).map_err(|e| DispatchError::Failed(e.to_string()))?;

        // Queue order must match the order the event loop assigns packet ids
        let acked = {
            let mut acks = lock(&self.acks);
            self.client
                .try_publish(self.topic(alert), QoS::AtLeastOnce, false, payload)
                .map_err(|e| DispatchError::Failed(e.to_string()))?;
            let (tx, rx) = oneshot::channel();
            acks.queued.push_back(tx);
            rx
        };

        acked
            .await
            .map_err(|_| DispatchError::Failed("broker connection lost before PUBACK".to_string()))
    }
}

#[async_trait]
impl AlertDispatcher for MqttDispatcher {
    async fn notify(&self, alert: &AlertObligation) -> Result<(), DispatchError> {
        self.publish("raised", alert).await
    }

    async fn resolve(&self, alert: &AlertObligation) -> Result<(), DispatchError> {
        self.publish("resolved", alert).await
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}
