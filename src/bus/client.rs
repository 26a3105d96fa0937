//! Bus connection lifecycle
//!
//! Owns the MQTT session: connect, retained `online` status, the
//! subscribe-once / resubscribe-on-reconnect bookkeeping, inbound dispatch
//! and the outbound publish queue. Reconnection is retried no more often
//! than the configured backoff interval; connection failures are logged,
//! never fatal.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;

use crate::bus::dispatcher::Dispatcher;
use crate::config::BrokerConfig;

pub(crate) struct Outbound {
    pub(crate) topic: String,
    pub(crate) payload: Vec<u8>,
    pub(crate) retain: bool,
}

/// Cloneable publish capability handed to handlers and tasks.
///
/// Publishing enqueues onto the bus loop's outbound queue and never blocks;
/// it returns false when the loop is gone.
#[derive(Clone)]
pub struct BusHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl BusHandle {
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        self.send(topic, payload.into(), false)
    }

    pub fn publish_retained(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        self.send(topic, payload.into(), true)
    }

    fn send(&self, topic: &str, payload: Vec<u8>, retain: bool) -> bool {
        let accepted = self
            .tx
            .send(Outbound {
                topic: topic.to_string(),
                payload,
                retain,
            })
            .is_ok();

        if !accepted {
            tracing::warn!("Cannot publish to '{}': bus loop is gone", topic);
        }
        accepted
    }

    /// A handle wired to nothing; published messages are dropped.
    /// Useful for tests and for running subsystems without a broker.
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Handle plus the receiving end of its queue, for observing publishes
    #[cfg(test)]
    pub(crate) fn test_pair() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// The bus loop: one MQTT connection plus the dispatch table
pub struct BusClient {
    options: MqttOptions,
    dispatcher: Dispatcher,
    handle: BusHandle,
    out_rx: Option<mpsc::UnboundedReceiver<Outbound>>,
    status_topic: String,
    reconnect_interval: Duration,
    first_connection: bool,
    subscribed: Vec<String>,
}

impl BusClient {
    pub fn new(config: &BrokerConfig, dispatcher: Dispatcher) -> (Self, BusHandle) {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = BusHandle { tx };

        let client = Self {
            options,
            dispatcher,
            handle: handle.clone(),
            out_rx: Some(rx),
            status_topic: config.status_topic.clone(),
            reconnect_interval: Duration::from_secs(config.reconnect_secs),
            first_connection: true,
            subscribed: Vec::new(),
        };

        (client, handle)
    }

    /// Drive the connection forever. Never returns; every failure path is
    /// logged and retried.
    pub async fn run(mut self) {
        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), 32);

        // Outbound queue drains on its own task so a slow publish can never
        // stall the event loop that services it
        if let Some(mut out_rx) = self.out_rx.take() {
            let out_client = client.clone();
            tokio::spawn(async move {
                while let Some(out) = out_rx.recv().await {
                    let Outbound {
                        topic,
                        payload,
                        retain,
                    } = out;
                    if let Err(e) = out_client
                        .publish(topic.clone(), QoS::AtLeastOnce, retain, payload)
                        .await
                    {
                        tracing::warn!("Publish to '{}' failed: {}", topic, e);
                    }
                }
            });
        }

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.on_connected(&client).await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.dispatcher
                        .dispatch(&self.handle, &publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        "Bus connection error: {} (retrying in {:?})",
                        e,
                        self.reconnect_interval
                    );
                    tokio::time::sleep(self.reconnect_interval).await;
                }
            }
        }
    }

    async fn on_connected(&mut self, client: &AsyncClient) {
        tracing::info!("Connected to bus broker");

        if !self.status_topic.is_empty() {
            if let Err(e) = client
                .publish(self.status_topic.clone(), QoS::AtLeastOnce, true, "online")
                .await
            {
                tracing::warn!("Status publish failed: {}", e);
            }
        }

        if self.first_connection {
            // Subscribe to every registered handler pattern once
            for pattern in self.dispatcher.patterns() {
                match client.subscribe(pattern.clone(), QoS::AtLeastOnce).await {
                    Ok(()) => {
                        if !self.subscribed.contains(&pattern) {
                            self.subscribed.push(pattern);
                        }
                    }
                    Err(e) => tracing::warn!("Subscribe to '{}' failed: {}", pattern, e),
                }
            }
            self.first_connection = false;
        } else {
            // Only what was actually subscribed before, not the full table
            tracing::info!(
                "Resubscribing to {} topics after reconnection",
                self.subscribed.len()
            );
            for pattern in &self.subscribed {
                if let Err(e) = client.subscribe(pattern.clone(), QoS::AtLeastOnce).await {
                    tracing::warn!("Resubscribe to '{}' failed: {}", pattern, e);
                }
            }
        }
    }
}
