//! MQTT collaborator: rumqttc client, its event-loop task, and the channel
//! that hands inbound publishes to the bridge loop.

use std::future::Future;
use std::time::Duration;

use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;

/// Everything under the gateway namespace.
pub const SUBSCRIBE_FILTER: &str = "/#";

const REQUEST_CAPACITY: usize = 20;
const INBOUND_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Publishing seam
// ---------------------------------------------------------------------------

/// Outbound side of the bus. Implemented by `AsyncClient`; tests record.
pub trait Publisher {
    fn publish(
        &self,
        topic: String,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;
}

impl Publisher for AsyncClient {
    fn publish(
        &self,
        topic: String,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), ClientError>> + Send {
        AsyncClient::publish(self, topic, QoS::AtLeastOnce, false, payload)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPublish {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publisher plus the queue of messages the event-loop task has received.
pub struct MqttSession<P> {
    publisher: P,
    inbound: mpsc::Receiver<InboundPublish>,
}

impl<P: Publisher> MqttSession<P> {
    pub fn new(publisher: P, inbound: mpsc::Receiver<InboundPublish>) -> Self {
        Self { publisher, inbound }
    }

    pub async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), ClientError> {
        self.publisher.publish(topic, payload).await
    }

    /// Next already-received message, without waiting.
    pub fn try_next(&mut self) -> Option<InboundPublish> {
        self.inbound.try_recv().ok()
    }
}

/// Build the client and spawn its event loop. Connection happens in the
/// background; until then publishes queue inside the client.
pub fn connect(cfg: &MqttConfig) -> MqttSession<AsyncClient> {
    let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
    options.set_keep_alive(Duration::from_secs(cfg.keep_alive_sec));

    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);

    info!(host = %cfg.host, port = cfg.port, client_id = %cfg.client_id, "mqtt session starting");
    tokio::spawn(drive(client.clone(), eventloop, tx));

    MqttSession::new(client, rx)
}

// ---------------------------------------------------------------------------
// Event loop task
// ---------------------------------------------------------------------------

async fn drive(client: AsyncClient, mut eventloop: EventLoop, tx: mpsc::Sender<InboundPublish>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                if !forward(&tx, p) {
                    debug!("bridge loop gone; stopping mqtt event loop");
                    return;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                // Clean sessions drop subscriptions, so renew on every connect.
                // try_ because this task is the one that drains the request queue.
                if let Err(e) = client.try_subscribe(SUBSCRIBE_FILTER, QoS::AtLeastOnce) {
                    error!("mqtt subscribe to {SUBSCRIBE_FILTER} failed: {e}");
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Hand one publish to the bridge. Returns false once the bridge is gone.
fn forward(tx: &mpsc::Sender<InboundPublish>, p: Publish) -> bool {
    let msg = InboundPublish {
        topic: p.topic,
        payload: p.payload.to_vec(),
    };
    match tx.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(dropped)) => {
            // Delivery is best-effort; never stall the network loop.
            warn!(topic = %dropped.topic, "inbound mqtt queue full, dropping message");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
