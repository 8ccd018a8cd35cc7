use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use casement_core::bus::{Bus, Message, MessageStream, filtered};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Broker-side filter covering every topic the hub exchanges with devices.
pub const MQTT_SUBSCRIPTION: &str = "casement/#";

/// Bus over an MQTT broker. Hub topics are dotted (`casement.device.report.w1`);
/// on the broker the same topics use `/` separators.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    tx: Arc<broadcast::Sender<Message>>,
}

impl MqttBus {
    pub async fn connect(host: &str, port: u16, client_id: &str) -> Result<Self> {
        let mut opts = MqttOptions::new(client_id, host, port);
        opts.set_keep_alive(Duration::from_secs(5));
        opts.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(opts, 64);
        client.subscribe(MQTT_SUBSCRIPTION, QoS::AtLeastOnce).await?;

        let (tx, _rx) = broadcast::channel(1024);
        let tx = Arc::new(tx);
        let forwarder_tx = Arc::clone(&tx);
        let resubscriber = client.clone();

        tokio::spawn(async move {
            let mut connected_once = false;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::Publish(p))) => {
                        let topic = from_mqtt_topic(&p.topic);
                        let _ = forwarder_tx.send(Message::new(topic, p.payload));
                    }
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        // Clean sessions drop broker-side subscriptions on reconnect.
                        if connected_once {
                            if let Err(e) =
                                resubscriber.try_subscribe(MQTT_SUBSCRIPTION, QoS::AtLeastOnce)
                            {
                                tracing::warn!("mqtt resubscribe failed: {e}");
                            }
                        }
                        connected_once = true;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("mqtt event loop error: {e}");
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                }
            }
        });

        Ok(Self { client, tx })
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(to_mqtt_topic(topic), QoS::AtLeastOnce, false, payload)
            .await
            .context("publish mqtt message")?;
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<MessageStream> {
        Ok(filtered(BroadcastStream::new(self.tx.subscribe()), pattern))
    }
}

pub fn to_mqtt_topic(topic: &str) -> String {
    topic.replace('.', "/")
}

pub fn from_mqtt_topic(topic: &str) -> String {
    topic.replace('/', ".")
}
