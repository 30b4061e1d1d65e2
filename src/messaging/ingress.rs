use log::{error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::MqttConfig;
use crate::engine::EngineMsg;
use crate::messaging::frame::EventEnvelope;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Build the MQTT session. The last-will marks the processor offline if the
/// connection drops without a clean shutdown.
pub fn connect(config: &MqttConfig) -> (AsyncClient, EventLoop) {
    let client_id = format!("frigate-event-processor-{}", std::process::id());
    let mut options = MqttOptions::new(client_id, &config.host, config.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_last_will(LastWill::new(
        config.status_topic(),
        "offline",
        QoS::AtLeastOnce,
        true,
    ));
    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.clone().unwrap_or_default());
    }

    AsyncClient::new(options, 64)
}

/// Drive the MQTT event loop: subscribe on (re)connect, decode event
/// messages and feed them to the engine, back off on connection errors.
/// Malformed messages are logged and dropped.
pub async fn run_ingress(
    client: AsyncClient,
    mut eventloop: EventLoop,
    config: MqttConfig,
    tx: mpsc::Sender<EngineMsg>,
) {
    let mut backoff = Duration::from_secs(1);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                backoff = Duration::from_secs(1);
                info!("MQTT session connected to {}:{}", config.host, config.port);

                if let Err(e) = client
                    .subscribe(&config.listen_topic, QoS::AtLeastOnce)
                    .await
                {
                    error!("Failed to subscribe to {}: {}", config.listen_topic, e);
                    continue;
                }
                info!("Subscribed to {}", config.listen_topic);

                if let Err(e) = client
                    .publish(config.status_topic(), QoS::AtLeastOnce, true, "online")
                    .await
                {
                    warn!("Failed to announce online status: {}", e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match EventEnvelope::decode(&publish.payload) {
                    Ok(envelope) => {
                        if tx.send(EngineMsg::Frame(envelope)).await.is_err() {
                            info!("Engine stopped; ingress exiting");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Dropping malformed message on {}: {}", publish.topic, e);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error: {}; retrying in {:?}", e, backoff);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
            }
        }
    }
}

/// Publish the retained "offline" marker during clean shutdown
pub async fn announce_offline(client: &AsyncClient, config: &MqttConfig) {
    if let Err(e) = client
        .publish(config.status_topic(), QoS::AtLeastOnce, true, "offline")
        .await
    {
        warn!("Failed to announce offline status: {}", e);
    }
}
