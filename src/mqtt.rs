use std::time::Duration;

use log::{debug, error, info};
use rumqttc::{MqttOptions, QoS, SubscribeFilter};
use serde_derive::Serialize;
use tokio::sync::broadcast;

use crate::config;
use crate::messages::{Announcement, Command};

/// MQTT presenter for the curtain. This layer owns the presentation frame:
/// HomeKit-style open percentages on the wire, device-native positions
/// (100 = closed) everywhere behind it.
#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    device_topic: String,
}

#[derive(Debug, Serialize)]
struct PositionMessage {
    /// Open percentage, already inverted from the device frame.
    position: u8,
}

#[derive(Debug, Serialize)]
struct StateMessage {
    state: &'static str,
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig, device_name: &str) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .as_ref()
            .unwrap_or(&"curtain-rs".to_string())
            .to_string();

        let mut mqttoptions = MqttOptions::new(
            publisher_id,
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        let topic_path = config.topic_path.clone().unwrap_or("curtain".to_string());

        (
            MqttClient {
                client,
                device_topic: format!("{}/{}", topic_path, sanitize_name(device_name)),
            },
            eventloop,
        )
    }

    pub async fn subscribe(&self) -> Result<(), rumqttc::ClientError> {
        self.client
            .subscribe_many(vec![
                SubscribeFilter::new(format!("{}/set", self.device_topic), QoS::AtMostOnce),
                SubscribeFilter::new(format!("{}/stop", self.device_topic), QoS::AtMostOnce),
            ])
            .await?;

        Ok(())
    }

    /// Polls the MQTT connection and forwards curtain commands to the
    /// manager. Invalid payloads are rejected here, before the core.
    pub async fn command_loop(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        tx: broadcast::Sender<Command>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(notification) => match notification {
                    rumqttc::Event::Incoming(rumqttc::Packet::Publish(p)) => {
                        debug!("Received MQTT message on topic {}: {:?}", p.topic, p.payload);

                        let command = match p.topic {
                            t if t.ends_with("/set") => match parse_set_target(&p.payload) {
                                Some(command) => command,
                                None => {
                                    error!("Ignoring invalid target payload: {:?}", p.payload);
                                    continue;
                                }
                            },
                            _ => Command::Stop,
                        };

                        if let Err(err) = tx.send(command) {
                            error!("Error forwarding command: {:?}", err);
                        }
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::SubAck(_)) => {
                        debug!("Subscription acknowledged");
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                        debug!("Connection acknowledged");
                        if let Err(err) = self.subscribe().await {
                            error!("Error subscribing to MQTT topics: {:?}", err);
                        }
                    }
                    _ => {}
                },
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                }
            }
        }
    }

    /// Publishes controller change notifications until the sender goes away.
    pub async fn publish_announcements(&self, mut rx: broadcast::Receiver<Announcement>) {
        loop {
            match rx.recv().await {
                Ok(Announcement::Position(position)) => {
                    info!("Curtain position changed: {position} (device frame)");
                    let message = PositionMessage {
                        position: 100 - position,
                    };
                    self.publish("position", serde_json::to_string(&message).unwrap())
                        .await;
                }
                Ok(Announcement::State(state)) => {
                    info!("Curtain state changed: {}", state.as_str());
                    let message = StateMessage {
                        state: state.as_str(),
                    };
                    self.publish("state", serde_json::to_string(&message).unwrap())
                        .await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Announcement sender closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    debug!("Announcement receiver lagged");
                }
            }
        }
    }

    async fn publish(&self, topic: &str, payload: String) {
        if let Err(err) = self
            .client
            .publish(
                format!("{}/{}", self.device_topic, topic),
                QoS::AtMostOnce,
                false,
                payload,
            )
            .await
        {
            error!("Error publishing to {topic}: {:?}", err);
        }
    }

    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await
    }
}

/// Parses a `set` payload (open percentage) and translates it into the
/// device-native frame. Out-of-range and non-numeric payloads are rejected.
fn parse_set_target(payload: &[u8]) -> Option<Command> {
    let percent: u8 = std::str::from_utf8(payload).ok()?.trim().parse().ok()?;
    if percent > 100 {
        return None;
    }
    Some(Command::SetTarget(100 - percent))
}

fn sanitize_name(name: &str) -> String {
    // Remove any non-alphanumeric characters and replace spaces with underscores
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        let name = "Living Room Curtain";
        let sanitized = super::sanitize_name(name);
        assert_eq!(sanitized, "living_room_curtain");
    }

    #[test]
    fn test_parse_set_target_inverts_the_frame() {
        assert_eq!(parse_set_target(b"80"), Some(Command::SetTarget(20)));
        assert_eq!(parse_set_target(b"0"), Some(Command::SetTarget(100)));
        assert_eq!(parse_set_target(b"100\n"), Some(Command::SetTarget(0)));
    }

    #[test]
    fn test_parse_set_target_rejects_bad_payloads() {
        assert_eq!(parse_set_target(b"101"), None);
        assert_eq!(parse_set_target(b"-5"), None);
        assert_eq!(parse_set_target(b"half open"), None);
        assert_eq!(parse_set_target(b""), None);
        assert_eq!(parse_set_target(&[0xff, 0xfe]), None);
    }
}
