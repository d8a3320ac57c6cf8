use std::time::Duration;

use mac_address::MacAddress;
use serde_derive::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub device: CurtainConfig,
    pub motion: Option<MotionConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CurtainConfig {
    pub address: MacAddress,
    pub name: String,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct MotionConfig {
    pub move_timeout_seconds: Option<u64>,
    pub discovery_timeout_seconds: Option<u64>,
}

impl MotionConfig {
    /// Bound on one monitoring session, roughly one full travel of the curtain.
    pub fn move_timeout(&self) -> Duration {
        Duration::from_secs(self.move_timeout_seconds.unwrap_or(10))
    }

    /// Bound on resolving the configured address during discovery.
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_seconds.unwrap_or(15))
    }
}
