use btleplug::api::BDAddr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    /// Discovery window elapsed without seeing the configured address.
    #[error("no curtain found with address {0}")]
    DeviceNotFound(BDAddr),
    #[error("transport error: {0}")]
    Transport(#[from] btleplug::Error),
    #[error("characteristic {0} not found on device")]
    CharacteristicNotFound(Uuid),
    #[error("position {0} out of range (expected 0-100)")]
    InvalidPosition(u8),
}
