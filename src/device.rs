use std::collections::HashMap;
use std::time::Duration;

use btleplug::api::{
    BDAddr, Central as _, CentralEvent, Characteristic, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use futures::StreamExt as _;
use log::{debug, info, warn};
use uuid::{Uuid, uuid};

use crate::error::Error;

/// SwitchBot GATT command characteristic.
const COMMAND_CHARACTERISTIC: Uuid = uuid!("cba20002-224d-11e6-9fb8-0002a5d5c51b");
/// Service-data UUIDs the curtain advertises under (current and legacy firmware).
const SERVICE_DATA: Uuid = uuid!("0000fd3d-0000-1000-8000-00805f9b34fb");
const SERVICE_DATA_LEGACY: Uuid = uuid!("cba20d00-224d-11e6-9fb8-0002a5d5c51b");

/// Model byte marking a WoCurtain advertisement.
const MODEL_CURTAIN: u8 = b'c';

/// "Run to position" command: fixed header, then the device-frame position.
fn run_to_pos(position: u8) -> [u8; 7] {
    [0x57, 0x0f, 0x45, 0x01, 0x05, 0xff, position]
}

/// Extracts the curtain position from advertisement service data. Anything
/// that is not a WoCurtain advertisement decodes to `None`. The top bit of
/// the position byte carries the calibration flag and is masked off; the
/// stream is untrusted, so positions the device should never report are
/// dropped rather than forwarded.
pub fn position_from_service_data(service_data: &HashMap<Uuid, Vec<u8>>) -> Option<u8> {
    let data = service_data
        .get(&SERVICE_DATA)
        .or_else(|| service_data.get(&SERVICE_DATA_LEGACY))?;
    if data.len() < 4 || data[0] != MODEL_CURTAIN {
        return None;
    }
    let position = data[3] & 0x7f;
    (position <= 100).then_some(position)
}

/// Scans until a peripheral with the configured address shows up, bounded by
/// `window`. The discovery scan is stopped on every exit path.
pub async fn resolve(adapter: &Adapter, address: BDAddr, window: Duration) -> Result<Curtain, Error> {
    info!("Looking for curtain {address}");
    let mut events = adapter.events().await?;
    adapter.start_scan(ScanFilter::default()).await?;

    let found: Result<Result<Option<Peripheral>, Error>, _> = tokio::time::timeout(window, async {
        while let Some(event) = events.next().await {
            if let CentralEvent::DeviceDiscovered(id) = event {
                let peripheral = adapter.peripheral(&id).await?;
                let name = peripheral
                    .properties()
                    .await?
                    .and_then(|p| p.local_name)
                    .map(|local_name| format!("Name: {local_name}"))
                    .unwrap_or_default();
                debug!("DeviceDiscovered: {} {}", peripheral.address(), name);
                if peripheral.address() == address {
                    return Ok(Some(peripheral));
                }
            }
        }
        Ok(None)
    })
    .await;

    if let Err(err) = adapter.stop_scan().await {
        warn!("Error stopping discovery scan: {err}");
    }

    match found {
        Ok(Ok(Some(peripheral))) => {
            info!("Curtain found: {address}");
            Ok(Curtain { peripheral })
        }
        Ok(Ok(None)) | Err(_) => Err(Error::DeviceNotFound(address)),
        Ok(Err(err)) => Err(err),
    }
}

/// A resolved curtain. The handle itself is just address/metadata plus the
/// ability to issue the move command.
pub struct Curtain {
    peripheral: Peripheral,
}

impl Curtain {
    pub fn address(&self) -> BDAddr {
        self.peripheral.address()
    }

    /// Issues the "run to position" command. The device acknowledges the
    /// write but never reports completion; arrival is observed out of band
    /// from its advertisements.
    pub async fn move_to(&self, position: u8) -> Result<(), Error> {
        if !self.peripheral.is_connected().await? {
            self.peripheral.connect().await?;
        }
        self.peripheral.discover_services().await?;
        let command = self.command_characteristic()?;
        self.peripheral
            .write(&command, &run_to_pos(position), WriteType::WithResponse)
            .await?;
        Ok(())
    }

    fn command_characteristic(&self) -> Result<Characteristic, Error> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == COMMAND_CHARACTERISTIC)
            .ok_or(Error::CharacteristicNotFound(COMMAND_CHARACTERISTIC))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curtain_advertisement(position: u8) -> HashMap<Uuid, Vec<u8>> {
        HashMap::from([(SERVICE_DATA, vec![MODEL_CURTAIN, 0x40, 0x64, position])])
    }

    #[test]
    fn test_decode_position() {
        assert_eq!(position_from_service_data(&curtain_advertisement(42)), Some(42));
        assert_eq!(position_from_service_data(&curtain_advertisement(0)), Some(0));
    }

    #[test]
    fn test_decode_masks_calibration_bit() {
        assert_eq!(
            position_from_service_data(&curtain_advertisement(0x80 | 30)),
            Some(30)
        );
    }

    #[test]
    fn test_decode_legacy_service_uuid() {
        let data = HashMap::from([(SERVICE_DATA_LEGACY, vec![MODEL_CURTAIN, 0, 0, 55])]);
        assert_eq!(position_from_service_data(&data), Some(55));
    }

    #[test]
    fn test_decode_rejects_over_range_positions() {
        // 0x7f survives the calibration-bit mask but is no valid position.
        assert_eq!(position_from_service_data(&curtain_advertisement(0x7f)), None);
        assert_eq!(position_from_service_data(&curtain_advertisement(101)), None);
        assert_eq!(position_from_service_data(&curtain_advertisement(100)), Some(100));
    }

    #[test]
    fn test_decode_rejects_other_models_and_short_data() {
        let bot = HashMap::from([(SERVICE_DATA, vec![b'H', 0x40, 0x64, 10])]);
        assert_eq!(position_from_service_data(&bot), None);

        let short = HashMap::from([(SERVICE_DATA, vec![MODEL_CURTAIN, 0x40])]);
        assert_eq!(position_from_service_data(&short), None);

        assert_eq!(position_from_service_data(&HashMap::new()), None);
    }

    #[test]
    fn test_run_to_pos_command_bytes() {
        assert_eq!(run_to_pos(80), [0x57, 0x0f, 0x45, 0x01, 0x05, 0xff, 80]);
    }
}
