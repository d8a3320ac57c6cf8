use btleplug::api::{BDAddr, Central as _, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::Adapter;
use futures::{Stream, StreamExt as _};
use log::{info, warn};
use tokio::sync::Mutex;

use crate::controller::{MotionController, SessionTicket};
use crate::device;
use crate::error::Error;
use crate::monitor::{self, Sample, SessionEnd};

/// Advertisement side of the transport: turns the adapter's event stream
/// into position samples and runs bounded monitoring sessions over it.
#[derive(Clone)]
pub struct Scanner {
    adapter: Adapter,
}

impl Scanner {
    pub fn new(adapter: Adapter) -> Self {
        Scanner { adapter }
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Advertisement events decoded to position samples. Advertisements that
    /// are not from SwitchBot curtains decode to nothing and are skipped.
    async fn sample_stream(&self) -> Result<impl Stream<Item = Sample>, Error> {
        let adapter = self.adapter.clone();
        let events = self.adapter.events().await?;
        Ok(events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                let CentralEvent::ServiceDataAdvertisement { id, service_data } = event else {
                    return None;
                };
                let position = device::position_from_service_data(&service_data)?;
                let peripheral = adapter.peripheral(&id).await.ok()?;
                Some(Sample {
                    address: peripheral.address(),
                    position,
                })
            }
        }))
    }

    /// Runs one monitoring session against a fresh scan. The scan is stopped
    /// exactly once, whichever way the session ends, and only then is the
    /// session released; a follow-up session can never have its scan killed
    /// by this one's teardown. An error opening the subscription means no
    /// session was established; the caller must release the session itself.
    pub async fn monitor(
        &self,
        controller: &Mutex<MotionController>,
        address: BDAddr,
        ticket: SessionTicket,
    ) -> Result<SessionEnd, Error> {
        info!("Position monitor started (target {})", ticket.target);
        let samples = self.sample_stream().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let end = monitor::run_session(samples, controller, address, ticket).await;

        if let Err(err) = self.adapter.stop_scan().await {
            warn!("Error stopping scan: {err}");
        }
        controller.lock().await.finish_session();
        info!("Position monitor completed: {end:?}");
        Ok(end)
    }
}
