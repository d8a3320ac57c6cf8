use std::sync::Arc;
use std::time::Duration;

use btleplug::api::BDAddr;
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, broadcast};

use crate::controller::{MotionController, SetTarget};
use crate::device::{self, Curtain};
use crate::messages::Command;
use crate::scanner::Scanner;

/// Wires the command stream to the controller and the transport. Sessions
/// are serialized by the controller's busy flag; the manager only ever
/// spawns a monitor task for a ticket the controller handed out.
pub struct Manager {
    scanner: Scanner,
    controller: Arc<Mutex<MotionController>>,
    curtain: Option<Curtain>,
    address: BDAddr,
    discovery_timeout: Duration,
    commands: broadcast::Receiver<Command>,
}

impl Manager {
    pub fn new(
        scanner: Scanner,
        controller: Arc<Mutex<MotionController>>,
        address: BDAddr,
        discovery_timeout: Duration,
        commands: broadcast::Receiver<Command>,
    ) -> Self {
        Manager {
            scanner,
            controller,
            curtain: None,
            address,
            discovery_timeout,
            commands,
        }
    }

    pub async fn run_loop(mut self) {
        loop {
            match self.commands.recv().await {
                Ok(Command::SetTarget(target)) => self.set_target(target).await,
                Ok(Command::Stop) => {
                    let mut controller = self.controller.lock().await;
                    if controller.is_busy() {
                        info!("Stop requested at position {}", controller.position());
                        controller.cancel();
                    } else {
                        debug!("Stop requested but nothing in motion");
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Command sender closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    warn!("Command receiver lagged");
                }
            }
        }
        info!("Exiting manager event loop");
    }

    async fn set_target(&mut self, target: u8) {
        if !self.ensure_bound().await {
            warn!("No curtain bound, ignoring request for position {target}");
            return;
        }
        let Some(curtain) = self.curtain.as_ref() else {
            return;
        };

        let mut controller = self.controller.lock().await;
        let ticket = match controller.set_target(target) {
            Ok(SetTarget::Started(ticket)) => ticket,
            Ok(SetTarget::Unchanged) => {
                debug!("Already targeting position {target}");
                return;
            }
            Ok(SetTarget::Busy) => {
                info!(
                    "Curtain {} towards {}, ignoring request for position {target}",
                    controller.state().as_str(),
                    controller.target()
                );
                return;
            }
            Err(err) => {
                error!("Rejected target: {err}");
                return;
            }
        };
        drop(controller);

        if let Err(err) = curtain.move_to(target).await {
            error!("Error issuing move command: {err}");
            self.controller.lock().await.finish_session();
            return;
        }

        let scanner = self.scanner.clone();
        let controller = Arc::clone(&self.controller);
        let address = self.address;
        tokio::task::spawn(async move {
            if let Err(err) = scanner.monitor(&controller, address, ticket).await {
                error!("Error monitoring curtain position: {err}");
                controller.lock().await.finish_session();
            }
        });
    }

    /// Lazily resolves the configured address. Until that succeeds, motion
    /// commands are dropped rather than crashing anything.
    async fn ensure_bound(&mut self) -> bool {
        if self.curtain.is_none() {
            match device::resolve(self.scanner.adapter(), self.address, self.discovery_timeout)
                .await
            {
                Ok(curtain) => {
                    debug!("Curtain bound: {}", curtain.address());
                    self.curtain = Some(curtain);
                }
                Err(err) => {
                    error!("Curtain resolution failed: {err}");
                    return false;
                }
            }
        }
        true
    }
}
