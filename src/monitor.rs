use btleplug::api::BDAddr;
use futures::{Stream, StreamExt as _};
use log::debug;
use tokio::sync::Mutex;

use crate::controller::{MotionController, Progress, SessionTicket};

/// One decoded advertisement from the shared broadcast medium.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    pub address: BDAddr,
    pub position: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    Arrived,
    TimedOut,
    Cancelled,
    /// The transport dropped mid-session; treated like a timeout.
    StreamClosed,
}

/// Drives one motion session: consumes advertisement samples until the bound
/// curtain reports the target position, the timeout elapses, the session is
/// cancelled, or the stream ends. Samples from other addresses are discarded.
/// The timeout is armed here, once observation really starts, so slow command
/// issuance never eats into the monitoring window.
///
/// There is a single exit; the caller stops its scan exactly once afterwards
/// and only then releases the session, so the busy flag covers the whole
/// subscription lifecycle and late samples are never delivered anywhere.
pub async fn run_session<S>(
    samples: S,
    controller: &Mutex<MotionController>,
    address: BDAddr,
    ticket: SessionTicket,
) -> SessionEnd
where
    S: Stream<Item = Sample>,
{
    let SessionTicket {
        target,
        timeout,
        mut cancelled,
    } = ticket;
    let timeout = tokio::time::sleep(timeout);
    tokio::pin!(timeout);
    tokio::pin!(samples);

    loop {
        tokio::select! {
            () = &mut timeout => {
                return SessionEnd::TimedOut;
            }
            // Fires on cancel() and also if the controller side went away.
            _ = cancelled.changed() => {
                return SessionEnd::Cancelled;
            }
            sample = samples.next() => match sample {
                None => {
                    return SessionEnd::StreamClosed;
                }
                Some(sample) if sample.address != address => {
                    debug!("Ignoring advertisement from {}", sample.address);
                }
                Some(sample) => {
                    if controller.lock().await.on_sample(sample.position) == Progress::Arrived {
                        debug!("Curtain reached target {target}");
                        return SessionEnd::Arrived;
                    }
                }
            }
        }
    }
}
