use std::time::Duration;

use log::debug;
use tokio::sync::{broadcast, watch};

use crate::error::Error;
use crate::messages::Announcement;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionState {
    Stopped,
    Increasing,
    Decreasing,
}

impl MotionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionState::Stopped => "stopped",
            MotionState::Increasing => "increasing",
            MotionState::Decreasing => "decreasing",
        }
    }
}

/// Open motion session. Exists exactly while the curtain is considered busy;
/// dropping it (or sending on `cancel`) releases the monitor loop.
struct MotionSession {
    cancel: watch::Sender<bool>,
}

/// Everything the advertisement monitor needs to run one session. The
/// timeout is a duration, not a deadline: issuing the move command can take
/// seconds of BLE work, so the monitor arms it only once it actually starts
/// observing.
#[derive(Debug)]
pub struct SessionTicket {
    pub target: u8,
    pub timeout: Duration,
    pub cancelled: watch::Receiver<bool>,
}

#[derive(Debug)]
pub enum SetTarget {
    /// Motion accepted; the caller must issue the move command and start a
    /// monitoring session for the ticket.
    Started(SessionTicket),
    /// Same target as before; repeated requests never restart motion.
    Unchanged,
    /// A session is already open; the device cannot take a second command.
    Busy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    Unchanged,
    Moved,
    Arrived,
}

/// Motion state machine for a single curtain. Position and state are mutated
/// only through these operations; the transport never touches them directly.
pub struct MotionController {
    position: u8,
    target: u8,
    state: MotionState,
    session: Option<MotionSession>,
    move_timeout: Duration,
    announcements: broadcast::Sender<Announcement>,
}

impl MotionController {
    pub fn new(move_timeout: Duration, announcements: broadcast::Sender<Announcement>) -> Self {
        MotionController {
            position: 0,
            target: 0,
            state: MotionState::Stopped,
            session: None,
            move_timeout,
            announcements,
        }
    }

    pub fn position(&self) -> u8 {
        self.position
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn target(&self) -> u8 {
        self.target
    }

    pub fn is_busy(&self) -> bool {
        self.session.is_some()
    }

    /// Requests motion to `target`. At most one session may be open at a
    /// time, so requests made mid-motion are rejected rather than queued.
    pub fn set_target(&mut self, target: u8) -> Result<SetTarget, Error> {
        if target > 100 {
            return Err(Error::InvalidPosition(target));
        }
        if target == self.target {
            return Ok(SetTarget::Unchanged);
        }
        if self.session.is_some() {
            debug!("Motion in progress, rejecting request for position {target}");
            return Ok(SetTarget::Busy);
        }

        // Direction comes from the previous target: the move command goes out
        // before any fresh sample could tell us where the curtain really is.
        self.state = if target < self.target {
            MotionState::Decreasing
        } else {
            MotionState::Increasing
        };
        self.target = target;

        let (cancel, cancelled) = watch::channel(false);
        self.session = Some(MotionSession { cancel });
        self.announce(Announcement::State(self.state));

        Ok(SetTarget::Started(SessionTicket {
            target,
            timeout: self.move_timeout,
            cancelled,
        }))
    }

    /// Feeds one confirmed position sample from the advertisement monitor.
    /// `Arrived` tells the monitor to stop; the session itself stays open
    /// until `finish_session`, after the scan has been torn down.
    pub fn on_sample(&mut self, position: u8) -> Progress {
        let moved = position != self.position;
        if moved {
            self.position = position;
            self.announce(Announcement::Position(position));
        }

        if self.session.is_some() && position == self.target {
            return Progress::Arrived;
        }

        if moved { Progress::Moved } else { Progress::Unchanged }
    }

    /// Ends the open session: busy cleared, state back to `Stopped`, the
    /// curtain commandable again. The monitor calls this only after its scan
    /// is stopped, so a new session can never race the old one's teardown.
    /// Also covers sessions that could not be established at all. Idempotent.
    pub fn finish_session(&mut self) {
        if self.session.is_some() {
            if self.position != self.target {
                debug!("Session ended without reaching target {}", self.target);
            }
            self.close_session();
        }
    }

    /// User-initiated stop. Signals the monitor loop; the session stays busy
    /// until the monitor finishes teardown and calls `finish_session`.
    pub fn cancel(&mut self) {
        if let Some(session) = &self.session {
            let _ = session.cancel.send(true);
        }
    }

    fn close_session(&mut self) {
        self.session = None;
        self.state = MotionState::Stopped;
        self.announce(Announcement::State(MotionState::Stopped));
    }

    fn announce(&self, announcement: Announcement) {
        // Nobody listening yet is fine.
        let _ = self.announcements.send(announcement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> (MotionController, broadcast::Receiver<Announcement>) {
        let (tx, rx) = broadcast::channel(32);
        (MotionController::new(Duration::from_secs(10), tx), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<Announcement>) -> Vec<Announcement> {
        let mut seen = Vec::new();
        while let Ok(announcement) = rx.try_recv() {
            seen.push(announcement);
        }
        seen
    }

    #[test]
    fn same_target_is_a_noop() {
        let (mut controller, mut rx) = controller();
        assert!(matches!(controller.set_target(0), Ok(SetTarget::Unchanged)));
        assert!(!controller.is_busy());
        assert_eq!(controller.state(), MotionState::Stopped);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn new_target_opens_a_session() {
        let (mut controller, mut rx) = controller();
        let Ok(SetTarget::Started(ticket)) = controller.set_target(80) else {
            panic!("expected a session");
        };
        assert_eq!(ticket.target, 80);
        assert!(controller.is_busy());
        assert_eq!(controller.target(), 80);
        assert_eq!(controller.state(), MotionState::Increasing);
        assert_eq!(
            drain(&mut rx),
            vec![Announcement::State(MotionState::Increasing)]
        );
    }

    #[test]
    fn direction_follows_sign_of_target_change() {
        let (mut controller, _rx) = controller();
        assert!(matches!(controller.set_target(80), Ok(SetTarget::Started(_))));
        assert_eq!(controller.on_sample(80), Progress::Arrived);
        controller.finish_session();

        assert!(matches!(controller.set_target(20), Ok(SetTarget::Started(_))));
        assert_eq!(controller.state(), MotionState::Decreasing);
    }

    #[test]
    fn busy_controller_rejects_new_targets() {
        let (mut controller, mut rx) = controller();
        assert!(matches!(controller.set_target(20), Ok(SetTarget::Started(_))));
        drain(&mut rx);

        assert!(matches!(controller.set_target(90), Ok(SetTarget::Busy)));
        assert!(controller.is_busy());
        assert_eq!(controller.target(), 20);
        assert_eq!(controller.state(), MotionState::Increasing);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn arrival_sample_closes_the_session() {
        let (mut controller, mut rx) = controller();
        assert!(matches!(controller.set_target(80), Ok(SetTarget::Started(_))));
        drain(&mut rx);

        assert_eq!(controller.on_sample(45), Progress::Moved);
        assert_eq!(controller.on_sample(80), Progress::Arrived);

        // The session is held open until the monitor has torn down its scan.
        assert!(controller.is_busy());

        controller.finish_session();
        assert!(!controller.is_busy());
        assert_eq!(controller.state(), MotionState::Stopped);
        assert_eq!(
            drain(&mut rx),
            vec![
                Announcement::Position(45),
                Announcement::Position(80),
                Announcement::State(MotionState::Stopped),
            ]
        );

        // Late duplicates after the session closed change nothing.
        assert_eq!(controller.on_sample(80), Progress::Unchanged);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn timeout_makes_the_curtain_commandable_again() {
        let (mut controller, _rx) = controller();
        assert!(matches!(controller.set_target(80), Ok(SetTarget::Started(_))));
        assert_eq!(controller.on_sample(80), Progress::Arrived);
        controller.finish_session();

        assert!(matches!(controller.set_target(0), Ok(SetTarget::Started(_))));
        assert_eq!(controller.on_sample(40), Progress::Moved);
        controller.finish_session();

        assert!(!controller.is_busy());
        assert_eq!(controller.state(), MotionState::Stopped);
        assert_eq!(controller.position(), 40);
        assert_eq!(controller.target(), 0);

        // A second finish is harmless.
        controller.finish_session();
        assert!(!controller.is_busy());
    }

    #[test]
    fn out_of_range_target_is_rejected_before_any_mutation() {
        let (mut controller, mut rx) = controller();
        assert!(matches!(
            controller.set_target(101),
            Err(Error::InvalidPosition(101))
        ));
        assert!(!controller.is_busy());
        assert_eq!(controller.target(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn new_targets_are_rejected_until_teardown_finishes() {
        let (mut controller, _rx) = controller();
        assert!(matches!(controller.set_target(80), Ok(SetTarget::Started(_))));
        assert_eq!(controller.on_sample(80), Progress::Arrived);

        // The old scan may still be shutting down; no new session yet.
        assert!(matches!(controller.set_target(10), Ok(SetTarget::Busy)));

        controller.finish_session();
        assert!(matches!(controller.set_target(10), Ok(SetTarget::Started(_))));
    }

    #[test]
    fn cancel_signals_the_monitor_and_waits_for_teardown() {
        let (mut controller, _rx) = controller();
        let Ok(SetTarget::Started(ticket)) = controller.set_target(50) else {
            panic!("expected a session");
        };

        controller.cancel();
        assert!(*ticket.cancelled.borrow());
        // Still busy: only the monitor's teardown releases the session.
        assert!(controller.is_busy());

        controller.finish_session();
        assert!(!controller.is_busy());
        assert_eq!(controller.state(), MotionState::Stopped);

        // No session open, nothing to cancel.
        controller.cancel();
        assert!(!controller.is_busy());
    }

    #[test]
    fn full_travel_scenario() {
        let (mut controller, mut rx) = controller();
        controller.on_sample(30);
        drain(&mut rx);

        let Ok(SetTarget::Started(ticket)) = controller.set_target(80) else {
            panic!("expected a session");
        };
        assert_eq!(ticket.target, 80);
        assert_eq!(controller.state(), MotionState::Increasing);

        for position in [45, 60] {
            assert_eq!(controller.on_sample(position), Progress::Moved);
        }
        assert_eq!(controller.on_sample(80), Progress::Arrived);
        controller.finish_session();

        assert_eq!(
            drain(&mut rx),
            vec![
                Announcement::State(MotionState::Increasing),
                Announcement::Position(45),
                Announcement::Position(60),
                Announcement::Position(80),
                Announcement::State(MotionState::Stopped),
            ]
        );
    }
}
