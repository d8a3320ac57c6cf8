use crate::controller::MotionState;

/// Requests from the MQTT surface to the manager. Positions are already
/// validated and translated to the device-native frame by the MQTT layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    SetTarget(/* device-frame position */ u8),
    Stop,
}

/// Change notifications from the controller, consumed by the presenter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Announcement {
    Position(/* device-frame position */ u8),
    State(MotionState),
}
