//! Typed telemetry reported asynchronously by a drone

use crate::geo::Location;

/// Flight state as reported by the drone's autopilot (ARDrone3 enum order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlyingState {
    Landed,
    TakingOff,
    Hovering,
    Flying,
    Landing,
    Emergency,
    UserTakeOff,
    MotorRamping,
    EmergencyLanding,
}

impl FlyingState {
    pub fn from_wire(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Landed,
            1 => Self::TakingOff,
            2 => Self::Hovering,
            3 => Self::Flying,
            4 => Self::Landing,
            5 => Self::Emergency,
            6 => Self::UserTakeOff,
            7 => Self::MotorRamping,
            8 => Self::EmergencyLanding,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> u32 {
        self as u32
    }

    /// True while the drone is off the ground
    pub fn is_airborne(self) -> bool {
        matches!(
            self,
            Self::TakingOff | Self::Hovering | Self::Flying | Self::Landing | Self::EmergencyLanding
        )
    }
}

/// Availability of the autonomous navigation (move-to) controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationState {
    Available,
    InProgress,
    Unavailable,
}

/// Why the navigation state last changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationReason {
    Requested,
    Finished,
    Stopped,
    Error,
}

/// Status carried by the ARDrone3 move-to-changed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveToStatus {
    Running,
    Done,
    Canceled,
    Error,
}

impl MoveToStatus {
    pub fn from_wire(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Running,
            1 => Self::Done,
            2 => Self::Canceled,
            3 => Self::Error,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> u32 {
        self as u32
    }

    /// Map onto the navigation state machine seen by pilots
    pub fn navigation(self) -> (NavigationState, NavigationReason) {
        match self {
            Self::Running => (NavigationState::InProgress, NavigationReason::Requested),
            Self::Done => (NavigationState::Available, NavigationReason::Finished),
            Self::Canceled => (NavigationState::Available, NavigationReason::Stopped),
            Self::Error => (NavigationState::Unavailable, NavigationReason::Error),
        }
    }
}

/// Autopilot alert (ARDrone3 enum order)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    None,
    User,
    CutOut,
    CriticalBattery,
    LowBattery,
    TooMuchAngle,
}

impl AlertState {
    pub fn from_wire(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::None,
            1 => Self::User,
            2 => Self::CutOut,
            3 => Self::CriticalBattery,
            4 => Self::LowBattery,
            5 => Self::TooMuchAngle,
            _ => return None,
        })
    }
}

/// Attitude in radians
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rotation {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

/// Speed in m/s in the NED frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Speed {
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DroneVersion {
    pub software: String,
    pub hardware: String,
}

/// Events decoded from drone packets
#[derive(Debug, Clone, PartialEq)]
pub enum DroneEvent {
    FlyingStateChanged(FlyingState),
    AlertStateChanged(AlertState),
    /// GPS position; the altitude is the GPS height
    PositionChanged(Location),
    SpeedChanged(Speed),
    AttitudeChanged(Rotation),
    /// Altitude above take-off point in meters
    AltitudeChanged(f64),
    NavigationStateChanged {
        state: NavigationState,
        reason: NavigationReason,
    },
    BatteryChanged(u8),
    AllStatesChanged,
    AllSettingsChanged,
    ProductVersionChanged(DroneVersion),
    CalibrationStateChanged { calibration_required: bool },
}
