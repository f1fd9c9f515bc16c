//! Flight coordination messages exchanged between pilots and the control tower

use skyfleet_shared::{DroneId, Location};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    TakeOff,
    Landing,
}

/// Who wants to use the airspace, where, and for what
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationMessage {
    pub requester: DroneId,
    pub location: Location,
    pub kind: RequestType,
}

impl LocationMessage {
    pub fn new(requester: DroneId, location: Location, kind: RequestType) -> Self {
        Self {
            requester,
            location,
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlightControlMessage {
    RequestForTakeOff(LocationMessage),
    RequestForLanding(LocationMessage),
    RequestForTakeOffGranted(LocationMessage),
    RequestForLandingGranted(LocationMessage),
    TakeOffCompleted(LocationMessage),
    LandingCompleted(LocationMessage),
}

impl FlightControlMessage {
    /// Request for the airspace around `location`
    pub fn request(requester: DroneId, location: Location, kind: RequestType) -> Self {
        let m = LocationMessage::new(requester, location, kind);
        match kind {
            RequestType::TakeOff => Self::RequestForTakeOff(m),
            RequestType::Landing => Self::RequestForLanding(m),
        }
    }

    /// Grant answering a request
    pub fn grant(request: LocationMessage) -> Self {
        match request.kind {
            RequestType::TakeOff => Self::RequestForTakeOffGranted(request),
            RequestType::Landing => Self::RequestForLandingGranted(request),
        }
    }

    /// The airspace used by a granted request is free again
    pub fn completed(request: LocationMessage) -> Self {
        match request.kind {
            RequestType::TakeOff => Self::TakeOffCompleted(request),
            RequestType::Landing => Self::LandingCompleted(request),
        }
    }

    pub fn location_message(&self) -> &LocationMessage {
        match self {
            Self::RequestForTakeOff(m)
            | Self::RequestForLanding(m)
            | Self::RequestForTakeOffGranted(m)
            | Self::RequestForLandingGranted(m)
            | Self::TakeOffCompleted(m)
            | Self::LandingCompleted(m) => m,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Self::RequestForTakeOff(_) | Self::RequestForLanding(_))
    }

    pub fn is_grant(&self) -> bool {
        matches!(
            self,
            Self::RequestForTakeOffGranted(_) | Self::RequestForLandingGranted(_)
        )
    }

    pub fn is_completion(&self) -> bool {
        matches!(self, Self::TakeOffCompleted(_) | Self::LandingCompleted(_))
    }
}

/// Inbox of a pilot
#[derive(Debug, Clone, PartialEq)]
pub enum PilotMessage {
    FlightControl(FlightControlMessage),
    /// Land where you are and terminate
    Stop,
}

/// What a pilot tells its reporter (the scheduler)
#[derive(Debug, Clone, PartialEq)]
pub enum PilotReport {
    /// Coordination traffic for the control tower
    Coordination {
        from: DroneId,
        message: FlightControlMessage,
    },
    FlightCompleted {
        drone_id: DroneId,
        location: Option<Location>,
    },
    FlightCanceled {
        drone_id: DroneId,
    },
    Battery {
        drone_id: DroneId,
        location: Option<Location>,
        percentage: u8,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_and_completion_follow_request_kind() {
        let here = Location::new(50.85, 4.35, 0.0);
        let request = FlightControlMessage::request(3, here, RequestType::Landing);
        assert!(request.is_request());

        let grant = FlightControlMessage::grant(*request.location_message());
        assert!(matches!(grant, FlightControlMessage::RequestForLandingGranted(_)));
        assert!(grant.is_grant());

        let done = FlightControlMessage::completed(*grant.location_message());
        assert!(matches!(done, FlightControlMessage::LandingCompleted(_)));
        assert_eq!(done.location_message().requester, 3);
    }
}
