//! Typed property queries answered by a drone session

use crate::error::FleetError;
use bytes::Bytes;
use skyfleet_shared::telemetry::{DroneVersion, Rotation, Speed};
use skyfleet_shared::{FlyingState, Location};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    FlyingState,
    Location,
    Battery,
    Altitude,
    Rotation,
    Speed,
    Version,
    Image,
}

impl PropertyType {
    pub fn name(self) -> &'static str {
        match self {
            Self::FlyingState => "flying state",
            Self::Location => "location",
            Self::Battery => "battery",
            Self::Altitude => "altitude",
            Self::Rotation => "rotation",
            Self::Speed => "speed",
            Self::Version => "version",
            Self::Image => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    FlyingState(FlyingState),
    Location(Location),
    Battery(u8),
    Altitude(f64),
    Rotation(Rotation),
    Speed(Speed),
    Version(DroneVersion),
    /// Last complete video frame (H.264 access unit)
    Image(Bytes),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::FlyingState(_) => PropertyType::FlyingState,
            Self::Location(_) => PropertyType::Location,
            Self::Battery(_) => PropertyType::Battery,
            Self::Altitude(_) => PropertyType::Altitude,
            Self::Rotation(_) => PropertyType::Rotation,
            Self::Speed(_) => PropertyType::Speed,
            Self::Version(_) => PropertyType::Version,
            Self::Image(_) => PropertyType::Image,
        }
    }
}

macro_rules! property_conversion {
    ($variant:ident => $target:ty) => {
        impl TryFrom<PropertyValue> for $target {
            type Error = FleetError;

            fn try_from(value: PropertyValue) -> Result<Self, Self::Error> {
                match value {
                    PropertyValue::$variant(v) => Ok(v),
                    other => Err(FleetError::UnexpectedProperty {
                        expected: PropertyType::$variant.name(),
                        got: other.property_type().name(),
                    }),
                }
            }
        }
    };
}

property_conversion!(FlyingState => FlyingState);
property_conversion!(Location => Location);
property_conversion!(Battery => u8);
property_conversion!(Altitude => f64);
property_conversion!(Rotation => Rotation);
property_conversion!(Speed => Speed);
property_conversion!(Version => DroneVersion);
property_conversion!(Image => Bytes);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_conversion() {
        let battery: u8 = PropertyValue::Battery(64).try_into().unwrap();
        assert_eq!(battery, 64);
    }

    #[test]
    fn test_mismatched_conversion_names_both_sides() {
        let err = Location::try_from(PropertyValue::Altitude(3.0)).unwrap_err();
        assert_eq!(
            err,
            FleetError::UnexpectedProperty {
                expected: "location",
                got: "altitude"
            }
        );
    }
}
