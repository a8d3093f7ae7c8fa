//! Data models.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::InvalidMmsi;

/// Maritime Mobile Service Identity (MMSI)
///
/// A unique nine-digit number for identifying vessels in AIS messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mmsi(u32);

impl TryFrom<u32> for Mmsi {
    type Error = InvalidMmsi;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value > 999_999_999 {
            return Err(InvalidMmsi(value.to_string()));
        }
        Ok(Self(value))
    }
}

impl TryFrom<u64> for Mmsi {
    type Error = InvalidMmsi;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        let narrowed = u32::try_from(value).map_err(|_| InvalidMmsi(value.to_string()))?;
        Self::try_from(narrowed)
    }
}

impl TryFrom<&str> for Mmsi {
    type Error = InvalidMmsi;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let parsed = value
            .trim()
            .parse::<u32>()
            .map_err(|_| InvalidMmsi(value.to_string()))?;
        Self::try_from(parsed)
    }
}

impl Mmsi {
    /// Get the raw MMSI value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Aids to navigation use the format 99MIDXXXX.
    pub fn is_aid_to_navigation(&self) -> bool {
        self.0 / 10_000_000 == 99
    }

    /// Search and rescue aircraft (111MIDXXX) and the US Coast Guard blocks
    /// 30386XXXX and 33885XXXX.
    pub fn is_search_and_rescue(&self) -> bool {
        self.0 / 1_000_000 == 111 || matches!(self.0 / 10_000, 30_386 | 33_885)
    }

    /// Coast station identifiers: seven-digit 3669XXX, or 003369XXX with the
    /// leading zeros lost to the numeric form.
    pub fn is_coast_radio_station(&self) -> bool {
        matches!(self.0 / 1_000, 3_669 | 3_369)
    }
}

impl fmt::Display for Mmsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of AIS update, independent of the source format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    PositionReport,
    StaticData,
    AidToNavigation,
    SafetyBroadcast,
    Other,
}

/// Which feed produced a message. Diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    RadioFeed,
    AggregatorFeed,
    StreamFeed,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Origin::RadioFeed => "radio",
            Origin::AggregatorFeed => "aggregator",
            Origin::StreamFeed => "stream",
        };
        f.write_str(name)
    }
}

/// One decoded update for one vessel, whatever feed it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAisMessage {
    pub source_id: Mmsi,
    pub message_kind: MessageKind,
    /// Latitude in WGS84 decimal degrees
    pub latitude: Option<f64>,
    /// Longitude in WGS84 decimal degrees
    pub longitude: Option<f64>,
    /// Speed over ground in knots
    pub speed_over_ground: Option<f64>,
    /// Course over ground in degrees
    pub course_over_ground: Option<f64>,
    /// Heading in degrees (0-359)
    pub true_heading: Option<u16>,
    /// Navigational status
    ///
    /// Value range between 0 - 14.
    /// - 0 = under way using engine
    /// - 1 = at anchor
    /// - 2 = not under command
    /// - 3 = restricted maneuverability
    /// - 4 = constrained by her draught
    /// - 5 = moored
    /// - 6 = aground
    /// - 7 = engaged in fishing
    /// - 8 = under way sailing
    /// - 9..=13 = reserved or regional use
    /// - 14 = AIS-SART (active), MOB-AIS, EPIRB-AIS
    pub nav_status: Option<u8>,
    pub vessel_name: Option<String>,
    pub callsign: Option<String>,
    pub ship_type_code: Option<u8>,
    pub destination: Option<String>,
    /// Time the gateway received the message
    pub received_at: DateTime<Utc>,
    pub origin: Origin,
}

impl RawAisMessage {
    /// Create a message with only identifier and kind populated
    pub fn new(
        source_id: Mmsi,
        message_kind: MessageKind,
        origin: Origin,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id,
            message_kind,
            latitude: None,
            longitude: None,
            speed_over_ground: None,
            course_over_ground: None,
            true_heading: None,
            nav_status: None,
            vessel_name: None,
            callsign: None,
            ship_type_code: None,
            destination: None,
            received_at,
            origin,
        }
    }

    /// A position payload needs both coordinates.
    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    pub fn has_identity(&self) -> bool {
        self.vessel_name.is_some()
            || self.callsign.is_some()
            || self.ship_type_code.is_some()
            || self.destination.is_some()
    }
}

/// Last known position block of a vessel
#[derive(Debug, Clone, PartialEq)]
pub struct VesselPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub speed_over_ground: Option<f64>,
    pub course_over_ground: Option<f64>,
    pub true_heading: Option<u16>,
    pub nav_status: Option<u8>,
    pub updated_at: DateTime<Utc>,
}

/// Last known identity block of a vessel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ship_type_code: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Merged view of everything known about one vessel
#[derive(Debug, Clone, PartialEq)]
pub struct VesselState {
    pub identifier: Mmsi,
    pub position: Option<VesselPosition>,
    pub identity: Option<VesselIdentity>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl VesselState {
    pub fn new(identifier: Mmsi, seen_at: DateTime<Utc>) -> Self {
        Self {
            identifier,
            position: None,
            identity: None,
            first_seen_at: seen_at,
            last_seen_at: seen_at,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.identity.as_ref().and_then(|i| i.name.as_deref())
    }

    pub fn callsign(&self) -> Option<&str> {
        self.identity.as_ref().and_then(|i| i.callsign.as_deref())
    }

    pub fn ship_type_code(&self) -> Option<u8> {
        self.identity.as_ref().and_then(|i| i.ship_type_code)
    }
}
