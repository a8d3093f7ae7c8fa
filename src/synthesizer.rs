//! Outbound event synthesis
//!
//! Turns a merged vessel state plus known-craft directive into a
//! ready-to-send event. Pure and non-blocking.

use chrono::{DateTime, Duration, Utc};

use crate::{config::CotConfig, known_craft::MatchDirective, models::VesselState};

/// Unknown point accuracy, per CoT convention
pub const UNKNOWN_ERROR: f64 = 9_999_999.0;

pub const ATON_EVENT_TYPE: &str = "a-n-S-N";
pub const SAR_EVENT_TYPE: &str = "a-f-S-X-L";
pub const CRS_EVENT_TYPE: &str = "a-f-G-I-U-T";

/// One synthesized event. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub uid: String,
    pub event_type: String,
    pub generated_at: DateTime<Utc>,
    pub stale_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub height_above_ellipsoid: f64,
    pub circular_error: f64,
    pub linear_error: f64,
    pub detail: EventDetail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventDetail {
    pub callsign: String,
    /// Degrees
    pub track_course: Option<f64>,
    /// Knots
    pub track_speed: Option<f64>,
    pub remarks: String,
    pub icon_ref: Option<String>,
}

/// Vessel class derived from the MMSI block, then the ITU ship type code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VesselClass {
    Cargo,
    Tanker,
    Fishing,
    PleasureCraft,
    AidToNavigation,
    SearchAndRescue,
    CoastRadioStation,
    Unknown,
}

impl VesselClass {
    pub fn of(state: &VesselState) -> Self {
        let mmsi = state.identifier;
        if mmsi.is_coast_radio_station() {
            return Self::CoastRadioStation;
        }
        if mmsi.is_search_and_rescue() {
            return Self::SearchAndRescue;
        }
        if mmsi.is_aid_to_navigation() {
            return Self::AidToNavigation;
        }
        match state.ship_type_code() {
            Some(30) => Self::Fishing,
            Some(36 | 37) => Self::PleasureCraft,
            Some(70..=79) => Self::Cargo,
            Some(80..=89) => Self::Tanker,
            _ => Self::Unknown,
        }
    }

    /// CoT type for this class, `None` for the configured default
    fn event_type(self) -> Option<&'static str> {
        match self {
            Self::Cargo => Some("a-u-S-X-M-C"),
            Self::Tanker => Some("a-u-S-X-M-O"),
            Self::Fishing => Some("a-u-S-X-F"),
            Self::PleasureCraft => Some("a-u-S-X-R"),
            Self::AidToNavigation => Some(ATON_EVENT_TYPE),
            Self::SearchAndRescue => Some(SAR_EVENT_TYPE),
            Self::CoastRadioStation => Some(CRS_EVENT_TYPE),
            Self::Unknown => None,
        }
    }

    fn callsign_prefix(self) -> Option<&'static str> {
        match self {
            Self::AidToNavigation => Some("AtoN"),
            Self::CoastRadioStation => Some("USCG CRS"),
            _ => None,
        }
    }

    fn remark(self) -> Option<&'static str> {
        match self {
            Self::AidToNavigation => Some("AtoN: True"),
            Self::SearchAndRescue => Some("USCG: True"),
            Self::CoastRadioStation => Some("USCG CRS: True"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSynthesizer {
    stale_seconds: u64,
    default_type: String,
    ignore_aton: bool,
    host_id: Option<String>,
}

impl EventSynthesizer {
    pub fn new(config: &CotConfig) -> Self {
        Self {
            stale_seconds: config.stale_seconds,
            default_type: config.default_type.clone(),
            ignore_aton: config.ignore_aton,
            host_id: config.host_id.clone(),
        }
    }

    /// Render an event, or `None` when the vessel is filtered or has never
    /// reported a position.
    pub fn synthesize(
        &self,
        state: &VesselState,
        directive: &MatchDirective,
        now: DateTime<Utc>,
    ) -> Option<OutboundEvent> {
        if !directive.include {
            return None;
        }
        let position = state.position.as_ref()?;

        let class = VesselClass::of(state);
        if class == VesselClass::AidToNavigation && self.ignore_aton {
            return None;
        }

        let event_type = directive
            .event_type_override
            .clone()
            .or_else(|| class.event_type().map(str::to_string))
            .unwrap_or_else(|| self.default_type.clone());

        let stale_seconds = directive.stale_override.unwrap_or(self.stale_seconds);
        let stale_at = i64::try_from(stale_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        // Overrides are shown verbatim; derived callsigns carry the class prefix.
        let callsign = directive.callsign_override.clone().unwrap_or_else(|| {
            let base = state
                .name()
                .or_else(|| state.callsign())
                .map(str::to_string)
                .unwrap_or_else(|| state.identifier.to_string());
            match class.callsign_prefix() {
                Some(prefix) => format!("{} {}", prefix, base),
                None => base,
            }
        });

        Some(OutboundEvent {
            uid: event_uid(state),
            event_type,
            generated_at: now,
            stale_at,
            latitude: position.latitude,
            longitude: position.longitude,
            height_above_ellipsoid: 0.0,
            circular_error: UNKNOWN_ERROR,
            linear_error: UNKNOWN_ERROR,
            detail: EventDetail {
                callsign,
                track_course: position
                    .course_over_ground
                    .or(position.true_heading.map(f64::from)),
                track_speed: position.speed_over_ground,
                remarks: self.remarks(state, class),
                icon_ref: directive.icon_override.clone(),
            },
        })
    }

    fn remarks(&self, state: &VesselState, class: VesselClass) -> String {
        let mut fields = Vec::new();
        if let Some(identity) = &state.identity {
            if let Some(name) = &identity.name {
                fields.push(format!("AIS Name: {}", name));
            }
            if let Some(callsign) = &identity.callsign {
                fields.push(format!("Callsign: {}", callsign));
            }
            if let Some(code) = identity.ship_type_code {
                fields.push(format!("Type: {}", code));
            }
            if let Some(destination) = &identity.destination {
                fields.push(format!("Destination: {}", destination));
            }
        }
        fields.push(format!("MMSI: {}", state.identifier));
        if let Some(remark) = class.remark() {
            fields.push(remark.to_string());
        }
        if let Some(host_id) = &self.host_id {
            fields.push(host_id.clone());
        }
        fields.join(" ")
    }
}

/// Stable across restarts so consumers track one entity per vessel
pub fn event_uid(state: &VesselState) -> String {
    format!("MMSI-{}", state.identifier)
}
