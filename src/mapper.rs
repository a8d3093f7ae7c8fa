//! Aggregator and stream JSON record mapping
//!
//! Polled aggregators (AISHub, SeaVision) return flat records. The stream
//! feed (AISStream) wraps each message in an envelope with a `MessageType`
//! discriminator, a typed `Message` body and a `MetaData` block.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use serde_with::{serde_as, DefaultOnError, DisplayFromStr, PickFirst};

use crate::{
    errors::MapError,
    models::{MessageKind, Mmsi, Origin, RawAisMessage},
};

/// Flat record from a polled aggregator
///
/// See: https://www.aishub.net/api
#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AggregatorRecord {
    #[serde(rename = "MMSI", alias = "mmsi")]
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    mmsi: Option<u64>,
    #[serde(rename = "LATITUDE", alias = "latitude", alias = "lat")]
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    latitude: Option<f64>,
    #[serde(rename = "LONGITUDE", alias = "longitude", alias = "lon")]
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    longitude: Option<f64>,
    /// Knots, 102.3 = not available
    #[serde(rename = "SOG", alias = "sog", alias = "speed")]
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    sog: Option<f64>,
    /// Degrees, 360 = not available
    #[serde(rename = "COG", alias = "cog", alias = "course")]
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    cog: Option<f64>,
    /// Degrees, 511 = not available
    #[serde(rename = "HEADING", alias = "heading")]
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    heading: Option<f64>,
    #[serde(rename = "NAVSTAT", alias = "navStatus", alias = "navstat")]
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    nav_status: Option<u8>,
    #[serde(rename = "NAME", alias = "name")]
    #[serde_as(as = "DefaultOnError")]
    name: Option<String>,
    #[serde(rename = "CALLSIGN", alias = "callsign", alias = "callSign")]
    #[serde_as(as = "DefaultOnError")]
    callsign: Option<String>,
    #[serde(rename = "TYPE", alias = "type", alias = "vesselType")]
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    ship_type: Option<u8>,
    #[serde(rename = "DEST", alias = "destination")]
    #[serde_as(as = "DefaultOnError")]
    destination: Option<String>,
}

/// Stream envelope
///
/// See: https://aisstream.io/documentation
#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    #[serde(rename = "MessageType")]
    message_type: Option<String>,
    #[serde(rename = "MetaData", default)]
    meta_data: Option<StreamMetaData>,
    #[serde(rename = "Message", default)]
    message: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    error: Option<String>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StreamMetaData {
    #[serde(rename = "MMSI")]
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    mmsi: Option<u64>,
    #[serde(rename = "ShipName")]
    #[serde_as(as = "DefaultOnError")]
    ship_name: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    latitude: Option<f64>,
    #[serde_as(as = "DefaultOnError")]
    longitude: Option<f64>,
}

/// Union of the fields of the stream message bodies we read
#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct StreamBody {
    #[serde(rename = "UserID")]
    #[serde_as(as = "DefaultOnError")]
    user_id: Option<u64>,
    #[serde_as(as = "DefaultOnError")]
    latitude: Option<f64>,
    #[serde_as(as = "DefaultOnError")]
    longitude: Option<f64>,
    #[serde_as(as = "DefaultOnError")]
    sog: Option<f64>,
    #[serde_as(as = "DefaultOnError")]
    cog: Option<f64>,
    #[serde_as(as = "DefaultOnError")]
    true_heading: Option<f64>,
    #[serde_as(as = "DefaultOnError")]
    navigational_status: Option<u8>,
    #[serde_as(as = "DefaultOnError")]
    name: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    call_sign: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    r#type: Option<u8>,
    #[serde_as(as = "DefaultOnError")]
    destination: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    report_a: Option<StaticReportA>,
    #[serde_as(as = "DefaultOnError")]
    report_b: Option<StaticReportB>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct StaticReportA {
    #[serde_as(as = "DefaultOnError")]
    name: Option<String>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct StaticReportB {
    #[serde_as(as = "DefaultOnError")]
    call_sign: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    ship_type: Option<u8>,
}

/// Stream message types with a field layout we understand
pub const STREAM_MESSAGE_TYPES: [&str; 6] = [
    "PositionReport",
    "ShipStaticData",
    "StandardClassBPositionReport",
    "ExtendedClassBPositionReport",
    "AidsToNavigationReport",
    "StaticDataReport",
];

/// Unwrap a polled aggregator response into its vessel records.
///
/// AISHub answers `[status, [records...]]`; other aggregators answer a
/// bare array of records.
pub fn aggregator_records(body: &str) -> Result<Vec<Value>, MapError> {
    let value: Value = serde_json::from_str(body)?;
    let Value::Array(mut items) = value else {
        return Err(MapError::UnexpectedShape(
            "response is not a JSON array".to_string(),
        ));
    };

    let is_status = items
        .first()
        .and_then(Value::as_object)
        .is_some_and(|first| first.contains_key("ERROR"));
    if !is_status {
        return Ok(items);
    }

    let status = items.remove(0);
    if status.get("ERROR").and_then(Value::as_bool).unwrap_or(false) {
        let message = status
            .get("ERROR_MESSAGE")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(MapError::Upstream(message.to_string()));
    }

    match items.into_iter().next() {
        Some(Value::Array(records)) => Ok(records),
        Some(other) => Err(MapError::UnexpectedShape(format!(
            "expected record array after status, found {}",
            other
        ))),
        None => Ok(Vec::new()),
    }
}

/// Map one flat aggregator record.
pub fn map_aggregator_record(
    record: Value,
    received_at: DateTime<Utc>,
) -> Result<RawAisMessage, MapError> {
    let record: AggregatorRecord = serde_json::from_value(record)?;
    let mmsi = Mmsi::try_from(record.mmsi.ok_or(MapError::MissingIdentifier)?)?;

    let mut message = RawAisMessage::new(mmsi, MessageKind::Other, Origin::AggregatorFeed, received_at);
    message.latitude = record.latitude.and_then(valid_latitude);
    message.longitude = record.longitude.and_then(valid_longitude);
    message.speed_over_ground = record.sog.and_then(valid_speed);
    message.course_over_ground = record.cog.and_then(valid_course);
    message.true_heading = record.heading.and_then(valid_heading);
    message.nav_status = record.nav_status.filter(|status| *status < 15);
    message.vessel_name = record.name.as_deref().and_then(clean_text);
    message.callsign = record.callsign.as_deref().and_then(clean_text);
    message.ship_type_code = record.ship_type.filter(|code| *code != 0);
    message.destination = record.destination.as_deref().and_then(clean_text);

    message.message_kind = if message.has_position() {
        MessageKind::PositionReport
    } else if message.has_identity() {
        MessageKind::StaticData
    } else {
        MessageKind::Other
    };

    Ok(message)
}

/// Map one stream frame.
///
/// Identifier, ship name and (for position-bearing kinds) coordinates fall
/// back to the `MetaData` block when the typed body does not carry them.
/// Stream coordinates are latitude-first; each axis is range-checked on its
/// own and never reordered.
pub fn map_stream_frame(
    frame: &str,
    received_at: DateTime<Utc>,
) -> Result<RawAisMessage, MapError> {
    let envelope: StreamEnvelope = serde_json::from_str(frame)?;
    if let Some(error) = envelope.error {
        return Err(MapError::Upstream(error));
    }

    let message_type = envelope
        .message_type
        .ok_or_else(|| MapError::UnexpectedShape("missing MessageType".to_string()))?;
    let kind = stream_kind(&message_type);

    let body: StreamBody = match envelope
        .message
        .and_then(|mut message| message.remove(&message_type))
    {
        Some(body) => serde_json::from_value(body)?,
        None => StreamBody::default(),
    };
    let meta = envelope.meta_data.unwrap_or_default();

    let raw_mmsi = body
        .user_id
        .or(meta.mmsi)
        .ok_or(MapError::MissingIdentifier)?;
    let mmsi = Mmsi::try_from(raw_mmsi)?;

    let mut message = RawAisMessage::new(mmsi, kind, Origin::StreamFeed, received_at);

    let carries_position = matches!(
        kind,
        MessageKind::PositionReport | MessageKind::AidToNavigation
    );
    if carries_position {
        let (latitude, longitude) = match (body.latitude, body.longitude) {
            (Some(lat), Some(lon)) => (Some(lat), Some(lon)),
            _ => (meta.latitude, meta.longitude),
        };
        message.latitude = latitude.and_then(valid_latitude);
        message.longitude = longitude.and_then(valid_longitude);
        message.speed_over_ground = body.sog.and_then(valid_speed);
        message.course_over_ground = body.cog.and_then(valid_course);
        message.true_heading = body.true_heading.and_then(valid_heading);
        message.nav_status = body.navigational_status.filter(|status| *status < 15);
    }

    let report_name = body.report_a.and_then(|a| a.name);
    let (report_callsign, report_type) = body
        .report_b
        .map(|b| (b.call_sign, b.ship_type))
        .unwrap_or_default();

    message.vessel_name = body
        .name
        .or(report_name)
        .as_deref()
        .and_then(clean_text)
        .or_else(|| meta.ship_name.as_deref().and_then(clean_text));
    message.callsign = body
        .call_sign
        .or(report_callsign)
        .as_deref()
        .and_then(clean_text);
    // Aids to navigation reuse `Type` for the aid type, not a ship type.
    let ship_type = if kind == MessageKind::AidToNavigation {
        None
    } else {
        body.r#type.or(report_type)
    };
    message.ship_type_code = ship_type.filter(|code| *code != 0);
    message.destination = body.destination.as_deref().and_then(clean_text);

    Ok(message)
}

fn stream_kind(message_type: &str) -> MessageKind {
    match message_type {
        "PositionReport"
        | "StandardClassBPositionReport"
        | "ExtendedClassBPositionReport"
        | "LongRangeAisBroadcastMessage" => MessageKind::PositionReport,
        "ShipStaticData" | "StaticDataReport" => MessageKind::StaticData,
        "AidsToNavigationReport" => MessageKind::AidToNavigation,
        "SafetyBroadcastMessage" | "AddressedSafetyMessage" => MessageKind::SafetyBroadcast,
        _ => MessageKind::Other,
    }
}

fn valid_latitude(value: f64) -> Option<f64> {
    (-90.0..=90.0).contains(&value).then_some(value)
}

fn valid_longitude(value: f64) -> Option<f64> {
    (-180.0..=180.0).contains(&value).then_some(value)
}

/// 102.3 knots = not available
fn valid_speed(value: f64) -> Option<f64> {
    (0.0..102.3).contains(&value).then_some(value)
}

/// 360 = not available
fn valid_course(value: f64) -> Option<f64> {
    (0.0..360.0).contains(&value).then_some(value)
}

/// 511 = not available
fn valid_heading(value: f64) -> Option<u16> {
    (0.0..360.0).contains(&value).then(|| value as u16)
}

/// Strip six-bit `@` padding and surrounding whitespace.
fn clean_text(value: &str) -> Option<String> {
    let cleaned = value.replace('@', "");
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
