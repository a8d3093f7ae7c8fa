//! AIVDM/AIVDO sentence decoder
//!
//! See: https://gpsd.gitlab.io/gpsd/AIVDM.html

mod bits;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::{
    errors::DecodeError,
    models::{MessageKind, Mmsi, Origin, RawAisMessage},
};
use bits::Payload;

/// Default seconds to wait for the remaining fragments of a group
pub const DEFAULT_FRAGMENT_TIMEOUT_SECS: i64 = 10;

/// Partially received multi-sentence message
#[derive(Debug)]
struct FragmentBuffer {
    total: u8,
    next: u8,
    armored: String,
    started_at: DateTime<Utc>,
}

/// Framing fields of one physical sentence
#[derive(Debug, PartialEq)]
struct Sentence<'a> {
    fragment_count: u8,
    fragment_number: u8,
    group_id: &'a str,
    channel: &'a str,
    payload: &'a str,
    fill_bits: u8,
}

/// Stateful decoder. Owns the fragment reassembly buffer, so each radio
/// feed keeps its own instance.
#[derive(Debug)]
pub struct SentenceDecoder {
    fragments: HashMap<String, FragmentBuffer>,
    fragment_timeout: Duration,
}

impl Default for SentenceDecoder {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_FRAGMENT_TIMEOUT_SECS))
    }
}

impl SentenceDecoder {
    pub fn new(fragment_timeout: Duration) -> Self {
        Self {
            fragments: HashMap::new(),
            fragment_timeout,
        }
    }

    /// Decode one sentence received at `now`.
    ///
    /// Returns `Ok(None)` when the sentence is a non-final fragment that was
    /// buffered for reassembly.
    pub fn decode(
        &mut self,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RawAisMessage>, DecodeError> {
        let sentence = parse_sentence(raw)?;

        if sentence.fragment_count == 1 {
            return decode_payload(sentence.payload, sentence.fill_bits, now).map(Some);
        }

        for expired in self.expire(now) {
            debug!("Discarded stale fragments: {}", expired);
        }

        let key = format!("{}:{}", sentence.group_id, sentence.channel);

        if sentence.fragment_number == 1 {
            if self.fragments.contains_key(&key) {
                debug!("Fragment group {} restarted before completion", key);
            }
            self.fragments.insert(
                key,
                FragmentBuffer {
                    total: sentence.fragment_count,
                    next: 2,
                    armored: sentence.payload.to_string(),
                    started_at: now,
                },
            );
            return Ok(None);
        }

        let in_sequence = self.fragments.get(&key).is_some_and(|buffer| {
            buffer.total == sentence.fragment_count && buffer.next == sentence.fragment_number
        });
        if !in_sequence {
            self.fragments.remove(&key);
            return Err(DecodeError::IncompleteFragment { group: key });
        }

        let Some(buffer) = self.fragments.get_mut(&key) else {
            return Err(DecodeError::IncompleteFragment { group: key });
        };
        buffer.armored.push_str(sentence.payload);
        buffer.next += 1;

        if sentence.fragment_number < sentence.fragment_count {
            return Ok(None);
        }

        let Some(complete) = self.fragments.remove(&key) else {
            return Err(DecodeError::IncompleteFragment { group: key });
        };
        decode_payload(&complete.armored, sentence.fill_bits, now).map(Some)
    }

    /// Drop fragment groups older than the timeout, one error per group.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<DecodeError> {
        let timeout = self.fragment_timeout;
        let expired: Vec<String> = self
            .fragments
            .iter()
            .filter(|(_, buffer)| now - buffer.started_at > timeout)
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .map(|key| {
                self.fragments.remove(&key);
                DecodeError::IncompleteFragment { group: key }
            })
            .collect()
    }

    /// Number of fragment groups awaiting completion
    pub fn pending_groups(&self) -> usize {
        self.fragments.len()
    }
}

/// Validate framing and checksum of a sentence.
fn parse_sentence(raw: &str) -> Result<Sentence<'_>, DecodeError> {
    let line = strip_tag_block(raw.trim());

    if !line.starts_with('!') && !line.starts_with('$') {
        return Err(DecodeError::Framing("missing start delimiter".to_string()));
    }
    let (body, checksum) = line
        .rsplit_once('*')
        .ok_or_else(|| DecodeError::Framing("missing checksum".to_string()))?;
    let expected = checksum
        .get(..2)
        .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        .ok_or_else(|| DecodeError::Framing(format!("bad checksum field {:?}", checksum)))?;
    let computed = body[1..].bytes().fold(0u8, |acc, b| acc ^ b);
    if computed != expected {
        return Err(DecodeError::Checksum { expected, computed });
    }

    let fields: Vec<&str> = body[1..].split(',').collect();
    if fields.len() != 7 {
        return Err(DecodeError::Framing(format!(
            "expected 7 fields, found {}",
            fields.len()
        )));
    }

    let talker = fields[0];
    if !(talker.ends_with("VDM") || talker.ends_with("VDO")) {
        return Err(DecodeError::UnsupportedTalker(talker.to_string()));
    }

    let fragment_count = parse_small(fields[1], "fragment count")?;
    let fragment_number = parse_small(fields[2], "fragment number")?;
    if fragment_count == 0 || fragment_number == 0 || fragment_number > fragment_count {
        return Err(DecodeError::Framing(format!(
            "fragment {} of {}",
            fragment_number, fragment_count
        )));
    }
    let fill_bits = parse_small(fields[6], "fill bits")?;
    if fill_bits > 5 {
        return Err(DecodeError::Framing(format!("fill bits {}", fill_bits)));
    }

    Ok(Sentence {
        fragment_count,
        fragment_number,
        group_id: fields[3],
        channel: fields[4],
        payload: fields[5],
        fill_bits,
    })
}

/// NMEA 4.0 tag blocks are wrapped in backslashes ahead of the sentence.
fn strip_tag_block(line: &str) -> &str {
    match line.strip_prefix('\\').and_then(|rest| rest.split_once('\\')) {
        Some((_, sentence)) => sentence,
        None => line,
    }
}

fn parse_small(field: &str, name: &str) -> Result<u8, DecodeError> {
    field
        .parse::<u8>()
        .map_err(|_| DecodeError::Framing(format!("bad {} {:?}", name, field)))
}

/// Extract message fields from a complete armored payload.
fn decode_payload(
    armored: &str,
    fill_bits: u8,
    received_at: DateTime<Utc>,
) -> Result<RawAisMessage, DecodeError> {
    let payload = Payload::from_armored(armored, fill_bits)?;

    let (Some(message_type), Some(raw_mmsi)) = (payload.uint(0, 6), payload.uint(8, 30)) else {
        return Err(DecodeError::InvalidPayload(format!(
            "payload too short: {} bits",
            payload.bit_len()
        )));
    };
    let mmsi = Mmsi::try_from(raw_mmsi)
        .map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;

    let message = RawAisMessage::new(mmsi, MessageKind::Other, Origin::RadioFeed, received_at);

    Ok(match message_type {
        1..=3 => class_a_position(&payload, message),
        4 => base_station(&payload, message),
        5 => static_voyage(&payload, message),
        18 => class_b_position(&payload, message),
        19 => extended_class_b(&payload, message),
        21 => aid_to_navigation(&payload, message),
        24 => static_data_report(&payload, message),
        12 | 14 => RawAisMessage {
            message_kind: MessageKind::SafetyBroadcast,
            ..message
        },
        other => {
            debug!("No field layout for message type {}", other);
            message
        }
    })
}

/// Types 1, 2 and 3
fn class_a_position(payload: &Payload, message: RawAisMessage) -> RawAisMessage {
    RawAisMessage {
        message_kind: MessageKind::PositionReport,
        nav_status: payload.uint(38, 4).and_then(nav_status),
        speed_over_ground: payload.uint(50, 10).and_then(speed),
        longitude: payload.int(61, 28).and_then(longitude),
        latitude: payload.int(89, 27).and_then(latitude),
        course_over_ground: payload.uint(116, 12).and_then(course),
        true_heading: payload.uint(128, 9).and_then(heading),
        ..message
    }
}

/// Type 4
fn base_station(payload: &Payload, message: RawAisMessage) -> RawAisMessage {
    RawAisMessage {
        message_kind: MessageKind::PositionReport,
        longitude: payload.int(79, 28).and_then(longitude),
        latitude: payload.int(107, 27).and_then(latitude),
        ..message
    }
}

/// Type 5
fn static_voyage(payload: &Payload, message: RawAisMessage) -> RawAisMessage {
    RawAisMessage {
        message_kind: MessageKind::StaticData,
        callsign: payload.text(70, 42),
        vessel_name: payload.text(112, 120),
        ship_type_code: payload.uint(232, 8).and_then(ship_type),
        destination: payload.text(302, 120),
        ..message
    }
}

/// Type 18
fn class_b_position(payload: &Payload, message: RawAisMessage) -> RawAisMessage {
    RawAisMessage {
        message_kind: MessageKind::PositionReport,
        speed_over_ground: payload.uint(46, 10).and_then(speed),
        longitude: payload.int(57, 28).and_then(longitude),
        latitude: payload.int(85, 27).and_then(latitude),
        course_over_ground: payload.uint(112, 12).and_then(course),
        true_heading: payload.uint(124, 9).and_then(heading),
        ..message
    }
}

/// Type 19 carries both a position and the vessel's name and type.
fn extended_class_b(payload: &Payload, message: RawAisMessage) -> RawAisMessage {
    let positioned = class_b_position(payload, message);
    RawAisMessage {
        vessel_name: payload.text(143, 120),
        ship_type_code: payload.uint(263, 8).and_then(ship_type),
        ..positioned
    }
}

/// Type 21
fn aid_to_navigation(payload: &Payload, message: RawAisMessage) -> RawAisMessage {
    let name = match (payload.text(43, 120), payload.text(272, 88)) {
        (Some(name), Some(extension)) => Some(format!("{}{}", name, extension)),
        (name, _) => name,
    };
    RawAisMessage {
        message_kind: MessageKind::AidToNavigation,
        vessel_name: name,
        longitude: payload.int(164, 28).and_then(longitude),
        latitude: payload.int(192, 27).and_then(latitude),
        ..message
    }
}

/// Type 24, part A carries the name and part B the type and call sign.
fn static_data_report(payload: &Payload, message: RawAisMessage) -> RawAisMessage {
    let message = RawAisMessage {
        message_kind: MessageKind::StaticData,
        ..message
    };
    match payload.uint(38, 2) {
        Some(0) => RawAisMessage {
            vessel_name: payload.text(40, 120),
            ..message
        },
        Some(1) => RawAisMessage {
            ship_type_code: payload.uint(40, 8).and_then(ship_type),
            callsign: payload.text(90, 42),
            ..message
        },
        _ => message,
    }
}

/// Longitude in 1/10000 minutes, 181 = not available
fn longitude(raw: i64) -> Option<f64> {
    let degrees = raw as f64 / 600_000.0;
    (-180.0..=180.0).contains(&degrees).then_some(degrees)
}

/// Latitude in 1/10000 minutes, 91 = not available
fn latitude(raw: i64) -> Option<f64> {
    let degrees = raw as f64 / 600_000.0;
    (-90.0..=90.0).contains(&degrees).then_some(degrees)
}

/// Speed over ground in 1/10 knots, 1023 = not available
fn speed(raw: u64) -> Option<f64> {
    (raw < 1023).then(|| raw as f64 / 10.0)
}

/// Course over ground in 1/10 degrees, 3600 = not available
fn course(raw: u64) -> Option<f64> {
    (raw < 3600).then(|| raw as f64 / 10.0)
}

/// 511 = not available
fn heading(raw: u64) -> Option<u16> {
    (raw < 360).then_some(raw as u16)
}

/// 15 = not defined
fn nav_status(raw: u64) -> Option<u8> {
    (raw < 15).then_some(raw as u8)
}

/// 0 = not available
fn ship_type(raw: u64) -> Option<u8> {
    (raw != 0).then_some(raw as u8)
}
