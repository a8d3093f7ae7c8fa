//! Cursor on Target XML rendering

use std::fmt::{self, Write};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::synthesizer::OutboundEvent;

/// Metres per second in one knot
pub const KNOTS_TO_MPS: f64 = 0.514444;

/// Machine-generated, GPS-derived
const HOW: &str = "m-g";

/// Serialize an event to a CoT 2.0 XML document
pub fn render(event: &OutboundEvent) -> String {
    let mut xml = String::with_capacity(512);
    // Writing to a String cannot fail.
    let _ = write_event(&mut xml, event);
    xml
}

fn write_event(xml: &mut String, event: &OutboundEvent) -> fmt::Result {
    writeln!(xml, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    write!(
        xml,
        r#"<event version="2.0" uid="{}" type="{}" how="{}" time="{}" start="{}" stale="{}">"#,
        escape(&event.uid),
        escape(&event.event_type),
        HOW,
        timestamp(event.generated_at),
        timestamp(event.generated_at),
        timestamp(event.stale_at),
    )?;
    write!(
        xml,
        r#"<point lat="{}" lon="{}" hae="{}" ce="{}" le="{}"/>"#,
        event.latitude,
        event.longitude,
        event.height_above_ellipsoid,
        event.circular_error,
        event.linear_error
    )?;

    let detail = &event.detail;
    write!(xml, "<detail>")?;
    write!(xml, r#"<contact callsign="{}"/>"#, escape(&detail.callsign))?;

    if detail.track_course.is_some() || detail.track_speed.is_some() {
        write!(xml, "<track")?;
        if let Some(course) = detail.track_course {
            write!(xml, r#" course="{}""#, course)?;
        }
        if let Some(speed) = detail.track_speed {
            write!(xml, r#" speed="{}""#, speed * KNOTS_TO_MPS)?;
        }
        write!(xml, "/>")?;
    }

    write!(xml, "<remarks>{}</remarks>", escape(&detail.remarks))?;

    if let Some(icon) = &detail.icon_ref {
        write!(xml, r#"<usericon iconsetpath="{}"/>"#, escape(icon))?;
    }
    write!(xml, "</detail>")?;
    writeln!(xml, "</event>")
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesizer::EventDetail;

    fn event() -> OutboundEvent {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        OutboundEvent {
            uid: "MMSI-366892000".to_string(),
            event_type: "a-u-S-X-M".to_string(),
            generated_at: now,
            stale_at: now + chrono::Duration::seconds(3600),
            latitude: 37.81691,
            longitude: -122.51208,
            height_above_ellipsoid: 0.0,
            circular_error: 9_999_999.0,
            linear_error: 9_999_999.0,
            detail: EventDetail {
                callsign: "TACO BOAT".to_string(),
                track_course: Some(97.1),
                track_speed: Some(1.0),
                remarks: "MMSI: 366892000".to_string(),
                icon_ref: None,
            },
        }
    }

    #[test]
    fn test_render_event() {
        let xml = render(&event());

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(r#"uid="MMSI-366892000""#));
        assert!(xml.contains(r#"type="a-u-S-X-M""#));
        assert!(xml.contains(r#"how="m-g""#));
        assert!(xml.contains(r#"time="2023-11-14T22:13:20.000Z""#));
        assert!(xml.contains(r#"start="2023-11-14T22:13:20.000Z""#));
        assert!(xml.contains(r#"stale="2023-11-14T23:13:20.000Z""#));
        assert!(xml.contains(
            r#"<point lat="37.81691" lon="-122.51208" hae="0" ce="9999999" le="9999999"/>"#
        ));
        assert!(xml.contains(r#"<contact callsign="TACO BOAT"/>"#));
        assert!(xml.contains(r#"<track course="97.1" speed="0.514444"/>"#));
        assert!(xml.contains("<remarks>MMSI: 366892000</remarks>"));
        assert!(!xml.contains("usericon"));
        assert!(xml.trim_end().ends_with("</event>"));
    }

    #[test]
    fn test_render_escapes_text() {
        let mut event = event();
        event.detail.callsign = r#"A&B "C" <D>"#.to_string();
        event.detail.icon_ref = Some("icons/tug's.png".to_string());
        event.detail.track_course = None;
        event.detail.track_speed = None;

        let xml = render(&event);

        assert!(xml.contains(r#"callsign="A&amp;B &quot;C&quot; &lt;D&gt;""#));
        assert!(xml.contains(r#"<usericon iconsetpath="icons/tug&apos;s.png"/>"#));
        assert!(!xml.contains("<track"));
    }
}
