use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ais_cot::{
    config::CotConfig,
    coordinator::{Coordinator, Pipeline},
    cot,
    decoder::SentenceDecoder,
    known_craft::{parse_rules, KnownCraftMatcher},
    mapper::map_stream_frame,
    models::Mmsi,
    synthesizer::EventSynthesizer,
    transport::ChannelSink,
};

const POSITION_FRAME: &str =
    r#"{"MetaData":{"MMSI":123456789,"latitude":10.0,"longitude":20.0},"MessageType":"PositionReport"}"#;
const STATIC_FRAME: &str =
    r#"{"MetaData":{"MMSI":123456789,"ShipName":"TESTSHIP"},"MessageType":"ShipStaticData"}"#;

fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
}

fn pipeline(matcher: KnownCraftMatcher) -> Pipeline {
    Pipeline::new(matcher, EventSynthesizer::new(&CotConfig::default()))
}

#[test]
fn test_stream_position_then_static_data() {
    let mut pipeline = pipeline(KnownCraftMatcher::default());

    let first = map_stream_frame(POSITION_FRAME, at(0)).unwrap();
    let second = map_stream_frame(STATIC_FRAME, at(1)).unwrap();

    let event_1 = pipeline.process(&first, at(0)).unwrap();
    let event_2 = pipeline.process(&second, at(1)).unwrap();

    assert_eq!(event_1.uid, event_2.uid);
    assert_eq!((event_1.latitude, event_1.longitude), (10.0, 20.0));
    assert_eq!((event_2.latitude, event_2.longitude), (10.0, 20.0));
    assert_eq!(event_1.detail.callsign, "123456789");
    assert_eq!(event_2.detail.callsign, "TESTSHIP");

    let mmsi = Mmsi::try_from(123_456_789u32).unwrap();
    let state = pipeline.registry().get(&mmsi).unwrap();
    assert_eq!(pipeline.registry().len(), 1);
    let position = state.position.as_ref().unwrap();
    assert_eq!((position.latitude, position.longitude), (10.0, 20.0));
    assert_eq!(state.name(), Some("TESTSHIP"));
}

#[tokio::test]
async fn test_coordinator_emits_two_events() {
    let (event_tx, mut event_rx) = mpsc::channel(8);
    let mut coordinator = Coordinator::new(
        pipeline(KnownCraftMatcher::default()),
        ChannelSink::new(event_tx),
    )
    .with_shutdown_grace(Duration::from_millis(100));

    let (tx, rx) = mpsc::channel(8);
    for frame in [POSITION_FRAME, STATIC_FRAME] {
        tx.send(map_stream_frame(frame, Utc::now()).unwrap())
            .await
            .unwrap();
    }
    drop(tx);

    coordinator
        .drive(rx, std::future::pending(), &CancellationToken::new())
        .await;

    let first = event_rx.recv().await.unwrap();
    let second = event_rx.recv().await.unwrap();
    assert!(event_rx.try_recv().is_err());

    assert_eq!(first.uid, "MMSI-123456789");
    assert_eq!((second.latitude, second.longitude), (10.0, 20.0));
    assert_eq!(second.detail.callsign, "TESTSHIP");

    let xml = cot::render(&second);
    assert!(xml.contains(r#"<point lat="10" lon="20""#));
    assert!(xml.contains(r#"callsign="TESTSHIP""#));
}

#[test]
fn test_known_craft_override_and_exclusion() {
    let rules = parse_rules(
        "field,value,cot,icon,exclude\nMMSI,123456789,X,,false\nMMSI,987654321,,,true\n",
    )
    .unwrap();
    let mut pipeline = pipeline(KnownCraftMatcher::new(rules, false));

    let overridden = map_stream_frame(POSITION_FRAME, at(0)).unwrap();
    let event = pipeline.process(&overridden, at(0)).unwrap();
    assert_eq!(event.event_type, "X");

    let excluded = map_stream_frame(
        r#"{"MetaData":{"MMSI":987654321,"latitude":10.0,"longitude":20.0},"MessageType":"PositionReport"}"#,
        at(0),
    )
    .unwrap();
    assert!(pipeline.process(&excluded, at(0)).is_none());
    // Excluded vessels are still tracked.
    assert_eq!(pipeline.registry().len(), 2);
}

#[test]
fn test_stale_deadline() {
    let mut pipeline = pipeline(KnownCraftMatcher::default());
    let now = at(0);
    let message = map_stream_frame(POSITION_FRAME, now).unwrap();

    let event = pipeline.process(&message, now).unwrap();
    assert_eq!(event.generated_at, now);
    assert_eq!(event.stale_at, now + chrono::Duration::seconds(3600));
}

#[test]
fn test_radio_sentence_to_event() {
    let mut decoder = SentenceDecoder::default();
    let mut pipeline = pipeline(KnownCraftMatcher::default());
    let now = at(0);

    let position = decoder
        .decode("!AIVDM,1,1,,B,139`n:0P0;o>Qm@EUc838wvj2<25,0*4E", now)
        .unwrap()
        .unwrap();
    let event = pipeline.process(&position, now).unwrap();
    assert_eq!(event.uid, "MMSI-211433000");
    assert!((event.latitude - 37.728_906_67).abs() < 1e-6);
    assert!((event.longitude + 122.655_293_33).abs() < 1e-6);
    assert_eq!(event.detail.track_course, Some(80.3));
}
