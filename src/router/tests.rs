//! Tests for Router module

use super::*;
use crate::midi::{Channel, MsgType};
use crate::rule::filter::{Filter, FilterKind, KeyedFilterSettings};
use crate::rule::generator::{Generator, GeneratorKind, KeyedGeneratorSettings};
use crate::rule::transform::{NoiseSettings, Transform, TransformMode};
use anyhow::Result;

#[derive(Default)]
struct RecordingPort {
    sent: parking_lot::Mutex<Vec<Vec<u8>>>,
    fail: bool,
}

impl RecordingPort {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }
}

impl OutputPort for RecordingPort {
    fn name(&self) -> &str {
        "recorder"
    }

    fn send(&self, data: &[u8]) -> Result<()> {
        if self.fail {
            anyhow::bail!("port closed");
        }
        self.sent.lock().push(data.to_vec());
        Ok(())
    }
}

fn settings(passthrough: bool, send_limit_ms: u64) -> RouterSettings {
    RouterSettings {
        name: "test".to_string(),
        passthrough,
        send_limit: Duration::from_millis(send_limit_ms),
        verbose: true,
    }
}

fn cc_rule(name: &str, input: u8, output: u8, transform: Transform) -> Rule {
    let filter = Filter::new(
        Channel::Number(1),
        FilterKind::ControlChange(KeyedFilterSettings {
            number: Some(input),
            ..Default::default()
        }),
    )
    .unwrap();
    let generator = Generator::new(
        Channel::Number(1),
        GeneratorKind::ControlChange(KeyedGeneratorSettings {
            number: Some(output),
            ..Default::default()
        }),
    )
    .unwrap();
    Rule::new(name, filter, transform, generator)
}

fn router(
    settings: RouterSettings,
    rules: Vec<Rule>,
) -> (Router, Arc<RecordingPort>) {
    let port = Arc::new(RecordingPort::default());
    let router = Router::new(settings, rules, port.clone()).unwrap();
    (router, port)
}

#[tokio::test]
async fn test_rule_output_is_sent() {
    let volume = Transform::new(TransformMode::Linear, 0, 127, 0, 100, None).unwrap();
    let (router, port) = router(settings(false, 0), vec![cc_rule("Volume", 7, 7, volume)]);

    let result = router.on_packet(&Packet::new(vec![0xB0, 0x07, 0x7F], 0));

    assert_eq!(result, vec![Dispatch::Injected]);
    assert_eq!(port.sent(), vec![vec![0xB0, 0x07, 100]]);
}

#[tokio::test]
async fn test_first_matching_rule_wins() {
    let rules = vec![
        cc_rule("First", 7, 20, Transform::none()),
        cc_rule("Second", 7, 30, Transform::none()),
    ];
    let (router, port) = router(settings(false, 0), rules);

    router.on_packet(&Packet::new(vec![0xB0, 7, 64], 0));

    assert_eq!(port.sent(), vec![vec![0xB0, 20, 64]]);
    let rules = router.rules.lock();
    assert_eq!(rules[1].stats().evaluated, 0);
}

#[tokio::test]
async fn test_linear_drop_falls_through_to_next_rule() {
    let drop = Transform::new(TransformMode::LinearDrop, 0, 100, 0, 127, None).unwrap();
    let rules = vec![
        cc_rule("Drop", 7, 7, drop),
        cc_rule("Fallback", 7, 8, Transform::none()),
    ];
    let (router, port) = router(settings(false, 0), rules);

    let result = router.on_packet(&Packet::new(vec![0xB0, 7, 101], 0));

    assert_eq!(result, vec![Dispatch::Injected]);
    assert_eq!(port.sent(), vec![vec![0xB0, 8, 101]]);
    let rules = router.rules.lock();
    assert_eq!(rules[0].stats().out_of_range, 1);
    assert_eq!(rules[1].stats().injected, 1);
}

#[tokio::test(start_paused = true)]
async fn test_consumed_message_stops_iteration() {
    let rules = vec![
        cc_rule("Dedup", 7, 7, Transform::none()).with_drop_duplicates(Duration::from_secs(1)),
        cc_rule("Fallback", 7, 8, Transform::none()),
    ];
    let (router, port) = router(settings(false, 0), rules);
    let message = Packet::new(vec![0xB0, 7, 64], 0);

    assert_eq!(router.on_packet(&message), vec![Dispatch::Injected]);
    assert_eq!(router.on_packet(&message), vec![Dispatch::Consumed]);

    assert_eq!(port.sent(), vec![vec![0xB0, 7, 64]]);
    let rules = router.rules.lock();
    assert_eq!(rules[0].stats().duplicates_dropped, 1);
    assert_eq!(rules[1].stats().evaluated, 0);
}

#[tokio::test]
async fn test_unmatched_message_is_dropped() {
    let (router, port) = router(
        settings(false, 0),
        vec![cc_rule("Volume", 7, 7, Transform::none())],
    );

    let result = router.on_packet(&Packet::new(vec![0x90, 60, 100], 0));

    assert_eq!(result, vec![Dispatch::NoMatch]);
    assert!(port.sent().is_empty());
}

#[tokio::test]
async fn test_packet_is_split_before_dispatch() {
    let (router, port) = router(settings(true, 0), vec![]);

    let result = router.on_packet(&Packet::new(vec![0x90, 60, 100, 0xC0, 5], 0));

    assert_eq!(result, vec![Dispatch::Forwarded, Dispatch::Forwarded]);
    assert_eq!(port.sent(), vec![vec![0x90, 60, 100], vec![0xC0, 5]]);
}

#[tokio::test]
async fn test_empty_packet_is_ignored() {
    let (router, port) = router(settings(true, 0), vec![]);

    assert_eq!(router.on_packet(&Packet::new(Vec::<u8>::new(), 0)), vec![Dispatch::Ignored]);
    assert!(port.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_limit_drops_fast_messages() {
    let (router, port) = router(settings(true, 100), vec![]);
    let message = Packet::new(vec![0xB0, 7, 64], 0);

    assert_eq!(router.on_packet(&message), vec![Dispatch::Forwarded]);
    tokio::time::advance(Duration::from_millis(30)).await;
    assert_eq!(router.on_packet(&message), vec![Dispatch::RateLimited]);
    tokio::time::advance(Duration::from_millis(80)).await;
    assert_eq!(router.on_packet(&message), vec![Dispatch::Forwarded]);

    assert_eq!(port.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_send_limit_applies_to_rule_output() {
    let (router, port) = router(
        settings(false, 100),
        vec![cc_rule("Volume", 7, 7, Transform::none())],
    );

    assert_eq!(
        router.on_packet(&Packet::new(vec![0xB0, 7, 10], 0)),
        vec![Dispatch::Injected]
    );
    tokio::time::advance(Duration::from_millis(30)).await;
    assert_eq!(
        router.on_packet(&Packet::new(vec![0xB0, 7, 20], 0)),
        vec![Dispatch::RateLimited]
    );
    tokio::time::advance(Duration::from_millis(80)).await;
    assert_eq!(
        router.on_packet(&Packet::new(vec![0xB0, 7, 30], 0)),
        vec![Dispatch::Injected]
    );

    assert_eq!(port.sent(), vec![vec![0xB0, 7, 10], vec![0xB0, 7, 30]]);
}

#[tokio::test(start_paused = true)]
async fn test_delayed_noise_respects_send_limit() {
    let noise = NoiseSettings::new(MsgType::ControlChange, Channel::Any, 10, 20, 5, 5).unwrap();
    let transform = Transform::new(TransformMode::Noise, 0, 127, 0, 127, Some(noise)).unwrap();
    let (router, port) = router(settings(false, 100), vec![cc_rule("Noise", 7, 7, transform)]);

    assert_eq!(
        router.on_packet(&Packet::new(vec![0xB0, 7, 64], 0)),
        vec![Dispatch::Injected]
    );
    let last = router.limiter().last_send();
    assert!(last.is_some());

    tokio::time::sleep(Duration::from_millis(10)).await;

    // Noise fired 5 ms after the primary send, inside the 100 ms window
    assert_eq!(port.sent(), vec![vec![0xB0, 7, 64]]);
    assert_eq!(router.limiter().last_send(), last);
}

#[tokio::test]
async fn test_passthrough_stop_resets_destination() {
    let (router, port) = router(settings(true, 0), vec![]);

    let result = router.on_packet(&Packet::new(vec![0xFC], 0));

    assert_eq!(result, vec![Dispatch::Forwarded]);
    let sent = port.sent();
    assert_eq!(sent.len(), 1 + 32);
    assert_eq!(sent[0], vec![0xFC]);
    assert_eq!(sent[1], vec![0xB0, 123, 0]);
    assert_eq!(sent[2], vec![0xB0, 121, 0]);
    assert_eq!(sent[32], vec![0xBF, 121, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_reset_does_not_move_send_limit() {
    let (router, port) = router(settings(true, 100), vec![]);

    router.on_packet(&Packet::new(vec![0xFC], 0));
    let last = router.limiter().last_send();
    router.cleanup();

    assert_eq!(router.limiter().last_send(), last);
    assert_eq!(port.sent().len(), 1 + 32 + 32);
}

#[tokio::test(start_paused = true)]
async fn test_delayed_noise_is_sent_later() {
    let noise = NoiseSettings::new(MsgType::ControlChange, Channel::Any, 10, 20, 5, 5).unwrap();
    let transform = Transform::new(TransformMode::Noise, 0, 127, 0, 127, Some(noise)).unwrap();
    let (router, port) = router(settings(false, 0), vec![cc_rule("Noise", 7, 7, transform)]);

    assert_eq!(
        router.on_packet(&Packet::new(vec![0xB0, 7, 64], 0)),
        vec![Dispatch::Injected]
    );
    assert_eq!(port.sent(), vec![vec![0xB0, 7, 64]]);

    tokio::time::sleep(Duration::from_millis(10)).await;

    let sent = port.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(&sent[1][..2], &[0xB0, 64]);
    assert!((10..=20).contains(&sent[1][2]));
}

#[tokio::test]
async fn test_immediate_noise_is_sent_inline() {
    let noise = NoiseSettings::new(MsgType::ProgramChange, Channel::Number(2), 3, 3, 0, 0).unwrap();
    let transform = Transform::new(TransformMode::Noise, 0, 127, 0, 127, Some(noise)).unwrap();
    let (router, port) = router(settings(false, 0), vec![cc_rule("Noise", 7, 7, transform)]);

    router.on_packet(&Packet::new(vec![0xB0, 7, 64], 0));

    assert_eq!(port.sent(), vec![vec![0xB0, 7, 64], vec![0xC1, 3]]);
}

#[tokio::test]
async fn test_send_failure_is_reported() {
    let port = Arc::new(RecordingPort::failing());
    let router = Router::new(settings(true, 0), vec![], port.clone()).unwrap();

    assert_eq!(
        router.on_packet(&Packet::new(vec![0xB0, 7, 64], 0)),
        vec![Dispatch::SendFailed]
    );
    // A failed send does not count against the limiter
    assert_eq!(router.limiter().last_send(), None);
}

#[test]
fn test_router_needs_runtime() {
    let port = Arc::new(RecordingPort::default());
    let result = Router::new(settings(true, 0), vec![], port);

    assert!(matches!(result, Err(RouterError::NoRuntime(_))));
}
