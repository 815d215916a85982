//! End-to-end runs of the gateway loop against the host fakes.

use esp32_p1_gateway::display::LogDisplay;
use esp32_p1_gateway::gateway::{GatewayStats, MeterGateway};
use esp32_p1_gateway::meter::simulator::{frame, fluvius_sample, FLUVIUS_SAMPLE_BODY};
use esp32_p1_gateway::mqtt::MqttSession;
use esp32_p1_gateway::network_config::{GatewayConfig, MqttConfig, WifiConfig};
use esp32_p1_gateway::p1::{DispatchStats, ParseError, TelegramDispatcher};
use esp32_p1_gateway::testing::{
    ManualClock, MockByteSource, MockMqttTransport, MockRadio, RecordingDelay,
};
use esp32_p1_gateway::wifi::{LinkManager, LinkState};

type MqttGateway = MeterGateway<
    MockByteSource,
    MqttSession<MockRadio, RecordingDelay, ManualClock, MockMqttTransport>,
    ManualClock,
    LogDisplay,
>;

struct Rig {
    clock: ManualClock,
    radio: MockRadio,
    delay: RecordingDelay,
    transport: MockMqttTransport,
    source: MockByteSource,
    gateway: MqttGateway,
}

fn rig() -> Rig {
    let clock = ManualClock::new(0);
    // Up at boot; the first association after a loss fails
    let radio = MockRadio::new().failing_first(1);
    radio.set_connected(true);
    let delay = RecordingDelay::driving(clock.clone());
    let transport = MockMqttTransport::new();
    let source = MockByteSource::new();

    let link = LinkManager::new(
        radio.clone(),
        delay.clone(),
        clock.clone(),
        WifiConfig::default(),
        true,
    );
    let mqtt = MqttSession::new(link, transport.clone(), MqttConfig::default(), true);
    let gateway = MeterGateway::new(
        TelegramDispatcher::new(source.clone(), true),
        mqtt,
        clock.clone(),
        LogDisplay,
        &GatewayConfig::default(),
    );

    Rig {
        clock,
        radio,
        delay,
        transport,
        source,
        gateway,
    }
}

/// Moves the clock to the next meter read.
fn next_read(rig: &Rig) {
    rig.clock.advance(GatewayConfig::default().send_interval_ms);
}

#[test]
fn corrupted_frame_does_not_stop_the_next_one() {
    let mut rig = rig();
    rig.gateway.begin("it");

    let mut corrupted = fluvius_sample().into_bytes();
    corrupted[40] ^= 0x01;
    next_read(&rig);
    rig.source.push(&corrupted);
    rig.source.push(fluvius_sample().as_bytes());

    assert_eq!(rig.gateway.tick(), Ok(1));

    let dispatcher = rig.gateway.dispatcher();
    assert_eq!(dispatcher.stats(), DispatchStats { parsed: 1, failed: 1 });
    assert!(matches!(
        dispatcher.last_error(),
        Some(ParseError::CrcMismatch { .. })
    ));

    let published = rig.transport.published();
    assert_eq!(published.len(), 2);
    assert!(published.iter().all(|(topic, _)| topic == "meter/electricity"));
}

#[test]
fn duplicate_field_on_first_telegram_is_skipped() {
    let mut rig = rig();
    rig.gateway.begin("it");

    // A repeated id in the first frame fails it; the next one is clean
    let repeated = FLUVIUS_SAMPLE_BODY.replacen(
        "0-0:96.1.4(50217)\r\n",
        "0-0:96.1.4(50217)\r\n0-0:96.1.4(50217)\r\n",
        1,
    );
    next_read(&rig);
    rig.source.push(frame(&repeated).as_bytes());
    rig.source.push(fluvius_sample().as_bytes());

    // The failed frame used up this read
    assert_eq!(rig.gateway.tick(), Ok(0));
    assert!(matches!(
        rig.gateway.dispatcher().last_error(),
        Some(ParseError::DuplicateField { line: 4, .. })
    ));
    assert!(rig.transport.published().is_empty());

    next_read(&rig);
    rig.source.push(fluvius_sample().as_bytes());
    assert_eq!(rig.gateway.tick(), Ok(1));
    assert_eq!(
        rig.gateway.dispatcher().stats(),
        DispatchStats { parsed: 1, failed: 1 }
    );
    assert_eq!(rig.transport.published().len(), 2);
}

#[test]
fn link_loss_is_recovered_without_blocking_the_loop() {
    let mut rig = rig();
    rig.gateway.begin("it");

    // Maintenance notices the loss and restarts association; the read that
    // follows in the same pass cannot be delivered
    rig.radio.set_connected(false);
    next_read(&rig);
    rig.source.push(fluvius_sample().as_bytes());
    assert_eq!(rig.gateway.tick(), Ok(0));
    assert_eq!(rig.gateway.stats(), GatewayStats { delivered: 0, dropped: 2 });
    assert_eq!(rig.gateway.uplink().link().state(), LinkState::Connecting);

    // Next maintenance pass sees the link up and reconnects to the broker
    rig.radio.set_connected(true);
    rig.clock.advance(1_000);
    rig.gateway.tick().unwrap();
    assert_eq!(rig.gateway.uplink().link().state(), LinkState::Connected);

    next_read(&rig);
    rig.source.push(fluvius_sample().as_bytes());
    assert_eq!(rig.gateway.tick(), Ok(1));
    assert_eq!(rig.transport.published().len(), 2);
    assert!(rig.delay.calls().is_empty());
}

#[test]
fn inbound_commands_reach_the_handler_during_maintenance() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let mut rig = rig();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    rig.gateway
        .uplink_mut()
        .set_on_message(move |topic: &str, message: &str| {
            sink.borrow_mut().push(format!("{topic}={message}"));
        });
    rig.gateway.begin("it");

    rig.transport.queue_message("meter/command", b"refresh");
    rig.transport.queue_message("meter/command", &[b'x'; 300]);
    rig.clock.advance(1_000);
    rig.gateway.tick().unwrap();

    assert_eq!(seen.borrow().as_slice(), &["meter/command=refresh".to_string()]);
    assert_eq!(rig.gateway.uplink().stats().oversized_count, 1);
}
