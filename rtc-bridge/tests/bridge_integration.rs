//! End-to-end tests of the bridge over the loopback engine
//!
//! Each test drives the script side from the test thread (which plays the
//! host's script thread) while the loopback engine raises its events on the
//! registry's worker thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rtc_bridge::prelude::*;
use rtc_bridge::{RegistryState, TargetId};
use rtc_engine::testing::{LoopbackCounters, LoopbackProvider};
use rtc_engine::{DataChannelState, DomErrorName, MessageData, SignalingState};

// ============================================================================
// Test Helpers
// ============================================================================

type Log = Arc<Mutex<Vec<RtcEvent>>>;

fn setup() -> (RtcBridge, Arc<LoopbackCounters>) {
    setup_with(LoopbackProvider::new())
}

fn setup_with(provider: LoopbackProvider) -> (RtcBridge, Arc<LoopbackCounters>) {
    let counters = provider.counters();
    let registry =
        ConnectionFactoryRegistry::new(Arc::new(provider), BridgeConfig::default()).unwrap();
    (RtcBridge::new(registry), counters)
}

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn sink(log: &Log) -> impl Fn(&RtcEvent) + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |event: &RtcEvent| log.lock().push(event.clone())
}

/// Drain on this thread until `done` holds; false on timeout
fn drain_until(bridge: &RtcBridge, done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        bridge.drain();
        if done() {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn wait_until(done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !done() {
        if Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

fn offer() -> SessionDescription {
    SessionDescription::new(SdpType::Offer, "v=0")
}

fn answer() -> SessionDescription {
    SessionDescription::new(SdpType::Answer, "v=0")
}

/// Run a local offer / remote answer exchange and wait for it to finish
fn negotiate(bridge: &RtcBridge, pc: &PeerConnection) {
    let done = log();
    pc.set_local_description(offer(), sink(&done)).unwrap();
    pc.set_remote_description(answer(), sink(&done)).unwrap();
    assert!(drain_until(bridge, || done.lock().len() == 2));
    assert!(done.lock().iter().all(|e| e.kind() == EventKind::OperationComplete));
}

// ============================================================================
// Negotiation
// ============================================================================

#[test]
fn test_create_offer_result() {
    let (bridge, counters) = setup();
    let pc = bridge.peer_connection(None, None).unwrap();
    assert_eq!(counters.factories_created(), 1);

    let results = log();
    let request = pc.create_offer(None, sink(&results)).unwrap();
    assert!(drain_until(&bridge, || !results.lock().is_empty()));

    match &results.lock()[0] {
        RtcEvent::SessionDescription {
            source,
            request: answered,
            description,
        } => {
            assert_eq!(*source, pc.source());
            assert_eq!(*answered, request);
            assert_eq!(description.sdp_type, SdpType::Offer);
            assert!(description.sdp.starts_with("v=0"));
        }
        other => panic!("unexpected event {other:?}"),
    };
}

#[test]
fn test_events_from_one_source_arrive_in_order() {
    let (bridge, _counters) = setup();
    let pc = bridge.peer_connection(None, None).unwrap();

    let events = log();
    for kind in [
        EventKind::SignalingStateChange,
        EventKind::IceGatheringStateChange,
        EventKind::IceCandidate,
    ] {
        pc.set_handler(kind, sink(&events)).unwrap();
    }

    pc.set_local_description(offer(), |_| {}).unwrap();
    assert!(drain_until(&bridge, || events.lock().len() == 6));

    let kinds: Vec<_> = events.lock().iter().map(RtcEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::SignalingStateChange,
            EventKind::IceGatheringStateChange,
            EventKind::IceCandidate,
            EventKind::IceCandidate,
            EventKind::IceCandidate,
            EventKind::IceGatheringStateChange,
        ]
    );
    assert!(matches!(
        events.lock()[4],
        RtcEvent::IceCandidate { candidate: None, .. }
    ));
    assert_eq!(pc.signaling_state(), SignalingState::HaveLocalOffer);
}

#[test]
fn test_two_connections_exchange_descriptions() {
    let (bridge, counters) = setup();
    let caller = bridge.peer_connection(None, None).unwrap();
    let callee = bridge.peer_connection(None, None).unwrap();
    assert_ne!(caller.source(), callee.source());
    assert_eq!(counters.factories_created(), 1);
    assert_eq!(bridge.registry().holders(), 2);

    let results = log();
    caller.create_offer(None, sink(&results)).unwrap();
    assert!(drain_until(&bridge, || results.lock().len() == 1));
    let offer = match &results.lock()[0] {
        RtcEvent::SessionDescription { description, .. } => description.clone(),
        other => panic!("unexpected event {other:?}"),
    };

    let streams = log();
    callee.set_handler_by_name("onaddstream", sink(&streams)).unwrap();
    callee.set_local_description(offer.clone(), |_| {}).unwrap();

    let failures = log();
    // A local offer cannot be applied as remote offer in have-local-offer
    callee.set_remote_description(offer, sink(&failures)).unwrap();
    assert!(drain_until(&bridge, || failures.lock().len() == 1));
    assert_eq!(
        failures.lock()[0].error().map(|e| e.name),
        Some(DomErrorName::InvalidState)
    );
    assert!(streams.lock().is_empty());
}

#[test]
fn test_answer_flow_connects() {
    let (bridge, _counters) = setup();
    let pc = bridge.peer_connection(None, None).unwrap();

    let states = log();
    pc.set_handler(EventKind::ConnectionStateChange, sink(&states)).unwrap();
    let tracks = log();
    pc.set_handler_by_name("ontrack", sink(&tracks)).unwrap();

    pc.set_remote_description(offer(), |_| {}).unwrap();
    let answers = log();
    pc.create_answer(None, sink(&answers)).unwrap();
    assert!(drain_until(&bridge, || answers.lock().len() == 1));
    let answer = match &answers.lock()[0] {
        RtcEvent::SessionDescription { description, .. } => description.clone(),
        other => panic!("unexpected event {other:?}"),
    };
    assert_eq!(answer.sdp_type, SdpType::Answer);

    pc.set_local_description(answer, |_| {}).unwrap();
    assert!(drain_until(&bridge, || states.lock().len() == 2));
    assert_eq!(tracks.lock().len(), 1);
    assert_eq!(pc.signaling_state(), SignalingState::Stable);
}

#[test]
fn test_add_ice_candidate_needs_remote_description() {
    let (bridge, _counters) = setup();
    let pc = bridge.peer_connection(None, None).unwrap();
    let candidate = IceCandidate::new(
        "candidate:1 1 udp 1 10.0.0.2 5000 typ host",
        Some("0".into()),
        Some(0),
    );

    let results = log();
    pc.add_ice_candidate(candidate.clone(), sink(&results)).unwrap();
    pc.set_remote_description(offer(), |_| {}).unwrap();
    pc.add_ice_candidate(candidate, sink(&results)).unwrap();
    assert!(drain_until(&bridge, || results.lock().len() == 2));

    let results = results.lock();
    assert!(results[0].is_error());
    assert_eq!(results[1].kind(), EventKind::OperationComplete);
}

#[test]
fn test_unsupported_offer_constraint_is_error_event() {
    let (bridge, _counters) = setup();
    let pc = bridge.peer_connection(None, None).unwrap();

    let results = log();
    let sets = MediaConstraintSets::new()
        .exact("x-exotic", "1")
        .ideal("OfferToReceiveAudio", "true");
    pc.create_offer(Some(&sets), sink(&results)).unwrap();
    assert!(drain_until(&bridge, || results.lock().len() == 1));

    let error = results.lock()[0].error().cloned().unwrap();
    assert_eq!(error.name, DomErrorName::ConstraintNotSatisfied);
    assert_eq!(error.constraint.as_deref(), Some("x-exotic"));
}

// ============================================================================
// Data channels, DTMF, stats
// ============================================================================

#[test]
fn test_data_channel_round_trip() {
    let (bridge, _counters) = setup();
    let pc = bridge.peer_connection(None, None).unwrap();

    let negotiation = log();
    pc.set_handler(EventKind::NegotiationNeeded, sink(&negotiation)).unwrap();
    let channel_states = log();
    pc.set_handler(EventKind::DataChannelStateChange, sink(&channel_states)).unwrap();
    let messages = log();
    pc.set_handler_by_name("onmessage", sink(&messages)).unwrap();

    let info = pc.create_data_channel("chat", None).unwrap();
    assert_eq!(info.ready_state, DataChannelState::Connecting);
    assert!(pc.send("chat", "too early").is_err());

    negotiate(&bridge, &pc);
    assert_eq!(negotiation.lock().len(), 1);
    assert!(drain_until(&bridge, || channel_states.lock().len() == 1));

    pc.send("chat", "ping").unwrap();
    pc.send("chat", vec![1u8, 2, 3]).unwrap();
    assert!(drain_until(&bridge, || messages.lock().len() == 2));

    let messages = messages.lock();
    assert!(matches!(&messages[0], RtcEvent::Message { label, data, .. }
        if label == "chat" && data.as_text() == Some("ping")));
    assert!(matches!(&messages[1], RtcEvent::Message { data: MessageData::Binary(bytes), .. }
        if bytes == &vec![1u8, 2, 3]));
}

#[test]
fn test_data_channel_default_priority_from_config() {
    let provider = LoopbackProvider::new();
    let config = BridgeConfig::new().with_data_channel_priority(rtc_engine::PriorityType::High);
    let registry = ConnectionFactoryRegistry::new(Arc::new(provider), config).unwrap();
    let bridge = RtcBridge::new(registry);
    let pc = bridge.peer_connection(None, None).unwrap();

    let info = pc.create_data_channel("telemetry", None).unwrap();
    assert_eq!(info.priority, rtc_engine::PriorityType::High);

    let invalid = DataChannelInit {
        negotiated: true,
        ..Default::default()
    };
    assert!(matches!(
        pc.create_data_channel("broken", Some(invalid)),
        Err(BridgeError::Engine(_))
    ));
}

#[test]
fn test_data_channel_calls_refused_inside_async_runtime() {
    let (bridge, _counters) = setup();
    let pc = bridge.peer_connection(None, None).unwrap();
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();

    let (created, sent) = rt.block_on(async {
        (pc.create_data_channel("chat", None), pc.send("chat", "ping"))
    });
    assert!(matches!(created, Err(BridgeError::BlockingInRuntime)));
    assert!(matches!(sent, Err(BridgeError::BlockingInRuntime)));

    // Outside the runtime the same connection still works
    let info = pc.create_data_channel("chat", None).unwrap();
    assert_eq!(info.label, "chat");
}

#[test]
fn test_dtmf_tone_changes() {
    let (bridge, _counters) = setup();
    let pc = bridge.peer_connection(None, None).unwrap();

    let tones = log();
    pc.set_handler_by_name("ontonechange", sink(&tones)).unwrap();
    let results = log();
    pc.insert_dtmf("12#", None, Some(Duration::from_millis(1)), sink(&results))
        .unwrap();
    assert!(drain_until(&bridge, || results.lock().len() == 1));

    let seen: Vec<String> = tones
        .lock()
        .iter()
        .filter_map(|event| match event {
            RtcEvent::DtmfToneChange { tone, .. } => Some(tone.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(seen, vec!["1", "2", "#", ""]);
    assert_eq!(results.lock()[0].kind(), EventKind::OperationComplete);
}

#[test]
fn test_get_stats() {
    let (bridge, _counters) = setup();
    let pc = bridge.peer_connection(None, None).unwrap();

    let results = log();
    pc.get_stats(sink(&results)).unwrap();
    assert!(drain_until(&bridge, || results.lock().len() == 1));

    match &results.lock()[0] {
        RtcEvent::StatsReport { report, .. } => {
            assert!(report.get("P").is_some());
            assert_eq!(report.of_type("transport").count(), 1);
        }
        other => panic!("unexpected event {other:?}"),
    };
}

// ============================================================================
// Handlers
// ============================================================================

#[test]
fn test_replacing_handler_unregisters_previous() {
    let (bridge, _counters) = setup();
    let pc = bridge.peer_connection(None, None).unwrap();

    let first = log();
    let second = log();
    let first_id = pc.set_handler(EventKind::IceCandidate, sink(&first)).unwrap();
    let second_id = pc.set_handler(EventKind::IceCandidate, sink(&second)).unwrap();
    assert_ne!(first_id, second_id);

    pc.set_local_description(offer(), |_| {}).unwrap();
    assert!(drain_until(&bridge, || second.lock().len() == 3));
    assert!(first.lock().is_empty());

    assert!(pc.clear_handler(EventKind::IceCandidate));
    assert!(!pc.clear_handler(EventKind::IceCandidate));
}

#[test]
fn test_handler_slot_errors() {
    let (bridge, _counters) = setup();
    let pc = bridge.peer_connection(None, None).unwrap();

    assert!(matches!(
        pc.set_handler_by_name("onsomething", |_| {}),
        Err(BridgeError::UnknownCallback(name)) if name == "onsomething"
    ));
    assert!(matches!(
        pc.set_handler(EventKind::SessionDescription, |_| {}),
        Err(BridgeError::NotASlot(EventKind::SessionDescription))
    ));
}

#[test]
fn test_unsolicited_errors_reach_onerror() {
    let (bridge, _counters) = setup();
    let pc = bridge.peer_connection(None, None).unwrap();

    let errors = log();
    pc.set_handler_by_name("onerror", sink(&errors)).unwrap();
    pc.create_answer(None, |_| {}).unwrap();

    // The request-bound callback took the error; onerror saw nothing
    assert!(drain_until(&bridge, || bridge.pending() == 0));
    std::thread::sleep(Duration::from_millis(20));
    bridge.drain();
    assert!(errors.lock().is_empty());
}

#[test]
fn test_callbacks_may_reenter_bridge() {
    let (bridge, _counters) = setup();
    let bridge = Arc::new(bridge);
    let pc = Arc::new(bridge.peer_connection(None, None).unwrap());

    let nested_reports = Arc::new(Mutex::new(Vec::new()));
    let results = log();
    {
        let bridge = Arc::clone(&bridge);
        let pc_inner = Arc::clone(&pc);
        let nested_reports = Arc::clone(&nested_reports);
        let results = Arc::clone(&results);
        pc.create_offer(None, move |event| {
            // Nested drain is a no-op while the outer drain delivers
            nested_reports.lock().push(bridge.drain());
            if let RtcEvent::SessionDescription { description, .. } = event {
                pc_inner
                    .set_local_description(description.clone(), sink(&results))
                    .unwrap();
            }
        })
        .unwrap();
    }

    assert!(drain_until(&bridge, || results.lock().len() == 1));
    assert_eq!(nested_reports.lock().len(), 1);
    assert_eq!(nested_reports.lock()[0].total(), 0);
    assert_eq!(pc.signaling_state(), SignalingState::HaveLocalOffer);
}

#[test]
fn test_notify_hook_fires_on_first_pending_event() {
    let (bridge, _counters) = setup();
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    bridge.set_notify(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let pc = bridge.peer_connection(None, None).unwrap();
    pc.get_stats(|_| {}).unwrap();
    assert!(wait_until(|| notified.load(Ordering::SeqCst) == 1));
    assert_eq!(bridge.pending(), 1);

    bridge.drain();
    bridge.clear_notify();
    pc.get_stats(|_| {}).unwrap();
    assert!(wait_until(|| bridge.pending() == 1));
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Lifetime
// ============================================================================

#[test]
fn test_calls_after_close_report_invalid_state() {
    let (bridge, _counters) = setup();
    let pc = bridge.peer_connection(None, None).unwrap();

    pc.close().unwrap();
    pc.close().unwrap();
    assert!(pc.is_closed());
    assert_eq!(pc.signaling_state(), SignalingState::Closed);

    let results = log();
    pc.create_offer(None, sink(&results)).unwrap();
    assert!(drain_until(&bridge, || results.lock().len() == 1));
    assert_eq!(
        results.lock()[0].error().map(|e| e.name),
        Some(DomErrorName::InvalidState)
    );
    assert!(pc.create_data_channel("late", None).is_err());
}

#[test]
fn test_drop_then_drain_delivers_nothing() {
    let (bridge, counters) = setup();
    let pc = bridge.peer_connection(None, None).unwrap();

    let candidates = log();
    pc.set_handler(EventKind::IceCandidate, sink(&candidates)).unwrap();
    let results = log();
    pc.set_local_description(offer(), sink(&results)).unwrap();

    // Three candidate events plus the request result
    assert!(wait_until(|| bridge.pending() == 4));
    drop(pc);

    let report = bridge.drain();
    assert_eq!(report.delivered, 0);
    assert_eq!(report.dropped, 4);
    assert!(candidates.lock().is_empty());
    assert!(results.lock().is_empty());

    // The close task releases the last factory handle on the worker
    assert!(wait_until(|| counters.factories_destroyed() == 1));
    assert!(wait_until(|| bridge.registry().state() == RegistryState::Uninitialized));
}

#[test]
fn test_factory_outlives_first_connection() {
    let (bridge, counters) = setup();
    let first = bridge.peer_connection(None, None).unwrap();
    let second = bridge.peer_connection(None, None).unwrap();

    drop(first);
    assert!(wait_until(|| bridge.registry().holders() == 1));
    assert_eq!(counters.factories_destroyed(), 0);

    let results = log();
    second.get_stats(sink(&results)).unwrap();
    assert!(drain_until(&bridge, || results.lock().len() == 1));

    drop(second);
    assert!(wait_until(|| counters.factories_destroyed() == 1));
    assert!(wait_until(|| counters.audio_devices_terminated() == 1));
    assert_eq!(counters.early_terminations(), 0);
}

#[test]
fn test_new_generation_after_teardown() {
    let (bridge, counters) = setup();
    drop(bridge.peer_connection(None, None).unwrap());
    assert!(wait_until(|| bridge.registry().state() == RegistryState::Uninitialized));

    let pc = bridge.peer_connection(None, None).unwrap();
    assert_eq!(bridge.registry().generation(), 2);
    assert_eq!(counters.factories_created(), 2);

    let results = log();
    pc.create_offer(None, sink(&results)).unwrap();
    assert!(drain_until(&bridge, || results.lock().len() == 1));
}

#[test]
fn test_factory_failure_is_synchronous() {
    let (bridge, _counters) = setup_with(LoopbackProvider::new().failing());
    assert!(matches!(
        bridge.peer_connection(None, None),
        Err(BridgeError::FactoryCreation(_))
    ));
    assert!(matches!(
        bridge.get_user_media(MediaStreamConstraints::audio_only(), |_| {}),
        Err(BridgeError::FactoryCreation(_))
    ));
    assert_eq!(bridge.registry().state(), RegistryState::Uninitialized);
}

#[test]
fn test_get_user_media_constraint_failure() {
    let (bridge, _counters) = setup();
    let results = log();
    let constraints = MediaStreamConstraints {
        audio: None,
        video: Some(MediaConstraintSets::new().exact("x-resolution", "8k")),
    };
    bridge.get_user_media(constraints, sink(&results)).unwrap();
    assert!(drain_until(&bridge, || results.lock().len() == 1));

    let error = results.lock()[0].error().cloned().unwrap();
    assert_eq!(error.name, DomErrorName::ConstraintNotSatisfied);
    assert_eq!(error.constraint.as_deref(), Some("x-resolution"));
}

#[test]
fn test_global_registry() {
    assert!(RtcBridge::from_global().is_none());

    let installed = ConnectionFactoryRegistry::install_global(
        Arc::new(LoopbackProvider::new()),
        BridgeConfig::headless(),
    )
    .unwrap();
    assert!(matches!(
        ConnectionFactoryRegistry::install_global(
            Arc::new(LoopbackProvider::new()),
            BridgeConfig::default()
        ),
        Err(BridgeError::GlobalAlreadyInstalled)
    ));

    let global = ConnectionFactoryRegistry::global().unwrap();
    assert!(Arc::ptr_eq(&installed, &global));

    let bridge = RtcBridge::from_global().unwrap();
    let pc = bridge.peer_connection(None, None).unwrap();
    assert_eq!(global.holders(), 1);
    drop(pc);
}

#[test]
fn test_target_ids_not_reused() {
    let (bridge, _counters) = setup();
    let pc = bridge.peer_connection(None, None).unwrap();

    let mut ids: Vec<TargetId> = Vec::new();
    for _ in 0..5 {
        ids.push(pc.set_handler(EventKind::Track, |_| {}).unwrap());
    }
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), ids.len());
}
