//! End-to-end engine scenarios on synthetic networks
//!
//! Covers:
//! - Nucleation of a regional event and its single publication
//! - Growth of an origin by association, score never dropping
//! - Re-feeding picks leaves the engine unchanged
//! - Publication throttling by time and by phase-count growth
//! - Cleanup completeness and cleanup gating
//! - Playback clock
//! - XXL fast path ahead of nucleation
//! - Low-SNR picks following a larger pick
//! - Manual and imported origins

mod helpers;

use autoloc_core::model::{Amplitude, DepthType, Exclusion, PickMode};
use autoloc_core::sink::OriginRecord;
use autoloc_core::PublicationState;
use helpers::{build_engine, capture_logs, test_config, Network, STRONG};
use serde_json::json;

#[test]
fn test_regional_event_nucleates_and_publishes_once() {
    let network = Network::regional(4);
    let config = test_config();
    let min_score = config.min_score;
    let (mut engine, sink) = build_engine(&network, config, network.grid(4));

    let picks = network.picks();
    for pick in &picks[..3] {
        assert!(!engine.feed_pick(pick.clone()));
    }
    assert_eq!(engine.origin_count(), 0);
    assert!(engine.feed_pick(picks[3].clone()));

    assert_eq!(engine.origin_count(), 1);
    assert_eq!(sink.len(), 1);
    assert!(engine.report().is_empty(), "nothing new to publish");
    assert_eq!(sink.len(), 1);

    let published = &sink.origins()[0];
    assert_eq!(published.defining_count(), 4);
    assert!(published.score >= min_score);
    assert_eq!(published.depth_type, DepthType::Default);
    assert!((published.dep - 10.0).abs() < 1e-6);
    assert!((published.lat - network.lat).abs() < 0.05);
    assert!((published.lon - network.lon).abs() < 0.05);
    assert!((published.time - network.origin_time).abs() < 1.0);
    assert!(!published.preliminary);
    assert_eq!(published.agency, "TEST");
    assert_eq!(engine.publication_state(published.id), PublicationState::Sent { version: 1 });

    for pick in &picks {
        assert_eq!(engine.associated_origin(&pick.id), Some(published.id));
    }
}

#[test]
fn test_association_grows_origin_without_losing_score() {
    let network = Network::regional(6);
    let (mut engine, _sink) = build_engine(&network, test_config(), network.grid(4));

    let picks = network.picks();
    for pick in &picks[..4] {
        engine.feed_pick(pick.clone());
    }
    assert_eq!(engine.origin_count(), 1);
    let id = engine.origins().next().unwrap().id;
    let mut last_score = engine.origin(id).unwrap().score;

    for pick in &picks[4..] {
        assert!(engine.feed_pick(pick.clone()));
        assert_eq!(engine.origin_count(), 1, "pick must join the existing origin");
        let origin = engine.origin(id).unwrap();
        assert!(origin.has_pick(&pick.id));
        assert!(
            origin.score >= last_score - 1e-6,
            "score dropped from {} to {}",
            last_score,
            origin.score
        );
        last_score = origin.score;
    }
    assert_eq!(engine.origin(id).unwrap().defining_count(), 6);
}

#[test]
fn test_refeed_changes_nothing() {
    let network = Network::regional(6);
    let (mut engine, sink) = build_engine(&network, test_config(), network.grid(4));
    let picks = network.picks();
    for pick in &picks {
        engine.feed_pick(pick.clone());
    }

    let before: Vec<_> = engine.origins().cloned().collect();
    let published = sink.len();
    let stored = engine.stats().origins_stored;

    let (_, logs) = capture_logs(|| {
        for pick in &picks {
            assert!(!engine.feed_pick(pick.clone()));
        }
    });
    logs.assert_contains("Duplicate pick ignored");

    let after: Vec<_> = engine.origins().cloned().collect();
    assert_eq!(before.len(), after.len());
    for (a, b) in before.iter().zip(&after) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.arrivals.len(), b.arrivals.len());
        assert_eq!(a.score, b.score);
        for pick in &picks {
            let count = b.arrivals.iter().filter(|arr| arr.pick.id == pick.id).count();
            assert!(count <= 1);
        }
    }
    assert_eq!(sink.len(), published);
    assert_eq!(engine.stats().origins_stored, stored);
    assert_eq!(engine.pick_count(), picks.len());
}

#[test]
fn test_publication_waits_for_interval() {
    let network = Network::regional(6);
    let mut config = test_config();
    config.publication_interval_time_slope = 100.0;
    let (mut engine, sink) = build_engine(&network, config, network.grid(4));

    for pick in network.picks() {
        engine.feed_pick(pick);
    }
    // first version goes out at once, updates wait 4 * 100 s
    assert_eq!(sink.len(), 1);
    let id = sink.origins()[0].id;
    assert_eq!(engine.publication_state(id), PublicationState::Sent { version: 1 });

    engine.sync(engine.now() + 500.0);
    let published = engine.report();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].defining_count(), 6);
    assert_eq!(sink.len(), 2);
    assert_eq!(engine.publication_state(id), PublicationState::Sent { version: 2 });

    // unchanged origin is not sent again
    engine.sync(engine.now() + 5000.0);
    assert!(engine.report().is_empty());
}

#[test]
fn test_phase_count_growth_overrides_interval() {
    let network = Network::regional(6);
    let mut config = test_config();
    config.publication_interval_time_slope = 100.0;
    config.publication_interval_pick_count = 2;
    let (mut engine, sink) = build_engine(&network, config, network.grid(4));

    let picks = network.picks();
    for pick in &picks[..5] {
        engine.feed_pick(pick.clone());
    }
    assert_eq!(sink.len(), 1);

    engine.feed_pick(picks[5].clone());
    assert_eq!(sink.len(), 2);
    assert_eq!(sink.origins()[1].defining_count(), 6);
}

#[test]
fn test_explicit_cleanup_empties_engine() {
    let network = Network::regional(6);
    let (mut engine, sink) = build_engine(&network, test_config(), network.grid(4));
    for pick in network.picks() {
        engine.feed_pick(pick);
    }
    let id = sink.origins()[0].id;
    assert!(engine.projected_pick_count() > 0);

    engine.cleanup(Some(network.origin_time + 10_000.0));

    assert_eq!(engine.pick_count(), 0);
    assert_eq!(engine.origin_count(), 0);
    assert_eq!(engine.projected_pick_count(), 0);
    assert_eq!(engine.publication_state(id), PublicationState::NeverSent);
}

#[test]
fn test_cleanup_runs_once_per_interval() {
    let network = Network::regional(6);
    let mut config = test_config();
    config.max_age = 100.0;
    config.cleanup_interval = 3600.0;
    let (mut engine, _sink) = build_engine(&network, config, network.grid(4));
    for pick in network.picks() {
        engine.feed_pick(pick);
    }
    let start = network.origin_time;

    engine.sync(start + 1000.0);
    engine.cleanup(None);
    assert_eq!(engine.pick_count(), 6, "cleanup is not due yet");
    assert_eq!(engine.origin_count(), 1);

    engine.sync(start + 5000.0);
    engine.cleanup(None);
    assert_eq!(engine.pick_count(), 0);
    assert_eq!(engine.origin_count(), 0);
}

#[test]
fn test_zero_max_age_disables_cleanup() {
    let network = Network::regional(6);
    let mut config = test_config();
    config.max_age = 0.0;
    let (mut engine, _sink) = build_engine(&network, config, network.grid(4));
    for pick in network.picks() {
        engine.feed_pick(pick);
    }
    engine.sync(network.origin_time + 1.0e6);
    engine.cleanup(None);
    assert_eq!(engine.pick_count(), 6);
    assert_eq!(engine.origin_count(), 1);
}

#[test]
fn test_playback_clock_follows_creation_time() {
    let network = Network::regional(4);
    let mut config = test_config();
    config.offline = false;
    config.playback = true;
    let (mut engine, _sink) = build_engine(&network, config, network.grid(4));

    let (amp, snr) = STRONG;
    let mut first = network.pick(0, amp, snr);
    first.creation_time = Some(network.origin_time + 100.0);
    engine.feed_pick(first);
    assert_eq!(engine.now(), network.origin_time + 100.0);

    // never moves backwards
    let mut second = network.pick(1, amp, snr);
    second.creation_time = Some(network.origin_time + 50.0);
    engine.feed_pick(second);
    assert_eq!(engine.now(), network.origin_time + 100.0);

    let (_, logs) = capture_logs(|| engine.feed_pick(network.pick(2, amp, snr)));
    logs.assert_contains("Pick without creation time");
    assert_eq!(engine.now(), network.origin_time + 100.0);
}

#[test]
fn test_xxl_picks_give_preliminary_origin() {
    let network = Network::ring(2, 1.0, 1.5);
    let mut config = test_config();
    config.min_phase_count = 6;
    config.xxl.enabled = true;
    config.xxl.min_phase_count = 2;
    let (mut engine, sink) = build_engine(&network, config, network.grid(4));

    let mut picks: Vec<_> = (0..2).map(|i| network.pick(i, 10_000.0, 50.0)).collect();
    picks.sort_by(|a, b| a.time.total_cmp(&b.time));
    assert!(!engine.feed_pick(picks[0].clone()));
    let (stored, logs) = capture_logs(|| engine.feed_pick(picks[1].clone()));
    assert!(stored);

    let stats = engine.stats();
    assert_eq!(stats.xxl_origins, 1);
    assert_eq!(stats.nucleator_calls, 2);
    assert_eq!(stats.nucleated_origins, 0);
    assert_eq!(engine.origin_count(), 1);

    // the fast path runs before the grid search
    let records = logs.records();
    let alert = records.iter().position(|r| r.message.contains("Relocated XXL alert"));
    let search = records.iter().rposition(|r| r.message.contains("candidate origins"));
    assert!(alert.is_some() && search.is_some());
    assert!(alert < search);

    let origin = engine.origins().next().unwrap();
    assert!(origin.preliminary);
    assert_eq!(origin.defining_count(), 2);
    assert!(engine.pick(&picks[0].id).unwrap().xxl);
    assert_eq!(sink.len(), 1);
    assert!(sink.origins()[0].preliminary);
}

#[test]
fn test_low_snr_pick_after_larger_pick_is_processed() {
    let network = Network::regional(4);
    let mut config = test_config();
    config.dynamic_pick_threshold_interval = 0.0;
    let (mut engine, _sink) = build_engine(&network, config, network.grid(4));
    let (amp, _) = STRONG;

    let strong = network.pick(1, amp, 15.0);
    engine.feed_pick(strong.clone());
    assert_eq!(engine.stats().picks_processed, 1);

    let mut weak = network.pick(1, amp, 2.0);
    weak.id = "weak".to_string();
    weak.time = strong.time + 10.0;
    let (_, logs) = capture_logs(|| engine.feed_pick(weak));
    logs.assert_contains("accepted as probable secondary phase");
    logs.assert_no_match("SNR too low");
    assert_eq!(engine.stats().picks_processed, 2);

    // nothing larger precedes it at its own station
    let lone = network.pick(2, amp, 2.0);
    let (_, logs) = capture_logs(|| engine.feed_pick(lone));
    logs.assert_contains("SNR too low");
    assert_eq!(engine.stats().picks_processed, 2);
}

#[test]
fn test_low_snr_and_busy_station_picks_are_suppressed() {
    let network = Network::regional(4);
    let (mut engine, _sink) = build_engine(&network, test_config(), network.grid(4));
    let (amp, _) = STRONG;

    let (_, logs) = capture_logs(|| engine.feed_pick(network.pick(0, amp, 2.0)));
    logs.assert_contains("SNR too low");
    assert_eq!(engine.stats().picks_processed, 0);

    let mut strong = network.pick(1, amp, 15.0);
    strong.id = "strong".to_string();
    engine.feed_pick(strong.clone());
    assert_eq!(engine.stats().picks_processed, 1);

    let mut weak = network.pick(1, amp, 4.0);
    weak.id = "weak".to_string();
    weak.time = strong.time + 10.0;
    let (processed, logs) = capture_logs(|| engine.feed_pick(weak));
    assert!(!processed);
    logs.assert_contains("Pick follows a stronger pick at station");
    assert_eq!(engine.pick("weak").unwrap().mode, PickMode::IgnoredAutomatic);
    assert_eq!(engine.stats().picks_processed, 1);
}

#[test]
fn test_pick_waits_for_amplitude() {
    let network = Network::regional(4);
    let (mut engine, _sink) = build_engine(&network, test_config(), network.grid(4));

    let pick = network.pick(0, 0.0, 0.0);
    let id = pick.id.clone();
    assert!(!engine.feed_pick(pick));
    assert_eq!(engine.pick_count(), 1);
    assert_eq!(engine.stats().picks_processed, 0);

    assert!(!engine.feed_amplitude(&Amplitude::new(&id, "snr", 25.0)));
    assert!(!engine.feed_amplitude(&Amplitude::new(&id, "ML", 3.0)));
    assert_eq!(engine.stats().picks_processed, 0);

    engine.feed_amplitude(&Amplitude::new(&id, "mb", 20_000.0));
    assert_eq!(engine.stats().picks_processed, 1);
    let pooled = engine.pick(&id).unwrap();
    assert_eq!(pooled.snr, 25.0);
    assert_eq!(pooled.amp, 20_000.0);

    assert!(!engine.feed_amplitude(&Amplitude::new("missing", "snr", 10.0)));
}

#[test]
fn test_rejected_picks_leave_no_trace() {
    let network = Network::regional(4);
    let mut config = test_config();
    config.pick_authors = vec!["autopick".to_string()];
    let (mut engine, _sink) = build_engine(&network, config, network.grid(4));
    let (amp, snr) = STRONG;

    let mut foreign = network.pick(0, amp, snr);
    foreign.author = "someone".to_string();
    assert!(!engine.feed_pick(foreign));

    let mut unknown = network.pick(1, amp, snr);
    unknown.author = "autopick".to_string();
    unknown.sta = "NOPE".to_string();
    let (_, logs) = capture_logs(|| engine.feed_pick(unknown));
    logs.assert_contains("unknown station");

    let mut fresh = network.pick(2, amp, snr);
    fresh.author = "autopick".to_string();
    engine.feed_pick(fresh);
    let mut old = network.pick(3, amp, snr);
    old.author = "autopick".to_string();
    old.time -= 30_000.0;
    let (_, logs) = capture_logs(|| engine.feed_pick(old));
    logs.assert_contains("Ignored old pick");

    assert_eq!(engine.pick_count(), 1);
}

#[test]
fn test_manual_origin_replaces_automatic_arrivals() {
    let network = Network::regional(6);
    let mut config = test_config();
    config.use_manual_origins = true;
    let (mut engine, _sink) = build_engine(&network, config, network.grid(4));
    for pick in network.picks() {
        engine.feed_pick(pick);
    }
    let automatic = engine.origins().next().unwrap().clone();

    let manual_picks: Vec<_> = (0..6).map(|i| network.manual_pick(i, 0.5)).collect();
    for pick in &manual_picks {
        assert!(engine.feed_pick(pick.clone()));
    }
    assert_eq!(engine.origin_count(), 1, "manual picks alone do not nucleate");

    let arrivals: Vec<_> = manual_picks
        .iter()
        .map(|p| json!({ "pick_id": p.id, "phase": "P" }))
        .collect();
    let record: OriginRecord = serde_json::from_value(json!({
        "epoch": automatic.time + 0.5,
        "lat": automatic.lat,
        "lon": automatic.lon,
        "depth": automatic.dep,
        "depth_type": "default",
        "manual": true,
        "agency": "TEST",
        "arrivals": arrivals,
    }))
    .unwrap();

    assert!(engine.feed_origin(&record));

    assert_eq!(engine.origin_count(), 1);
    let merged = engine.origin(automatic.id).unwrap();
    assert!(merged.manual);
    assert_eq!(merged.arrivals.len(), 6);
    assert!(merged.arrivals.iter().all(|a| a.pick.is_manual()));
    assert!((merged.time - (network.origin_time + 0.5)).abs() < 0.05);
}

#[test]
fn test_manual_origin_ignored_unless_enabled() {
    let network = Network::regional(4);
    let (mut engine, _sink) = build_engine(&network, test_config(), network.grid(4));
    let record: OriginRecord = serde_json::from_value(json!({
        "epoch": network.origin_time,
        "lat": network.lat,
        "lon": network.lon,
        "depth": 10.0,
        "manual": true,
        "agency": "TEST",
    }))
    .unwrap();
    assert!(!engine.feed_origin(&record));

    let own = OriginRecord {
        manual: false,
        ..record
    };
    assert!(!engine.feed_origin(&own));
    assert_eq!(engine.origin_count(), 0);
}

#[test]
fn test_imported_origin_takes_picks_passively() {
    let network = Network::regional(4);
    let mut config = test_config();
    config.use_imported_origins = true;
    let (mut engine, sink) = build_engine(&network, config, network.grid(4));

    let record: OriginRecord = serde_json::from_value(json!({
        "epoch": network.origin_time,
        "lat": network.lat,
        "lon": network.lon,
        "depth": 10.0,
        "agency": "OTHER",
    }))
    .unwrap();
    assert!(engine.feed_origin(&record));
    assert_eq!(engine.origin_count(), 1);
    let id = engine.origins().next().unwrap().id;
    assert!(engine.origin(id).unwrap().imported);

    let picks = network.picks();
    assert!(engine.feed_pick(picks[0].clone()));

    let origin = engine.origin(id).unwrap();
    let index = origin.find_arrival(&picks[0].id).unwrap();
    assert_eq!(origin.arrivals[index].excluded, Exclusion::UnusedPhase);
    assert_eq!(origin.agency, "OTHER");
    assert!(sink.is_empty(), "imported origins are never published");
}

#[test]
fn test_imported_origin_ignored_unless_enabled() {
    let network = Network::regional(4);
    let (mut engine, _sink) = build_engine(&network, test_config(), network.grid(4));
    let record: OriginRecord = serde_json::from_value(json!({
        "epoch": network.origin_time,
        "lat": network.lat,
        "lon": network.lon,
        "depth": 10.0,
        "agency": "OTHER",
    }))
    .unwrap();
    assert!(!engine.feed_origin(&record));
    assert_eq!(engine.origin_count(), 0);
}

#[test]
fn test_test_mode_publishes_nothing() {
    let network = Network::regional(4);
    let mut config = test_config();
    config.test = true;
    let (mut engine, sink) = build_engine(&network, config, network.grid(4));
    for pick in network.picks() {
        engine.feed_pick(pick);
    }
    assert_eq!(engine.origin_count(), 1);
    assert!(sink.is_empty());
    assert_eq!(engine.stats().origins_published, 1);
}

#[test]
fn test_reset_clears_state() {
    let network = Network::regional(4);
    let (mut engine, _sink) = build_engine(&network, test_config(), network.grid(4));
    for pick in network.picks() {
        engine.feed_pick(pick);
    }
    engine.reset();
    assert_eq!(engine.origin_count(), 0);
    assert_eq!(engine.pick_count(), 0);
    assert_eq!(engine.projected_pick_count(), 0);

    // the same picks nucleate again after a reset
    for pick in network.picks() {
        engine.feed_pick(pick);
    }
    assert_eq!(engine.origin_count(), 1);
}
