use std::sync::{Arc, Barrier};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use crossbeam_channel::bounded;

use fencewatch::{
    AlertSink, ChangeEvent, ChannelSink, DeliveryError, EngineConfig, EngineRuntime, FeedBatch, FenceEngine,
    FenceState, GeoPoint, InMemoryNotificationLog, LocationSample, NotificationPayload, RegionChange, RegionId,
    RuntimeSignal, SubjectId,
};

fn park() -> GeoPoint {
    GeoPoint::new(-33.8688, 151.2093).unwrap()
}

fn runtime(shards: usize) -> (EngineRuntime, fencewatch::AlertStream) {
    let (sink, alerts) = ChannelSink::new(256);
    let config = EngineConfig {
        shard_workers: shards,
        ..EngineConfig::default()
    };
    let engine = FenceEngine::new(config, Arc::new(sink), Arc::new(InMemoryNotificationLog::new()), Utc::now())
        .unwrap();
    (EngineRuntime::start(Arc::new(engine)), alerts)
}

#[test]
fn samples_from_many_subjects_alert_once_each() {
    let (rt, alerts) = runtime(4);
    let subjects: Vec<String> = (0..16).map(|i| format!("child-{i}")).collect();

    for subject in &subjects {
        let region = rt.engine().region(format!("zone-{subject}"), "parent", subject.as_str(), "Park", park());
        rt.submit_region_change(RegionChange::Added { region }).unwrap();
    }
    for _ in 0..3 {
        for subject in &subjects {
            rt.submit_sample(LocationSample::now(subject.as_str(), park().offset_north(10.0)))
                .unwrap();
        }
    }
    rt.shutdown();

    let payloads = alerts.drain();
    assert_eq!(payloads.len(), subjects.len());
    for subject in &subjects {
        assert_eq!(
            payloads.iter().filter(|p| p.subject == SubjectId::from(subject.as_str())).count(),
            1
        );
    }
}

#[test]
fn attached_sources_are_pumped_and_disconnects_signalled() {
    let t0 = Utc::now();
    let (sink, alerts) = ChannelSink::new(64);
    let engine = FenceEngine::new(
        EngineConfig::default(),
        Arc::new(sink),
        Arc::new(InMemoryNotificationLog::new()),
        t0,
    )
    .unwrap();
    engine
        .upsert_region(engine.region("r1", "parent", "child", "Park", park()))
        .unwrap();
    let rt = EngineRuntime::start(Arc::new(engine));
    let signals = rt.signals();

    let (gps_tx, gps_rx) = bounded::<LocationSample>(16);
    let (feed_tx, feed_rx) = bounded::<FeedBatch>(16);
    rt.attach_location_source("gps", gps_rx).unwrap();
    rt.attach_change_feed("chat", feed_rx).unwrap();

    gps_tx.send(LocationSample::now("child", park().offset_north(400.0))).unwrap();
    gps_tx.send(LocationSample::now("child", park())).unwrap();
    feed_tx
        .send(FeedBatch::initial(vec![ChangeEvent::chat(
            "m1",
            "child",
            "parent",
            "history",
            t0 - ChronoDuration::hours(1),
        )]))
        .unwrap();
    feed_tx
        .send(FeedBatch::live(vec![ChangeEvent::chat(
            "m2",
            "child",
            "parent",
            "new",
            t0 + ChronoDuration::seconds(1),
        )]))
        .unwrap();

    drop(gps_tx);
    drop(feed_tx);

    let mut disconnected = Vec::new();
    while disconnected.len() < 2 {
        match signals.recv_timeout(Duration::from_secs(5)).unwrap() {
            RuntimeSignal::SourceDisconnected { source } => disconnected.push(source),
            RuntimeSignal::WorkerError { error, .. } => panic!("unexpected worker error: {error}"),
        }
    }
    disconnected.sort();
    assert_eq!(disconnected, vec!["chat".to_string(), "gps".to_string()]);

    let engine = Arc::clone(rt.engine());
    rt.shutdown();

    let payloads = alerts.drain();
    assert_eq!(payloads.len(), 2);
    assert_eq!(engine.stats().unwrap().suppressed_events, 1);
    assert!(engine
        .last_known_location(&SubjectId::from("child"))
        .unwrap()
        .is_some());
}

/// Parks the delivering worker until the test releases it.
struct GatedSink {
    gate: Arc<Barrier>,
}

impl AlertSink for GatedSink {
    fn deliver(&self, _payload: &NotificationPayload) -> Result<(), DeliveryError> {
        self.gate.wait();
        Ok(())
    }
}

/// A subject that does not hash to shard 0.
fn subject_off_shard_zero(rt: &EngineRuntime) -> SubjectId {
    (0..)
        .map(|i| SubjectId::from(format!("child-{i}")))
        .find(|s| rt.shard_for(s) != 0)
        .unwrap()
}

#[test]
fn removal_submitted_behind_its_add_is_applied_after_it() {
    let gate = Arc::new(Barrier::new(2));
    let config = EngineConfig {
        shard_workers: 4,
        ..EngineConfig::default()
    };
    let engine = FenceEngine::new(
        config,
        Arc::new(GatedSink { gate: Arc::clone(&gate) }),
        Arc::new(InMemoryNotificationLog::new()),
        Utc::now(),
    )
    .unwrap();
    let rt = EngineRuntime::start(Arc::new(engine));
    let subject = subject_off_shard_zero(&rt);

    // A breach parks the subject's shard inside the sink.
    let anchor = rt.engine().region("anchor", "parent", subject.clone(), "Park", park());
    rt.engine().upsert_region(anchor).unwrap();
    rt.submit_sample(LocationSample::now(subject.clone(), park())).unwrap();

    let far = park().offset_north(5_000.0);
    let r2 = rt.engine().region("r2", "parent", subject.clone(), "School", far);
    rt.submit_region_change(RegionChange::Added { region: r2 }).unwrap();
    rt.submit_region_change(RegionChange::Removed { id: "r2".into() })
        .unwrap();

    gate.wait();
    let engine = Arc::clone(rt.engine());
    rt.shutdown();

    assert!(engine.registry().get(&RegionId::from("r2")).unwrap().is_none());
    assert!(engine.registry().get(&RegionId::from("anchor")).unwrap().is_some());
}

#[test]
fn region_moved_to_another_subject_stops_alerting_the_old_one() {
    let (rt, alerts) = runtime(4);
    let region = rt.engine().region("r1", "parent", "child-a", "Park", park());
    rt.engine().upsert_region(region.clone()).unwrap();
    assert_eq!(
        rt.engine()
            .handle_sample(&LocationSample::now("child-a", park()))
            .unwrap()
            .delivered
            .len(),
        1
    );

    let mut moved = region;
    moved.subject = SubjectId::from("child-b");
    rt.submit_region_change(RegionChange::Modified { region: moved }).unwrap();
    // Same shard as the move, so both are evaluated after it.
    rt.submit_sample(LocationSample::now("child-a", park().offset_north(900.0)))
        .unwrap();
    rt.submit_sample(LocationSample::now("child-a", park())).unwrap();

    let engine = Arc::clone(rt.engine());
    rt.shutdown();

    assert_eq!(alerts.drain().len(), 1);
    let rid = RegionId::from("r1");
    let current = engine.registry().get(&rid).unwrap().unwrap();
    assert_eq!(current.subject, SubjectId::from("child-b"));
    assert_eq!(
        engine.detector().state_of(&SubjectId::from("child-a"), &rid).unwrap(),
        FenceState::Outside
    );

    let report = engine.handle_sample(&LocationSample::now("child-b", park())).unwrap();
    assert_eq!(report.delivered.len(), 1);
    assert_eq!(report.delivered[0].subject, SubjectId::from("child-b"));
}

#[test]
fn add_move_remove_of_one_region_apply_in_order() {
    for _ in 0..20 {
        let (rt, _alerts) = runtime(4);
        let first = SubjectId::from("child-a");
        let second = (0..)
            .map(|i| SubjectId::from(format!("child-b{i}")))
            .find(|s| rt.shard_for(s) != rt.shard_for(&first))
            .unwrap();

        let region = rt.engine().region("r1", "parent", first.clone(), "Park", park());
        rt.submit_region_change(RegionChange::Added { region: region.clone() })
            .unwrap();
        let mut moved = region;
        moved.subject = second;
        rt.submit_region_change(RegionChange::Modified { region: moved }).unwrap();
        rt.submit_region_change(RegionChange::Removed { id: "r1".into() })
            .unwrap();

        let engine = Arc::clone(rt.engine());
        rt.shutdown();
        assert!(engine.registry().is_empty().unwrap());
    }
}

#[test]
fn runtime_shutdown_flushes_the_delivery_queue() {
    let (sink, alerts) = ChannelSink::new(64);
    let config = EngineConfig {
        shard_workers: 2,
        delivery_queue_capacity: 32,
        ..EngineConfig::default()
    };
    let engine = FenceEngine::with_delivery_queue(
        config,
        Arc::new(sink),
        Arc::new(InMemoryNotificationLog::new()),
        Utc::now(),
    )
    .unwrap();
    let rt = EngineRuntime::start(Arc::new(engine));
    for subject in ["a", "b", "c", "d"] {
        let region = rt.engine().region(format!("zone-{subject}"), "parent", subject, "Park", park());
        rt.submit_region_change(RegionChange::Added { region }).unwrap();
        rt.submit_sample(LocationSample::now(subject, park())).unwrap();
    }
    let engine = Arc::clone(rt.engine());
    rt.shutdown();

    assert_eq!(alerts.drain().len(), 4);
    let stats = engine.stats().unwrap();
    assert_eq!(stats.delivered, 4);
    assert_eq!(stats.queue_rejected, 0);
}

#[test]
fn region_removal_through_runtime_stops_alerts() {
    let (rt, alerts) = runtime(2);
    let region = rt.engine().region("r1", "parent", "child", "Park", park());
    rt.submit_region_change(RegionChange::Added { region }).unwrap();
    rt.submit_sample(LocationSample::now("child", park())).unwrap();
    rt.submit_sample(LocationSample::now("child", park().offset_north(900.0)))
        .unwrap();
    rt.submit_region_change(RegionChange::Removed { id: "r1".into() })
        .unwrap();
    rt.submit_sample(LocationSample::now("child", park())).unwrap();
    rt.shutdown();

    assert_eq!(alerts.drain().len(), 1);
}
