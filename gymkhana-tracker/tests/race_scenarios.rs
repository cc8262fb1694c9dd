use gymkhana_event::{Lap, RaceEvent, RaceEventKind};
use gymkhana_schema::{Rider, TimestampWall, TrackerConfig, NANOS_PER_SECOND};
use gymkhana_tracker::{ErrorKind, Notification, RaceTracker};
use parking_lot::Mutex;
use std::sync::Arc;

const START_GATE: u32 = 0;
const END_GATE: u32 = 1;

fn config() -> TrackerConfig {
    TrackerConfig {
        start_gate_id: START_GATE,
        end_gate_id: END_GATE,
        end_match_timeout_secs: 10,
    }
}

/// Wall clock time `secs` seconds into the race
fn at(secs: u64) -> TimestampWall {
    946_688_461 * NANOS_PER_SECOND + secs * NANOS_PER_SECOND
}

fn create_tracker(riders: &[&Rider]) -> RaceTracker {
    RaceTracker::new(config(), riders.iter().map(|r| (*r).clone())).unwrap()
}

fn last_finished(events: &[RaceEvent]) -> Arc<gymkhana_event::FinishedEvent> {
    match events.last() {
        Some(RaceEvent::Finished(finished)) => finished.clone(),
        other => panic!("expected a finish as last event, got {:?}", other.map(|e| e.kind())),
    }
}

/// Start box and start gate for a rider at `secs`
fn start_lap(tracker: &RaceTracker, rider: &Rider, secs: u64) {
    tracker.submit_rider_ready(rider.id, at(secs), "start").unwrap();
    tracker
        .submit_gate_trigger(START_GATE, 100, at(secs))
        .unwrap();
}

/// End box and end gate for a rider at `secs`, one minute of device time after start
fn end_lap(tracker: &RaceTracker, rider: &Rider, secs: u64) {
    tracker.submit_end_identification(rider.id, at(secs)).unwrap();
    tracker
        .submit_gate_trigger(END_GATE, 60_000_100, at(secs))
        .unwrap();
}

/// Martijn and Bert finish, Richard started between them and did not
fn simulate_race_with_dnf(tracker: &RaceTracker, martijn: &Rider, richard: &Rider, bert: &Rider) {
    start_lap(tracker, martijn, 0);
    start_lap(tracker, richard, 30);
    start_lap(tracker, bert, 60);
    end_lap(tracker, martijn, 90);
    end_lap(tracker, bert, 120);
}

#[test]
fn test_rider_ready_is_saved() {
    let martijn = Rider::new("Martijn");
    let tracker = create_tracker(&[&martijn]);

    tracker.submit_rider_ready(martijn.id, at(0), "start").unwrap();

    let summary = tracker.stop().unwrap();
    let state = tracker.state();
    assert_eq!(summary.events.len(), 1);

    let RaceEvent::RiderReady(entered) = &summary.events[0] else {
        panic!("expected a rider ready event");
    };
    let waiting = state.waiting.unwrap();
    assert!(Arc::ptr_eq(entered, &waiting));
    assert_eq!(entered.rider.name, "Martijn");
    assert_eq!(entered.time, at(0));
}

#[test]
fn test_start_trigger_without_waiting_rider_is_ignored() {
    let tracker = create_tracker(&[]);

    let recorded = tracker.submit_gate_trigger(START_GATE, 100, at(0)).unwrap();

    let summary = tracker.stop().unwrap();
    let state = tracker.state();
    assert!(recorded.is_none());
    assert!(summary.events.is_empty());
    assert!(state.on_track.is_empty());
    assert!(state.waiting.is_none());
    assert_eq!(tracker.metrics().stray_start_triggers, 1);
}

#[test]
fn test_start_trigger_matches_waiting_rider() {
    let martijn = Rider::new("Martijn");
    let tracker = create_tracker(&[&martijn]);

    start_lap(&tracker, &martijn, 0);

    let summary = tracker.stop().unwrap();
    let state = tracker.state();
    assert_eq!(summary.events.len(), 2);

    let (RaceEvent::RiderReady(ready), RaceEvent::Timing(start)) =
        (&summary.events[0], &summary.events[1])
    else {
        panic!("expected ready then timing");
    };
    assert!(Arc::ptr_eq(&state.on_track[0].ready, ready));
    assert!(Arc::ptr_eq(&state.on_track[0].start, start));
    assert_eq!(start.rider.get().map(|r| r.name.as_str()), Some("Martijn"));
    assert_eq!(start.micros, 100);
    assert_eq!(start.time, at(0));

    assert!(state.waiting.is_none());
    assert!(state.pending_end_ids.is_empty());
    assert!(state.pending_end_times.is_empty());
}

#[test]
fn test_lone_end_trigger_is_saved() {
    let tracker = create_tracker(&[]);

    tracker.submit_gate_trigger(END_GATE, 100, at(0)).unwrap();

    let summary = tracker.stop().unwrap();
    let state = tracker.state();
    assert_eq!(summary.events.len(), 1);

    let RaceEvent::Timing(end) = &summary.events[0] else {
        panic!("expected a timing event");
    };
    assert!(Arc::ptr_eq(&state.pending_end_times[0], end));
    assert!(end.rider.get().is_none());
    assert_eq!(end.micros, 100);
}

#[test]
fn test_end_id_without_rider_on_track_is_ignored() {
    let martijn = Rider::new("Martijn");
    let tracker = create_tracker(&[&martijn]);

    tracker.submit_end_identification(martijn.id, at(0)).unwrap();

    let summary = tracker.stop().unwrap();
    let state = tracker.state();
    assert!(summary.events.is_empty());
    assert!(state.pending_end_ids.is_empty());
    assert!(state.pending_end_times.is_empty());
    assert_eq!(tracker.metrics().ignored_end_ids, 1);
}

#[test]
fn test_end_id_for_other_rider_is_ignored() {
    let martijn = Rider::new("Martijn");
    let richard = Rider::new("Richard");
    let tracker = create_tracker(&[&martijn, &richard]);

    start_lap(&tracker, &martijn, 0);
    tracker.submit_end_identification(richard.id, at(0)).unwrap();

    let summary = tracker.stop().unwrap();
    let state = tracker.state();
    assert_eq!(summary.events.len(), 2);
    assert_eq!(state.on_track.len(), 1);
    assert_eq!(state.on_track[0].ready.rider.name, "Martijn");
    assert!(state.pending_end_ids.is_empty());
    assert!(state.pending_end_times.is_empty());
}

fn complete_lap_with_noise(unmatched_time: bool, unmatched_id: bool, flip_end_events: bool) {
    let martijn = Rider::new("Martijn");
    let richard = Rider::new("Richard");
    let tracker = create_tracker(&[&martijn, &richard]);

    tracker.submit_rider_ready(martijn.id, at(0), "start").unwrap();
    tracker.submit_gate_trigger(START_GATE, 100, at(1)).unwrap();

    // somebody walks through the end gate shortly after the start
    if unmatched_time {
        tracker.submit_gate_trigger(END_GATE, 400, at(11)).unwrap();
    }
    // a rider who is not on track wanders past the end box
    if unmatched_id {
        tracker.submit_end_identification(richard.id, at(29)).unwrap();
    }

    let end_id = || tracker.submit_end_identification(martijn.id, at(60)).unwrap();
    let end_time = || {
        tracker.submit_gate_trigger(END_GATE, 500, at(61)).unwrap();
    };
    if flip_end_events {
        end_time();
        end_id();
    } else {
        end_id();
        end_time();
    }

    let summary = tracker.stop().unwrap();
    let state = tracker.state();
    let finish = last_finished(&summary.events);

    assert_eq!(finish.rider().name, "Martijn");
    assert_eq!(finish.lap_time(), 400);

    assert!(state.waiting.is_none());
    assert!(state.on_track.is_empty());
    assert!(state.pending_end_ids.is_empty());
    assert!(state.pending_end_times.is_empty());
}

#[test]
fn test_lap_completes_in_clean_race() {
    complete_lap_with_noise(false, false, false);
    complete_lap_with_noise(false, false, true);
}

#[test]
fn test_lap_completes_with_stray_end_trigger() {
    complete_lap_with_noise(true, false, false);
    complete_lap_with_noise(true, false, true);
}

#[test]
fn test_lap_completes_with_stray_end_id() {
    complete_lap_with_noise(false, true, false);
    complete_lap_with_noise(false, true, true);
}

#[test]
fn test_lap_completes_with_all_noise() {
    complete_lap_with_noise(true, true, false);
    complete_lap_with_noise(true, true, true);
}

fn end_id_respects_timeout(offset: i64) {
    let martijn = Rider::new("Martijn");
    let tracker = create_tracker(&[&martijn]);
    let shifted = |delta: i64| at((80 + delta) as u64);

    tracker.submit_rider_ready(martijn.id, at(0), "start").unwrap();
    tracker.submit_gate_trigger(START_GATE, 100, at(20)).unwrap();
    tracker.submit_gate_trigger(END_GATE, 500, at(80)).unwrap();

    // one second outside the window, must not match
    tracker
        .submit_end_identification(martijn.id, shifted(offset + offset.signum()))
        .unwrap();
    assert_eq!(tracker.state().pending_end_ids.len(), 1);

    // exactly on the window edge, matches
    tracker
        .submit_end_identification(martijn.id, shifted(offset))
        .unwrap();

    let summary = tracker.stop().unwrap();
    let state = tracker.state();
    let finish = last_finished(&summary.events);
    assert_eq!(finish.left.time, shifted(offset));

    assert!(state.waiting.is_none());
    assert!(state.pending_end_times.is_empty());
    assert!(state.on_track.is_empty());

    // a later id is still young enough to match a future trigger
    let expected = if offset > 0 { 1 } else { 0 };
    assert_eq!(state.pending_end_ids.len(), expected);
}

#[test]
fn test_end_id_respects_timeout_late() {
    end_id_respects_timeout(10);
}

#[test]
fn test_end_id_respects_timeout_early() {
    end_id_respects_timeout(-10);
}

fn end_trigger_respects_timeout(offset: i64) {
    let martijn = Rider::new("Martijn");
    let tracker = create_tracker(&[&martijn]);
    let shifted = |delta: i64| at((80 + delta) as u64);

    tracker.submit_rider_ready(martijn.id, at(0), "start").unwrap();
    tracker.submit_gate_trigger(START_GATE, 100, at(20)).unwrap();
    tracker.submit_end_identification(martijn.id, at(80)).unwrap();

    tracker
        .submit_gate_trigger(END_GATE, 500, shifted(offset + offset.signum()))
        .unwrap();
    tracker
        .submit_gate_trigger(END_GATE, 500, shifted(offset))
        .unwrap();

    let summary = tracker.stop().unwrap();
    let state = tracker.state();
    let finish = last_finished(&summary.events);
    assert_eq!(finish.time_end.time, shifted(offset));

    assert!(state.waiting.is_none());
    assert!(state.pending_end_ids.is_empty());
    assert!(state.on_track.is_empty());

    let expected = if offset > 0 { 1 } else { 0 };
    assert_eq!(state.pending_end_times.len(), expected);
}

#[test]
fn test_end_trigger_respects_timeout_late() {
    end_trigger_respects_timeout(10);
}

#[test]
fn test_end_trigger_respects_timeout_early() {
    end_trigger_respects_timeout(-10);
}

#[test]
fn test_multiple_riders_on_track_with_dnf() {
    let martijn = Rider::new("Martijn");
    let richard = Rider::new("Richard");
    let bert = Rider::new("Bert");
    let tracker = create_tracker(&[&martijn, &richard, &bert]);

    simulate_race_with_dnf(&tracker, &martijn, &richard, &bert);

    let summary = tracker.stop().unwrap();
    let state = tracker.state();

    let finishes: Vec<_> = summary
        .events
        .iter()
        .filter_map(|e| match e {
            RaceEvent::Finished(f) => Some(f.rider().name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(finishes, vec!["Martijn", "Bert"]);

    let Some(RaceEvent::UnitDnf(dnf)) = summary.events.last() else {
        panic!("expected the inferred DNF last");
    };
    assert_eq!(dnf.this_rider.rider.name, "Richard");
    assert_eq!(dnf.other.rider().name, "Bert");

    assert!(state.waiting.is_none());
    assert!(state.on_track.is_empty());
    assert!(state.pending_end_ids.is_empty());
    assert!(state.pending_end_times.is_empty());

    let laps = tracker.laps(0);
    assert_eq!(laps.len(), 3);
    assert!(laps[2].is_dnf());
    assert_eq!(laps[2].rider().name, "Richard");
    assert_eq!(laps[0].lap_time(false), Some(60_000_000));

    let metrics = tracker.metrics();
    assert_eq!(metrics.laps_finished, 2);
    assert_eq!(metrics.laps_dnf, 1);
}

#[test]
fn test_accidental_end_id_keeps_nearest() {
    let martijn = Rider::new("Martijn");
    let tracker = create_tracker(&[&martijn]);

    start_lap(&tracker, &martijn, 0);
    // the course passes close to the end box
    tracker.submit_end_identification(martijn.id, at(80)).unwrap();
    // the real identification five seconds later
    tracker.submit_end_identification(martijn.id, at(85)).unwrap();
    tracker.submit_gate_trigger(END_GATE, 500, at(86)).unwrap();

    let summary = tracker.stop().unwrap();
    let state = tracker.state();
    let finish = last_finished(&summary.events);
    assert_eq!(finish.left.time, at(85));

    assert!(state.on_track.is_empty());
    assert!(state.pending_end_times.is_empty());
    assert_eq!(state.pending_end_ids.len(), 1);
    assert_eq!(state.pending_end_ids[0].time, at(80));
}

#[test]
fn test_end_pair_links_write_once_fields() {
    let martijn = Rider::new("Martijn");
    let tracker = create_tracker(&[&martijn]);

    start_lap(&tracker, &martijn, 0);
    end_lap(&tracker, &martijn, 60);

    let finish = last_finished(&tracker.events());
    assert_eq!(finish.time_end.rider.get(), Some(&martijn));
    assert_eq!(finish.left.time_end.get(), Some(&finish.time_end.event_id));
}

#[test]
fn test_unknown_gate_is_rejected() {
    let tracker = create_tracker(&[]);
    let result = tracker.submit_gate_trigger(7, 100, at(0));
    assert!(result.is_err());
    assert_eq!(tracker.event_count(), 0);
}

#[test]
fn test_negative_gate_reading_is_rejected() {
    let martijn = Rider::new("Martijn");
    let tracker = create_tracker(&[&martijn]);
    tracker.submit_rider_ready(martijn.id, at(0), "start").unwrap();

    let result = tracker.submit_gate_trigger(START_GATE, i64::MIN, at(1));
    assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidArgument);
    let result = tracker.submit_gate_trigger(END_GATE, -1, at(1));
    assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidArgument);

    assert!(tracker.state().waiting.is_some());
    assert_eq!(tracker.event_count(), 1);
}

#[test]
fn test_end_reading_before_start_reading_never_pairs() {
    let martijn = Rider::new("Martijn");
    let bert = Rider::new("Bert");
    let tracker = create_tracker(&[&martijn, &bert]);

    tracker.submit_rider_ready(martijn.id, at(10), "start").unwrap();
    tracker
        .submit_gate_trigger(START_GATE, 10_000_000, at(10))
        .unwrap();

    // the device reading is older than the start reading, so the pair is refused
    tracker.submit_end_identification(martijn.id, at(40)).unwrap();
    let early = tracker
        .submit_gate_trigger(END_GATE, 5_000_000, at(40))
        .unwrap()
        .unwrap();
    assert!(tracker.laps(0).is_empty());
    let state = tracker.state();
    assert_eq!(state.on_track.len(), 1);
    assert_eq!(state.pending_end_ids.len(), 1);
    assert_eq!(state.pending_end_times.len(), 1);

    // a consistent reading still pairs with the waiting identification
    tracker
        .submit_gate_trigger(END_GATE, 40_000_000, at(41))
        .unwrap();
    let laps = tracker.laps(0);
    assert_eq!(laps.len(), 1);
    assert_eq!(laps[0].lap_time(false), Some(30_000_000));

    // staff cannot pair it by hand either
    tracker.submit_rider_ready(bert.id, at(50), "start").unwrap();
    tracker
        .submit_gate_trigger(START_GATE, 50_000_000, at(50))
        .unwrap();
    let result = tracker.confirm_finish(early, bert.id, "judge", at(55));
    assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(tracker.state().on_track.len(), 1);
    assert_eq!(tracker.state().pending_end_times.len(), 1);
}

#[test]
fn test_rider_waiting_notification() {
    let martijn = Rider::new("Martijn");
    let bert = Rider::new("Bert");
    let tracker = create_tracker(&[&martijn, &bert]);

    let waiting = Arc::new(Mutex::new(None::<String>));
    let seen = waiting.clone();
    tracker.subscribe(move |n| {
        if let Notification::RiderWaiting(rider) = n {
            *seen.lock() = Some(rider.name.clone());
        }
    });

    tracker.submit_rider_ready(martijn.id, at(0), "start").unwrap();
    assert_eq!(waiting.lock().as_deref(), Some("Martijn"));

    // the box holds one rider, Bert has to wait until Martijn starts
    assert!(tracker.submit_rider_ready(bert.id, at(1), "start").is_err());
    assert_eq!(waiting.lock().as_deref(), Some("Martijn"));

    tracker.submit_gate_trigger(START_GATE, 100, at(2)).unwrap();
    tracker.submit_rider_ready(bert.id, at(3), "start").unwrap();
    assert_eq!(waiting.lock().as_deref(), Some("Bert"));
}

#[test]
fn test_start_empty_notification() {
    let martijn = Rider::new("Martijn");
    let tracker = create_tracker(&[&martijn]);
    let mut rx = tracker.subscribe_channel();

    tracker.submit_rider_ready(martijn.id, at(0), "start").unwrap();
    assert!(matches!(rx.try_recv(), Ok(Notification::RiderWaiting(_))));
    assert!(rx.try_recv().is_err());

    tracker.submit_gate_trigger(START_GATE, 100, at(1)).unwrap();
    assert!(matches!(rx.try_recv(), Ok(Notification::StartEmpty)));
}

#[test]
fn test_finish_and_dnf_notifications() {
    let martijn = Rider::new("Martijn");
    let richard = Rider::new("Richard");
    let bert = Rider::new("Bert");
    let tracker = create_tracker(&[&martijn, &richard, &bert]);

    let finished = Arc::new(Mutex::new(Vec::<String>::new()));
    let dnf = Arc::new(Mutex::new(Vec::<String>::new()));
    let (f, d) = (finished.clone(), dnf.clone());
    tracker.subscribe(move |n| match n {
        Notification::RiderMatched(lap) => f.lock().push(lap.rider().name.clone()),
        Notification::RiderDnf(lap) => d.lock().push(lap.rider().name.clone()),
        _ => {}
    });

    simulate_race_with_dnf(&tracker, &martijn, &richard, &bert);

    assert_eq!(*finished.lock(), vec!["Martijn", "Bert"]);
    assert_eq!(*dnf.lock(), vec!["Richard"]);
}

#[test]
fn test_best_laps_leaderboard() {
    let martijn = Rider::new("Martijn");
    let richard = Rider::new("Richard");
    let bert = Rider::new("Bert");
    let tracker = create_tracker(&[&martijn, &richard, &bert]);

    simulate_race_with_dnf(&tracker, &martijn, &richard, &bert);

    // second, faster lap for Martijn
    tracker.submit_rider_ready(martijn.id, at(200), "start").unwrap();
    tracker.submit_gate_trigger(START_GATE, 1_000, at(200)).unwrap();
    tracker.submit_end_identification(martijn.id, at(250)).unwrap();
    tracker.submit_gate_trigger(END_GATE, 50_001_000, at(250)).unwrap();

    let best: Vec<Lap> = tracker.best_laps();
    let names: Vec<_> = best.iter().map(|l| l.rider().name.as_str()).collect();
    assert_eq!(names, vec!["Martijn", "Bert", "Richard"]);
    assert_eq!(best[0].lap_time(true), Some(50_000_000));
    assert_eq!(tracker.laps(3).len(), 1);
    assert!(tracker.laps(10).is_empty());
}

#[test]
fn test_summary_lists_event_kinds_in_order() {
    let martijn = Rider::new("Martijn");
    let tracker = create_tracker(&[&martijn]);

    start_lap(&tracker, &martijn, 0);
    end_lap(&tracker, &martijn, 60);

    let kinds: Vec<_> = tracker.summary().events.iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            RaceEventKind::RiderReady,
            RaceEventKind::Timing,
            RaceEventKind::RiderFinished,
            RaceEventKind::Timing,
            RaceEventKind::Finished,
        ]
    );
}
