use gymkhana_schema::{Rider, TrackerConfig, NANOS_PER_SECOND};
use gymkhana_tracker::{ErrorKind, RaceTracker};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn create_tracker(riders: Vec<Rider>) -> Arc<RaceTracker> {
    Arc::new(RaceTracker::new(TrackerConfig::default(), riders).unwrap())
}

#[test]
fn test_start_box_admits_one_rider() {
    let riders: Vec<_> = (0..8).map(|i| Rider::new(format!("Rider {}", i))).collect();
    let tracker = create_tracker(riders.clone());
    let barrier = Arc::new(Barrier::new(riders.len()));
    let admitted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = riders
        .into_iter()
        .map(|rider| {
            let tracker = tracker.clone();
            let barrier = barrier.clone();
            let admitted = admitted.clone();
            thread::spawn(move || {
                barrier.wait();
                match tracker.submit_rider_ready(rider.id, 0, "start") {
                    Ok(_) => {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict),
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.event_count(), 1);
    assert!(tracker.state().waiting.is_some());
}

#[test]
fn test_concurrent_producers_keep_state_consistent() {
    let riders: Vec<_> = (0..20).map(|i| Rider::new(format!("Rider {}", i))).collect();
    let tracker = create_tracker(riders.clone());
    let second = NANOS_PER_SECOND;

    // start side: riders go through the box one after another
    let starter = {
        let tracker = tracker.clone();
        let riders = riders.clone();
        thread::spawn(move || {
            for (i, rider) in riders.iter().enumerate() {
                let t = i as u64 * 100 * second;
                tracker.submit_rider_ready(rider.id, t, "start").unwrap();
                tracker.submit_gate_trigger(0, (t / 1_000) as i64, t).unwrap();
            }
        })
    };
    starter.join().unwrap();

    // end side: identifications and gate triggers arrive on separate threads
    let identifier = {
        let tracker = tracker.clone();
        let riders = riders.clone();
        thread::spawn(move || {
            for (i, rider) in riders.iter().enumerate() {
                let t = i as u64 * 100 * second + 60 * second;
                tracker.submit_end_identification(rider.id, t).unwrap();
            }
        })
    };
    let timer = {
        let tracker = tracker.clone();
        thread::spawn(move || {
            for i in 0..20u64 {
                let t = i * 100 * second + 60 * second;
                tracker.submit_gate_trigger(1, (t / 1_000) as i64, t).unwrap();
            }
        })
    };
    // staff and display traffic in parallel
    let observer = {
        let tracker = tracker.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                let state = tracker.state();
                assert!(state.on_track.len() <= 20);
                let _ = tracker.best_laps();
            }
        })
    };

    identifier.join().unwrap();
    timer.join().unwrap();
    observer.join().unwrap();

    let laps = tracker.laps(0);
    assert_eq!(laps.len(), 20);
    assert!(laps.iter().all(|l| !l.is_dnf()));
    assert!(laps.iter().all(|l| l.lap_time(false) == Some(60_000_000)));

    let state = tracker.state();
    assert!(state.on_track.is_empty());
    assert!(state.pending_end_ids.is_empty());
    assert!(state.pending_end_times.is_empty());
}

#[test]
fn test_stop_keeps_every_accepted_event() {
    let tracker = create_tracker(Vec::new());
    let barrier = Arc::new(Barrier::new(5));

    let producers: Vec<_> = (0..4u64)
        .map(|p| {
            let tracker = tracker.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut accepted = Vec::new();
                for i in 0u64.. {
                    let t = (p * 1_000_000 + i) * NANOS_PER_SECOND;
                    match tracker.submit_gate_trigger(1, (t / 1_000) as i64, t) {
                        Ok(Some(id)) => accepted.push(id),
                        Ok(None) => panic!("end gate trigger without an event id"),
                        Err(e) => {
                            assert_eq!(e.kind(), ErrorKind::NotRunning);
                            break;
                        }
                    }
                }
                accepted
            })
        })
        .collect();

    barrier.wait();
    thread::sleep(Duration::from_millis(5));
    let summary = tracker.stop().unwrap();

    let accepted: Vec<_> = producers
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let logged: HashSet<_> = summary.events.iter().map(|e| e.event_id()).collect();

    assert_eq!(summary.events.len(), accepted.len());
    assert!(accepted.iter().all(|id| logged.contains(id)));
}
