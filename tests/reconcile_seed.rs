// tests/reconcile_seed.rs
//
// Pure reconciler + deriver over the bundled seed, through the public API only.

use std::collections::HashSet;

use chrono::{TimeZone, Utc};

use event_sync::ingest::{types::RawCandidate, validate_batch};
use event_sync::model::{seed_catalog, EventStatus};
use event_sync::{derive_notifications, mark_imported, reconcile};

fn batch() -> Vec<event_sync::model::IncomingItem> {
    let raw: Vec<RawCandidate> =
        serde_json::from_str(include_str!("../config/mock_candidates.json")).unwrap();
    let (items, dropped) = validate_batch(raw);
    assert_eq!(dropped, 0);
    items
}

#[test]
fn ids_are_unique_and_stable_across_runs() {
    let now = Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap();
    let first = reconcile(&seed_catalog().unwrap(), &batch(), now);
    let second = reconcile(&first, &batch(), now);

    let ids: HashSet<_> = second.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids.len(), second.len());
    let first_ids: Vec<_> = first.iter().map(|e| &e.id).collect();
    let second_ids: Vec<_> = second.iter().map(|e| &e.id).collect();
    assert_eq!(first_ids, second_ids);
    assert_eq!(first, second);
}

#[test]
fn date_change_notifies_only_subscribers_once() {
    let t0 = Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap();
    let t1 = Utc.with_ymd_and_hms(2024, 6, 11, 0, 0, 0).unwrap();
    let seed = seed_catalog().unwrap();

    let mut moved = batch();
    moved[0].date_time = "2024-06-21T08:00:00Z".into(); // Bondi, Sports
    let next = reconcile(&seed, &moved, t0);
    let bondi = next.iter().find(|e| e.id == "2").unwrap();
    assert_eq!(bondi.status, EventStatus::Updated);
    assert_eq!(bondi.date_time, "2024-06-21T08:00:00Z");

    let sports: HashSet<String> = ["Sports".to_string()].into();
    let fresh = derive_notifications(&seed, &next, &sports, t0);
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].message, "Updated event: Bondi Beach Surf Competition");
    assert_eq!(fresh[0].event_id, "2");

    // Same batch again: still updated, nothing new to announce.
    let again = reconcile(&next, &moved, t1);
    assert!(derive_notifications(&next, &again, &sports, t1).is_empty());

    let music: HashSet<String> = ["Music".to_string()].into();
    let music_only = derive_notifications(&seed, &next, &music, t0);
    assert_eq!(music_only.len(), 1);
    assert!(music_only[0].message.starts_with("New event: City Recital Hall"));
}

#[test]
fn imported_record_is_never_touched_by_reconcile() {
    let now = Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap();
    let seed = seed_catalog().unwrap();
    let imported = mark_imported(&seed, "3", "Dana", None, now).unwrap();

    // Fireworks is absent from the batch; imported must not go inactive.
    let next = reconcile(&imported, &batch(), now);
    let fw = next.iter().find(|e| e.id == "3").unwrap();
    assert_eq!(fw.status, EventStatus::Imported);
    assert_eq!(fw.imported_by.as_deref(), Some("Dana"));
}
