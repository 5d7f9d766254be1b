//! Admissions and queries racing with snapshots and tiering passes.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use chrono::{Duration, Utc};

use keepsake_core::memory::{
    EntryDraft, MemoryId, MemoryQuery, MemoryStore, RetentionPolicy, TieringEngine,
};
use keepsake_core::snapshot::{SnapshotManager, SnapshotReason};
use keepsake_core::storage::fakes::{MemoryCasStore, MemoryEntryStore};
use keepsake_core::MemoryConfig;

const WRITERS: usize = 4;
const PER_WRITER: usize = 50;

#[test]
fn snapshots_taken_during_admission_are_self_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        MemoryStore::open(
            &MemoryConfig::default(),
            Arc::new(MemoryEntryStore::new()),
            Some(Arc::new(MemoryCasStore::new())),
        )
        .unwrap(),
    );
    let snapshots = Arc::new(SnapshotManager::new(store.clone(), dir.path(), None).unwrap());

    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..PER_WRITER {
                    store
                        .admit(EntryDraft::new(format!("w{w} n{i}")).with_tag(format!("writer:w{w}")))
                        .unwrap();
                }
            })
        })
        .collect();

    let snapper = {
        let snapshots = snapshots.clone();
        thread::spawn(move || {
            (0..10)
                .map(|_| snapshots.take(SnapshotReason::Scheduled).unwrap().id)
                .collect::<Vec<_>>()
        })
    };

    let reader = {
        let store = store.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                for hit in store.query(&MemoryQuery::tagged("writer").unwrap()).unwrap() {
                    assert!(!hit.tags.is_empty());
                }
            }
        })
    };

    for w in writers {
        w.join().unwrap();
    }
    let ids = snapper.join().unwrap();
    reader.join().unwrap();

    let mut last = 0;
    for id in &ids {
        let doc = snapshots.load(id).unwrap();
        assert!(doc.entries.len() >= last);
        last = doc.entries.len();
    }
    assert_eq!(store.len(), WRITERS * PER_WRITER);
    assert_eq!(
        store
            .query_by_tags(&["writer"], true, usize::MAX)
            .unwrap()
            .len(),
        WRITERS * PER_WRITER
    );
}

#[test]
fn tiering_alongside_admission_loses_nothing() {
    let store = Arc::new(
        MemoryStore::new(&MemoryConfig::default()).with_archive(Arc::new(MemoryCasStore::new())),
    );
    let engine = Arc::new(TieringEngine::new(RetentionPolicy::default()));

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            for i in 0..200 {
                store.admit(EntryDraft::new(format!("n{i}")).with_tag("t")).unwrap();
            }
        })
    };
    let tierer = {
        let store = store.clone();
        let engine = engine.clone();
        thread::spawn(move || {
            for _ in 0..20 {
                engine.run_pass(&store, Utc::now() + Duration::days(100));
            }
        })
    };
    writer.join().unwrap();
    tierer.join().unwrap();

    engine.run_pass(&store, Utc::now() + Duration::days(100));
    assert_eq!(store.len(), 200);
    assert_eq!(store.stats().archived, 200);
    assert_eq!(store.query_by_tags(&["t"], true, usize::MAX).unwrap().len(), 200);
}

#[test]
fn admissions_racing_a_restore_are_kept_or_captured() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        MemoryStore::open(
            &MemoryConfig::default(),
            Arc::new(MemoryEntryStore::new()),
            None,
        )
        .unwrap(),
    );
    let snapshots = Arc::new(SnapshotManager::new(store.clone(), dir.path(), None).unwrap());
    store.admit(EntryDraft::new("baseline")).unwrap();
    let base = snapshots.take(SnapshotReason::Emergency).unwrap().id;

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            (0..200)
                .map(|i| store.admit(EntryDraft::new(format!("n{i}"))).unwrap().id)
                .collect::<Vec<_>>()
        })
    };
    let restorer = {
        let snapshots = snapshots.clone();
        thread::spawn(move || {
            (0..10)
                .map(|_| snapshots.restore(&base).unwrap().safety)
                .collect::<Vec<_>>()
        })
    };
    let admitted = writer.join().unwrap();
    let safeties = restorer.join().unwrap();

    let mut seen: HashSet<MemoryId> = store
        .recent(usize::MAX)
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    for id in &safeties {
        seen.extend(snapshots.load(id).unwrap().entries.into_iter().map(|e| e.id));
    }
    for id in admitted {
        assert!(seen.contains(&id), "admitted {id} is in neither the store nor a safety capture");
    }
}
