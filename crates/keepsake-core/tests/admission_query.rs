//! Admission and retrieval scenarios against the memory store.

use serde_json::json;

use keepsake_core::memory::{
    AdmissionError, Content, EntryDraft, MemoryError, MemoryKind, MemoryQuery, MemoryStore,
};
use keepsake_core::MemoryConfig;

fn store() -> MemoryStore {
    MemoryStore::new(&MemoryConfig::default())
}

#[test]
fn tagged_entry_is_found_under_its_root() {
    let s = store();
    let joy = s
        .admit(EntryDraft::new("laughed at the picnic").with_tag("emotion:joy").with_importance(0.8))
        .unwrap();

    let hits = s.query(&MemoryQuery::tagged("emotion").unwrap()).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, joy.id);
}

#[test]
fn below_threshold_is_never_retrievable() {
    let s = store();
    let err = s
        .admit(EntryDraft::new("meh").with_tag("emotion:joy").with_importance(0.05))
        .unwrap_err();
    assert!(matches!(
        err,
        MemoryError::Admission(AdmissionError::BelowThreshold { .. })
    ));

    assert!(s.query(&MemoryQuery::tagged("emotion").unwrap()).unwrap().is_empty());
    assert!(s.query(&MemoryQuery::new()).unwrap().is_empty());
    assert!(s.all_tags().is_empty());
}

#[test]
fn malformed_tag_rejects_whole_entry() {
    let s = store();
    let err = s
        .admit(EntryDraft::new("x").with_tags(["ok:fine", "bad::path"]))
        .unwrap_err();
    assert!(matches!(
        err,
        MemoryError::Admission(AdmissionError::MalformedTag { .. })
    ));
    assert!(s.is_empty());
    assert!(s.query_by_tags(&["ok"], false, 10).unwrap().is_empty());
}

#[test]
fn results_rank_by_importance_then_recency() {
    let s = store();
    let low = s.admit(EntryDraft::new("low").with_tag("pet").with_importance(0.3)).unwrap();
    let high = s.admit(EntryDraft::new("high").with_tag("pet:cat").with_importance(0.9)).unwrap();
    let newer_low = s.admit(EntryDraft::new("low2").with_tag("pet:dog").with_importance(0.3)).unwrap();

    let ids: Vec<_> = s
        .query(&MemoryQuery::tagged("pet").unwrap())
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec![high.id, newer_low.id, low.id]);
}

#[test]
fn text_kind_and_limit_filters_combine() {
    let s = store();
    s.admit(EntryDraft::new("Walked by the River").with_kind(MemoryKind::Experience))
        .unwrap();
    s.admit(EntryDraft::new("river otters are cute").with_kind(MemoryKind::Fact))
        .unwrap();
    s.admit(EntryDraft::new(json!({"place": "RIVERSIDE cafe"})).with_kind(MemoryKind::Preference))
        .unwrap();

    assert_eq!(s.query(&MemoryQuery::new().with_text("river")).unwrap().len(), 3);
    let exp = s
        .query(&MemoryQuery::new().with_text("river").with_kind(MemoryKind::Experience))
        .unwrap();
    assert_eq!(exp.len(), 1);
    assert_eq!(exp[0].content, Content::from("Walked by the River"));
    assert_eq!(s.query(&MemoryQuery::new().with_limit(2)).unwrap().len(), 2);
    assert!(s.query(&MemoryQuery::new().with_limit(0)).unwrap().is_empty());
    assert_eq!(s.query(&MemoryQuery::new().with_text("   ")).unwrap().len(), 3);
}

#[test]
fn reads_update_access_bookkeeping() {
    let s = store();
    let e = s.admit(EntryDraft::new("a").with_tag("t")).unwrap();
    assert_eq!(e.access_count, 0);

    let hit = &s.query(&MemoryQuery::tagged("t").unwrap()).unwrap()[0];
    assert_eq!(hit.access_count, 1);
    assert!(hit.last_accessed_at >= e.last_accessed_at);
    assert_eq!(s.get(&e.id).unwrap().access_count, 2);
}

#[test]
fn capacity_caps_admission_without_eviction() {
    let s = MemoryStore::new(&MemoryConfig {
        max_memories: 2,
        ..MemoryConfig::default()
    });
    let first = s.admit(EntryDraft::new("1")).unwrap();
    s.admit(EntryDraft::new("2")).unwrap();
    let err = s.admit(EntryDraft::new("3")).unwrap_err();
    assert!(matches!(
        err,
        MemoryError::Admission(AdmissionError::CapacityReached { max: 2 })
    ));
    assert_eq!(s.len(), 2);
    assert!(s.contains(&first.id));
}

#[test]
fn add_tags_then_delete_clears_index() {
    let s = store();
    let e = s.admit(EntryDraft::new("x").with_tag("a:b")).unwrap();
    let updated = s.add_tags(&e.id, &["a:c", "a:b", "z"]).unwrap();
    assert_eq!(updated.tags.len(), 3);
    assert_eq!(s.query_by_tags(&["a:c", "z"], true, 10).unwrap().len(), 1);

    s.delete(&e.id).unwrap();
    assert!(s.all_tags().is_empty());
    assert!(s.query_by_tags(&["a"], false, 10).unwrap().is_empty());
    assert!(matches!(s.get(&e.id), Err(MemoryError::NotFound { .. })));
    assert!(matches!(s.delete(&e.id), Err(MemoryError::NotFound { .. })));
}

#[test]
fn unknown_tag_path_resolves_empty() {
    let s = store();
    s.admit(EntryDraft::new("x").with_tag("music:jazz")).unwrap();
    assert!(s.query(&MemoryQuery::tagged("music:rock").unwrap()).unwrap().is_empty());
    assert!(s.query_by_tags::<&str>(&[], true, 10).unwrap().is_empty());
    assert!(matches!(
        MemoryQuery::tagged("::"),
        Err(MemoryError::InvalidQuery(_))
    ));
}
