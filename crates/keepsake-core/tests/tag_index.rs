//! Property tests for the hierarchical tag index.

use std::collections::HashSet;

use proptest::prelude::*;

use keepsake_core::memory::{MemoryId, TagIndex, TagPath};

fn segment() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,5}"
}

fn tag_path() -> impl Strategy<Value = TagPath> {
    prop::collection::vec(segment(), 1..5)
        .prop_map(|segs| TagPath::from_segments(segs).expect("generated segments are valid"))
}

proptest! {
    #[test]
    fn every_prefix_resolves_to_the_entry(path in tag_path()) {
        let mut index = TagIndex::new();
        let id = MemoryId::new();
        index.insert(id, &path);

        for depth in 1..=path.depth() {
            let prefix = TagPath::from_segments(path.segments()[..depth].to_vec()).unwrap();
            prop_assert!(index.resolve(&prefix).contains(&id), "missing under {}", prefix);
        }
    }

    #[test]
    fn removing_one_path_keeps_shared_ancestors(
        a in tag_path(),
        b in tag_path(),
    ) {
        prop_assume!(a != b);
        let mut index = TagIndex::new();
        let id = MemoryId::new();
        index.insert(id, &a);
        index.insert(id, &b);
        index.remove(&id, &a);

        for depth in 1..=b.depth() {
            let prefix = TagPath::from_segments(b.segments()[..depth].to_vec()).unwrap();
            prop_assert!(index.resolve(&prefix).contains(&id));
        }
        if !b.starts_with(&a) {
            prop_assert!(!index.resolve(&a).contains(&id));
        }
    }

    #[test]
    fn remove_all_leaves_no_trace(paths in prop::collection::vec(tag_path(), 1..6)) {
        let mut index = TagIndex::new();
        let id = MemoryId::new();
        let other = MemoryId::new();
        for p in &paths {
            index.insert(id, p);
            index.insert(other, p);
        }
        index.remove_all(&id);

        prop_assert!(!index.contains(&id));
        for p in &paths {
            let hits = index.resolve(p);
            prop_assert!(!hits.contains(&id));
            prop_assert!(hits.contains(&other));
        }
    }

    #[test]
    fn intersection_is_subset_of_union(
        entries in prop::collection::vec(prop::collection::vec(tag_path(), 1..4), 1..8),
        query in prop::collection::vec(tag_path(), 1..3),
    ) {
        let mut index = TagIndex::new();
        for paths in &entries {
            let id = MemoryId::new();
            for p in paths {
                index.insert(id, p);
            }
        }
        let all: HashSet<_> = index.resolve_many(&query, true);
        let any: HashSet<_> = index.resolve_many(&query, false);
        prop_assert!(all.is_subset(&any));
    }
}

#[test]
fn sibling_paths_do_not_leak() {
    let mut index = TagIndex::new();
    let joy = MemoryId::new();
    let grief = MemoryId::new();
    index.insert(joy, &TagPath::parse("emotion:joy").unwrap());
    index.insert(grief, &TagPath::parse("emotion:grief").unwrap());

    let emotion = index.resolve(&TagPath::parse("emotion").unwrap());
    assert_eq!(emotion.len(), 2);
    let only_joy = index.resolve(&TagPath::parse("emotion:joy").unwrap());
    assert_eq!(only_joy, HashSet::from([joy]));
    assert!(index
        .resolve(&TagPath::parse("emotion:joy:deep").unwrap())
        .is_empty());
}
