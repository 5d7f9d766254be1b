//! Hierarchical tag index mapping tag paths to memory ids.
//!
//! Every node keeps the ids tagged exactly at its path plus a reference count
//! for every id tagged at or below it. Insertion walks the path and bumps the
//! count on each ancestor, so resolving a prefix is a single node lookup.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::entry::MemoryId;
use super::tags::TagPath;

#[derive(Debug, Clone, Default)]
struct TagNode {
    /// Ids tagged exactly at this path.
    exact: BTreeSet<MemoryId>,
    /// Number of each id's registered paths that pass through this node.
    refs: HashMap<MemoryId, usize>,
    children: BTreeMap<String, TagNode>,
}

impl TagNode {
    fn child(&self, segments: &[String]) -> Option<&TagNode> {
        let mut node = self;
        for segment in segments {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    fn release(&mut self, id: &MemoryId) {
        if let Some(count) = self.refs.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                self.refs.remove(id);
            }
        }
    }

    fn remove_path(&mut self, id: &MemoryId, segments: &[String]) -> bool {
        match segments.split_first() {
            None => {
                if !self.exact.remove(id) {
                    return false;
                }
            }
            Some((head, rest)) => {
                let Some(child) = self.children.get_mut(head) else {
                    return false;
                };
                if !child.remove_path(id, rest) {
                    return false;
                }
                if child.refs.is_empty() {
                    self.children.remove(head);
                }
            }
        }
        self.release(id);
        true
    }

    fn remove_everywhere(&mut self, id: &MemoryId) -> usize {
        let mut removed = usize::from(self.exact.remove(id));
        self.children.retain(|_, child| {
            removed += child.remove_everywhere(id);
            !child.refs.is_empty()
        });
        self.refs.remove(id);
        removed
    }

    fn collect_paths(
        &self,
        prefix: &mut Vec<String>,
        filter: Option<&MemoryId>,
        out: &mut Vec<(TagPath, usize)>,
    ) {
        let hit = match filter {
            Some(id) => self.exact.contains(id),
            None => !self.exact.is_empty(),
        };
        if hit && !prefix.is_empty() {
            if let Ok(path) = TagPath::from_segments(prefix.iter()) {
                out.push((path, self.exact.len()));
            }
        }
        for (segment, child) in &self.children {
            if filter.is_some_and(|id| !child.refs.contains_key(id)) {
                continue;
            }
            prefix.push(segment.clone());
            child.collect_paths(prefix, filter, out);
            prefix.pop();
        }
    }
}

/// Tag usage summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagStats {
    /// Distinct paths with at least one entry tagged exactly there.
    pub total_tags: usize,
    /// Distinct ids with at least one tag.
    pub tagged_memories: usize,
    /// Most used paths, highest count first.
    pub popular: Vec<(TagPath, usize)>,
}

/// In-memory tag tree.
#[derive(Debug, Clone, Default)]
pub struct TagIndex {
    root: TagNode,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` at `path` and every ancestor of it.
    ///
    /// Returns `false` if the id was already registered at exactly this path.
    pub fn insert(&mut self, id: MemoryId, path: &TagPath) -> bool {
        if self
            .root
            .child(path.segments())
            .is_some_and(|leaf| leaf.exact.contains(&id))
        {
            return false;
        }

        let mut node = &mut self.root;
        *node.refs.entry(id).or_insert(0) += 1;
        for segment in path.segments() {
            node = node.children.entry(segment.clone()).or_default();
            *node.refs.entry(id).or_insert(0) += 1;
        }
        node.exact.insert(id);
        true
    }

    /// Remove `id` along `path` only, pruning nodes that become empty.
    pub fn remove(&mut self, id: &MemoryId, path: &TagPath) -> bool {
        self.root.remove_path(id, path.segments())
    }

    /// Remove `id` from every node. Returns how many exact registrations it had.
    pub fn remove_all(&mut self, id: &MemoryId) -> usize {
        self.root.remove_everywhere(id)
    }

    /// Ids tagged at `path` or anywhere below it. Unknown paths resolve empty.
    pub fn resolve(&self, path: &TagPath) -> HashSet<MemoryId> {
        self.root
            .child(path.segments())
            .map(|node| node.refs.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Resolve several paths and combine them by intersection or union.
    pub fn resolve_many(&self, paths: &[TagPath], match_all: bool) -> HashSet<MemoryId> {
        let mut sets = paths.iter().map(|p| self.resolve(p));
        let Some(first) = sets.next() else {
            return HashSet::new();
        };
        sets.fold(first, |acc, set| {
            if match_all {
                acc.intersection(&set).copied().collect()
            } else {
                acc.union(&set).copied().collect()
            }
        })
    }

    pub fn contains(&self, id: &MemoryId) -> bool {
        self.root.refs.contains_key(id)
    }

    /// Every id with at least one registration.
    pub fn ids(&self) -> Vec<MemoryId> {
        let mut ids: Vec<MemoryId> = self.root.refs.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Exact paths registered for `id`.
    pub fn paths_of(&self, id: &MemoryId) -> Vec<TagPath> {
        let mut out = Vec::new();
        if self.contains(id) {
            self.root.collect_paths(&mut Vec::new(), Some(id), &mut out);
        }
        out.into_iter().map(|(path, _)| path).collect()
    }

    /// Every path holding at least one exact registration, sorted.
    pub fn paths(&self) -> Vec<TagPath> {
        let mut out = Vec::new();
        self.root.collect_paths(&mut Vec::new(), None, &mut out);
        out.into_iter().map(|(path, _)| path).collect()
    }

    /// Paths whose rendered form contains `fragment` or is contained in it.
    pub fn similar(&self, fragment: &str, max: usize) -> Vec<TagPath> {
        let needle = fragment.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.paths()
            .into_iter()
            .filter(|path| {
                let rendered = path.to_string();
                rendered.contains(&needle) || needle.contains(&rendered)
            })
            .take(max)
            .collect()
    }

    pub fn stats(&self, top_n: usize) -> TagStats {
        let mut counted = Vec::new();
        self.root.collect_paths(&mut Vec::new(), None, &mut counted);
        let total_tags = counted.len();
        counted.sort_by(|(pa, ca), (pb, cb)| cb.cmp(ca).then_with(|| pa.cmp(pb)));
        counted.truncate(top_n);
        TagStats {
            total_tags,
            tagged_memories: self.root.refs.len(),
            popular: counted,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.refs.is_empty()
    }
}
