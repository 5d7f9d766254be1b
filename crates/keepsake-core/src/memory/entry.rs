//! Memory entries, their admission drafts, and the persisted record form.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::Digest;

use super::tags::TagPath;

/// Identifier assigned to an entry at admission. Immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(Uuid);

impl MemoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MemoryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// What sort of thing the collaborator is remembering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    #[default]
    Fact,
    Conversation,
    Preference,
    Experience,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fact => write!(f, "fact"),
            Self::Conversation => write!(f, "conversation"),
            Self::Preference => write!(f, "preference"),
            Self::Experience => write!(f, "experience"),
        }
    }
}

impl FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fact" => Ok(Self::Fact),
            "conversation" => Ok(Self::Conversation),
            "preference" => Ok(Self::Preference),
            "experience" => Ok(Self::Experience),
            other => Err(format!("unknown memory kind: {other}")),
        }
    }
}

/// Protection level against bulk destructive operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    #[default]
    Low,
    Medium,
    /// Exempt from purges unless the gate was started with `include_locked`.
    HighLock,
}

impl TrustLevel {
    pub fn is_locked(self) -> bool {
        matches!(self, Self::HighLock)
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::HighLock => write!(f, "high_lock"),
        }
    }
}

impl FromStr for TrustLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high_lock" | "locked" => Ok(Self::HighLock),
            other => Err(format!("unknown trust level: {other}")),
        }
    }
}

/// Storage placement class derived from entry age. Ordered Hot < Warm < Cold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Hot,
    Warm,
    Cold,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hot => write!(f, "hot"),
            Self::Warm => write!(f, "warm"),
            Self::Cold => write!(f, "cold"),
        }
    }
}

/// Opaque payload. The store only looks inside it for text filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Content {
    Text(String),
    Structured(serde_json::Value),
}

impl Content {
    /// Case-insensitive substring match. `needle` must already be lower-cased.
    pub fn matches_lowercase(&self, needle: &str) -> bool {
        match self {
            Self::Text(text) => text.to_lowercase().contains(needle),
            Self::Structured(value) => value.to_string().to_lowercase().contains(needle),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<serde_json::Value> for Content {
    fn from(v: serde_json::Value) -> Self {
        Self::Structured(v)
    }
}

/// A candidate entry submitted by the collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDraft {
    pub content: Content,
    pub tags: Vec<String>,
    pub importance: f64,
    pub trust_level: TrustLevel,
    pub kind: MemoryKind,
}

impl EntryDraft {
    pub fn new(content: impl Into<Content>) -> Self {
        Self {
            content: content.into(),
            tags: Vec::new(),
            importance: 0.5,
            trust_level: TrustLevel::default(),
            kind: MemoryKind::default(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_trust(mut self, trust_level: TrustLevel) -> Self {
        self.trust_level = trust_level;
        self
    }

    pub fn with_kind(mut self, kind: MemoryKind) -> Self {
        self.kind = kind;
        self
    }
}

/// A stored memory as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: MemoryId,
    pub kind: MemoryKind,
    pub content: Content,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub tags: Vec<TagPath>,
    pub importance: f64,
    pub trust_level: TrustLevel,
    pub tier: Tier,
}

/// Where an entry's payload currently lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "placement", rename_all = "snake_case")]
pub enum Body {
    /// Held in memory next to the record.
    Resident { content: Content },
    /// Relocated to the content-addressed archive.
    Archived { digest: Digest },
}

/// The record form kept by the store and written to the entry store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub id: MemoryId,
    pub kind: MemoryKind,
    pub body: Body,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub tags: Vec<TagPath>,
    pub importance: f64,
    pub trust_level: TrustLevel,
    pub tier: Tier,
}

impl StoredEntry {
    /// Record for a resident entry.
    pub fn resident(entry: MemoryEntry) -> Self {
        Self {
            id: entry.id,
            kind: entry.kind,
            body: Body::Resident {
                content: entry.content,
            },
            created_at: entry.created_at,
            last_accessed_at: entry.last_accessed_at,
            access_count: entry.access_count,
            tags: entry.tags,
            importance: entry.importance,
            trust_level: entry.trust_level,
            tier: entry.tier,
        }
    }

    /// Caller-facing view with the given payload.
    pub fn hydrate(&self, content: Content) -> MemoryEntry {
        MemoryEntry {
            id: self.id,
            kind: self.kind,
            content,
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
            access_count: self.access_count,
            tags: self.tags.clone(),
            importance: self.importance,
            trust_level: self.trust_level,
            tier: self.tier,
        }
    }

    pub fn resident_content(&self) -> Option<&Content> {
        match &self.body {
            Body::Resident { content } => Some(content),
            Body::Archived { .. } => None,
        }
    }

    pub fn is_archived(&self) -> bool {
        matches!(self.body, Body::Archived { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tier_ordering_is_monotonic() {
        assert!(Tier::Hot < Tier::Warm);
        assert!(Tier::Warm < Tier::Cold);
    }

    #[test]
    fn text_match_is_case_insensitive() {
        let c = Content::from("Remember to buy MILK");
        assert!(c.matches_lowercase("milk"));
        assert!(!c.matches_lowercase("bread"));
    }

    #[test]
    fn structured_match_uses_serialized_form() {
        let c = Content::from(json!({"food": "Pancakes", "meal": "breakfast"}));
        assert!(c.matches_lowercase("pancakes"));
        assert!(c.matches_lowercase("meal"));
    }

    #[test]
    fn trust_level_parses_aliases() {
        assert_eq!("high-lock".parse::<TrustLevel>().unwrap(), TrustLevel::HighLock);
        assert_eq!("locked".parse::<TrustLevel>().unwrap(), TrustLevel::HighLock);
        assert!("ultra".parse::<TrustLevel>().is_err());
        assert!(TrustLevel::HighLock.is_locked());
        assert!(!TrustLevel::Medium.is_locked());
    }

    #[test]
    fn draft_builder_collects_tags() {
        let d = EntryDraft::new("hello")
            .with_tag("a:b")
            .with_tags(["c", "d"])
            .with_importance(0.9)
            .with_kind(MemoryKind::Preference);
        assert_eq!(d.tags, vec!["a:b", "c", "d"]);
        assert_eq!(d.kind, MemoryKind::Preference);
    }

    #[test]
    fn stored_entry_roundtrips_through_hydrate() {
        let now = Utc::now();
        let entry = MemoryEntry {
            id: MemoryId::new(),
            kind: MemoryKind::Experience,
            content: Content::from("first snow"),
            created_at: now,
            last_accessed_at: now,
            access_count: 2,
            tags: vec![TagPath::parse("season:winter").unwrap()],
            importance: 0.7,
            trust_level: TrustLevel::Medium,
            tier: Tier::Warm,
        };
        let stored = StoredEntry::resident(entry.clone());
        assert!(!stored.is_archived());
        let content = stored.resident_content().cloned().unwrap();
        assert_eq!(stored.hydrate(content), entry);
    }
}
