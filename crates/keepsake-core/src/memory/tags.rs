//! Hierarchical tag paths (`emotion:joy:childhood`).

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::AdmissionError;

/// Separator between tag path segments.
pub const TAG_SEPARATOR: char = ':';

/// Deepest tag path accepted at admission.
pub const MAX_TAG_DEPTH: usize = 16;

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[\p{L}\p{N}][\p{L}\p{N}_.\-]*$").expect("tag segment pattern is valid")
    })
}

/// A non-empty, normalized sequence of tag segments.
///
/// Segments are trimmed and lower-cased; interior whitespace collapses to `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagPath(Vec<String>);

impl TagPath {
    /// Parse the colon-separated form.
    pub fn parse(raw: &str) -> Result<Self, AdmissionError> {
        let malformed = |reason: &str| AdmissionError::MalformedTag {
            raw: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.trim().is_empty() {
            return Err(malformed("tag path is empty"));
        }

        let segments = raw
            .split(TAG_SEPARATOR)
            .map(normalize_segment)
            .collect::<Vec<_>>();

        if segments.len() > MAX_TAG_DEPTH {
            return Err(malformed(&format!(
                "{} segments exceeds maximum depth {MAX_TAG_DEPTH}",
                segments.len()
            )));
        }

        for segment in &segments {
            if segment.is_empty() {
                return Err(malformed("empty segment"));
            }
            if !segment_pattern().is_match(segment) {
                return Err(malformed(&format!("invalid segment '{segment}'")));
            }
        }

        Ok(Self(segments))
    }

    /// Build a path from already-split segments, validating each one.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, AdmissionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(":");
        Self::parse(&joined)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Whether `self` equals `other` or lies below it.
    pub fn starts_with(&self, other: &TagPath) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }
}

fn normalize_segment(segment: &str) -> String {
    segment
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

impl fmt::Display for TagPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(":"))
    }
}

impl FromStr for TagPath {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TagPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TagPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TagPath::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parse and deduplicate raw tags, keeping first-seen order.
pub fn parse_tags<I, S>(raw: I) -> Result<Vec<TagPath>, AdmissionError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<TagPath> = Vec::new();
    for tag in raw {
        let path = TagPath::parse(tag.as_ref())?;
        if !out.contains(&path) {
            out.push(path);
        }
    }
    Ok(out)
}
