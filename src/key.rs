//! Cache key conventions.
//!
//! A [`QueryKey`] is an ordered sequence of primitive segments identifying one
//! cached resource, e.g. `["courses", "detail", 42]`. Resolved keys for a
//! request additionally carry the effective parameters as `k=v` segments, so
//! two fetches with different parameters address different cache entries while
//! still sharing the logical prefix for invalidation purposes.

use sha2::{Digest, Sha256};
use std::fmt;

/// A single key segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
  Str(String),
  Int(i64),
  Bool(bool),
}

impl fmt::Display for Segment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Segment::Str(s) => write!(f, "{}", s),
      Segment::Int(n) => write!(f, "{}", n),
      Segment::Bool(b) => write!(f, "{}", b),
    }
  }
}

impl From<&str> for Segment {
  fn from(s: &str) -> Self {
    Segment::Str(s.to_string())
  }
}

impl From<String> for Segment {
  fn from(s: String) -> Self {
    Segment::Str(s)
  }
}

impl From<i64> for Segment {
  fn from(n: i64) -> Self {
    Segment::Int(n)
  }
}

impl From<u32> for Segment {
  fn from(n: u32) -> Self {
    Segment::Int(n as i64)
  }
}

impl From<bool> for Segment {
  fn from(b: bool) -> Self {
    Segment::Bool(b)
  }
}

/// Ordered cache key for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
  segments: Vec<Segment>,
}

impl QueryKey {
  /// Create a key rooted at a logical resource name (e.g. `"courses"`).
  pub fn new(resource: impl Into<Segment>) -> Self {
    Self {
      segments: vec![resource.into()],
    }
  }

  /// Append a segment, consuming and returning the key (builder style).
  pub fn push(mut self, segment: impl Into<Segment>) -> Self {
    self.segments.push(segment.into());
    self
  }

  pub fn segments(&self) -> &[Segment] {
    &self.segments
  }

  /// Whether this key starts with all segments of `prefix`.
  ///
  /// Used for invalidation: invalidating a logical key hits every resolved
  /// entry derived from it, parameter segments included.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.segments.len() >= prefix.segments.len()
      && self.segments[..prefix.segments.len()] == prefix.segments[..]
  }

  /// Stable fixed-length hash of the key, used as the store index.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, segment) in self.segments.iter().enumerate() {
      if i > 0 {
        write!(f, ":")?;
      }
      write!(f, "{}", segment)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_display_joins_segments() {
    let key = QueryKey::new("courses").push("detail").push(42u32);
    assert_eq!(key.to_string(), "courses:detail:42");
  }

  #[test]
  fn test_cache_hash_is_stable_and_distinct() {
    let a = QueryKey::new("courses").push(1u32);
    let b = QueryKey::new("courses").push(2u32);
    assert_eq!(a.cache_hash(), a.clone().cache_hash());
    assert_ne!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_starts_with_prefix() {
    let base = QueryKey::new("courses");
    let resolved = QueryKey::new("courses").push("page=2");
    assert!(resolved.starts_with(&base));
    assert!(base.starts_with(&base));
    assert!(!base.starts_with(&resolved));
    assert!(!QueryKey::new("lessons").starts_with(&base));
  }
}
