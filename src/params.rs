//! Request parameters with merge-and-override semantics.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::key::QueryKey;

/// Ordered string-to-JSON parameter map sent to fetch functions.
///
/// Descriptor defaults and per-call overrides are merged with
/// [`Params::merged_over`]; the effective parameters become part of the
/// resolved cache key, so different parameters mean different cache entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
  values: BTreeMap<String, Value>,
}

impl Params {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set a parameter, consuming and returning the map (builder style).
  pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.values.insert(key.into(), value.into());
    self
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
    self.values.insert(key.into(), value.into());
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.values.get(key)
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  /// Merge `self` over `defaults`: keys present in `self` win.
  pub fn merged_over(&self, defaults: &Params) -> Params {
    let mut merged = defaults.clone();
    for (k, v) in &self.values {
      merged.values.insert(k.clone(), v.clone());
    }
    merged
  }

  /// Extend a base key with one `k=v` segment per parameter.
  ///
  /// The underlying map is ordered, so the resolved key is canonical
  /// regardless of insertion order.
  pub fn resolve_key(&self, base: &QueryKey) -> QueryKey {
    let mut key = base.clone();
    for (k, v) in &self.values {
      key = key.push(format!("{}={}", k, v));
    }
    key
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
    self.values.iter()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_overrides_win_over_defaults() {
    let defaults = Params::new().with("status", "published").with("page", 1);
    let overrides = Params::new().with("page", 3);
    let merged = overrides.merged_over(&defaults);
    assert_eq!(merged.get("page"), Some(&Value::from(3)));
    assert_eq!(merged.get("status"), Some(&Value::from("published")));
  }

  #[test]
  fn test_resolved_key_is_canonical() {
    let a = Params::new().with("b", 2).with("a", 1);
    let b = Params::new().with("a", 1).with("b", 2);
    let base = QueryKey::new("courses");
    assert_eq!(a.resolve_key(&base), b.resolve_key(&base));
    assert_eq!(a.resolve_key(&base).to_string(), "courses:a=1:b=2");
  }

  #[test]
  fn test_iter_walks_pairs_in_key_order() {
    let params = Params::new().with("status", "published").with("page", 2);
    let pairs: Vec<(&str, &Value)> = params.iter().map(|(k, v)| (k.as_str(), v)).collect();
    assert_eq!(
      pairs,
      vec![
        ("page", &Value::from(2)),
        ("status", &Value::from("published"))
      ]
    );
  }

  #[test]
  fn test_distinct_params_resolve_distinct_keys() {
    let base = QueryKey::new("courses");
    let a = Params::new().with("page", 1).resolve_key(&base);
    let b = Params::new().with("page", 2).resolve_key(&base);
    assert_ne!(a.cache_hash(), b.cache_hash());
  }
}
