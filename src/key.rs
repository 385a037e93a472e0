//! Structured cache keys with a prefix hierarchy.
//!
//! A [`QueryKey`] is an ordered sequence of segments: strings, integers, or
//! filter objects. Two keys are equal iff their segment sequences are deeply
//! equal, and keys form a prefix hierarchy so that invalidating
//! `["projects"]` reaches every key that starts with `"projects"`.
//!
//! Filter segments are stored in a `BTreeMap`, which makes their
//! serialization canonical: `{a:1, b:2}` and `{b:2, a:1}` produce the same
//! segment. Identical logical queries must always produce identical keys;
//! request de-duplication depends on it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A value inside a filter segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FilterValue {
  Str(String),
  Int(i64),
  Bool(bool),
  Null,
}

impl From<&str> for FilterValue {
  fn from(v: &str) -> Self {
    FilterValue::Str(v.to_string())
  }
}

impl From<String> for FilterValue {
  fn from(v: String) -> Self {
    FilterValue::Str(v)
  }
}

impl From<i64> for FilterValue {
  fn from(v: i64) -> Self {
    FilterValue::Int(v)
  }
}

impl From<bool> for FilterValue {
  fn from(v: bool) -> Self {
    FilterValue::Bool(v)
  }
}

/// A filter object segment, canonically ordered by field name.
pub type Filter = BTreeMap<String, FilterValue>;

/// One segment of a query key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
  Str(String),
  Int(i64),
  Filter(Filter),
}

impl Segment {
  /// Build a filter segment from field/value pairs. Insertion order does not
  /// matter; the segment is canonical either way.
  pub fn filter<K, V, I>(pairs: I) -> Self
  where
    K: Into<String>,
    V: Into<FilterValue>,
    I: IntoIterator<Item = (K, V)>,
  {
    Segment::Filter(
      pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    )
  }
}

impl From<&str> for Segment {
  fn from(v: &str) -> Self {
    Segment::Str(v.to_string())
  }
}

impl From<String> for Segment {
  fn from(v: String) -> Self {
    Segment::Str(v)
  }
}

impl From<i64> for Segment {
  fn from(v: i64) -> Self {
    Segment::Int(v)
  }
}

impl From<u64> for Segment {
  fn from(v: u64) -> Self {
    Segment::Int(v as i64)
  }
}

impl From<Filter> for Segment {
  fn from(v: Filter) -> Self {
    Segment::Filter(v)
  }
}

impl fmt::Display for Segment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Segment::Str(s) => write!(f, "{:?}", s),
      Segment::Int(n) => write!(f, "{}", n),
      Segment::Filter(map) => {
        write!(f, "{{")?;
        for (i, (k, v)) in map.iter().enumerate() {
          if i > 0 {
            write!(f, ",")?;
          }
          match v {
            FilterValue::Str(s) => write!(f, "{}:{:?}", k, s)?,
            FilterValue::Int(n) => write!(f, "{}:{}", k, n)?,
            FilterValue::Bool(b) => write!(f, "{}:{}", k, b)?,
            FilterValue::Null => write!(f, "{}:null", k)?,
          }
        }
        write!(f, "}}")
      }
    }
  }
}

/// Structured identifier for a cached query result.
///
/// The conventional namespace, shared by every consumer of the cache:
/// `[entity, "list", filter]`, `[entity, "detail", id]`, and
/// `[entity, "detail", id, subresource]`. Sticking to it is what makes
/// invalidation-by-prefix work across an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey(Vec<Segment>);

impl QueryKey {
  /// An empty key, extended with [`QueryKey::push`].
  pub fn new() -> Self {
    QueryKey(Vec::new())
  }

  /// Key for an entity's filtered list: `[entity, "list", filter]`.
  pub fn list(entity: &str, filter: Filter) -> Self {
    QueryKey(vec![entity.into(), "list".into(), filter.into()])
  }

  /// Key for all of an entity's lists: `[entity, "list"]`. Useful as an
  /// invalidation prefix after a write.
  pub fn lists(entity: &str) -> Self {
    QueryKey(vec![entity.into(), "list".into()])
  }

  /// Key for a single entity: `[entity, "detail", id]`.
  pub fn detail(entity: &str, id: impl Into<Segment>) -> Self {
    QueryKey(vec![entity.into(), "detail".into(), id.into()])
  }

  /// Key for an entity subresource: `[entity, "detail", id, subresource]`.
  pub fn detail_sub(entity: &str, id: impl Into<Segment>, subresource: &str) -> Self {
    QueryKey(vec![
      entity.into(),
      "detail".into(),
      id.into(),
      subresource.into(),
    ])
  }

  /// Key covering an entire entity namespace: `[entity]`.
  pub fn entity(entity: &str) -> Self {
    QueryKey(vec![entity.into()])
  }

  /// Append a segment in place.
  pub fn push(&mut self, segment: impl Into<Segment>) {
    self.0.push(segment.into());
  }

  /// A new key with one more segment, e.g. a page cursor under a list prefix.
  pub fn append(&self, segment: impl Into<Segment>) -> Self {
    let mut segments = self.0.clone();
    segments.push(segment.into());
    QueryKey(segments)
  }

  /// Whether this key's segments start with `prefix`'s segments.
  /// Every key is a prefix of itself.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
  }

  pub fn segments(&self) -> &[Segment] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl Default for QueryKey {
  fn default() -> Self {
    QueryKey::new()
  }
}

impl<S: Into<Segment>> FromIterator<S> for QueryKey {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    QueryKey(iter.into_iter().map(Into::into).collect())
  }
}

impl From<Vec<Segment>> for QueryKey {
  fn from(segments: Vec<Segment>) -> Self {
    QueryKey(segments)
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, seg) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, ",")?;
      }
      write!(f, "{}", seg)?;
    }
    write!(f, "]")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_structural_equality() {
    let a = QueryKey::detail("projects", "p1");
    let b = QueryKey::detail("projects", "p1");
    let c = QueryKey::detail("projects", "p2");

    assert_eq!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn test_filter_order_is_canonical() {
    let a = QueryKey::lists("projects")
      .append(Segment::filter([("status", "active"), ("city", "berlin")]));
    let b = QueryKey::lists("projects")
      .append(Segment::filter([("city", "berlin"), ("status", "active")]));

    assert_eq!(a, b);

    let mut hasher_input = std::collections::HashSet::new();
    hasher_input.insert(a);
    assert!(hasher_input.contains(&b));
  }

  #[test]
  fn test_prefix_hierarchy() {
    let root = QueryKey::entity("projects");
    let lists = QueryKey::lists("projects");
    let list = QueryKey::list("projects", Filter::from_iter([("status".to_string(), "active".into())]));
    let detail = QueryKey::detail("projects", "p1");
    let other = QueryKey::entity("materials");

    assert!(list.starts_with(&root));
    assert!(list.starts_with(&lists));
    assert!(detail.starts_with(&root));
    assert!(!detail.starts_with(&lists));
    assert!(!list.starts_with(&other));
    assert!(list.starts_with(&list));
  }

  #[test]
  fn test_append_does_not_mutate() {
    let prefix = QueryKey::lists("projects");
    let page = prefix.append(0u64);

    assert_eq!(prefix.len(), 2);
    assert_eq!(page.len(), 3);
    assert!(page.starts_with(&prefix));
  }

  #[test]
  fn test_display() {
    let key = QueryKey::list(
      "projects",
      Filter::from_iter([
        ("status".to_string(), FilterValue::from("active")),
        ("page".to_string(), FilterValue::from(1i64)),
      ]),
    );
    assert_eq!(key.to_string(), r#"["projects","list",{page:1,status:"active"}]"#);
  }
}
