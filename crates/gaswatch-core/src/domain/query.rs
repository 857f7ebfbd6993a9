//! Query descriptors and their canonical identity
//!
//! A [`QueryDescriptor`] is the immutable description of what a live query
//! fetches and watches. The sync engine never compares descriptors by
//! allocation; it derives an [`IdentityKey`] and compares keys, so two
//! structurally equal descriptors built independently share one
//! subscription.
//!
//! ## Identity
//!
//! ```text
//! collection:"devices"|filters:{"status":"active","user_id":"u1"}|order:default|limit:2|refresh:push
//! document:"devices"|id:"d-42"
//! ```
//!
//! Filters live in a `BTreeMap`, so the key is independent of the order in
//! which filters were added. Every free-text component (source, field
//! names, ids, text values) is written as an escaped JSON string, so no
//! name can spell out a separator.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::num::NonZeroU32;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Column used when a collection query does not specify an ordering
pub const DEFAULT_ORDER_FIELD: &str = "created_at";

/// Returns true when `name` is a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`)
///
/// Sources and field names are interpolated into backend queries as JSON
/// paths or channel keys, so anything else is rejected.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ============================================================================
// Scalar
// ============================================================================

/// A scalar value usable in an equality filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Parses a command-line style value
    ///
    /// `true`/`false` become booleans, `null` becomes `Null`, numbers become
    /// integers or floats. A value wrapped in double quotes is always text,
    /// which keeps identifiers such as `"007"` from turning into numbers.
    pub fn parse(raw: &str) -> Self {
        if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            return Scalar::Text(raw[1..raw.len() - 1].to_string());
        }
        match raw {
            "null" => return Scalar::Null,
            "true" => return Scalar::Bool(true),
            "false" => return Scalar::Bool(false),
            _ => {}
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Scalar::Integer(n);
        }
        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => Scalar::Float(f),
            _ => Scalar::Text(raw.to_string()),
        }
    }

    /// Converts the scalar into a JSON value
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Null => serde_json::Value::Null,
            Scalar::Bool(b) => serde_json::Value::Bool(*b),
            Scalar::Integer(n) => serde_json::Value::from(*n),
            Scalar::Float(f) => serde_json::Value::from(*f),
            Scalar::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Canonical, type-preserving rendering used in identity keys
    ///
    /// `Integer(1)` and `Float(1.0)` render differently (`1` vs `1.0`), as do
    /// `Text("1")` and `Integer(1)`.
    fn canonical(&self) -> String {
        match self {
            Scalar::Null => "null".to_string(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Integer(n) => n.to_string(),
            Scalar::Float(f) => format!("{f:?}"),
            Scalar::Text(s) => quoted(s),
        }
    }
}

/// Renders `s` as an escaped JSON string literal
fn quoted(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Integer(n)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Scalar::Float(f)
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(s) => write!(f, "{s}"),
            other => write!(f, "{}", other.canonical()),
        }
    }
}

// ============================================================================
// Ordering and refresh strategy
// ============================================================================

/// Single-column ordering for a collection query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderBy {
    pub field: String,
    pub ascending: bool,
}

impl OrderBy {
    /// Orders by `field`, descending unless overridden
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }

    /// Sets ascending order
    pub fn ascending(mut self) -> Self {
        self.ascending = true;
        self
    }

    /// Sets descending order
    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }

    /// The named default: creation order, newest first
    pub fn creation_desc() -> Self {
        Self::new(DEFAULT_ORDER_FIELD)
    }

    /// Parses `field`, `field:asc` or `field:desc`
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let (field, direction) = match raw.split_once(':') {
            Some((field, direction)) => (field, Some(direction)),
            None => (raw, None),
        };
        if !is_identifier(field) {
            return Err(DomainError::InvalidOrder(raw.to_string()));
        }
        let order = Self::new(field);
        match direction.map(str::to_ascii_lowercase).as_deref() {
            None | Some("desc") => Ok(order),
            Some("asc") => Ok(order.ascending()),
            Some(_) => Err(DomainError::InvalidOrder(raw.to_string())),
        }
    }
}

impl Display for OrderBy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let direction = if self.ascending { "asc" } else { "desc" };
        write!(f, "{}:{}", self.field, direction)
    }
}

/// How a live query learns that its result may have changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RefreshStrategy {
    /// Subscribe to the backend's change feed
    #[default]
    PushBased,
    /// Refetch on a fixed timer instead of subscribing
    Polled(Duration),
}

impl Display for RefreshStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RefreshStrategy::PushBased => write!(f, "push"),
            RefreshStrategy::Polled(period) => write!(f, "poll:{}ms", period.as_millis()),
        }
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// A filtered, ordered, limited read over one source
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionQuery {
    source: String,
    filters: BTreeMap<String, Scalar>,
    order_by: Option<OrderBy>,
    limit: Option<NonZeroU32>,
    refresh: RefreshStrategy,
}

impl CollectionQuery {
    /// Creates an unfiltered, push-refreshed query over `source`
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            filters: BTreeMap::new(),
            order_by: None,
            limit: None,
            refresh: RefreshStrategy::PushBased,
        }
    }

    /// Adds an equality filter, replacing any previous value for `field`
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by = Some(order);
        self
    }

    pub fn limit(mut self, limit: NonZeroU32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Switches the query to timer-driven refresh
    pub fn poll_every(mut self, period: Duration) -> Self {
        self.refresh = RefreshStrategy::Polled(period);
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn filters(&self) -> &BTreeMap<String, Scalar> {
        &self.filters
    }

    /// Explicit ordering, if the caller gave one
    pub fn explicit_order(&self) -> Option<&OrderBy> {
        self.order_by.as_ref()
    }

    /// Ordering the backend must apply (explicit or creation order descending)
    pub fn effective_order(&self) -> OrderBy {
        self.order_by.clone().unwrap_or_else(OrderBy::creation_desc)
    }

    pub fn limit_value(&self) -> Option<NonZeroU32> {
        self.limit
    }

    pub fn refresh(&self) -> RefreshStrategy {
        self.refresh
    }
}

/// A point read of one row by id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentQuery {
    source: String,
    id: String,
}

impl DocumentQuery {
    pub fn new(source: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            id: id.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// What a live query fetches and watches
#[derive(Debug, Clone, PartialEq)]
pub enum QueryDescriptor {
    Collection(CollectionQuery),
    Document(DocumentQuery),
}

impl QueryDescriptor {
    pub fn source(&self) -> &str {
        match self {
            QueryDescriptor::Collection(q) => q.source(),
            QueryDescriptor::Document(q) => q.source(),
        }
    }

    /// Refresh strategy; document reads are always push based
    pub fn refresh(&self) -> RefreshStrategy {
        match self {
            QueryDescriptor::Collection(q) => q.refresh(),
            QueryDescriptor::Document(_) => RefreshStrategy::PushBased,
        }
    }

    /// Returns false for partial descriptors, which count as absent
    pub fn is_complete(&self) -> bool {
        match self {
            QueryDescriptor::Collection(q) => !q.source.is_empty(),
            QueryDescriptor::Document(q) => !q.source.is_empty() && !q.id.is_empty(),
        }
    }

    /// Canonical identity key, or `None` for a partial descriptor
    pub fn identity_key(&self) -> Option<IdentityKey> {
        if !self.is_complete() {
            return None;
        }
        let key = match self {
            QueryDescriptor::Collection(q) => {
                let filters = q
                    .filters
                    .iter()
                    .map(|(field, value)| format!("{}:{}", quoted(field), value.canonical()))
                    .collect::<Vec<_>>()
                    .join(",");
                let order = q.order_by.as_ref().map_or_else(
                    || "default".to_string(),
                    |o| {
                        let direction = if o.ascending { "asc" } else { "desc" };
                        format!("{}:{direction}", quoted(&o.field))
                    },
                );
                let limit = q
                    .limit
                    .map_or_else(|| "none".to_string(), |n| n.get().to_string());
                format!(
                    "collection:{}|filters:{{{}}}|order:{}|limit:{}|refresh:{}",
                    quoted(&q.source),
                    filters,
                    order,
                    limit,
                    q.refresh
                )
            }
            QueryDescriptor::Document(q) => {
                format!("document:{}|id:{}", quoted(&q.source), quoted(&q.id))
            }
        };
        Some(IdentityKey(key))
    }
}

impl From<CollectionQuery> for QueryDescriptor {
    fn from(q: CollectionQuery) -> Self {
        QueryDescriptor::Collection(q)
    }
}

impl From<DocumentQuery> for QueryDescriptor {
    fn from(q: DocumentQuery) -> Self {
        QueryDescriptor::Document(q)
    }
}

/// Canonical identity of a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for IdentityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a candidate descriptor; absent and partial candidates have none
pub fn identity_key(candidate: Option<&QueryDescriptor>) -> Option<IdentityKey> {
    candidate.and_then(QueryDescriptor::identity_key)
}

// ============================================================================
// QuerySpec - loosely typed candidate
// ============================================================================

/// Kind of descriptor a [`QuerySpec`] describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecKind {
    #[default]
    Collection,
    Document,
}

/// Serializable candidate descriptor, as read from YAML, JSON or CLI flags
///
/// Resolving a spec distinguishes three outcomes: a complete descriptor,
/// an absent one (missing source, document without id), and an invalid
/// one (bad identifiers, zero limit or interval).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuerySpec {
    #[serde(default)]
    pub kind: SpecKind,
    pub source: Option<String>,
    pub id: Option<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, Scalar>,
    /// `field`, `field:asc` or `field:desc`
    pub order_by: Option<String>,
    pub limit: Option<i64>,
    pub poll_interval_ms: Option<u64>,
}

impl QuerySpec {
    /// Resolves the candidate into a descriptor
    ///
    /// Returns `Ok(None)` when the candidate is partial.
    pub fn resolve(&self) -> Result<Option<QueryDescriptor>, DomainError> {
        let source = match self.source.as_deref() {
            Some(s) if !s.is_empty() => s,
            _ => return Ok(None),
        };
        if !is_identifier(source) {
            return Err(DomainError::InvalidIdentifier(source.to_string()));
        }

        match self.kind {
            SpecKind::Document => match self.id.as_deref() {
                Some(id) if !id.is_empty() => {
                    Ok(Some(DocumentQuery::new(source, id).into()))
                }
                _ => Ok(None),
            },
            SpecKind::Collection => {
                let mut query = CollectionQuery::new(source);
                for (field, value) in &self.filters {
                    if !is_identifier(field) {
                        return Err(DomainError::InvalidIdentifier(field.clone()));
                    }
                    query = query.filter(field.clone(), value.clone());
                }
                if let Some(raw) = &self.order_by {
                    query = query.order_by(OrderBy::parse(raw)?);
                }
                if let Some(limit) = self.limit {
                    let limit = u32::try_from(limit)
                        .ok()
                        .and_then(NonZeroU32::new)
                        .ok_or(DomainError::InvalidLimit(limit))?;
                    query = query.limit(limit);
                }
                if let Some(ms) = self.poll_interval_ms {
                    if ms == 0 {
                        return Err(DomainError::InvalidPollInterval(ms));
                    }
                    query = query.poll_every(Duration::from_millis(ms));
                }
                Ok(Some(query.into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[test]
    fn test_filter_order_does_not_change_identity() {
        let a: QueryDescriptor = CollectionQuery::new("devices")
            .filter("user_id", "u1")
            .filter("status", "active")
            .into();
        let b: QueryDescriptor = CollectionQuery::new("devices")
            .filter("status", "active")
            .filter("user_id", "u1")
            .into();

        assert_eq!(a.identity_key(), b.identity_key());
    }

    #[test]
    fn test_every_field_participates_in_identity() {
        let base = CollectionQuery::new("devices").filter("user_id", "u1");
        let variants: Vec<QueryDescriptor> = vec![
            base.clone().into(),
            CollectionQuery::new("alerts").filter("user_id", "u1").into(),
            base.clone().filter("status", "active").into(),
            base.clone().order_by(OrderBy::new("name")).into(),
            base.clone().order_by(OrderBy::new("name").ascending()).into(),
            base.clone().limit(limit(5)).into(),
            base.clone().poll_every(Duration::from_secs(5)).into(),
        ];

        let keys: std::collections::HashSet<_> =
            variants.iter().filter_map(|d| d.identity_key()).collect();
        assert_eq!(keys.len(), variants.len());
    }

    #[test]
    fn test_separators_in_names_cannot_collide() {
        let two_filters: QueryDescriptor =
            CollectionQuery::new("devices").filter("a", 1i64).filter("b", 2i64).into();
        let one_filter: QueryDescriptor =
            CollectionQuery::new("devices").filter("a=1,b", 2i64).into();
        assert_ne!(two_filters, one_filter);
        assert_ne!(two_filters.identity_key(), one_filter.identity_key());

        let plain: QueryDescriptor = CollectionQuery::new("devices").into();
        let spoofed: QueryDescriptor =
            CollectionQuery::new("devices|filters:{}|order:default|limit:none|refresh:push")
                .filter("x", 1i64)
                .into();
        let spoofed_order: QueryDescriptor = CollectionQuery::new("devices")
            .order_by(OrderBy::new("name\":asc"))
            .into();
        let keys: std::collections::HashSet<_> = [&plain, &spoofed, &spoofed_order, &one_filter]
            .iter()
            .filter_map(|d| d.identity_key())
            .collect();
        assert_eq!(keys.len(), 4);

        let doc_a: QueryDescriptor = DocumentQuery::new("devices|id:\"x\"", "y").into();
        let doc_b: QueryDescriptor = DocumentQuery::new("devices", "x").into();
        assert_ne!(doc_a.identity_key(), doc_b.identity_key());
    }

    #[test]
    fn test_scalar_types_are_distinct_in_identity() {
        let text: QueryDescriptor = CollectionQuery::new("readings").filter("ppm", "1").into();
        let int: QueryDescriptor = CollectionQuery::new("readings").filter("ppm", 1i64).into();
        let float: QueryDescriptor = CollectionQuery::new("readings").filter("ppm", 1.0).into();

        assert_ne!(text.identity_key(), int.identity_key());
        assert_ne!(int.identity_key(), float.identity_key());
    }

    #[test]
    fn test_partial_descriptors_are_absent() {
        let doc: QueryDescriptor = DocumentQuery::new("devices", "").into();
        assert!(!doc.is_complete());
        assert_eq!(identity_key(Some(&doc)), None);

        let coll: QueryDescriptor = CollectionQuery::new("").into();
        assert_eq!(coll.identity_key(), None);

        assert_eq!(identity_key(None), None);
    }

    #[test]
    fn test_document_identity() {
        let a: QueryDescriptor = DocumentQuery::new("devices", "d-1").into();
        let b: QueryDescriptor = DocumentQuery::new("devices", "d-1").into();
        let c: QueryDescriptor = DocumentQuery::new("devices", "d-2").into();

        assert_eq!(a.identity_key(), b.identity_key());
        assert_ne!(a.identity_key(), c.identity_key());
        assert_eq!(a.refresh(), RefreshStrategy::PushBased);
    }

    #[test]
    fn test_effective_order_defaults_to_creation_desc() {
        let q = CollectionQuery::new("devices");
        assert_eq!(q.effective_order(), OrderBy::creation_desc());
        assert_eq!(q.effective_order().field, DEFAULT_ORDER_FIELD);
        assert!(!q.effective_order().ascending);
    }

    #[test]
    fn test_order_parse() {
        assert_eq!(OrderBy::parse("name").unwrap(), OrderBy::new("name"));
        assert_eq!(
            OrderBy::parse("name:ASC").unwrap(),
            OrderBy::new("name").ascending()
        );
        assert_eq!(OrderBy::parse("name:desc").unwrap(), OrderBy::new("name"));
        assert!(OrderBy::parse("name:sideways").is_err());
        assert!(OrderBy::parse("na me").is_err());
    }

    #[test]
    fn test_scalar_parse() {
        assert_eq!(Scalar::parse("true"), Scalar::Bool(true));
        assert_eq!(Scalar::parse("null"), Scalar::Null);
        assert_eq!(Scalar::parse("42"), Scalar::Integer(42));
        assert_eq!(Scalar::parse("1.5"), Scalar::Float(1.5));
        assert_eq!(Scalar::parse("active"), Scalar::Text("active".into()));
        assert_eq!(Scalar::parse("\"007\""), Scalar::Text("007".into()));
        assert_eq!(Scalar::parse("NaN"), Scalar::Text("NaN".into()));
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_identifier("user_id"));
        assert!(is_identifier("_private"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("a.b"));
        assert!(!is_identifier("a-b"));
    }

    #[test]
    fn test_spec_resolves_collection() {
        let spec: QuerySpec = serde_json::from_str(
            r#"{"source": "devices", "filters": {"user_id": "u1", "active": true},
                "order_by": "name:asc", "limit": 10, "poll_interval_ms": 5000}"#,
        )
        .unwrap();

        let expected: QueryDescriptor = CollectionQuery::new("devices")
            .filter("user_id", "u1")
            .filter("active", true)
            .order_by(OrderBy::new("name").ascending())
            .limit(limit(10))
            .poll_every(Duration::from_millis(5000))
            .into();

        assert_eq!(spec.resolve().unwrap(), Some(expected));
    }

    #[test]
    fn test_spec_partial_and_invalid() {
        let doc_without_id = QuerySpec {
            kind: SpecKind::Document,
            source: Some("devices".into()),
            ..Default::default()
        };
        assert_eq!(doc_without_id.resolve().unwrap(), None);

        let no_source = QuerySpec::default();
        assert_eq!(no_source.resolve().unwrap(), None);

        let zero_limit = QuerySpec {
            source: Some("devices".into()),
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(zero_limit.resolve(), Err(DomainError::InvalidLimit(0)));

        let zero_poll = QuerySpec {
            source: Some("devices".into()),
            poll_interval_ms: Some(0),
            ..Default::default()
        };
        assert_eq!(
            zero_poll.resolve(),
            Err(DomainError::InvalidPollInterval(0))
        );

        let bad_source = QuerySpec {
            source: Some("devices; drop".into()),
            ..Default::default()
        };
        assert!(matches!(
            bad_source.resolve(),
            Err(DomainError::InvalidIdentifier(_))
        ));
    }
}
