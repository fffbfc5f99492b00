//! The object-query interface of the site server.
//!
//! Backends answer a [`QuerySpec`] with rows or a count. The spec renders to a
//! WQL-style string, which is what remote backends send and what `--dry-run`
//! prints.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Class holding fully evaluated collection membership.
pub const MEMBERSHIP_CLASS: &str = "SMS_FullCollectionMembership";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum QueryError {
    #[error("query backend failed")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("row is missing property {0}")]
    MissingProperty(String),

    #[error("property {property} has unexpected value {value:?}")]
    InvalidValue { property: String, value: String },
}

/// Class, equality filter, ordering and projected properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub class: String,
    #[serde(default)]
    pub filter: Vec<(String, String)>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub properties: Vec<String>,
}

impl QuerySpec {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            filter: Vec::new(),
            order_by: None,
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn select<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties.extend(properties.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn where_eq(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.push((property.into(), value.into()));
        self
    }

    #[must_use]
    pub fn order_by(mut self, property: impl Into<String>) -> Self {
        self.order_by = Some(property.into());
        self
    }

    /// `SELECT .. FROM .. [WHERE ..] [ORDER BY ..]`
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let projection = if self.properties.is_empty() {
            "*".to_string()
        } else {
            self.properties.join(",")
        };
        self.render(&projection, true)
    }

    /// `SELECT COUNT(*) FROM .. [WHERE ..]`. Ordering is dropped.
    #[must_use]
    pub fn to_count_string(&self) -> String {
        self.render("COUNT(*)", false)
    }

    fn render(&self, projection: &str, ordered: bool) -> String {
        let mut query = format!("SELECT {projection} FROM {}", self.class);
        if !self.filter.is_empty() {
            let conditions: Vec<String> = self
                .filter
                .iter()
                .map(|(property, value)| format!("{property} = '{}'", escape_literal(value)))
                .collect();
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        if let (true, Some(order)) = (ordered, &self.order_by) {
            query.push_str(" ORDER BY ");
            query.push_str(order);
        }
        query
    }
}

impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_string())
    }
}

fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '\'') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// One result row, property name to rendered value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, String>);

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(property.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, property: &str) -> Option<&str> {
        self.0.get(property).map(String::as_str)
    }

    /// # Errors
    ///
    /// Returns `QueryError::MissingProperty` if the row lacks `property`.
    pub fn require(&self, property: &str) -> Result<&str, QueryError> {
        self.get(property)
            .ok_or_else(|| QueryError::MissingProperty(property.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Query and count against the site's object model.
#[async_trait]
pub trait ObjectQuery: Send + Sync {
    /// Rows matching `spec`.
    async fn query(&self, spec: &QuerySpec) -> Result<Vec<Row>, QueryError>;

    /// Number of rows matching `spec`.
    async fn count(&self, spec: &QuerySpec) -> Result<u64, QueryError>;
}

/// A device collection, by ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRef {
    pub collection_id: String,
}

impl CollectionRef {
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
        }
    }

    /// Members of the collection, ordered by resource ID.
    #[must_use]
    pub fn members_query(&self) -> QuerySpec {
        QuerySpec::new(MEMBERSHIP_CLASS)
            .select(["ResourceID", "Name"])
            .where_eq("CollectionID", &self.collection_id)
            .order_by("ResourceID")
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.collection_id)
    }
}
