//! Collection membership snapshots and convergence checks.

use std::fmt;

use serde::Serialize;

use crate::query::{QueryError, Row};

/// One collection member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceRecord {
    pub resource_id: u32,
    pub name: String,
}

impl ResourceRecord {
    /// # Errors
    ///
    /// `QueryError::MissingProperty` or `QueryError::InvalidValue` if the row
    /// has no usable `ResourceID` or `Name`.
    pub fn from_row(row: &Row) -> Result<Self, QueryError> {
        let raw_id = row.require("ResourceID")?;
        let resource_id = raw_id.parse().map_err(|_| QueryError::InvalidValue {
            property: "ResourceID".to_string(),
            value: raw_id.to_string(),
        })?;
        Ok(Self {
            resource_id,
            name: row.require("Name")?.to_string(),
        })
    }
}

/// Identifies the resource a refresh is expected to add or remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceMatch {
    Id(u32),
    /// Case-insensitive name match.
    Name(String),
}

impl ResourceMatch {
    /// A numeric argument is taken as a resource ID, anything else as a name.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        s.parse().map_or_else(|_| Self::Name(s.to_string()), Self::Id)
    }

    #[must_use]
    pub fn matches(&self, record: &ResourceRecord) -> bool {
        match self {
            Self::Id(id) => record.resource_id == *id,
            Self::Name(name) => record.name.eq_ignore_ascii_case(name),
        }
    }
}

impl fmt::Display for ResourceMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "resource {id}"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

/// The change a refresh should produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedChange {
    Added(ResourceMatch),
    Removed(ResourceMatch),
}

/// Members of a collection at one point in time, ordered by resource ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipSnapshot {
    records: Vec<ResourceRecord>,
}

/// Records that appeared or disappeared between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub added: Vec<ResourceRecord>,
    pub removed: Vec<ResourceRecord>,
}

impl MembershipDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl MembershipSnapshot {
    #[must_use]
    pub fn new(mut records: Vec<ResourceRecord>) -> Self {
        records.sort();
        records.dedup();
        Self { records }
    }

    /// # Errors
    ///
    /// Fails on the first row that is not a valid record.
    pub fn from_rows(rows: &[Row]) -> Result<Self, QueryError> {
        let records = rows
            .iter()
            .map(ResourceRecord::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(records))
    }

    #[must_use]
    pub fn records(&self) -> &[ResourceRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn contains(&self, resource: &ResourceMatch) -> bool {
        self.records.iter().any(|record| resource.matches(record))
    }

    /// Whether this snapshot shows `change` as having happened.
    #[must_use]
    pub fn satisfies(&self, change: &ExpectedChange) -> bool {
        match change {
            ExpectedChange::Added(resource) => self.contains(resource),
            ExpectedChange::Removed(resource) => !self.contains(resource),
        }
    }

    /// What changed going from `self` to `next`.
    #[must_use]
    pub fn diff(&self, next: &MembershipSnapshot) -> MembershipDiff {
        MembershipDiff {
            added: next
                .records
                .iter()
                .filter(|r| self.records.binary_search(r).is_err())
                .cloned()
                .collect(),
            removed: self
                .records
                .iter()
                .filter(|r| next.records.binary_search(r).is_err())
                .cloned()
                .collect(),
        }
    }
}
