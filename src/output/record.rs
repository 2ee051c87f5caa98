//! Extracted record model

use crate::crawler::Cursor;
use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of an extracted record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Profile identity: name, headline, location, about
    Profile,
    Experience,
    Education,
    Certification,
    Skill,
    /// An edge from the crawled profile to one of its connections
    Connection,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Experience => "experience",
            Self::Education => "education",
            Self::Certification => "certification",
            Self::Skill => "skill",
            Self::Connection => "connection",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A month-precision (or year-precision) date as shown on profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartialDate {
    pub year: i32,
    pub month: Option<u32>,
}

impl PartialDate {
    /// Parses "Jan 2019", "January 2019" or "2019"
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.len() == 4 && text.chars().all(|c| c.is_ascii_digit()) {
            return text.parse().ok().map(|year| Self { year, month: None });
        }
        let date = NaiveDate::parse_from_str(&format!("1 {}", text), "%d %b %Y").ok()?;
        Some(Self {
            year: date.year(),
            month: Some(date.month()),
        })
    }
}

impl fmt::Display for PartialDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.month {
            Some(month) => write!(f, "{:04}-{:02}", self.year, month),
            None => write!(f, "{:04}", self.year),
        }
    }
}

impl Serialize for PartialDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Value of one record field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Date(PartialDate),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One structured output unit
///
/// Immutable once emitted; fields are kept sorted so serialization is stable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub kind: RecordKind,
    pub fields: BTreeMap<String, FieldValue>,
    /// `<rule table>/<section>@<rule fingerprint>`
    pub provenance: String,
    /// At least one required field could not be resolved
    pub partial: bool,
    /// Identifier of the resource the record came from
    pub origin: String,
    pub cursor: Cursor,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Text value of a field, if present and textual
    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(FieldValue::as_text)
    }
}
