use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single planned trip.
///
/// Stored as one document in the `holidays` collection. Field names on the
/// wire are camelCase, and any field missing from a stored document falls
/// back to its default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Holiday {
    /// Empty until the store assigns one on create.
    pub id: String,
    pub title: String,
    pub location: String,
    pub notes: String,
    pub start_date: String,
    pub end_date: String,
    /// Stamped once by the repository on create.
    pub created_at: Option<DateTime<Utc>>,
}

impl Holiday {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_dates(mut self, start_date: impl Into<String>, end_date: impl Into<String>) -> Self {
        self.start_date = start_date.into();
        self.end_date = end_date.into();
        self
    }

    /// Returns true once the store has assigned an id.
    pub fn is_persisted(&self) -> bool {
        !self.id.is_empty()
    }

    /// Case-insensitive substring match against title and location.
    ///
    /// A blank query matches every holiday.
    pub fn matches(&self, query: &str) -> bool {
        if query.trim().is_empty() {
            return true;
        }
        let needle = query.to_lowercase();
        self.title.to_lowercase().contains(&needle)
            || self.location.to_lowercase().contains(&needle)
    }

    /// Formats the date range for display, e.g. `2024-06-01 → 2024-06-10`.
    pub fn date_range(&self) -> Option<String> {
        match (self.start_date.is_empty(), self.end_date.is_empty()) {
            (true, true) => None,
            (false, true) => Some(format!("from {}", self.start_date)),
            (true, false) => Some(format!("until {}", self.end_date)),
            (false, false) => Some(format!("{} → {}", self.start_date, self.end_date)),
        }
    }
}

impl fmt::Display for Holiday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(f, "{}", "=".repeat(self.title.chars().count()))?;

        if !self.id.is_empty() {
            writeln!(f, "ID: {}", self.id)?;
        }
        if !self.location.is_empty() {
            writeln!(f, "Location: {}", self.location)?;
        }
        if let Some(range) = self.date_range() {
            writeln!(f, "Dates: {}", range)?;
        }
        if let Some(created_at) = self.created_at {
            writeln!(f, "Created: {}", created_at.format("%Y-%m-%d %H:%M"))?;
        }
        if !self.notes.is_empty() {
            writeln!(f, "\nNotes:\n{}", self.notes)?;
        }

        Ok(())
    }
}
