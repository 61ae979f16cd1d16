//! Column to contact-field mapping for imports.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Minimum Jaro-Winkler similarity for a suggestion
const SUGGEST_THRESHOLD: f64 = 0.9;

/// Contact field a spreadsheet column can feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTarget {
    Email,
    Phone,
    FirstName,
    LastName,
    FullName,
    Company,
    JobTitle,
    Notes,
    Tags,
    Ignore,
}

impl FieldTarget {
    /// Cycle order in the mapping screen
    pub const ALL: [FieldTarget; 10] = [
        FieldTarget::Ignore,
        FieldTarget::Email,
        FieldTarget::Phone,
        FieldTarget::FirstName,
        FieldTarget::LastName,
        FieldTarget::FullName,
        FieldTarget::Company,
        FieldTarget::JobTitle,
        FieldTarget::Notes,
        FieldTarget::Tags,
    ];

    /// Fields that can identify a contact on their own
    pub fn is_identifier(self) -> bool {
        matches!(self, FieldTarget::Email | FieldTarget::Phone)
    }

    pub fn label(self) -> &'static str {
        match self {
            FieldTarget::Email => "Email",
            FieldTarget::Phone => "Phone",
            FieldTarget::FirstName => "First name",
            FieldTarget::LastName => "Last name",
            FieldTarget::FullName => "Full name",
            FieldTarget::Company => "Company",
            FieldTarget::JobTitle => "Job title",
            FieldTarget::Notes => "Notes",
            FieldTarget::Tags => "Tags",
            FieldTarget::Ignore => "(ignore)",
        }
    }

    /// Normalized header spellings this field is recognized by
    fn aliases(self) -> &'static [&'static str] {
        match self {
            FieldTarget::Email => &["email", "emailaddress", "mail", "courriel"],
            FieldTarget::Phone => &["phone", "phonenumber", "mobile", "cell", "telephone", "tel"],
            FieldTarget::FirstName => &["firstname", "givenname", "forename"],
            FieldTarget::LastName => &["lastname", "surname", "familyname"],
            FieldTarget::FullName => &["name", "fullname", "displayname", "contactname"],
            FieldTarget::Company => &["company", "organization", "organisation", "employer"],
            FieldTarget::JobTitle => &["jobtitle", "title", "position", "role"],
            FieldTarget::Notes => &["notes", "note", "comments", "description"],
            FieldTarget::Tags => &["tags", "labels", "groups"],
            FieldTarget::Ignore => &[],
        }
    }

    pub fn next(self) -> Self {
        let idx = Self::position(self);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> Self {
        let idx = Self::position(self);
        Self::ALL[(idx + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    fn position(self) -> usize {
        Self::ALL.iter().position(|t| *t == self).unwrap_or(0)
    }
}

impl fmt::Display for FieldTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Source column header -> target field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ColumnMapping(BTreeMap<String, FieldTarget>);

impl ColumnMapping {
    pub fn get(&self, column: &str) -> FieldTarget {
        self.0.get(column).copied().unwrap_or(FieldTarget::Ignore)
    }

    /// Returns true when the target changed
    pub fn set(&mut self, column: impl Into<String>, target: FieldTarget) -> bool {
        self.0.insert(column.into(), target) != Some(target)
    }

    pub fn has_identifier(&self) -> bool {
        self.0.values().any(|target| target.is_identifier())
    }

    /// Number of columns that feed a field
    pub fn mapped_count(&self) -> usize {
        self.0.values().filter(|t| **t != FieldTarget::Ignore).count()
    }
}

/// Give repeated headers a ` (n)` suffix so each column keeps its own entry
pub fn unique_headers(columns: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique = Vec::with_capacity(columns.len());
    for column in columns {
        let mut name = column.clone();
        let mut n = 2;
        while seen.contains(&name) {
            name = format!("{} ({})", column, n);
            n += 1;
        }
        seen.insert(name.clone());
        unique.push(name);
    }
    unique
}

fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn score(header: &str, target: FieldTarget) -> f64 {
    target
        .aliases()
        .iter()
        .map(|alias| strsim::jaro_winkler(header, alias))
        .fold(0.0, f64::max)
}

/// Guess a target for every column.
///
/// Best (column, field) pairs are taken first and each field is used at most
/// once; anything scoring below the threshold is ignored. Headers are expected
/// to be unique (see `unique_headers`); a repeat never replaces an earlier entry.
pub fn suggest_mapping(columns: &[String]) -> ColumnMapping {
    let normalized: Vec<String> = columns.iter().map(|c| normalize_header(c)).collect();

    let mut candidates: Vec<(f64, usize, FieldTarget)> = Vec::new();
    for (idx, header) in normalized.iter().enumerate() {
        if header.is_empty() {
            continue;
        }
        for target in FieldTarget::ALL {
            if target == FieldTarget::Ignore {
                continue;
            }
            let s = score(header, target);
            if s >= SUGGEST_THRESHOLD {
                candidates.push((s, idx, target));
            }
        }
    }
    // Highest score first; ties keep column order
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut assigned: Vec<Option<FieldTarget>> = vec![None; columns.len()];
    let mut used: Vec<FieldTarget> = Vec::new();
    for (_, idx, target) in candidates {
        if assigned[idx].is_some() || used.contains(&target) {
            continue;
        }
        assigned[idx] = Some(target);
        used.push(target);
    }

    let mut mapping = ColumnMapping::default();
    for (column, target) in columns.iter().zip(assigned) {
        mapping
            .0
            .entry(column.clone())
            .or_insert(target.unwrap_or(FieldTarget::Ignore));
    }
    mapping
}
