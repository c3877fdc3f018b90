//! Static allow/deny classification
//!
//! Case-insensitive substring matching against curated lists. Deny wins
//! over allow; a grey heuristic flags short or digit-heavy names when
//! neither list matches. Lists can be edited at runtime; each edit
//! publishes a new snapshot so a concurrent `classify` sees either the
//! old lists or the new ones, never a mix.

use crate::config::{ClassifierConfig, Live};
use crate::types::Classification;
use std::collections::BTreeSet;

/// Names shorter than this are grey-listed
const GREY_MIN_LEN: usize = 8;
/// Digit share above which a name is grey-listed
const GREY_MAX_DIGIT_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Default)]
struct ListSet {
    allow: BTreeSet<String>,
    deny: BTreeSet<String>,
}

/// Which list a runtime edit targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Allow,
    Deny,
}

/// Classification plus the list entry that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyOutcome {
    pub classification: Classification,
    /// Matching allow/deny entry, if any
    pub entry: Option<String>,
}

/// Allow/deny/grey substring classifier
#[derive(Debug)]
pub struct StaticClassifier {
    lists: Live<ListSet>,
}

impl StaticClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        let lists = ListSet {
            allow: config.allow.iter().filter_map(|e| normalize_entry(e)).collect(),
            deny: config.deny.iter().filter_map(|e| normalize_entry(e)).collect(),
        };
        Self {
            lists: Live::new(lists),
        }
    }

    /// Classifier with empty lists
    pub fn empty() -> Self {
        Self {
            lists: Live::default(),
        }
    }

    pub fn classify(&self, subject: &str) -> Classification {
        self.classify_detailed(subject).classification
    }

    pub fn classify_detailed(&self, subject: &str) -> ClassifyOutcome {
        let lowered = subject.to_lowercase();
        let clean = lowered.strip_prefix("www.").unwrap_or(&lowered);
        let lists = self.lists.load();

        if let Some(entry) = lists.deny.iter().find(|e| clean.contains(e.as_str())) {
            return ClassifyOutcome {
                classification: Classification::Blacklist,
                entry: Some(entry.clone()),
            };
        }
        if let Some(entry) = lists.allow.iter().find(|e| clean.contains(e.as_str())) {
            return ClassifyOutcome {
                classification: Classification::Whitelist,
                entry: Some(entry.clone()),
            };
        }

        let classification = if is_grey(clean) {
            Classification::Greylist
        } else {
            Classification::Unknown
        };
        ClassifyOutcome {
            classification,
            entry: None,
        }
    }

    /// Add an entry; returns false if it was already present or blank
    pub fn add(&self, kind: ListKind, entry: &str) -> bool {
        let Some(entry) = normalize_entry(entry) else {
            return false;
        };
        let mut inserted = false;
        self.lists.update(|lists| {
            inserted = match kind {
                ListKind::Allow => lists.allow.insert(entry.clone()),
                ListKind::Deny => lists.deny.insert(entry.clone()),
            };
        });
        if inserted {
            tracing::info!(list = ?kind, entry = %entry, "Static list entry added");
        }
        inserted
    }

    /// Remove an entry; returns false if it was not present
    pub fn remove(&self, kind: ListKind, entry: &str) -> bool {
        let Some(entry) = normalize_entry(entry) else {
            return false;
        };
        let mut removed = false;
        self.lists.update(|lists| {
            removed = match kind {
                ListKind::Allow => lists.allow.remove(&entry),
                ListKind::Deny => lists.deny.remove(&entry),
            };
        });
        if removed {
            tracing::info!(list = ?kind, entry = %entry, "Static list entry removed");
        }
        removed
    }

    /// Sorted copy of one list
    pub fn entries(&self, kind: ListKind) -> Vec<String> {
        let lists = self.lists.load();
        match kind {
            ListKind::Allow => lists.allow.iter().cloned().collect(),
            ListKind::Deny => lists.deny.iter().cloned().collect(),
        }
    }
}

fn normalize_entry(entry: &str) -> Option<String> {
    let entry = entry.trim().to_lowercase();
    (!entry.is_empty()).then_some(entry)
}

fn is_grey(name: &str) -> bool {
    let len = name.chars().count();
    if len < GREY_MIN_LEN {
        return true;
    }
    let digits = name.chars().filter(|c| c.is_ascii_digit()).count();
    digits as f64 / len as f64 > GREY_MAX_DIGIT_RATIO
}
