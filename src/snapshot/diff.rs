//! Semantic difference between two snapshots

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{ElementState, Snapshot};

/// Element field that participates in change detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Text,
    Enabled,
    Focused,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Enabled => write!(f, "enabled"),
            Self::Focused => write!(f, "focused"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: Field,
    pub before: Option<String>,
    pub after: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountChange {
    pub before: usize,
    pub after: usize,
}

/// What changed going from one snapshot to another
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDelta {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub changed: BTreeMap<String, Vec<FieldChange>>,
    pub element_count: Option<CountChange>,
    pub class_counts: BTreeMap<String, CountChange>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && self.element_count.is_none()
            && self.class_counts.is_empty()
    }

    /// Whether a specific element changed in any tracked way
    pub fn touches(&self, tag: &str) -> bool {
        self.added.contains(tag) || self.removed.contains(tag) || self.changed.contains_key(tag)
    }

    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no change".to_string();
        }
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("+{}", join(&self.added)));
        }
        if !self.removed.is_empty() {
            parts.push(format!("-{}", join(&self.removed)));
        }
        for (tag, changes) in &self.changed {
            let fields: Vec<String> = changes.iter().map(|c| c.field.to_string()).collect();
            parts.push(format!("~{}({})", tag, fields.join(",")));
        }
        if let Some(count) = self.element_count {
            parts.push(format!("elements {}->{}", count.before, count.after));
        }
        for (class, count) in &self.class_counts {
            parts.push(format!("{} {}->{}", class, count.before, count.after));
        }
        parts.join(" ")
    }
}

fn join(tags: &BTreeSet<String>) -> String {
    tags.iter().cloned().collect::<Vec<_>>().join(",")
}

/// Compute the delta from `a` to `b`
///
/// Total and pure: every pair of snapshots has a delta, and
/// `diff(a, b).added == diff(b, a).removed`.
pub fn diff(a: &Snapshot, b: &Snapshot) -> StateDelta {
    let before = a.named_elements();
    let after = b.named_elements();

    let added = after
        .keys()
        .filter(|tag| !before.contains_key(*tag))
        .cloned()
        .collect();
    let removed = before
        .keys()
        .filter(|tag| !after.contains_key(*tag))
        .cloned()
        .collect();

    let changed = before
        .iter()
        .filter_map(|(tag, old)| {
            let new = after.get(tag)?;
            let changes = field_changes(old, new);
            (!changes.is_empty()).then(|| (tag.clone(), changes))
        })
        .collect();

    let element_count = (a.element_count() != b.element_count()).then(|| CountChange {
        before: a.element_count(),
        after: b.element_count(),
    });

    let classes: BTreeSet<&String> = a.class_counts().keys().chain(b.class_counts().keys()).collect();
    let class_counts = classes
        .into_iter()
        .filter_map(|class| {
            let before = a.class_count(class);
            let after = b.class_count(class);
            (before != after).then(|| (class.clone(), CountChange { before, after }))
        })
        .collect();

    StateDelta {
        added,
        removed,
        changed,
        element_count,
        class_counts,
    }
}

fn field_changes(old: &ElementState, new: &ElementState) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if old.text != new.text {
        changes.push(FieldChange {
            field: Field::Text,
            before: old.text.clone(),
            after: new.text.clone(),
        });
    }
    if old.enabled != new.enabled {
        changes.push(FieldChange {
            field: Field::Enabled,
            before: Some(old.enabled.to_string()),
            after: Some(new.enabled.to_string()),
        });
    }
    if old.focused != new.focused {
        changes.push(FieldChange {
            field: Field::Focused,
            before: Some(old.focused.to_string()),
            after: Some(new.focused.to_string()),
        });
    }
    changes
}
