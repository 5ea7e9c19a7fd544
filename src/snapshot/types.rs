//! Snapshot data model

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// On-screen bounds in device pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{}][{},{}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Observable state of one named element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementState {
    pub present: bool,
    pub text: Option<String>,
    pub enabled: bool,
    pub focused: bool,
    pub bounds: Option<Rect>,
    /// Widget class, e.g. `android.widget.Button`
    pub class: Option<String>,
    pub clickable: bool,
}

impl ElementState {
    /// State reported for an element that is not on screen
    pub fn absent() -> Self {
        Self {
            present: false,
            text: None,
            enabled: false,
            focused: false,
            bounds: None,
            class: None,
            clickable: false,
        }
    }
}

/// Immutable capture of the observable surface at one instant
///
/// Built once by the parser and never modified; later captures supersede
/// it. Element tags are stable identifiers (resource ids or content
/// descriptions), so two snapshots can be compared tag by tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    timestamp_ms: u64,
    element_count: usize,
    named_elements: BTreeMap<String, ElementState>,
    class_counts: BTreeMap<String, usize>,
    texts: Vec<String>,
    fingerprint: String,
}

impl Snapshot {
    pub fn new(
        timestamp_ms: u64,
        element_count: usize,
        named_elements: BTreeMap<String, ElementState>,
        class_counts: BTreeMap<String, usize>,
        texts: Vec<String>,
    ) -> Self {
        let fingerprint = fingerprint(element_count, &named_elements, &class_counts, &texts);
        Self {
            timestamp_ms,
            element_count,
            named_elements,
            class_counts,
            texts,
            fingerprint,
        }
    }

    /// "No observable state": what an unparseable dump yields
    pub fn empty(timestamp_ms: u64) -> Self {
        Self::new(
            timestamp_ms,
            0,
            BTreeMap::new(),
            BTreeMap::new(),
            Vec::new(),
        )
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    pub fn named_elements(&self) -> &BTreeMap<String, ElementState> {
        &self.named_elements
    }

    pub fn class_counts(&self) -> &BTreeMap<String, usize> {
        &self.class_counts
    }

    /// Every visible text and content description, in document order
    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    pub fn element(&self, tag: &str) -> Option<&ElementState> {
        self.named_elements.get(tag)
    }

    pub fn is_present(&self, tag: &str) -> bool {
        self.element(tag).map(|e| e.present).unwrap_or(false)
    }

    pub fn text_of(&self, tag: &str) -> Option<&str> {
        self.element(tag).and_then(|e| e.text.as_deref())
    }

    pub fn class_count(&self, class: &str) -> usize {
        self.class_counts.get(class).copied().unwrap_or(0)
    }

    pub fn contains_text(&self, needle: &str) -> bool {
        self.texts.iter().any(|t| t.contains(needle))
    }

    /// Same observable state, ignoring capture time
    pub fn same_state(&self, other: &Snapshot) -> bool {
        self.fingerprint == other.fingerprint
    }

    /// One-line description for logs and reports
    pub fn summary(&self) -> String {
        format!(
            "{} elements, {} named, fingerprint {}",
            self.element_count,
            self.named_elements.len(),
            &self.fingerprint[..12.min(self.fingerprint.len())]
        )
    }
}

/// SHA-256 over the fields that define "state changed"
///
/// Bounds are left out so scrolling or layout jitter does not register as
/// a change in state.
fn fingerprint(
    element_count: usize,
    named: &BTreeMap<String, ElementState>,
    class_counts: &BTreeMap<String, usize>,
    texts: &[String],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("count={element_count}\n"));
    for (tag, el) in named {
        hasher.update(format!(
            "el {}|{}|{}|{}|{}\n",
            tag,
            el.present,
            el.text.as_deref().unwrap_or(""),
            el.enabled,
            el.focused
        ));
    }
    for (class, count) in class_counts {
        hasher.update(format!("class {class}={count}\n"));
    }
    for text in texts {
        hasher.update(format!("text {text}\n"));
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(text: &str) -> ElementState {
        ElementState {
            present: true,
            text: Some(text.to_string()),
            enabled: true,
            focused: false,
            bounds: Some(Rect {
                left: 0,
                top: 0,
                right: 100,
                bottom: 50,
            }),
            class: Some("android.widget.TextView".into()),
            clickable: false,
        }
    }

    #[test]
    fn test_fingerprint_ignores_timestamp_and_bounds() {
        let mut elements = BTreeMap::new();
        elements.insert("title".to_string(), element("Hello"));
        let a = Snapshot::new(1, 1, elements.clone(), BTreeMap::new(), vec!["Hello".into()]);

        let mut moved = element("Hello");
        moved.bounds = Some(Rect {
            left: 10,
            top: 10,
            right: 110,
            bottom: 60,
        });
        elements.insert("title".to_string(), moved);
        let b = Snapshot::new(2, 1, elements, BTreeMap::new(), vec!["Hello".into()]);

        assert!(a.same_state(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_tracks_text() {
        let mut elements = BTreeMap::new();
        elements.insert("title".to_string(), element("Hello"));
        let a = Snapshot::new(1, 1, elements.clone(), BTreeMap::new(), vec![]);
        elements.insert("title".to_string(), element("Bye"));
        let b = Snapshot::new(1, 1, elements, BTreeMap::new(), vec![]);
        assert!(!a.same_state(&b));
    }

    #[test]
    fn test_empty_snapshot() {
        let s = Snapshot::empty(42);
        assert!(s.is_empty());
        assert_eq!(s.timestamp_ms(), 42);
        assert!(!s.is_present("anything"));
        assert_eq!(s.fingerprint().len(), 64);
    }

    #[test]
    fn test_rect_center() {
        let r = Rect {
            left: 0,
            top: 100,
            right: 200,
            bottom: 300,
        };
        assert_eq!(r.center(), (100, 200));
        assert_eq!(r.to_string(), "[0,100][200,300]");
    }
}
