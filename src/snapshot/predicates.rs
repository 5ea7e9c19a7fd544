//! Reusable wait predicates over `(baseline, candidate, elapsed_ms)`

use std::sync::Arc;

use super::diff::diff;
use super::types::Snapshot;
use crate::poller::{predicate, Predicate};

/// Wrap a closure over two snapshots
///
/// The concrete signature lets closures call `Snapshot` methods on their
/// arguments without annotations.
fn on_screen<F>(f: F) -> Predicate<Snapshot>
where
    F: Fn(&Snapshot, &Snapshot, u64) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Any tracked change relative to the baseline
pub fn changed() -> Predicate<Snapshot> {
    on_screen(|baseline, candidate, _| !diff(baseline, candidate).is_empty())
}

/// A specific element changed (appeared, vanished, or a field moved)
pub fn element_changed(tag: &str) -> Predicate<Snapshot> {
    let tag = tag.to_string();
    on_screen(move |baseline, candidate, _| diff(baseline, candidate).touches(&tag))
}

pub fn element_present(tag: &str) -> Predicate<Snapshot> {
    let tag = tag.to_string();
    on_screen(move |_, candidate, _| candidate.is_present(&tag))
}

/// Element is gone; an empty capture does not count as "gone"
pub fn element_absent(tag: &str) -> Predicate<Snapshot> {
    let tag = tag.to_string();
    on_screen(move |_, candidate, _| !candidate.is_empty() && !candidate.is_present(&tag))
}

pub fn element_enabled(tag: &str) -> Predicate<Snapshot> {
    let tag = tag.to_string();
    on_screen(move |_, candidate, _| {
        candidate
            .element(&tag)
            .map(|e| e.enabled)
            .unwrap_or(false)
    })
}

pub fn text_equals(tag: &str, expected: &str) -> Predicate<Snapshot> {
    let tag = tag.to_string();
    let expected = expected.to_string();
    on_screen(move |_, candidate, _| candidate.text_of(&tag) == Some(expected.as_str()))
}

pub fn text_contains(tag: &str, needle: &str) -> Predicate<Snapshot> {
    let tag = tag.to_string();
    let needle = needle.to_string();
    on_screen(move |_, candidate, _| {
        candidate
            .text_of(&tag)
            .map(|t| t.contains(&needle))
            .unwrap_or(false)
    })
}

/// Some visible text anywhere on screen contains `needle`
pub fn any_text_contains(needle: &str) -> Predicate<Snapshot> {
    let needle = needle.to_string();
    on_screen(move |_, candidate, _| candidate.contains_text(&needle))
}

pub fn class_count_changed(class: &str) -> Predicate<Snapshot> {
    let class = class.to_string();
    on_screen(move |baseline, candidate, _| {
        baseline.class_count(&class) != candidate.class_count(&class)
    })
}

pub fn class_count_at_least(class: &str, min: usize) -> Predicate<Snapshot> {
    let class = class.to_string();
    on_screen(move |_, candidate, _| candidate.class_count(&class) >= min)
}

/// All predicates hold
pub fn all<T: 'static>(predicates: Vec<Predicate<T>>) -> Predicate<T> {
    predicate(move |baseline, candidate, elapsed| {
        predicates.iter().all(|p| p(baseline, candidate, elapsed))
    })
}

/// At least one predicate holds
pub fn any<T: 'static>(predicates: Vec<Predicate<T>>) -> Predicate<T> {
    predicate(move |baseline, candidate, elapsed| {
        predicates.iter().any(|p| p(baseline, candidate, elapsed))
    })
}

/// Negation of a predicate
pub fn not<T: 'static>(inner: Predicate<T>) -> Predicate<T> {
    predicate(move |baseline, candidate, elapsed| !inner(baseline, candidate, elapsed))
}
