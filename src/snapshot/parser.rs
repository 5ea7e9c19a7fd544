//! Tolerant parser for uiautomator hierarchy dumps
//!
//! The dump is scanned for `<node ...>` tags rather than parsed as a
//! document, so truncated output, trailing status lines ("UI hierchary
//! dumped to ...") and attribute reordering are all harmless. Input with no
//! recognizable nodes yields an empty snapshot instead of an error.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use super::types::{ElementState, Rect, Snapshot};

fn node_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<node\b([^>]*)>").expect("valid node regex"))
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][\w:.\-]*)\s*=\s*"([^"]*)""#).expect("valid attribute regex")
    })
}

fn bounds_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]$").expect("valid bounds regex")
    })
}

/// Parse a raw dump into a snapshot stamped at `timestamp_ms`
pub fn parse_hierarchy(raw: &str, timestamp_ms: u64) -> Snapshot {
    let mut element_count = 0usize;
    let mut named = BTreeMap::new();
    let mut class_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut texts = Vec::new();

    for node in node_re().captures_iter(raw) {
        let attrs = parse_attrs(&node[1]);
        element_count += 1;

        let text = attrs.get("text").map(|t| decode_entities(t)).filter(|t| !t.trim().is_empty());
        let desc = attrs
            .get("content-desc")
            .map(|d| decode_entities(d))
            .filter(|d| !d.trim().is_empty());
        let class = attrs
            .get("class")
            .map(|c| c.to_string())
            .filter(|c| !c.is_empty());

        if let Some(class) = &class {
            *class_counts.entry(class.clone()).or_default() += 1;
        }
        if let Some(text) = &text {
            texts.push(text.clone());
        }
        if let Some(desc) = &desc {
            texts.push(desc.clone());
        }

        let Some(tag) = element_tag(attrs.get("resource-id").copied(), desc.as_deref()) else {
            continue;
        };

        let state = ElementState {
            present: true,
            text: text.or_else(|| desc.clone()),
            enabled: flag(&attrs, "enabled"),
            focused: flag(&attrs, "focused"),
            bounds: attrs.get("bounds").and_then(|b| parse_bounds(b)),
            class,
            clickable: flag(&attrs, "clickable"),
        };

        let key = unique_key(&named, tag);
        named.insert(key, state);
    }

    if element_count == 0 {
        debug!(
            raw_len = raw.len(),
            "UI dump contained no nodes; treating as empty snapshot"
        );
        return Snapshot::empty(timestamp_ms);
    }

    Snapshot::new(timestamp_ms, element_count, named, class_counts, texts)
}

fn parse_attrs(body: &str) -> BTreeMap<&str, &str> {
    attr_re()
        .captures_iter(body)
        .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
        .collect()
}

fn flag(attrs: &BTreeMap<&str, &str>, name: &str) -> bool {
    attrs.get(name).map(|v| *v == "true").unwrap_or(false)
}

/// Stable tag for an element: resource id without its package prefix,
/// else its content description
fn element_tag(resource_id: Option<&str>, desc: Option<&str>) -> Option<String> {
    if let Some(id) = resource_id.map(str::trim).filter(|id| !id.is_empty()) {
        let short = id.split_once(":id/").map(|(_, name)| name).unwrap_or(id);
        return Some(decode_entities(short));
    }
    desc.map(|d| d.trim().to_string())
}

fn unique_key(named: &BTreeMap<String, ElementState>, tag: String) -> String {
    if !named.contains_key(&tag) {
        return tag;
    }
    (2..)
        .map(|n| format!("{tag}#{n}"))
        .find(|candidate| !named.contains_key(candidate))
        .unwrap_or(tag)
}

pub(crate) fn parse_bounds(value: &str) -> Option<Rect> {
    let caps = bounds_re().captures(value.trim())?;
    let num = |i: usize| caps.get(i)?.as_str().parse::<i32>().ok();
    Some(Rect {
        left: num(1)?,
        top: num(2)?,
        right: num(3)?,
        bottom: num(4)?,
    })
}

fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let Some(end) = tail.find(';').filter(|end| *end <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        let entity = &tail[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
