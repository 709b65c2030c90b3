use serde::{Deserialize, Serialize};
use tracing::debug;

/// Target attribute of links that only toggle content in place.
pub const PLACEHOLDER_HREF: &str = "#";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    #[serde(default)]
    pub text: String,
}

impl Link {
    pub fn is_placeholder(&self) -> bool {
        self.href.trim() == PLACEHOLDER_HREF
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cell {
    pub text: String,
    pub link: Option<Link>,
    /// Set when the cell itself is a disclosure control.
    pub affordance: bool,
}

impl Cell {
    pub fn new(text: &str, link: Option<Link>) -> Self {
        let affordance = link.as_ref().is_some_and(Link::is_placeholder);
        Cell {
            text: text.trim().to_string(),
            link,
            affordance,
        }
    }
}

#[cfg(test)]
impl Cell {
    pub fn text(text: &str) -> Self {
        Cell::new(text, None)
    }

    pub fn linked(text: &str, href: &str) -> Self {
        Cell::new(
            text,
            Some(Link {
                href: href.to_string(),
                text: text.trim().to_string(),
            }),
        )
    }
}

/// A read-only snapshot of one table row, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new(cells: Vec<Cell>) -> Self {
        Row { cells }
    }
}

#[cfg(test)]
impl Row {
    /// Shorthand for link-less rows: `Row::plain(&["IA", "95"])`.
    pub fn plain(texts: &[&str]) -> Self {
        Row::new(texts.iter().map(|t| Cell::text(t)).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRecord {
    pub name: String,
    /// Position of the parent row among the classified rows.
    pub rank: usize,
}

/// One leaf record: institution, class label and the threshold as printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedTriple {
    pub parent_name: String,
    pub child_label: String,
    pub threshold_text: String,
}

impl ExtractedTriple {
    pub fn new(parent: &str, child: &str, threshold: &str) -> Self {
        ExtractedTriple {
            parent_name: parent.to_string(),
            child_label: child.to_string(),
            threshold_text: threshold.to_string(),
        }
    }
}

// ── Host wire shape ──

#[derive(Debug, Deserialize)]
struct RawCell {
    #[serde(default)]
    text: String,
    #[serde(default)]
    link: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    cells: Vec<RawCell>,
}

/// Decode a host row snapshot: `[{"cells": [{"text": .., "link": {..} | null}]}]`.
///
/// Rows that fail to decode keep their position as empty rows, which the
/// classifier skips as noise.
pub fn decode_rows(value: serde_json::Value) -> Vec<Row> {
    let items = match value {
        serde_json::Value::Array(items) => items,
        other => {
            debug!(kind = %json_kind(&other), "row snapshot is not an array");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match serde_json::from_value::<RawRow>(item) {
            Ok(raw) => Row::new(
                raw.cells
                    .into_iter()
                    .map(|c| Cell::new(&c.text, c.link))
                    .collect(),
            ),
            Err(e) => {
                debug!(row = i, error = %e, "undecodable row treated as noise");
                Row::default()
            }
        })
        .collect()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ── Tests ──
