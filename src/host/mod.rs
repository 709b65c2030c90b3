//! The interactive document the scraper drives.
//!
//! Discovery, interaction, script evaluation and readiness waits go through
//! [`DocumentHost`]; the disclosure driver and the coordinator never see a
//! concrete browser type.

pub mod chrome;
pub mod static_doc;

#[cfg(test)]
pub mod mock;

use std::ops::Deref;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::rows::Row;

/// Opaque handle a host hands out for an element it discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct ElementRef(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Element {
    pub handle: ElementRef,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub href: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMatch {
    /// Trimmed text equals the needle.
    Exact,
    /// Text contains the needle.
    Contains,
}

/// Interactive elements selected by their visible text, optionally pinned to
/// one target attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextQuery {
    pub needle: String,
    pub matching: TextMatch,
    pub href: Option<String>,
}

impl TextQuery {
    pub fn exact(needle: &str) -> Self {
        TextQuery {
            needle: needle.to_string(),
            matching: TextMatch::Exact,
            href: None,
        }
    }

    pub fn contains(needle: &str) -> Self {
        TextQuery {
            needle: needle.to_string(),
            matching: TextMatch::Contains,
            href: None,
        }
    }

    pub fn with_href(mut self, href: &str) -> Self {
        self.href = Some(href.to_string());
        self
    }

    pub fn matches(&self, text: &str, href: Option<&str>) -> bool {
        if let Some(wanted) = &self.href {
            if href != Some(wanted.as_str()) {
                return false;
            }
        }
        match self.matching {
            TextMatch::Exact => text.trim() == self.needle,
            TextMatch::Contains => text.contains(&self.needle),
        }
    }
}

/// Structural element lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathQuery {
    XPath(&'static str),
    Css(&'static str),
}

/// Every anchor nested in a table, through the XPath engine.
pub const TABLE_ANCHORS: PathQuery = PathQuery::XPath("//table//a");
/// Every anchor nested in a table, through the CSS selector engine.
pub const TABLE_ANCHORS_CSS: PathQuery = PathQuery::Css("table a");

#[async_trait]
pub trait DocumentHost: Send + Sync {
    async fn find_by_text(&self, query: &TextQuery) -> Result<Vec<Element>>;

    async fn find_by_path(&self, query: PathQuery) -> Result<Vec<Element>>;

    async fn scroll_into_view(&self, element: &Element) -> Result<()>;

    /// Click dispatched from page script; not subject to overlays.
    async fn script_click(&self, element: &Element) -> Result<()>;

    /// Click through the host's input pipeline.
    async fn native_click(&self, element: &Element) -> Result<()>;

    /// Move the pointer over the element, then click at its midpoint.
    async fn move_and_click(&self, element: &Element) -> Result<()>;

    async fn evaluate_script(&self, script: &str) -> Result<serde_json::Value>;

    /// `Ok(false)` on timeout; errors are reserved for a broken host.
    async fn wait_until_present(&self, selector: &str, timeout: Duration) -> Result<bool>;

    /// Currently rendered body rows of every table, in document order.
    async fn snapshot_rows(&self) -> Result<Vec<Row>>;

    /// Click the consent banner's accept button if one is shown.
    async fn dismiss_consent(&self, label: &str) -> Result<bool>;
}

/// A host holding an external resource that must be released.
pub trait Session {
    /// Release the resource. Later calls do nothing.
    fn close(&mut self);
}

/// Owns a session and closes it when dropped, so early returns and panics
/// release it the same way a finished run does.
pub struct SessionGuard<S: Session>(S);

impl<S: Session> SessionGuard<S> {
    pub fn new(session: S) -> Self {
        SessionGuard(session)
    }
}

impl<S: Session> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.0
    }
}

impl<S: Session> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.0.close();
    }
}

// ── Tests ──
