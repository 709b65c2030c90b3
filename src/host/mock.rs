use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{DocumentHost, Element, ElementRef, PathQuery, TextQuery};
use crate::rows::Row;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FindByText(TextQuery),
    FindByPath(PathQuery),
    Scroll(u64),
    ScriptClick(u64),
    NativeClick(u64),
    MoveAndClick(u64),
    Script,
    Snapshot,
    Consent,
}

/// Scripted host for driver and coordinator tests.
#[derive(Default)]
pub struct MockHost {
    /// Anchors answering text queries.
    pub by_text: Vec<Element>,
    /// Anchors under the table for XPath / CSS path queries.
    pub by_xpath: Vec<Element>,
    pub by_css: Vec<Element>,
    /// Result of the bulk trigger script; `None` makes scripts fail.
    pub bulk_clicks: Option<u64>,
    pub failing_script_click: HashSet<u64>,
    pub failing_native_click: HashSet<u64>,
    pub failing_move_click: HashSet<u64>,
    pub rows: Vec<Row>,
    pub table_present: bool,
    pub broken_snapshot: bool,
    pub calls: Mutex<Vec<Call>>,
}

pub fn anchor(id: u64, text: &str, href: &str) -> Element {
    Element {
        handle: ElementRef(id),
        text: text.to_string(),
        href: Some(href.to_string()),
    }
}

impl MockHost {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(*c)).count()
    }

    fn record(&self, call: Call) -> Result<()> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("call log poisoned"))?
            .push(call);
        Ok(())
    }
}

#[async_trait]
impl DocumentHost for MockHost {
    async fn find_by_text(&self, query: &TextQuery) -> Result<Vec<Element>> {
        self.record(Call::FindByText(query.clone()))?;
        Ok(self
            .by_text
            .iter()
            .filter(|e| query.matches(&e.text, e.href.as_deref()))
            .cloned()
            .collect())
    }

    async fn find_by_path(&self, query: PathQuery) -> Result<Vec<Element>> {
        self.record(Call::FindByPath(query))?;
        Ok(match query {
            PathQuery::XPath(_) => self.by_xpath.clone(),
            PathQuery::Css(_) => self.by_css.clone(),
        })
    }

    async fn scroll_into_view(&self, element: &Element) -> Result<()> {
        self.record(Call::Scroll(element.handle.0))
    }

    async fn script_click(&self, element: &Element) -> Result<()> {
        self.record(Call::ScriptClick(element.handle.0))?;
        if self.failing_script_click.contains(&element.handle.0) {
            bail!("script click intercepted");
        }
        Ok(())
    }

    async fn native_click(&self, element: &Element) -> Result<()> {
        self.record(Call::NativeClick(element.handle.0))?;
        if self.failing_native_click.contains(&element.handle.0) {
            bail!("element click intercepted");
        }
        Ok(())
    }

    async fn move_and_click(&self, element: &Element) -> Result<()> {
        self.record(Call::MoveAndClick(element.handle.0))?;
        if self.failing_move_click.contains(&element.handle.0) {
            bail!("element not interactable");
        }
        Ok(())
    }

    async fn evaluate_script(&self, _script: &str) -> Result<serde_json::Value> {
        self.record(Call::Script)?;
        match self.bulk_clicks {
            Some(n) => Ok(serde_json::Value::from(n)),
            None => bail!("javascript disabled"),
        }
    }

    async fn wait_until_present(&self, _selector: &str, _timeout: Duration) -> Result<bool> {
        Ok(self.table_present)
    }

    async fn snapshot_rows(&self) -> Result<Vec<Row>> {
        self.record(Call::Snapshot)?;
        if self.broken_snapshot {
            bail!("browser connection lost");
        }
        Ok(self.rows.clone())
    }

    async fn dismiss_consent(&self, _label: &str) -> Result<bool> {
        self.record(Call::Consent)?;
        Ok(false)
    }
}
