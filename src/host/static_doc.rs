use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use scraper::{ElementRef as HtmlElement, Html, Selector};
use tracing::debug;

use super::{DocumentHost, Element, ElementRef, PathQuery, TextQuery};
use crate::rows::{Cell, Link, Row};

#[derive(Debug, Clone)]
struct RowModel {
    cells: Vec<Cell>,
    hidden: bool,
}

#[derive(Debug, Clone)]
struct Anchor {
    text: String,
    href: Option<String>,
    /// Index of the table row holding the anchor.
    row: Option<usize>,
}

#[derive(Debug, Default)]
struct State {
    hidden: Vec<bool>,
    clicks: Vec<u32>,
    consent_dismissed: bool,
}

/// A saved page replayed without a browser.
///
/// Rows hidden with the `hidden` attribute, an inline `display:none` or a
/// `hidden`/`d-none` class stay out of snapshots until an anchor in the row
/// right above them is clicked, which reveals the whole hidden run below it.
/// Scripts cannot be evaluated.
pub struct StaticDocument {
    source: String,
    rows: Vec<RowModel>,
    anchors: Vec<Anchor>,
    buttons: Vec<String>,
    state: Mutex<State>,
}

impl StaticDocument {
    pub fn parse(html: &str) -> Result<Self> {
        let doc = Html::parse_document(html);
        let anchor_sel = selector("a")?;
        let row_sel = selector("table tr")?;
        let cell_sel = selector("td")?;
        let button_sel = selector("button")?;

        let mut index_of = HashMap::new();
        let mut anchors = Vec::new();
        for (i, a) in doc.select(&anchor_sel).enumerate() {
            index_of.insert(a.id(), i);
            anchors.push(Anchor {
                text: inner_text(a),
                href: a.value().attr("href").map(str::to_string),
                row: None,
            });
        }

        let mut rows = Vec::new();
        for (r, tr) in doc.select(&row_sel).enumerate() {
            for a in tr.select(&anchor_sel) {
                if let Some(&i) = index_of.get(&a.id()) {
                    anchors[i].row.get_or_insert(r);
                }
            }
            let cells = tr
                .select(&cell_sel)
                .map(|td| {
                    let link = td.select(&anchor_sel).next().map(|a| Link {
                        href: a.value().attr("href").unwrap_or_default().to_string(),
                        text: inner_text(a),
                    });
                    Cell::new(&inner_text(td), link)
                })
                .collect();
            rows.push(RowModel {
                cells,
                hidden: is_hidden(tr),
            });
        }

        let buttons = doc.select(&button_sel).map(inner_text).collect();
        let state = State {
            hidden: rows.iter().map(|r| r.hidden).collect(),
            clicks: vec![0; anchors.len()],
            consent_dismissed: false,
        };

        debug!(rows = rows.len(), anchors = anchors.len(), "Parsed offline document");
        Ok(StaticDocument {
            source: html.to_string(),
            rows,
            anchors,
            buttons,
            state: Mutex::new(state),
        })
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let html = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&html)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("Document state poisoned"))
    }

    fn element(&self, index: usize) -> Element {
        let a = &self.anchors[index];
        Element {
            handle: ElementRef(index as u64),
            text: a.text.clone(),
            href: a.href.clone(),
        }
    }

    fn anchor_index(&self, element: &Element) -> Result<usize> {
        let index = element.handle.0 as usize;
        if index >= self.anchors.len() {
            bail!("Unknown element {}", element.handle.0);
        }
        Ok(index)
    }

    fn visible(&self, state: &State, index: usize) -> bool {
        self.anchors[index].row.map_or(true, |r| !state.hidden[r])
    }

    /// Anchors selected by a structural query, in document order.
    fn select_anchors(&self, query: PathQuery) -> Result<Vec<usize>> {
        let css = match query {
            PathQuery::Css(css) => css.to_string(),
            PathQuery::XPath(xpath) => xpath_to_css(xpath)?,
        };
        let doc = Html::parse_document(&self.source);
        let anchor_sel = selector("a")?;
        let query_sel = selector(&css)?;

        let index_of: HashMap<_, _> = doc
            .select(&anchor_sel)
            .enumerate()
            .map(|(i, a)| (a.id(), i))
            .collect();
        Ok(doc
            .select(&query_sel)
            .filter_map(|el| index_of.get(&el.id()).copied())
            .collect())
    }

    fn click(&self, element: &Element) -> Result<()> {
        let index = self.anchor_index(element)?;
        let mut state = self.lock()?;
        if !self.visible(&state, index) {
            bail!("Element {index} is not interactable");
        }
        state.clicks[index] += 1;

        if let Some(row) = self.anchors[index].row {
            let mut next = row + 1;
            while next < state.hidden.len() && state.hidden[next] {
                state.hidden[next] = false;
                next += 1;
            }
            debug!(anchor = index, revealed = next - row - 1, "click");
        }
        Ok(())
    }
}

#[cfg(test)]
impl StaticDocument {
    /// How many times each anchor has been clicked, by handle.
    pub fn click_counts(&self) -> Result<Vec<u32>> {
        Ok(self.lock()?.clicks.clone())
    }

    pub fn consent_dismissed(&self) -> Result<bool> {
        Ok(self.lock()?.consent_dismissed)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Bad selector {css:?}: {e:?}"))
}

/// Descendant-only XPaths (`//table//a`) as CSS (`table a`).
fn xpath_to_css(xpath: &str) -> Result<String> {
    let steps: Vec<&str> = xpath
        .strip_prefix("//")
        .ok_or_else(|| anyhow!("Unsupported XPath {xpath:?}"))?
        .split("//")
        .collect();
    if steps
        .iter()
        .any(|s| s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric()))
    {
        bail!("Unsupported XPath {xpath:?}");
    }
    Ok(steps.join(" "))
}

fn inner_text(el: HtmlElement<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_hidden(el: HtmlElement<'_>) -> bool {
    let value = el.value();
    if value.attr("hidden").is_some() {
        return true;
    }
    let inline_none = value.attr("style").is_some_and(|style| {
        let compact: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        compact.contains("display:none")
    });
    inline_none || value.classes().any(|c| c == "hidden" || c == "d-none")
}

#[async_trait]
impl DocumentHost for StaticDocument {
    async fn find_by_text(&self, query: &TextQuery) -> Result<Vec<Element>> {
        let state = self.lock()?;
        Ok((0..self.anchors.len())
            .filter(|&i| self.visible(&state, i))
            .filter(|&i| {
                let a = &self.anchors[i];
                query.matches(&a.text, a.href.as_deref())
            })
            .map(|i| self.element(i))
            .collect())
    }

    async fn find_by_path(&self, query: PathQuery) -> Result<Vec<Element>> {
        let indices = self.select_anchors(query)?;
        let state = self.lock()?;
        Ok(indices
            .into_iter()
            .filter(|&i| self.visible(&state, i))
            .map(|i| self.element(i))
            .collect())
    }

    async fn scroll_into_view(&self, element: &Element) -> Result<()> {
        self.anchor_index(element).map(|_| ())
    }

    async fn script_click(&self, element: &Element) -> Result<()> {
        self.click(element)
    }

    async fn native_click(&self, element: &Element) -> Result<()> {
        self.click(element)
    }

    async fn move_and_click(&self, element: &Element) -> Result<()> {
        self.click(element)
    }

    async fn evaluate_script(&self, _script: &str) -> Result<serde_json::Value> {
        bail!("Offline documents cannot evaluate scripts")
    }

    async fn wait_until_present(&self, css: &str, _timeout: Duration) -> Result<bool> {
        let sel = selector(css)?;
        let doc = Html::parse_document(&self.source);
        let found = doc.select(&sel).next().is_some();
        Ok(found)
    }

    async fn snapshot_rows(&self) -> Result<Vec<Row>> {
        let state = self.lock()?;
        Ok(self
            .rows
            .iter()
            .zip(&state.hidden)
            .filter(|(_, hidden)| !**hidden)
            .map(|(row, _)| Row::new(row.cells.clone()))
            .collect())
    }

    async fn dismiss_consent(&self, label: &str) -> Result<bool> {
        if !self.buttons.iter().any(|b| b.contains(label)) {
            return Ok(false);
        }
        // the banner is gone once accepted
        let mut state = self.lock()?;
        let shown = !state.consent_dismissed;
        state.consent_dismissed = true;
        Ok(shown)
    }
}

// ── Tests ──
