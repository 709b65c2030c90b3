use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::host::{DocumentHost, Element, TextQuery, TABLE_ANCHORS, TABLE_ANCHORS_CSS};
use crate::rows::PLACEHOLDER_HREF;
use crate::settings::{Settings, Timings};

const PROGRESS_EVERY: usize = 10;

/// One way of locating reveal controls, loosest last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    ExactText,
    PlaceholderAnchor,
    TableScan,
    TableScanIgnoreCase,
    TableSelector,
    BulkScript,
}

impl Strategy {
    pub const CASCADE: [Strategy; 6] = [
        Strategy::ExactText,
        Strategy::PlaceholderAnchor,
        Strategy::TableScan,
        Strategy::TableScanIgnoreCase,
        Strategy::TableSelector,
        Strategy::BulkScript,
    ];

    /// 1-based position in the cascade.
    pub fn ordinal(self) -> usize {
        Strategy::CASCADE
            .iter()
            .position(|s| *s == self)
            .map_or(0, |i| i + 1)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::ExactText => "exact-text",
            Strategy::PlaceholderAnchor => "placeholder-anchor",
            Strategy::TableScan => "table-scan",
            Strategy::TableScanIgnoreCase => "table-scan-ignore-case",
            Strategy::TableSelector => "table-selector",
            Strategy::BulkScript => "bulk-script",
        };
        write!(f, "{}#{}", self.ordinal(), name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevealReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub strategy_used: Option<Strategy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Script,
    Native,
    MoveAndClick,
}

enum Discovery {
    /// Controls still to be clicked, in document order.
    Found(Vec<Element>),
    /// The page script already clicked `clicked` controls.
    Triggered { clicked: usize },
}

impl Discovery {
    fn len(&self) -> usize {
        match self {
            Discovery::Found(found) => found.len(),
            Discovery::Triggered { clicked } => *clicked,
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Clicks every element whose text contains `__LABEL__` and returns the count.
const BULK_TRIGGER_JS: &str = r#"
(() => {
    const needle = __LABEL__.toLowerCase();
    let count = 0;
    for (const link of document.querySelectorAll('a')) {
        if ((link.textContent || '').toLowerCase().includes(needle)) {
            link.click();
            count++;
        }
    }
    return count;
})()
"#;

/// Make every hidden child row present, clicking each reveal control once.
///
/// Never fails: discovery misses and click failures are logged and the
/// report says how far it got.
pub async fn reveal_all<H>(host: &H, settings: &Settings) -> RevealReport
where
    H: DocumentHost + ?Sized,
{
    let label = settings.vocabulary.reveal.as_str();
    let timings = &settings.timings;

    let Some((strategy, discovery)) = run_cascade(host, label, timings).await else {
        log_diagnostics(host, settings).await;
        settle(timings.final_settle).await;
        return RevealReport::default();
    };

    let report = match discovery {
        Discovery::Triggered { clicked } => RevealReport {
            attempted: clicked,
            succeeded: clicked,
            strategy_used: Some(strategy),
        },
        Discovery::Found(controls) => {
            info!(count = controls.len(), "Expanding institutions");
            let succeeded = trigger_each(host, &controls, timings).await;
            RevealReport {
                attempted: controls.len(),
                succeeded,
                strategy_used: Some(strategy),
            }
        }
    };

    settle(timings.final_settle).await;
    info!(
        strategy = %strategy,
        attempted = report.attempted,
        succeeded = report.succeeded,
        "Reveal finished"
    );
    report
}

async fn run_cascade<H>(host: &H, label: &str, timings: &Timings) -> Option<(Strategy, Discovery)>
where
    H: DocumentHost + ?Sized,
{
    for strategy in Strategy::CASCADE {
        match discover(strategy, host, label, timings).await {
            Ok(found) if !found.is_empty() => {
                info!(strategy = %strategy, found = found.len(), "Reveal controls found");
                return Some((strategy, found));
            }
            Ok(_) => debug!(strategy = %strategy, "No reveal controls"),
            Err(e) => warn!(strategy = %strategy, error = %e, "Discovery failed"),
        }
    }
    None
}

async fn discover<H>(
    strategy: Strategy,
    host: &H,
    label: &str,
    timings: &Timings,
) -> Result<Discovery>
where
    H: DocumentHost + ?Sized,
{
    let lowered = label.to_lowercase();
    let found = match strategy {
        Strategy::ExactText => host.find_by_text(&TextQuery::exact(label)).await?,
        Strategy::PlaceholderAnchor => {
            let query = TextQuery::contains(label).with_href(PLACEHOLDER_HREF);
            host.find_by_text(&query).await?
        }
        Strategy::TableScan => {
            let mut links = host.find_by_path(TABLE_ANCHORS).await?;
            links.retain(|l| l.text.contains(label));
            links
        }
        Strategy::TableScanIgnoreCase => {
            let mut links = host.find_by_path(TABLE_ANCHORS).await?;
            links.retain(|l| l.text.to_lowercase().contains(&lowered));
            links
        }
        Strategy::TableSelector => {
            let mut links = host.find_by_path(TABLE_ANCHORS_CSS).await?;
            links.retain(|l| l.text.to_lowercase().contains(&lowered));
            links
        }
        Strategy::BulkScript => return bulk_trigger(host, label, timings).await,
    };
    Ok(Discovery::Found(found))
}

async fn bulk_trigger<H>(host: &H, label: &str, timings: &Timings) -> Result<Discovery>
where
    H: DocumentHost + ?Sized,
{
    let literal = serde_json::Value::from(label).to_string();
    let value = host
        .evaluate_script(&BULK_TRIGGER_JS.replace("__LABEL__", &literal))
        .await
        .context("Bulk trigger script failed")?;
    let clicked = value.as_u64().unwrap_or(0) as usize;
    if clicked == 0 {
        return Ok(Discovery::Found(Vec::new()));
    }

    info!(clicked, "Reveal controls clicked by page script");
    settle(timings.bulk_settle).await;

    // Handles from the script are not usable here; look the controls up
    // again for the record only, they were already clicked.
    match host.find_by_text(&TextQuery::contains(label)).await {
        Ok(again) => debug!(rediscovered = again.len(), "Re-resolved bulk-triggered controls"),
        Err(e) => debug!(error = %e, "Could not re-resolve bulk-triggered controls"),
    }
    Ok(Discovery::Triggered { clicked })
}

async fn trigger_each<H>(host: &H, controls: &[Element], timings: &Timings) -> usize
where
    H: DocumentHost + ?Sized,
{
    let total = controls.len();
    let pb = progress_bar(total);
    let mut succeeded = 0;

    for (i, control) in controls.iter().enumerate() {
        match trigger_one(host, control, timings).await {
            Ok(how) => {
                succeeded += 1;
                debug!(n = i + 1, handle = control.handle.0, method = ?how, "Triggered");
            }
            Err(e) => warn!(n = i + 1, error = %e, "Failed to trigger reveal control"),
        }
        settle(timings.trigger_settle).await;
        pb.inc(1);

        if (i + 1) % PROGRESS_EVERY == 0 {
            info!("Expanded {}/{} institutions", i + 1, total);
        }
    }

    pb.finish_and_clear();
    succeeded
}

/// Script click, then native click, then pointer move + click.
async fn trigger_one<H>(host: &H, control: &Element, timings: &Timings) -> Result<Trigger>
where
    H: DocumentHost + ?Sized,
{
    host.scroll_into_view(control)
        .await
        .context("Scroll into view failed")?;
    settle(timings.pre_click).await;

    match host.script_click(control).await {
        Ok(()) => return Ok(Trigger::Script),
        Err(e) => debug!(handle = control.handle.0, error = %e, "Script click failed"),
    }
    match host.native_click(control).await {
        Ok(()) => return Ok(Trigger::Native),
        Err(e) => debug!(handle = control.handle.0, error = %e, "Native click failed"),
    }
    host.move_and_click(control)
        .await
        .context("Every click method failed")?;
    Ok(Trigger::MoveAndClick)
}

async fn log_diagnostics<H>(host: &H, settings: &Settings)
where
    H: DocumentHost + ?Sized,
{
    warn!(label = %settings.vocabulary.reveal, "No reveal controls found");

    match host.find_by_path(TABLE_ANCHORS).await {
        Ok(links) => {
            info!(count = links.len(), "Links inside the table");
            for (i, link) in links.iter().take(settings.diagnostic_links).enumerate() {
                info!(n = i + 1, text = %link.text, href = ?link.href, "Table link");
            }
        }
        Err(e) => warn!(error = %e, "Could not list table links"),
    }

    match host.snapshot_rows().await {
        Ok(rows) => {
            info!(count = rows.len(), "Rows in the table");
            for (i, row) in rows.iter().take(settings.diagnostic_rows).enumerate() {
                if let Some(first) = row.cells.first() {
                    info!(
                        n = i + 1,
                        cells = row.cells.len(),
                        first = %preview(&first.text, 50),
                        "Table row"
                    );
                }
            }
        }
        Err(e) => warn!(error = %e, "Could not inspect table rows"),
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} reveal")
            .map(|s| s.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

/// At most `max` characters, with `...` when cut.
pub(crate) fn preview(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}

pub(crate) async fn settle(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

// ── Tests ──
