use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::classify::rules::RuleSet;
use crate::classify::{classify, classify_with_stats, ClassifyStats};
use crate::disclosure::{reveal_all, settle, RevealReport};
use crate::host::DocumentHost;
use crate::rows::ExtractedTriple;
use crate::settings::{Settings, Timings};

/// Selector the page is ready by.
pub const TABLE_SELECTOR: &str = "table";

/// Lenient output above this multiple of the strict output is worth a look.
const LENIENT_GAP: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct Extraction {
    pub report: RevealReport,
    pub stats: ClassifyStats,
    pub triples: Vec<ExtractedTriple>,
}

/// Reveal every hidden row, then classify the rendered table.
///
/// Only a failing host (row snapshot) is an error; a missing table, a
/// missing consent banner or unrevealed rows just reduce the output.
pub async fn extract<H>(host: &H, settings: &Settings) -> Result<Extraction>
where
    H: DocumentHost + ?Sized,
{
    let mut strict = RuleSet::strict(&settings.vocabulary)?;
    for unknown in strict.disable(&settings.disabled_rules) {
        warn!(rule = unknown, "No such rule to disable");
    }
    let timings = &settings.timings;

    info!("Waiting for the table");
    match host
        .wait_until_present(TABLE_SELECTOR, Timings::ms(timings.table_wait))
        .await
    {
        Ok(true) => info!("Table loaded"),
        Ok(false) => warn!(timeout_ms = timings.table_wait, "Table did not appear, continuing"),
        Err(e) => warn!(error = %e, "Readiness check failed, continuing"),
    }
    settle(timings.initial_settle).await;

    match host.dismiss_consent(&settings.vocabulary.consent).await {
        Ok(true) => {
            info!("Consent banner accepted");
            settle(timings.consent_settle).await;
        }
        Ok(false) => info!("No consent banner"),
        Err(e) => warn!(error = %e, "Could not dismiss consent banner"),
    }

    let report = reveal_all(host, settings).await;

    let rows = host
        .snapshot_rows()
        .await
        .context("Failed to read table rows")?;
    let strict_pass = classify_with_stats(&rows, &strict);
    info!(
        rows = strict_pass.stats.rows_scanned,
        parents = strict_pass.stats.parents,
        records = strict_pass.stats.children,
        "Classified rows"
    );

    if settings.lenient_diagnostic {
        compare_lenient(&rows, settings, &strict_pass.stats);
    }

    Ok(Extraction {
        report,
        stats: strict_pass.stats,
        triples: strict_pass.triples,
    })
}

fn compare_lenient(rows: &[crate::rows::Row], settings: &Settings, strict: &ClassifyStats) {
    let lenient = classify(rows, &RuleSet::lenient(&settings.vocabulary)).len();
    info!(strict = strict.children, lenient, "Lenient pass for comparison");
    if lenient as f64 > strict.children as f64 * LENIENT_GAP {
        warn!(
            strict = strict.children,
            lenient,
            "Strict pass kept far fewer records than the lenient one"
        );
    }
}

// ── Tests ──
