mod classify;
mod coordinator;
mod disclosure;
mod host;
mod output;
mod rows;
mod settings;

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use tracing::info;

use coordinator::Extraction;
use host::chrome::ChromeHost;
use host::static_doc::StaticDocument;
use host::SessionGuard;
use settings::{Settings, Timings};

const SAMPLES: usize = 5;

#[derive(Parser)]
#[command(
    name = "licea_scraper",
    about = "Admission thresholds of Kraków high schools, with every collapsed class row expanded"
)]
struct Cli {
    /// Page to scrape (default: the Kraków 2025/2026 listing)
    #[arg(long)]
    url: Option<String>,
    /// CSV file to write
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Replay a saved HTML page instead of launching a browser
    #[arg(long)]
    html: Option<PathBuf>,
    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Show the browser window
    #[arg(long)]
    headful: bool,
    /// Also run the lenient pass and log how it compares
    #[arg(long)]
    lenient_diagnostic: bool,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(url) = &self.url {
            settings.url = url.clone();
        }
        if let Some(out) = &self.out {
            settings.output = out.clone();
        }
        if self.headful {
            settings.browser.headless = false;
        }
        if self.lenient_diagnostic {
            settings.lenient_diagnostic = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = settings::load(cli.config.as_deref())?;
    cli.apply(&mut settings);

    let extraction = match &cli.html {
        Some(path) => run_offline(path, &mut settings).await?,
        None => run_live(&settings).await?,
    };

    output::write_csv(&settings.output, &extraction.triples)?;
    print_summary(&extraction, &settings);

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

async fn run_live(settings: &Settings) -> anyhow::Result<Extraction> {
    let host = SessionGuard::new(ChromeHost::launch(&settings.browser).await?);
    host.open(&settings.url).await?;
    disclosure::settle(settings.timings.navigation_settle).await;
    coordinator::extract(&*host, settings).await
}

async fn run_offline(path: &std::path::Path, settings: &mut Settings) -> anyhow::Result<Extraction> {
    info!(path = %path.display(), "Replaying saved page");
    let doc = StaticDocument::load(path)?;
    settings.timings = Timings::instant();
    coordinator::extract(&doc, settings).await
}

fn print_summary(extraction: &Extraction, settings: &Settings) {
    let triples = &extraction.triples;
    if let Some(strategy) = extraction.report.strategy_used {
        println!(
            "Expanded {}/{} rows via {}",
            extraction.report.succeeded, extraction.report.attempted, strategy
        );
    } else {
        println!("No reveal controls found; only visible rows were read");
    }
    let stats = &extraction.stats;
    println!(
        "Read {} rows: {} institutions, {} records, {} skipped",
        stats.rows_scanned, stats.parents, stats.children, stats.noise
    );
    println!(
        "Saved {} records to {}",
        triples.len(),
        settings.output.display()
    );
    for t in triples.iter().take(SAMPLES) {
        println!(
            "  {} | {} | {}",
            disclosure::preview(&t.parent_name, 50),
            t.child_label,
            t.threshold_text
        );
    }
    if triples.len() > SAMPLES {
        println!("  ... and {} more", triples.len() - SAMPLES);
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    match (secs / 3600, secs % 3600 / 60, secs % 60) {
        (0, 0, _) => format!("{:.1}s", d.as_secs_f64()),
        (0, m, s) => format!("{m}m {s:02}s"),
        (h, m, s) => format!("{h}h {m:02}m {s:02}s"),
    }
}

// ── Tests ──
