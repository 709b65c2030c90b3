use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::Config;
use serde::Deserialize;

pub const BASE_URL: &str = "https://www.otouczelnie.pl/progi-punktowe/licea/miasto/298/Krakow/2025-2026";
pub const DEFAULT_OUTPUT: &str = "progi_licea_krakow_2025_2026.csv";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub url: String,
    pub output: PathBuf,
    pub vocabulary: Vocabulary,
    pub timings: Timings,
    pub browser: BrowserSettings,
    /// Also run the lenient classification pass and log how it compares.
    pub lenient_diagnostic: bool,
    /// Strict child rules to switch off, by name (`range-marker`, ...).
    pub disabled_rules: Vec<String>,
    pub diagnostic_links: usize,
    pub diagnostic_rows: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            url: BASE_URL.to_string(),
            output: PathBuf::from(DEFAULT_OUTPUT),
            vocabulary: Vocabulary::default(),
            timings: Timings::default(),
            browser: BrowserSettings::default(),
            lenient_diagnostic: false,
            disabled_rules: Vec::new(),
            diagnostic_links: 10,
            diagnostic_rows: 5,
        }
    }
}

/// Language-specific labels and markers the page is recognised by.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    pub reveal: String,
    pub collapse: String,
    pub more: String,
    pub advertisement: String,
    pub consent: String,
    pub range_markers: Vec<String>,
    pub institution_markers: Vec<String>,
    /// Regex a parent link target must match.
    pub detail_link_pattern: String,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Vocabulary {
            reveal: "rozwiń".into(),
            collapse: "zwiń".into(),
            more: "więcej".into(),
            advertisement: "advertisement".into(),
            consent: "Akceptuję".into(),
            range_markers: vec!["od".into(), "do".into()],
            institution_markers: ["lo ", " liceum", " licea", "sportowe", "im.", "im "]
                .into_iter()
                .map(String::from)
                .collect(),
            detail_link_pattern: "/progi-punktowe".into(),
        }
    }
}

impl Vocabulary {
    /// Labels of the in-table disclosure controls.
    pub fn control_labels(&self) -> Vec<String> {
        vec![self.reveal.clone(), self.collapse.clone(), self.more.clone()]
    }
}

/// Wait and settle delays, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub navigation_settle: u64,
    pub table_wait: u64,
    pub initial_settle: u64,
    pub consent_settle: u64,
    pub pre_click: u64,
    pub trigger_settle: u64,
    pub bulk_settle: u64,
    pub final_settle: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            navigation_settle: 3000,
            table_wait: 15_000,
            initial_settle: 2000,
            consent_settle: 1000,
            pre_click: 300,
            trigger_settle: 400,
            bulk_settle: 2000,
            final_settle: 2000,
        }
    }
}

impl Timings {
    /// No delays at all; for documents that settle synchronously.
    pub fn instant() -> Self {
        Timings {
            navigation_settle: 0,
            table_wait: 0,
            initial_settle: 0,
            consent_settle: 0,
            pre_click: 0,
            trigger_settle: 0,
            bulk_settle: 0,
            final_settle: 0,
        }
    }

    pub fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub idle_timeout_secs: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        BrowserSettings {
            headless: true,
            window_width: 1366,
            window_height: 900,
            idle_timeout_secs: 300,
        }
    }
}

/// Defaults, then the optional TOML file, then `LICEA_*` environment
/// variables (`__` separates nested keys, e.g. `LICEA_TIMINGS__PRE_CLICK`).
pub fn load(file: Option<&Path>) -> Result<Settings> {
    let mut builder = Config::builder();
    if let Some(path) = file {
        builder = builder.add_source(config::File::from(path).required(true));
    }
    builder
        .add_source(
            config::Environment::with_prefix("LICEA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("disabled_rules"),
        )
        .build()
        .context("Failed to read settings")?
        .try_deserialize::<Settings>()
        .context("Invalid settings")
}

// ── Tests ──
