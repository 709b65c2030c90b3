use anyhow::{Context, Result};
use regex::Regex;

use crate::rows::Cell;
use crate::settings::Vocabulary;

/// Decides whether a row's first cell opens a new parent.
#[derive(Debug, Clone)]
pub enum ParentRule {
    /// Any link at all in the first cell.
    AnyLink,
    /// A navigable link (not the `#` placeholder) whose target matches the
    /// detail-page pattern.
    DetailLink(Regex),
}

impl ParentRule {
    pub fn matches(&self, cell: &Cell) -> bool {
        let Some(link) = &cell.link else {
            return false;
        };
        match self {
            ParentRule::AnyLink => true,
            ParentRule::DetailLink(pattern) => {
                let href = link.href.trim();
                !href.is_empty() && !link.is_placeholder() && pattern.is_match(href)
            }
        }
    }
}

/// One way a `(label, threshold)` pair can fail to be a leaf record.
#[derive(Debug, Clone)]
pub enum ChildRule {
    /// Threshold cell is a disclosure control or an ad slot.
    ControlLabel { labels: Vec<String>, ignore_case: bool },
    /// Threshold cell describes a range (`od 80 do 120`) rather than a value.
    RangeMarker(Vec<String>),
    /// Threshold cell must be a number once `separators` are removed.
    /// With `normalize`, every other character is dropped first.
    Numeric { separators: Vec<char>, normalize: bool },
    EmptyLabel,
    /// Label cell reads like an institution name, i.e. a missed parent row.
    InstitutionMarker(Vec<String>),
}

impl ChildRule {
    pub fn rejects(&self, label: &str, threshold: &str) -> bool {
        match self {
            ChildRule::ControlLabel { labels, ignore_case } => {
                if *ignore_case {
                    let lowered = threshold.to_lowercase();
                    labels.iter().any(|l| l.to_lowercase() == lowered)
                } else {
                    labels.iter().any(|l| l == threshold)
                }
            }
            ChildRule::RangeMarker(markers) => {
                let lowered = threshold.to_lowercase();
                markers.iter().any(|m| lowered.contains(m.as_str()))
            }
            ChildRule::Numeric { separators, normalize } => {
                !is_numeric(threshold, separators, *normalize)
            }
            ChildRule::EmptyLabel => label.is_empty(),
            ChildRule::InstitutionMarker(markers) => {
                let lowered = label.to_lowercase();
                markers.iter().any(|m| lowered.contains(m.as_str()))
            }
        }
    }
}

/// Markers are matched against lower-cased cell text.
fn lowered(markers: &[String]) -> Vec<String> {
    markers.iter().map(|m| m.to_lowercase()).collect()
}

fn is_numeric(text: &str, separators: &[char], normalize: bool) -> bool {
    let kept: String = if normalize {
        text.chars()
            .filter(|c| c.is_ascii_digit() || separators.contains(c))
            .collect()
    } else {
        text.to_string()
    };
    let digits: String = kept.chars().filter(|c| !separators.contains(c)).collect();
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

#[derive(Debug, Clone)]
pub struct NamedRule {
    pub name: &'static str,
    pub enabled: bool,
    pub rule: ChildRule,
}

impl NamedRule {
    fn on(name: &'static str, rule: ChildRule) -> Self {
        NamedRule { name, enabled: true, rule }
    }

    fn off(name: &'static str, rule: ChildRule) -> Self {
        NamedRule { name, enabled: false, rule }
    }
}

/// Predicates driving the row state machine.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub name: &'static str,
    pub parent: ParentRule,
    pub child: Vec<NamedRule>,
}

impl RuleSet {
    /// Authoritative predicates: detail-page parent links, tolerant numeric
    /// check, institution-name guard on the label.
    pub fn strict(vocab: &Vocabulary) -> Result<Self> {
        let pattern = Regex::new(&vocab.detail_link_pattern)
            .with_context(|| format!("Bad detail link pattern {:?}", vocab.detail_link_pattern))?;

        let mut controls = vocab.control_labels();
        controls.push(vocab.advertisement.clone());

        Ok(RuleSet {
            name: "strict",
            parent: ParentRule::DetailLink(pattern),
            child: vec![
                NamedRule::on(
                    "control-label",
                    ChildRule::ControlLabel { labels: controls, ignore_case: true },
                ),
                NamedRule::on("range-marker", ChildRule::RangeMarker(lowered(&vocab.range_markers))),
                NamedRule::on(
                    "numeric",
                    ChildRule::Numeric { separators: vec!['.', ',', '-'], normalize: true },
                ),
                NamedRule::on("empty-label", ChildRule::EmptyLabel),
                NamedRule::on(
                    "institution-marker",
                    ChildRule::InstitutionMarker(lowered(&vocab.institution_markers)),
                ),
            ],
        })
    }

    /// Broad predicates: any first-cell link is a parent and values must be
    /// bare numbers. Kept for diagnostics.
    pub fn lenient(vocab: &Vocabulary) -> Self {
        let range = lowered(vocab.range_markers.get(..1).unwrap_or_default());
        RuleSet {
            name: "lenient",
            parent: ParentRule::AnyLink,
            child: vec![
                NamedRule::on(
                    "control-label",
                    ChildRule::ControlLabel { labels: vocab.control_labels(), ignore_case: false },
                ),
                NamedRule::on("range-marker", ChildRule::RangeMarker(range)),
                NamedRule::on(
                    "numeric",
                    ChildRule::Numeric { separators: vec!['.', ','], normalize: false },
                ),
                NamedRule::off("empty-label", ChildRule::EmptyLabel),
                NamedRule::off(
                    "institution-marker",
                    ChildRule::InstitutionMarker(lowered(&vocab.institution_markers)),
                ),
            ],
        }
    }

    /// Toggle a child rule by name. Returns false when no rule has that name.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.child.iter_mut().find(|r| r.name == name) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Switch off every rule named in `names`; unknown names are returned.
    pub fn disable<'n>(&mut self, names: &'n [String]) -> Vec<&'n str> {
        names
            .iter()
            .map(String::as_str)
            .filter(|name| !self.set_enabled(name, false))
            .collect()
    }

    /// Name of the first enabled rule that rejects the pair, if any.
    pub fn rejection(&self, label: &str, threshold: &str) -> Option<&'static str> {
        self.child
            .iter()
            .filter(|r| r.enabled)
            .find(|r| r.rule.rejects(label, threshold))
            .map(|r| r.name)
    }
}

// ── Tests ──
