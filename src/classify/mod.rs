pub mod rules;

use tracing::trace;

use crate::rows::{ExtractedTriple, ParentRecord, Row};
use rules::RuleSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Parent(ParentRecord),
    Child(ExtractedTriple),
    Noise(&'static str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifyStats {
    pub rows_scanned: usize,
    pub parents: usize,
    pub children: usize,
    pub noise: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub triples: Vec<ExtractedTriple>,
    pub stats: ClassifyStats,
}

/// Turn a revealed row sequence into leaf records.
pub fn classify(rows: &[Row], rules: &RuleSet) -> Vec<ExtractedTriple> {
    classify_with_stats(rows, rules).triples
}

/// Single pass over `rows`; the current parent lives only for this call.
pub fn classify_with_stats(rows: &[Row], rules: &RuleSet) -> Classification {
    let mut current: Option<ParentRecord> = None;
    let mut out = Classification::default();

    for (rank, row) in rows.iter().enumerate() {
        out.stats.rows_scanned += 1;
        match classify_row(row, rank, current.as_ref(), rules) {
            Verdict::Parent(parent) => {
                out.stats.parents += 1;
                current = Some(parent);
            }
            Verdict::Child(triple) => {
                out.stats.children += 1;
                out.triples.push(triple);
            }
            Verdict::Noise(reason) => {
                out.stats.noise += 1;
                trace!(row = rank, reason, pass = rules.name, "noise");
            }
        }
    }

    out
}

/// Decide a single row against the parent seen so far.
pub fn classify_row(
    row: &Row,
    rank: usize,
    current: Option<&ParentRecord>,
    rules: &RuleSet,
) -> Verdict {
    let [first, second, ..] = row.cells.as_slice() else {
        return Verdict::Noise("too-few-cells");
    };

    if rules.parent.matches(first) {
        return Verdict::Parent(ParentRecord {
            name: first.text.clone(),
            rank,
        });
    }

    let Some(parent) = current else {
        return Verdict::Noise("no-parent");
    };

    match rules.rejection(&first.text, &second.text) {
        Some(rule) => Verdict::Noise(rule),
        None => Verdict::Child(ExtractedTriple::new(&parent.name, &first.text, &second.text)),
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::Cell;
    use crate::settings::Vocabulary;

    fn strict() -> RuleSet {
        RuleSet::strict(&Vocabulary::default()).unwrap()
    }

    fn school(name: &str, id: u32) -> Row {
        Row::new(vec![
            Cell::linked(name, &format!("/progi-punktowe/liceum/{id}/Krakow")),
            Cell::text("od 120 do 170"),
        ])
    }

    fn reveal() -> Row {
        Row::new(vec![Cell::text(""), Cell::linked("rozwiń", "#")])
    }

    fn advert() -> Row {
        Row::plain(&["", "Advertisement"])
    }

    /// 3 schools × 2 classes, no noise.
    fn leaf_fixture() -> Vec<Row> {
        vec![
            school("I LO im. Nowodworskiego", 1),
            Row::plain(&["1A mat-fiz", "165,5"]),
            Row::plain(&["1B biol-chem", "158"]),
            school("V LO im. Witkowskiego", 5),
            Row::plain(&["1A", "172.25"]),
            Row::plain(&["1C human", "149"]),
            school("XIII LO", 13),
            Row::plain(&["1D", "120"]),
            Row::plain(&["1E sport", "98,75"]),
        ]
    }

    fn assert_grouped(triples: &[ExtractedTriple]) {
        let expected = vec![
            ExtractedTriple::new("I LO im. Nowodworskiego", "1A mat-fiz", "165,5"),
            ExtractedTriple::new("I LO im. Nowodworskiego", "1B biol-chem", "158"),
            ExtractedTriple::new("V LO im. Witkowskiego", "1A", "172.25"),
            ExtractedTriple::new("V LO im. Witkowskiego", "1C human", "149"),
            ExtractedTriple::new("XIII LO", "1D", "120"),
            ExtractedTriple::new("XIII LO", "1E sport", "98,75"),
        ];
        assert_eq!(triples, expected.as_slice());
    }

    /// Every triple's parent is the closest parent row above its child row.
    fn assert_ordering(rows: &[Row], triples: &[ExtractedTriple], rules: &RuleSet) {
        let mut next = 0;
        let mut last_parent: Option<&str> = None;
        for row in rows {
            if row.cells.len() >= 2 && rules.parent.matches(&row.cells[0]) {
                last_parent = Some(&row.cells[0].text);
                continue;
            }
            if let Some(t) = triples.get(next) {
                if row.cells.len() >= 2 && row.cells[0].text == t.child_label {
                    assert_eq!(Some(t.parent_name.as_str()), last_parent);
                    next += 1;
                }
            }
        }
        assert_eq!(next, triples.len());
    }

    #[test]
    fn no_parent_rows_no_output() {
        let rows = vec![
            Row::plain(&["1A", "150"]),
            Row::plain(&["1B", "140"]),
            reveal(),
            Row::plain(&["XYZ Liceum", "od 60"]),
        ];
        assert!(classify(&rows, &strict()).is_empty());
        assert!(classify(&[], &strict()).is_empty());
    }

    #[test]
    fn rows_before_first_parent_are_discarded() {
        let mut rows = vec![Row::plain(&["1Z", "111"])];
        rows.extend(leaf_fixture());
        let triples = classify(&rows, &strict());
        assert_eq!(triples.len(), 6);
        assert!(triples.iter().all(|t| t.child_label != "1Z"));
    }

    #[test]
    fn range_row_rejected_value_row_kept() {
        let rows = vec![
            school("II LO", 2),
            Row::plain(&["IA", "od 80 do 120"]),
            Row::plain(&["IA", "95"]),
        ];
        assert_eq!(classify(&rows, &strict()), vec![ExtractedTriple::new("II LO", "IA", "95")]);
    }

    #[test]
    fn unlinked_institution_row_is_not_a_child() {
        let rows = vec![school("II LO", 2), Row::plain(&["XYZ Liceum", "od 60"])];
        assert!(classify(&rows, &strict()).is_empty());

        // Even with a bare number the institution guard holds.
        let rows = vec![school("II LO", 2), Row::plain(&["XYZ Liceum", "60"])];
        assert!(classify(&rows, &strict()).is_empty());
    }

    #[test]
    fn raw_threshold_is_kept() {
        let rows = vec![school("II LO", 2), Row::plain(&["1A", "142.50 pkt"])];
        let triples = classify(&rows, &strict());
        assert_eq!(triples[0].threshold_text, "142.50 pkt");
    }

    #[test]
    fn short_rows_are_noise() {
        let rows = vec![school("II LO", 2), Row::plain(&["1A"]), Row::default()];
        let c = classify_with_stats(&rows, &strict());
        assert!(c.triples.is_empty());
        assert_eq!(c.stats, ClassifyStats { rows_scanned: 3, parents: 1, children: 0, noise: 2 });
    }

    #[test]
    fn end_to_end_with_noise_anywhere() {
        let rules = strict();
        let base = leaf_fixture();
        let noise = [reveal(), reveal(), reveal(), advert()];

        // slide the noise block through every insertion point
        for at in 0..=base.len() {
            let mut rows = base.clone();
            for (k, n) in noise.iter().enumerate() {
                let pos = (at + k * 3).min(rows.len());
                rows.insert(pos, n.clone());
            }
            let triples = classify(&rows, &rules);
            assert_grouped(&triples);
            assert_ordering(&rows, &triples, &rules);
        }
    }

    #[test]
    fn classification_is_idempotent() {
        let rules = strict();
        let mut rows = leaf_fixture();
        rows.insert(2, reveal());
        rows.insert(0, advert());
        let first = classify(&rows, &rules);
        let second = classify(&rows, &rules);
        assert_eq!(first, second);
        assert_eq!(classify_with_stats(&rows, &rules).stats.rows_scanned, rows.len());
    }

    #[test]
    fn parent_is_replaced_on_each_parent_row() {
        let rules = strict();
        let rows = leaf_fixture();
        let parent = match classify_row(&rows[0], 0, None, &rules) {
            Verdict::Parent(parent) => parent,
            other => panic!("expected parent, got {other:?}"),
        };
        assert_eq!(parent.rank, 0);
        let next = classify_row(&rows[3], 3, Some(&parent), &rules);
        assert!(matches!(next, Verdict::Parent(ParentRecord { rank: 3, .. })));
    }

    #[test]
    fn lenient_pass_shares_the_state_machine() {
        let vocab = Vocabulary::default();
        let lenient = RuleSet::lenient(&vocab);
        let rows = vec![
            school("II LO", 2),
            Row::plain(&["1A", "150"]),
            // placeholder link opens a bogus parent under lenient rules
            Row::new(vec![Cell::linked("rozwiń", "#"), Cell::text("zwiń")]),
            Row::plain(&["1B", "140"]),
        ];
        assert_eq!(
            classify(&rows, &lenient),
            vec![
                ExtractedTriple::new("II LO", "1A", "150"),
                ExtractedTriple::new("rozwiń", "1B", "140"),
            ]
        );
        assert_eq!(
            classify(&rows, &strict()),
            vec![
                ExtractedTriple::new("II LO", "1A", "150"),
                ExtractedTriple::new("II LO", "1B", "140"),
            ]
        );
    }
}
