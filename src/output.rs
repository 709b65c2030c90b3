use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::rows::ExtractedTriple;

pub const HEADER: [&str; 3] = ["Institution", "Class", "Threshold"];

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Write one comma-separated row, quoting only where needed.
fn write_row<W: Write>(w: &mut W, row: &[&str]) -> io::Result<()> {
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            w.write_all(b",")?;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            w.write_all(cell.as_bytes())?;
        }
    }
    writeln!(w)
}

pub fn write_triples<W: Write>(mut w: W, triples: &[ExtractedTriple]) -> io::Result<()> {
    write_row(&mut w, &HEADER)?;
    for t in triples {
        write_row(
            &mut w,
            &[
                t.parent_name.as_str(),
                t.child_label.as_str(),
                t.threshold_text.as_str(),
            ],
        )?;
    }
    w.flush()
}

/// Create (or truncate) `path` and write the records in order.
pub fn write_csv(path: &Path, triples: &[ExtractedTriple]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    write_triples(BufWriter::new(file), triples)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), records = triples.len(), "CSV written");
    Ok(())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_decimal_commas_and_quotes() {
        let triples = vec![
            ExtractedTriple::new("I LO im. Nowodworskiego", "1A mat-fiz", "172,45"),
            ExtractedTriple::new("LO \"Sobieski\"", "1B", "158"),
        ];
        let mut buf = Vec::new();
        write_triples(&mut buf, &triples).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "Institution,Class,Threshold\n\
             I LO im. Nowodworskiego,1A mat-fiz,\"172,45\"\n\
             \"LO \"\"Sobieski\"\"\",1B,158\n"
        );
    }

    #[test]
    fn empty_run_still_has_header() {
        let mut buf = Vec::new();
        write_triples(&mut buf, &[]).unwrap();
        assert_eq!(buf, b"Institution,Class,Threshold\n");
    }

    #[test]
    fn writes_utf8_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progi.csv");
        let triples = vec![ExtractedTriple::new(
            "XIII Liceum Ogólnokształcące",
            "1F lingw",
            "140",
        )];
        write_csv(&path, &triples).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("XIII Liceum Ogólnokształcące,1F lingw,140\n"));
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.csv");
        let err = write_csv(&path, &[]).unwrap_err();
        assert!(err.to_string().contains("Failed to create"));
    }
}
