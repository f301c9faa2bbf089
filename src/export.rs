//! Export of the visible records to TSV or CSV

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use catscope_logs::FilteredView;
use catscope_types::{COLUMNS, LogRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Tsv,
    Csv,
}

impl ExportFormat {
    /// `.csv` (any case) selects CSV, everything else TSV
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::Tsv,
        }
    }

    fn separator(self) -> &'static str {
        match self {
            Self::Tsv => "\t",
            Self::Csv => ",",
        }
    }
}

/// `logcat_YYYYMMDD_HHMMSS.tsv` in the current directory
pub fn default_filename() -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(format!("logcat_{}.tsv", timestamp))
}

/// Write header plus records, returning the number of records written
pub fn write_records<'a, W, I>(out: &mut W, format: ExportFormat, records: I) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a LogRecord>,
{
    write_row(out, format, COLUMNS)?;
    let mut count = 0;
    for record in records {
        write_row(out, format, record.columns())?;
        count += 1;
    }
    Ok(count)
}

fn write_row<W: Write>(out: &mut W, format: ExportFormat, fields: [&str; 6]) -> Result<()> {
    let row: Vec<Cow<'_, str>> = fields
        .iter()
        .map(|f| match format {
            ExportFormat::Tsv => Cow::Borrowed(*f),
            ExportFormat::Csv => csv_field(f),
        })
        .collect();
    writeln!(out, "{}", row.join(format.separator()))?;
    Ok(())
}

/// Quote a field containing a separator, quote or line break
fn csv_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Export the visible records of `view` to `path`
pub fn export_view(path: &Path, view: &FilteredView<'_>) -> Result<usize> {
    let file = File::create(path)
        .with_context(|| format!("failed to create export file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let format = ExportFormat::from_path(path);

    let count = write_records(&mut out, format, view.iter().map(|r| &**r))?;
    out.flush()
        .with_context(|| format!("failed to write export file {}", path.display()))?;
    Ok(count)
}
