//! On-disk table schemas.
//!
//! Each logical table is a CSV file with a header row. Missing files read
//! as `None` so callers can fall back to defaults; anything present must
//! match its schema or loading fails.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use csv::StringRecord;

use crate::error::{Error, Result};
use crate::models::{Feature, FeatureValue, ValueKind};

pub const FEATURE_MAP: &str = "feature_map.csv";
pub const FEATURE_LABELS: &str = "features.csv";
pub const RANGES: &str = "ranges.csv";
pub const VALUE_KINDS: &str = "val_types.csv";
pub const SPECIES: &str = "classes.csv";
pub const APPLICABILITY: &str = "species_features.csv";
pub const VALUES: &str = "birds_data.csv";

const SPECIES_COLUMN: &str = "species";

pub fn enum_values_file(code: &str) -> String {
    format!("{}_values.csv", code)
}

/// Codes name files in the data directory and must not point outside it.
pub fn check_code(code: &str) -> Result<()> {
    if code.trim().is_empty() || code.contains(['/', '\\']) || code.contains("..") {
        return Err(Error::InvalidFeatureCode(code.to_string()));
    }
    Ok(())
}

/// A raw table as read from disk.
struct RawTable {
    file: String,
    headers: Vec<String>,
    rows: Vec<StringRecord>,
}

impl RawTable {
    fn column(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| Error::malformed(&self.file, 0, name, "missing column"))
    }

    fn text(&self, row: usize, column: usize) -> &str {
        self.rows[row].get(column).unwrap_or("").trim()
    }

    fn required_text(&self, row: usize, column: usize) -> Result<String> {
        let value = self.text(row, column);
        if value.is_empty() {
            return Err(Error::malformed(
                &self.file,
                row + 1,
                &self.headers[column],
                "empty value",
            ));
        }
        Ok(value.to_string())
    }

    fn integer(&self, row: usize, column: usize) -> Result<i64> {
        let raw = self.text(row, column);
        match FeatureValue::parse_cell(raw) {
            Some(FeatureValue::Number(n)) => Ok(n),
            _ => Err(Error::malformed(
                &self.file,
                row + 1,
                &self.headers[column],
                format!("expected an integer, got '{}'", raw),
            )),
        }
    }
}

fn read_raw(dir: &Path, file: &str) -> Result<Option<RawTable>> {
    let path = dir.join(file);
    if !path.exists() {
        return Ok(None);
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(&path)?;
    let headers = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();
    let rows = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
    if let Some((row, record)) = rows
        .iter()
        .enumerate()
        .find(|(_, r)| r.len() != headers.len())
    {
        return Err(Error::malformed(
            file,
            row + 1,
            "*",
            format!("expected {} fields, got {}", headers.len(), record.len()),
        ));
    }
    Ok(Some(RawTable {
        file: file.to_string(),
        headers,
        rows,
    }))
}

/// Read a single-column table.
fn read_column(dir: &Path, file: &str, column: &str) -> Result<Option<Vec<String>>> {
    let Some(table) = read_raw(dir, file)? else {
        return Ok(None);
    };
    let col = table.column(column)?;
    let values = (0..table.rows.len())
        .map(|row| table.required_text(row, col))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(values))
}

/// Write a whole table, replacing the file in one rename.
pub fn write_table<I>(dir: &Path, file: &str, headers: &[&str], rows: I) -> Result<()>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let path = dir.join(file);
    let tmp = temp_path(&path);
    {
        let mut writer = csv::Writer::from_path(&tmp)?;
        writer.write_record(headers)?;
        for row in rows {
            writer.write_record(&row)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, &path)?;
    tracing::debug!(file, "table written");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

pub fn remove_table(dir: &Path, file: &str) -> Result<()> {
    match fs::remove_file(dir.join(file)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ============================================================
// Feature registry
// ============================================================

pub fn read_feature_map(dir: &Path) -> Result<Option<Vec<Feature>>> {
    let Some(table) = read_raw(dir, FEATURE_MAP)? else {
        return Ok(None);
    };
    let label = table.column("label")?;
    let code = table.column("code")?;
    let features = (0..table.rows.len())
        .map(|row| {
            let code = table.required_text(row, code)?;
            check_code(&code)
                .map_err(|e| Error::malformed(FEATURE_MAP, row + 1, "code", e.to_string()))?;
            Ok(Feature {
                label: table.required_text(row, label)?,
                code,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(features))
}

pub fn write_feature_map(dir: &Path, features: &[Feature]) -> Result<()> {
    write_table(
        dir,
        FEATURE_MAP,
        &["label", "code"],
        features
            .iter()
            .map(|f| vec![f.label.clone(), f.code.clone()]),
    )
}

pub fn read_feature_labels(dir: &Path) -> Result<Option<Vec<String>>> {
    read_column(dir, FEATURE_LABELS, "feature")
}

pub fn write_feature_labels(dir: &Path, features: &[Feature]) -> Result<()> {
    write_table(
        dir,
        FEATURE_LABELS,
        &["feature"],
        features.iter().map(|f| vec![f.label.clone()]),
    )
}

// ============================================================
// Value settings
// ============================================================

pub fn read_ranges(dir: &Path) -> Result<Vec<(String, i64, i64)>> {
    let Some(table) = read_raw(dir, RANGES)? else {
        return Ok(Vec::new());
    };
    let code = table.column("code")?;
    let min = table.column("min")?;
    let max = table.column("max")?;
    (0..table.rows.len())
        .map(|row| {
            Ok((
                table.required_text(row, code)?,
                table.integer(row, min)?,
                table.integer(row, max)?,
            ))
        })
        .collect()
}

pub fn write_ranges(dir: &Path, ranges: &[(String, i64, i64)]) -> Result<()> {
    write_table(
        dir,
        RANGES,
        &["code", "min", "max"],
        ranges
            .iter()
            .map(|(code, min, max)| vec![code.clone(), min.to_string(), max.to_string()]),
    )
}

pub fn read_value_kinds(dir: &Path) -> Result<Vec<(String, ValueKind)>> {
    let Some(table) = read_raw(dir, VALUE_KINDS)? else {
        return Ok(Vec::new());
    };
    let code = table.column("code")?;
    let kind = table.column("type")?;
    (0..table.rows.len())
        .map(|row| {
            let raw = table.text(row, kind);
            let parsed = ValueKind::from_str(raw).ok_or_else(|| {
                Error::malformed(VALUE_KINDS, row + 1, "type", format!("unknown kind '{}'", raw))
            })?;
            Ok((table.required_text(row, code)?, parsed))
        })
        .collect()
}

pub fn write_value_kinds(dir: &Path, kinds: &[(String, ValueKind)]) -> Result<()> {
    write_table(
        dir,
        VALUE_KINDS,
        &["code", "type"],
        kinds
            .iter()
            .map(|(code, kind)| vec![code.clone(), kind.as_str().to_string()]),
    )
}

pub fn read_enum_values(dir: &Path, code: &str) -> Result<Option<Vec<String>>> {
    read_column(dir, &enum_values_file(code), "label")
}

pub fn write_enum_values(dir: &Path, code: &str, values: &[String]) -> Result<()> {
    write_table(
        dir,
        &enum_values_file(code),
        &["label"],
        values.iter().map(|v| vec![v.clone()]),
    )
}

// ============================================================
// Taxonomy
// ============================================================

pub fn read_species(dir: &Path) -> Result<Option<Vec<String>>> {
    read_column(dir, SPECIES, SPECIES_COLUMN)
}

pub fn write_species(dir: &Path, species: &[String]) -> Result<()> {
    write_table(
        dir,
        SPECIES,
        &[SPECIES_COLUMN],
        species.iter().map(|s| vec![s.clone()]),
    )
}

// ============================================================
// Wide tables keyed by species
// ============================================================

/// A typed cell in a wide table. `Ok(None)` is an empty cell.
pub trait Cell: Sized + Clone {
    fn parse(raw: &str) -> std::result::Result<Option<Self>, String>;
    fn render(&self) -> String;
}

impl Cell for bool {
    fn parse(raw: &str) -> std::result::Result<Option<Self>, String> {
        match raw.trim() {
            "" => Ok(None),
            "true" | "True" | "TRUE" | "1" => Ok(Some(true)),
            "false" | "False" | "FALSE" | "0" => Ok(Some(false)),
            other => Err(format!("expected a boolean, got '{}'", other)),
        }
    }

    fn render(&self) -> String {
        let text = if *self { "True" } else { "False" };
        text.to_string()
    }
}

/// Value cells are read as raw labels; the knowledge base types them per feature.
impl Cell for FeatureValue {
    fn parse(raw: &str) -> std::result::Result<Option<Self>, String> {
        let raw = raw.trim();
        Ok((!raw.is_empty()).then(|| FeatureValue::Label(raw.to_string())))
    }

    fn render(&self) -> String {
        self.to_string()
    }
}

/// One row of a wide table. Only non-empty cells are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WideRow<V> {
    pub species: String,
    pub cells: BTreeMap<String, V>,
}

/// A table with a `species` key column followed by one column per feature code.
///
/// Columns survive feature removal; only [`WideTable::drop_column`] removes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WideTable<V> {
    pub columns: Vec<String>,
    pub rows: Vec<WideRow<V>>,
}

impl<V> Default for WideTable<V> {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }
}

impl<V: Cell> WideTable<V> {
    pub fn with_columns(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn row(&self, species: &str) -> Option<&WideRow<V>> {
        self.rows.iter().find(|r| r.species == species)
    }

    /// Append any codes the table does not have yet, keeping their order.
    pub fn ensure_columns<'a>(&mut self, codes: impl IntoIterator<Item = &'a str>) {
        for code in codes {
            if !self.columns.iter().any(|c| c == code) {
                self.columns.push(code.to_string());
            }
        }
    }

    /// Insert a row for `species` or update the given cells of its existing row.
    pub fn upsert(&mut self, species: &str, cells: BTreeMap<String, Option<V>>) {
        self.ensure_columns(cells.keys().map(String::as_str));
        let index = match self.rows.iter().position(|r| r.species == species) {
            Some(i) => i,
            None => {
                self.rows.push(WideRow {
                    species: species.to_string(),
                    cells: BTreeMap::new(),
                });
                self.rows.len() - 1
            }
        };
        let row = &mut self.rows[index];
        for (code, value) in cells {
            match value {
                Some(v) => row.cells.insert(code, v),
                None => row.cells.remove(&code),
            };
        }
    }

    pub fn drop_column(&mut self, code: &str) -> bool {
        let before = self.columns.len();
        self.columns.retain(|c| c != code);
        for row in &mut self.rows {
            row.cells.remove(code);
        }
        self.columns.len() != before
    }

    pub fn drop_row(&mut self, species: &str) -> bool {
        let before = self.rows.len();
        self.rows.retain(|r| r.species != species);
        self.rows.len() != before
    }

    pub fn read(dir: &Path, file: &str) -> Result<Option<Self>> {
        let Some(table) = read_raw(dir, file)? else {
            return Ok(None);
        };
        let key = table.column(SPECIES_COLUMN)?;
        let columns = table
            .headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != key)
            .map(|(i, h)| (i, h.clone()))
            .collect::<Vec<_>>();

        let mut rows = Vec::with_capacity(table.rows.len());
        for row in 0..table.rows.len() {
            let species = table.required_text(row, key)?;
            let mut cells = BTreeMap::new();
            for (i, code) in &columns {
                let parsed = V::parse(table.text(row, *i))
                    .map_err(|reason| Error::malformed(file, row + 1, code, reason))?;
                if let Some(value) = parsed {
                    cells.insert(code.clone(), value);
                }
            }
            rows.push(WideRow { species, cells });
        }

        Ok(Some(Self {
            columns: columns.into_iter().map(|(_, c)| c).collect(),
            rows,
        }))
    }

    pub fn write(&self, dir: &Path, file: &str) -> Result<()> {
        let mut headers = vec![SPECIES_COLUMN];
        headers.extend(self.columns.iter().map(String::as_str));
        let rows = self.rows.iter().map(|row| {
            let mut record = Vec::with_capacity(self.columns.len() + 1);
            record.push(row.species.clone());
            for code in &self.columns {
                record.push(row.cells.get(code).map(V::render).unwrap_or_default());
            }
            record
        });
        write_table(dir, file, &headers, rows)
    }
}
