//! In-memory CSV table access for the transform stages.
//!
//! Tables in this pipeline are small enough to standardize in memory; the
//! byte-level streaming concerns live in the ingest layer.

use std::path::{Path, PathBuf};

use strataflow_shared::fsio::atomic_write_bytes;
use strataflow_shared::{Result, StrataflowError};

/// A fully materialized delimited table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// File stem of the backing CSV.
    pub name: String,
    pub columns: Vec<String>,
    /// Row-major cells; each row has `columns.len()` entries.
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// List the CSV files in a run's data directory, sorted by name.
pub fn list_tables(data_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(data_dir).map_err(|e| StrataflowError::io(data_dir, e))?;
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StrataflowError::io(data_dir, e))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Read a CSV file into a [`Table`].
pub fn read_table(path: &Path) -> Result<Table> {
    let label = path.display().to_string();
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    let mut reader =
        csv::Reader::from_path(path).map_err(|e| StrataflowError::csv(&label, e.to_string()))?;
    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| StrataflowError::csv(&label, e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| StrataflowError::csv(&label, e.to_string()))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(Table {
        name,
        columns,
        rows,
    })
}

/// Write a [`Table`] as CSV, atomically.
pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    let label = path.display().to_string();
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&table.columns)
        .map_err(|e| StrataflowError::csv(&label, e.to_string()))?;
    for row in &table.rows {
        writer
            .write_record(row)
            .map_err(|e| StrataflowError::csv(&label, e.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| StrataflowError::csv(&label, e.to_string()))?;
    atomic_write_bytes(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.csv");
        std::fs::write(&path, "a,b\n1,x\n2,y\n").unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.name, "orders");
        assert_eq!(table.columns, vec!["a", "b"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.column_index("b"), Some(1));

        let out = dir.path().join("out.csv");
        write_table(&out, &table).unwrap();
        assert_eq!(read_table(&out).unwrap().rows, table.rows);
    }

    #[test]
    fn list_tables_skips_non_csv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.csv"), "x\n1\n").unwrap();
        std::fs::write(dir.path().join("a.csv"), "x\n1\n").unwrap();
        std::fs::write(dir.path().join("metadata.json"), "{}").unwrap();

        let tables = list_tables(dir.path()).unwrap();
        let names: Vec<_> = tables
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }
}
