//! Common test utilities and fixtures
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tabrecon_core::dataset::Row;
use tabrecon_core::{with_fingerprint, DataType, Dataset, Value};
use tempfile::TempDir;

/// `(id, v)` dataset with the row fingerprint appended
pub fn id_value(rows: &[(i64, &str)]) -> Dataset {
    let rows: Vec<Row> = rows
        .iter()
        .map(|(id, v)| vec![Value::from(*id), Value::from(*v)])
        .collect();
    fingerprinted(&[("id", DataType::Integer), ("v", DataType::Text)], rows)
}

pub fn fingerprinted(columns: &[(&str, DataType)], rows: Vec<Row>) -> Dataset {
    let dataset = Dataset::from_rows(columns, rows).expect("valid test dataset");
    with_fingerprint(&dataset, None).expect("fingerprint")
}

pub fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Temporary directory holding input files for a test
pub struct TestWorkspace {
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().to_path_buf();
        Self { temp_dir, path }
    }

    /// Write `contents` to `name` inside the workspace
    pub fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(&path, contents).expect("Failed to write test file");
        path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn exists(&self, relative: &str) -> bool {
        Path::new(&self.path).join(relative).exists()
    }
}
