//! Per-iteration loss values and their tabular record.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MtlError, Result};

/// A fixed-arity row of scalar losses.
pub trait LossRow {
    /// CSV column names, in row order.
    const COLUMNS: &'static [&'static str];

    fn values(&self) -> Vec<f64>;
}

/// Losses returned by one FR training step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrLosses {
    pub id: f64,
    pub da: f64,
    pub age: f64,
}

impl FrLosses {
    /// Sum used for the best-loss watermark.
    pub fn total(&self) -> f64 {
        self.id + self.da + self.age
    }
}

impl LossRow for FrLosses {
    const COLUMNS: &'static [&'static str] = &["id", "da", "age"];

    fn values(&self) -> Vec<f64> {
        vec![self.id, self.da, self.age]
    }
}

/// Losses and logits returned by one FAS training step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FasLosses {
    pub d1_logit: f64,
    pub d3_logit: f64,
    pub d_loss: f64,
    pub g_logit: f64,
    pub fas_id_loss: f64,
    pub fas_age_loss: f64,
}

impl LossRow for FasLosses {
    const COLUMNS: &'static [&'static str] = &[
        "d1_logit",
        "d3_logit",
        "d_loss",
        "g_logit",
        "fas_id_loss",
        "fas_age_loss",
    ];

    fn values(&self) -> Vec<f64> {
        vec![
            self.d1_logit,
            self.d3_logit,
            self.d_loss,
            self.g_logit,
            self.fas_id_loss,
            self.fas_age_loss,
        ]
    }
}

/// Column-oriented, append-only record of per-iteration losses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossRecord {
    columns: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl LossRecord {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            values: vec![Vec::new(); columns.len()],
        }
    }

    /// Empty record with the columns of `R`.
    pub fn for_row<R: LossRow>() -> Self {
        Self::new(R::COLUMNS)
    }

    pub fn push<R: LossRow>(&mut self, row: &R) -> Result<()> {
        self.push_values(&row.values())
    }

    pub fn push_values(&mut self, row: &[f64]) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(MtlError::LossRecord(format!(
                "row has {} values, record has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (column, value) in self.values.iter_mut().zip(row) {
            column.push(*value);
        }
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.values[i].as_slice())
    }

    /// Number of rows (iterations) recorded.
    pub fn len(&self) -> usize {
        self.values.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the record as CSV: a header row, one row per iteration, no
    /// index column. Any existing file is overwritten.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.columns)?;
        for i in 0..self.len() {
            writer.write_record(self.values.iter().map(|col| float_cell(col[i])))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Whole numbers keep their decimal point (`1.0`, not `1`) so the file reads
/// the same as loss logs written by float-typed dataframes.
fn float_cell(value: f64) -> String {
    format!("{value:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_fr_total() {
        let l = FrLosses {
            id: 1.0,
            da: 0.25,
            age: 0.5,
        };
        assert_eq!(l.total(), 1.75);
    }

    #[test]
    fn test_record_columns_and_len() {
        let mut rec = LossRecord::for_row::<FrLosses>();
        assert!(rec.is_empty());
        rec.push(&FrLosses {
            id: 1.0,
            da: 2.0,
            age: 3.0,
        })
        .unwrap();
        rec.push(&FrLosses {
            id: 4.0,
            da: 5.0,
            age: 6.0,
        })
        .unwrap();
        assert_eq!(rec.len(), 2);
        assert_eq!(rec.columns(), &["id", "da", "age"]);
        assert_eq!(rec.column("da"), Some(&[2.0, 5.0][..]));
        assert_eq!(rec.column("nope"), None);
    }

    #[test]
    fn test_push_rejects_wrong_arity() {
        let mut rec = LossRecord::for_row::<FasLosses>();
        assert!(rec.push_values(&[1.0, 2.0, 3.0]).is_err());
        assert!(rec.is_empty());
    }

    #[test]
    fn test_write_csv_overwrites_without_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("loss.csv");
        std::fs::write(&path, "stale,content\n1,2\n3,4\n5,6\n").unwrap();

        let mut rec = LossRecord::for_row::<FrLosses>();
        rec.push(&FrLosses {
            id: 0.5,
            da: 0.25,
            age: 1.0,
        })
        .unwrap();
        rec.write_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "id,da,age\n0.5,0.25,1.0\n");
    }

    #[test]
    fn test_empty_record_writes_header_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("loss.csv");
        LossRecord::for_row::<FasLosses>().write_csv(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "d1_logit,d3_logit,d_loss,g_logit,fas_id_loss,fas_age_loss\n"
        );
    }

    #[test]
    fn test_float_cells_keep_decimal_point() {
        assert_eq!(float_cell(2.0), "2.0");
        assert_eq!(float_cell(0.002), "0.002");
        assert_eq!(float_cell(-3.5), "-3.5");
        assert_eq!(float_cell(0.0), "0.0");
    }
}
