//! CICIoV2024-style CAN tables: header row, numeric feature columns
//! (decimal or `0x` hex) and a textual class label.

use crate::config::DataConfig;
use crate::error::{DetectorError, Result};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficClass {
    Benign,
    /// Attack family as named in the label column
    Attack(String),
}

impl TrafficClass {
    /// Ground-truth encoding: benign = 0, attack = 1
    pub fn label(&self) -> u8 {
        match self {
            TrafficClass::Benign => 0,
            TrafficClass::Attack(_) => 1,
        }
    }

    pub fn is_attack(&self) -> bool {
        matches!(self, TrafficClass::Attack(_))
    }
}

/// Raw (unscaled) feature rows with their classes
#[derive(Debug, Clone)]
pub struct CanDataset {
    feature_names: Vec<String>,
    rows: Array2<f32>,
    classes: Vec<TrafficClass>,
}

/// Splits on every comma. Quoted cells are unwrapped, but a quoted cell that
/// itself contains a comma is rejected rather than split.
fn split_record(line: &str, line_no: usize) -> Result<Vec<&str>> {
    line.split(',')
        .map(|c| {
            let c = c.trim();
            let opened = c.starts_with('"');
            let closed = c.len() >= 2 && c.ends_with('"');
            if opened != closed || (!opened && c.contains('"')) {
                return Err(DetectorError::Dataset(format!(
                    "line {}: quoted fields containing commas are not supported",
                    line_no
                )));
            }
            Ok(c.trim_matches('"'))
        })
        .collect()
}

fn parse_value(cell: &str) -> Option<f32> {
    if let Some(hex) = cell.strip_prefix("0x").or_else(|| cell.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok().map(|v| v as f32);
    }
    cell.parse::<f32>().ok().filter(|v| v.is_finite())
}

impl CanDataset {
    pub fn load_csv(path: &Path, config: &DataConfig) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), config)
    }

    pub fn from_reader<R: BufRead>(reader: R, config: &DataConfig) -> Result<Self> {
        let mut lines = reader.lines();
        let header = match lines.next() {
            Some(line) => line?,
            None => return Err(DetectorError::Dataset("empty input: no header row".into())),
        };
        let columns = split_record(header.trim_start_matches('\u{feff}'), 1)?;
        let position = |name: &str| {
            columns
                .iter()
                .position(|c| *c == name)
                .ok_or_else(|| DetectorError::Dataset(format!("missing column '{}'", name)))
        };
        let feature_idx = config
            .feature_columns
            .iter()
            .map(|c| position(c.as_str()))
            .collect::<Result<Vec<_>>>()?;
        let label_idx = position(config.label_column.as_str())?;

        let mut values = Vec::new();
        let mut classes = Vec::new();
        for (n, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // header is line 1
            let line_no = n + 2;
            let cells = split_record(&line, line_no)?;
            if cells.len() < columns.len() {
                return Err(DetectorError::Dataset(format!(
                    "line {}: expected {} columns, found {}",
                    line_no,
                    columns.len(),
                    cells.len()
                )));
            }
            for &i in &feature_idx {
                let v = parse_value(cells[i]).ok_or_else(|| {
                    DetectorError::Dataset(format!(
                        "line {}: column '{}' is not numeric: '{}'",
                        line_no, columns[i], cells[i]
                    ))
                })?;
                values.push(v);
            }
            let label = cells[label_idx];
            classes.push(if label == config.benign_label {
                TrafficClass::Benign
            } else {
                TrafficClass::Attack(label.to_string())
            });
        }

        let rows = Array2::from_shape_vec((classes.len(), feature_idx.len()), values)
            .map_err(|e| DetectorError::Dataset(e.to_string()))?;
        Ok(Self {
            feature_names: config.feature_columns.clone(),
            rows,
            classes,
        })
    }

    pub fn from_parts(feature_names: Vec<String>, rows: Array2<f32>, classes: Vec<TrafficClass>) -> Result<Self> {
        if rows.nrows() != classes.len() || rows.ncols() != feature_names.len() {
            return Err(DetectorError::shape(
                format!("{} rows x {} features", classes.len(), feature_names.len()),
                format!("{} rows x {} features", rows.nrows(), rows.ncols()),
            ));
        }
        Ok(Self {
            feature_names,
            rows,
            classes,
        })
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn rows(&self) -> &Array2<f32> {
        &self.rows
    }

    pub fn classes(&self) -> &[TrafficClass] {
        &self.classes
    }

    /// (benign rows, attack rows), order preserved
    pub fn partition(&self) -> (Array2<f32>, Array2<f32>) {
        let (benign, attack): (Vec<usize>, Vec<usize>) =
            (0..self.len()).partition(|&i| !self.classes[i].is_attack());
        (
            self.rows.select(ndarray::Axis(0), &benign),
            self.rows.select(ndarray::Axis(0), &attack),
        )
    }

    pub fn benign_rows(&self) -> Array2<f32> {
        self.partition().0
    }

    /// Row count per attack family
    pub fn attack_breakdown(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for class in &self.classes {
            if let TrafficClass::Attack(name) = class {
                *counts.entry(name.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// One label per non-overlapping window of `seq_len` rows: attack if any
    /// row in the window is. A trailing partial window is dropped.
    pub fn window_labels(&self, seq_len: usize) -> Vec<u8> {
        if seq_len == 0 {
            return Vec::new();
        }
        self.classes
            .chunks_exact(seq_len)
            .map(|w| w.iter().map(TrafficClass::label).max().unwrap_or(0))
            .collect()
    }
}

/// Shuffled (train, validation) indices over `0..n`. The validation side gets
/// `ceil(n * fraction)` items and both sides keep at least one.
pub fn train_validation_split(n: usize, fraction: f32, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if n < 2 {
        return Err(DetectorError::Dataset(format!(
            "need at least 2 samples to split, got {}",
            n
        )));
    }
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(DetectorError::Config(format!(
            "validation fraction must be in (0, 1), got {}",
            fraction
        )));
    }
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(&mut StdRng::seed_from_u64(seed));
    let n_val = ((n as f32 * fraction).ceil() as usize).clamp(1, n - 1);
    let validation = idx.split_off(n - n_val);
    Ok((idx, validation))
}
