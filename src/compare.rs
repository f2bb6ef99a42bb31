use arrow::array::{Array, BooleanArray, RecordBatch, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use flate2::read::GzDecoder;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::error::{output_err, PipelineError, Result};
use crate::math::{pearson_pvalue, pearson_r};
use crate::schemas::{determine_format, OutputFormat};

// Per-target counts of two decoding methods over the targets both found,
// with their Pearson correlation.
#[derive(Clone, Debug)]
pub struct CountComparison {
    pub targets: Vec<String>,
    pub counts_a: Vec<usize>,
    pub counts_b: Vec<usize>,
    pub r: f64,
    pub p_value: f64,
}

impl fmt::Display for CountComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.r, self.p_value)
    }
}

pub fn count_targets<I, S>(targets: I) -> BTreeMap<String, usize>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut counts = BTreeMap::new();
    for target in targets {
        *counts.entry(target.as_ref().to_string()).or_insert(0) += 1;
    }
    counts
}

// Targets present in both count tables, in name order.
pub fn shared_targets(a: &BTreeMap<String, usize>, b: &BTreeMap<String, usize>) -> Vec<String> {
    a.keys().filter(|t| b.contains_key(*t)).cloned().collect()
}

pub fn compare_counts(
    a: &BTreeMap<String, usize>,
    b: &BTreeMap<String, usize>,
) -> Result<CountComparison> {
    let targets = shared_targets(a, b);
    if targets.is_empty() {
        return Err(PipelineError::Correlation(String::from(
            "no target was detected by both methods",
        )));
    }
    if targets.len() < 2 {
        return Err(PipelineError::Correlation(format!(
            "only one shared target ('{}')",
            targets[0]
        )));
    }

    let counts_a: Vec<usize> = targets.iter().map(|t| a[t]).collect();
    let counts_b: Vec<usize> = targets.iter().map(|t| b[t]).collect();
    let xs: Vec<f64> = counts_a.iter().map(|&c| c as f64).collect();
    let ys: Vec<f64> = counts_b.iter().map(|&c| c as f64).collect();

    let r = pearson_r(&xs, &ys).ok_or_else(|| {
        PipelineError::Correlation(format!(
            "counts are constant across the {} shared targets",
            targets.len()
        ))
    })?;
    let p_value = pearson_pvalue(r, targets.len());

    Ok(CountComparison {
        targets,
        counts_a,
        counts_b,
        r,
        p_value,
    })
}

// Targets of the features in a decoded spots table that pass thresholds.
// Uncalled features are skipped.
pub fn read_decoded_targets(filename: &str) -> Result<Vec<String>> {
    let fmt = determine_format(filename, OutputFormat::Infer)?;
    let file = File::open(filename).map_err(|source| PipelineError::Io {
        path: PathBuf::from(filename),
        source,
    })?;

    match fmt {
        OutputFormat::Csv => read_decoded_targets_csv(file, filename),
        OutputFormat::CsvGz => read_decoded_targets_csv(GzDecoder::new(file), filename),
        OutputFormat::Parquet => {
            let reader = ParquetRecordBatchReaderBuilder::try_new(file)
                .and_then(|builder| builder.build())
                .map_err(output_err(filename))?;
            let mut targets = Vec::new();
            for batch in reader {
                let batch = batch.map_err(output_err(filename))?;
                targets.extend(decoded_targets_from_batch(&batch, filename)?);
            }
            Ok(targets)
        }
        OutputFormat::Infer => unreachable!(),
    }
}

pub(crate) fn find_column_index(headers: &csv::StringRecord, column: &str, filename: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| PipelineError::Output {
            path: filename.to_string(),
            message: format!("column '{}' not found", column),
        })
}

fn read_decoded_targets_csv<R: Read>(input: R, filename: &str) -> Result<Vec<String>> {
    let mut rdr = csv::Reader::from_reader(input);
    let headers = rdr.headers().map_err(output_err(filename))?.clone();
    let target_col = find_column_index(&headers, "target", filename)?;
    let passes_col = find_column_index(&headers, "passes_thresholds", filename)?;

    let mut targets = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(output_err(filename))?;
        let target = &record[target_col];
        if !target.is_empty() && &record[passes_col] == "true" {
            targets.push(target.to_string());
        }
    }
    Ok(targets)
}

fn decoded_targets_from_batch(batch: &RecordBatch, filename: &str) -> Result<Vec<String>> {
    let missing = |column: &str| PipelineError::Output {
        path: filename.to_string(),
        message: format!("column '{}' not found", column),
    };
    let target = batch.column_by_name("target").ok_or_else(|| missing("target"))?;
    let target = cast(target, &DataType::Utf8).map_err(output_err(filename))?;
    let target = target
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| missing("target"))?;
    let passes = batch
        .column_by_name("passes_thresholds")
        .and_then(|col| col.as_any().downcast_ref::<BooleanArray>())
        .ok_or_else(|| missing("passes_thresholds"))?;

    Ok((0..batch.num_rows())
        .filter(|&i| !target.is_null(i) && passes.value(i))
        .map(|i| target.value(i).to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|&(t, n)| (t.to_string(), n)).collect()
    }

    #[test]
    fn test_count_targets() {
        let counts = count_targets(["ACTB", "SST", "ACTB"]);
        assert_eq!(counts["ACTB"], 2);
        assert_eq!(counts["SST"], 1);
    }

    #[test]
    fn test_identical_counts() {
        let a = counts(&[("ACTB", 10), ("GAPDH", 4), ("SST", 7)]);
        let comparison = compare_counts(&a, &a).unwrap();
        assert_eq!(comparison.r, 1.0);
        assert_eq!(comparison.p_value, 0.0);
    }

    #[test]
    fn test_restricted_to_shared_targets() {
        let a = counts(&[("ACTB", 10), ("GAPDH", 4), ("SST", 7), ("VIP", 100)]);
        let b = counts(&[("ACTB", 20), ("GAPDH", 8), ("SST", 15), ("NPY", 3)]);
        let comparison = compare_counts(&a, &b).unwrap();
        assert_eq!(comparison.targets, vec!["ACTB", "GAPDH", "SST"]);
        assert_eq!(comparison.counts_b, vec![20, 8, 15]);
        assert!(comparison.r > 0.99);
        assert!(comparison.p_value > 0.0 && comparison.p_value < 0.1);
    }

    #[test]
    fn test_empty_intersection() {
        let a = counts(&[("ACTB", 10)]);
        let b = counts(&[("SST", 3)]);
        assert!(matches!(
            compare_counts(&a, &b),
            Err(PipelineError::Correlation(_))
        ));
    }

    #[test]
    fn test_degenerate_series() {
        let a = counts(&[("ACTB", 10), ("SST", 3)]);
        let b = counts(&[("ACTB", 5), ("SST", 5)]);
        assert!(compare_counts(&a, &b).is_err());

        let single = counts(&[("ACTB", 5)]);
        assert!(compare_counts(&single, &a).is_err());
    }
}
