
// Table schemas shared by output.rs and the spotdecode-compare binary.

use arrow::datatypes::{DataType, Field, Schema};
use clap::ValueEnum;

use crate::error::{PipelineError, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    Infer,
    Csv,
    CsvGz,
    Parquet,
}

pub fn determine_format(filename: &str, fmt: OutputFormat) -> Result<OutputFormat> {
    if fmt != OutputFormat::Infer {
        return Ok(fmt);
    }

    if filename.ends_with(".csv.gz") {
        Ok(OutputFormat::CsvGz)
    } else if filename.ends_with(".csv") {
        Ok(OutputFormat::Csv)
    } else if filename.ends_with(".parquet") {
        Ok(OutputFormat::Parquet)
    } else {
        Err(PipelineError::Output {
            path: filename.to_string(),
            message: String::from("unknown file format, use .csv, .csv.gz or .parquet"),
        })
    }
}

pub fn large_utf8_if_parquet(fmt: OutputFormat) -> DataType {
    match fmt {
        OutputFormat::Parquet => DataType::LargeUtf8,
        _ => DataType::Utf8,
    }
}

// Name of the intensity column for one (round, channel).
pub fn intensity_column(round: usize, channel: usize) -> String {
    format!("r{}_c{}", round, channel)
}

pub fn decoded_spots_schema(fmt: OutputFormat, nrounds: usize, nchannels: usize) -> Schema {
    let mut fields = vec![
        Field::new("feature_id", DataType::UInt64, false),
        Field::new("z", DataType::Float32, false),
        Field::new("y", DataType::Float32, false),
        Field::new("x", DataType::Float32, false),
        Field::new("zc", DataType::Float32, false),
        Field::new("yc", DataType::Float32, false),
        Field::new("xc", DataType::Float32, false),
        Field::new("radius", DataType::Float32, false),
        Field::new("target", large_utf8_if_parquet(fmt), true),
        Field::new("distance", DataType::Float32, false),
        Field::new("passes_thresholds", DataType::Boolean, false),
    ];
    for r in 0..nrounds {
        for c in 0..nchannels {
            fields.push(Field::new(intensity_column(r, c), DataType::Float32, false));
        }
    }
    Schema::new(fields)
}

pub fn regions_schema(fmt: OutputFormat) -> Schema {
    Schema::new(vec![
        Field::new("label", DataType::UInt32, false),
        Field::new("target", large_utf8_if_parquet(fmt), false),
        Field::new("area", DataType::UInt64, false),
        Field::new("z", DataType::Float32, false),
        Field::new("y", DataType::Float32, false),
        Field::new("x", DataType::Float32, false),
        Field::new("mean_distance", DataType::Float32, false),
        Field::new("passes_area", DataType::Boolean, false),
    ])
}

pub fn target_counts_schema(fmt: OutputFormat) -> Schema {
    Schema::new(vec![
        Field::new("target", large_utf8_if_parquet(fmt), false),
        Field::new("local_search_count", DataType::UInt64, false),
        Field::new("pixel_count", DataType::UInt64, false),
    ])
}
