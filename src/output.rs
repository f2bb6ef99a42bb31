use arrow::array::{
    ArrayRef, BooleanArray, Float32Array, LargeStringArray, RecordBatch, StringArray,
    UInt32Array, UInt64Array,
};
use arrow::datatypes::Schema;
use flate2::write::GzEncoder;
use flate2::Compression;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression::ZSTD, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::codebook::Codebook;
use crate::error::{output_err, PipelineError, Result};
use crate::schemas::*;
use crate::spots::pixel::{PixelSpotDecoder, RegionProperties};
use crate::spots::DecodedIntensityTable;

pub fn write_table(filename: &str, fmt: OutputFormat, batch: &RecordBatch) -> Result<()> {
    let fmt = determine_format(filename, fmt)?;
    let file = File::create(filename).map_err(|source| PipelineError::Io {
        path: PathBuf::from(filename),
        source,
    })?;

    match fmt {
        OutputFormat::Csv => write_table_csv(file, batch).map_err(output_err(filename)),
        OutputFormat::CsvGz => {
            let mut encoder = GzEncoder::new(file, Compression::default());
            write_table_csv(&mut encoder, batch).map_err(output_err(filename))?;
            encoder.finish().map_err(output_err(filename))?;
            Ok(())
        }
        OutputFormat::Parquet => write_table_parquet(file, batch).map_err(output_err(filename)),
        OutputFormat::Infer => unreachable!(),
    }
}

fn write_table_csv<W: Write>(output: W, batch: &RecordBatch) -> arrow::error::Result<()> {
    let mut writer = arrow::csv::WriterBuilder::new()
        .with_header(true)
        .build(output);
    writer.write(batch)
}

fn write_table_parquet<W: Write + Send>(
    output: W,
    batch: &RecordBatch,
) -> parquet::errors::Result<()> {
    let props = WriterProperties::builder()
        .set_compression(ZSTD(ZstdLevel::try_new(3)?))
        .build();
    let mut writer = ArrowWriter::try_new(output, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

fn string_array<I, S>(fmt: OutputFormat, values: I) -> ArrayRef
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    match fmt {
        OutputFormat::Parquet => Arc::new(values.into_iter().collect::<LargeStringArray>()),
        _ => Arc::new(values.into_iter().collect::<StringArray>()),
    }
}

fn batch(filename: &str, schema: Schema, columns: Vec<ArrayRef>) -> Result<RecordBatch> {
    RecordBatch::try_new(Arc::new(schema), columns).map_err(output_err(filename))
}

pub fn write_decoded_spots(
    filename: &Option<String>,
    fmt: OutputFormat,
    decoded: &DecodedIntensityTable,
) -> Result<()> {
    let Some(filename) = filename else {
        return Ok(());
    };
    let fmt = determine_format(filename, fmt)?;
    let table = &decoded.table;
    let spots = &table.spots;

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new((0..spots.len() as u64).collect::<UInt64Array>()),
        Arc::new(spots.iter().map(|s| s.z).collect::<Float32Array>()),
        Arc::new(spots.iter().map(|s| s.y).collect::<Float32Array>()),
        Arc::new(spots.iter().map(|s| s.x).collect::<Float32Array>()),
        Arc::new(spots.iter().map(|s| s.zc).collect::<Float32Array>()),
        Arc::new(spots.iter().map(|s| s.yc).collect::<Float32Array>()),
        Arc::new(spots.iter().map(|s| s.xc).collect::<Float32Array>()),
        Arc::new(spots.iter().map(|s| s.radius).collect::<Float32Array>()),
        string_array(fmt, decoded.targets.iter().map(|t| t.as_deref())),
        Arc::new(decoded.distances.iter().cloned().collect::<Float32Array>()),
        Arc::new(BooleanArray::from(decoded.passes_thresholds.clone())),
    ];
    for r in 0..table.nrounds() {
        for c in 0..table.nchannels() {
            columns.push(Arc::new(
                table
                    .intensities
                    .outer_iter()
                    .map(|f| f[[r, c]])
                    .collect::<Float32Array>(),
            ));
        }
    }

    let schema = decoded_spots_schema(fmt, table.nrounds(), table.nchannels());
    write_table(filename, fmt, &batch(filename, schema, columns)?)
}

pub fn write_regions(
    filename: &Option<String>,
    fmt: OutputFormat,
    regions: &[RegionProperties],
    decoder: &PixelSpotDecoder,
    codebook: &Codebook,
) -> Result<()> {
    let Some(filename) = filename else {
        return Ok(());
    };
    let fmt = determine_format(filename, fmt)?;

    let columns: Vec<ArrayRef> = vec![
        Arc::new(regions.iter().map(|r| r.label).collect::<UInt32Array>()),
        string_array(
            fmt,
            regions.iter().map(|r| Some(codebook.target_name(r.target))),
        ),
        Arc::new(regions.iter().map(|r| r.area as u64).collect::<UInt64Array>()),
        Arc::new(regions.iter().map(|r| r.centroid[0]).collect::<Float32Array>()),
        Arc::new(regions.iter().map(|r| r.centroid[1]).collect::<Float32Array>()),
        Arc::new(regions.iter().map(|r| r.centroid[2]).collect::<Float32Array>()),
        Arc::new(regions.iter().map(|r| r.mean_distance).collect::<Float32Array>()),
        Arc::new(BooleanArray::from(
            regions
                .iter()
                .map(|r| decoder.passes_area(r))
                .collect::<Vec<bool>>(),
        )),
    ];

    write_table(filename, fmt, &batch(filename, regions_schema(fmt), columns)?)
}

pub fn write_target_counts(
    filename: &Option<String>,
    fmt: OutputFormat,
    local_search: &BTreeMap<String, usize>,
    pixel: &BTreeMap<String, usize>,
) -> Result<()> {
    let Some(filename) = filename else {
        return Ok(());
    };
    let fmt = determine_format(filename, fmt)?;

    let targets: BTreeSet<&String> = local_search.keys().chain(pixel.keys()).collect();
    let count = |counts: &BTreeMap<String, usize>, t: &String| counts.get(t).copied().unwrap_or(0) as u64;
    let columns: Vec<ArrayRef> = vec![
        string_array(fmt, targets.iter().map(|t| Some(t.as_str()))),
        Arc::new(targets.iter().map(|t| count(local_search, *t)).collect::<UInt64Array>()),
        Arc::new(targets.iter().map(|t| count(pixel, *t)).collect::<UInt64Array>()),
    ];

    write_table(filename, fmt, &batch(filename, target_counts_schema(fmt), columns)?)
}
