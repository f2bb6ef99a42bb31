use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

use crate::codebook::Codebook;
use crate::compare::{compare_counts, CountComparison};
use crate::error::{PipelineError, Result};
use crate::filter::unmix::baristaseq_bleed_matrix;
use crate::filter::{ClipValueToZero, Filter, LinearUnmixing, ScaleByPercentile, WhiteTophat};
use crate::imagestack::{Axes, ImageStack};
use crate::masks::{AxisTicks, BinaryMaskCollection};
use crate::spots::local_search::decode_per_round_max;
use crate::spots::measure::{detect_spots, SpotMeasure};
use crate::spots::pixel::ConnectedComponentDecodingResult;
use crate::spots::{BlobDetector, DecodedIntensityTable, LocalSearchBlobDetector, PixelSpotDecoder};

// Every tunable constant of the pipeline.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub crop_y: usize,
    pub crop_x: usize,
    pub masking_radius: usize,
    pub percentile: f32,
    pub clip_threshold: f32,
    pub min_sigma: f32,
    pub max_sigma: f32,
    pub num_sigma: usize,
    pub detection_threshold: f32,
    pub search_radius: f32,
    pub anchor_round: usize,
    pub distance_threshold: f32,
    pub magnitude_threshold: f32,
    pub min_area: usize,
    pub max_area: usize,
    pub reference_measure: SpotMeasure,
    pub quiet: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            crop_y: 100,
            crop_x: 50,
            masking_radius: 5,
            percentile: 99.5,
            clip_threshold: 0.5,
            min_sigma: 0.5,
            max_sigma: 8.0,
            num_sigma: 10,
            detection_threshold: 0.5,
            search_radius: 7.0,
            anchor_round: 0,
            distance_threshold: 0.5,
            magnitude_threshold: 0.1,
            min_area: 7,
            max_area: 50,
            reference_measure: SpotMeasure::Max,
            quiet: false,
        }
    }
}

impl PipelineConfig {
    pub fn progress_bar(&self, message: &str) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        pb.set_message(message.to_string());
        pb
    }

    pub fn blob_detector(&self) -> Result<BlobDetector> {
        BlobDetector::new(
            [self.min_sigma; 3],
            [self.max_sigma; 3],
            self.num_sigma,
            self.detection_threshold,
        )
    }

    pub fn pixel_decoder(&self) -> Result<PixelSpotDecoder> {
        PixelSpotDecoder::new(
            self.distance_threshold,
            self.magnitude_threshold,
            self.min_area,
            self.max_area,
        )
    }
}

pub struct PipelineResult {
    pub filtered: ImageStack,
    pub spots: DecodedIntensityTable,
    pub pixel_spots: DecodedIntensityTable,
    pub decoding: ConnectedComponentDecodingResult,
    pub decoder: PixelSpotDecoder,
    pub masks: BinaryMaskCollection,
}

impl PipelineResult {
    pub fn comparison(&self) -> Result<CountComparison> {
        compare_counts(&self.spots.target_counts(), &self.pixel_spots.target_counts())
    }

    // Label image shape, without the z axis when there is a single plane.
    pub fn label_image_shape(&self) -> Vec<usize> {
        let (nz, ny, nx) = self.decoding.label_image.dim();
        if nz == 1 {
            vec![ny, nx]
        } else {
            vec![nz, ny, nx]
        }
    }
}

fn run_filter<F: Filter>(filter: &F, stack: &ImageStack) -> Result<ImageStack> {
    let t0 = Instant::now();
    let filtered = filter.run(stack)?;
    println!("Applied {} ({:.1}s)", filter.name(), t0.elapsed().as_secs_f64());
    Ok(filtered)
}

// Project, crop, filter, then find and decode spots with both methods.
pub fn run_pipeline(
    primary: &ImageStack,
    codebook: &Codebook,
    config: &PipelineConfig,
) -> Result<PipelineResult> {
    let projected = primary.max_proj(&[Axes::Zplane]);
    let cropped = projected.crop(config.crop_y, config.crop_x)?;
    let shape = cropped.shape();
    println!(
        "Cropped to {} x {} (y x x) over {} rounds and {} channels",
        shape.ny, shape.nx, shape.nrounds, shape.nchannels
    );

    let unmixed = run_filter(&LinearUnmixing::new(baristaseq_bleed_matrix())?, &cropped)?;
    let background_removed = run_filter(&WhiteTophat::new(config.masking_radius)?, &unmixed)?;
    let scaled = run_filter(&ScaleByPercentile::new(config.percentile, true)?, &background_removed)?;
    let filtered = run_filter(&ClipValueToZero::new(config.clip_threshold), &scaled)?;

    let local_search = LocalSearchBlobDetector::new(
        config.blob_detector()?,
        config.search_radius,
        config.anchor_round,
    )?;
    let intensities = local_search.run(&filtered, &config.progress_bar("Finding spots"))?;
    println!("Found {} spots present in every round", intensities.len());
    let spots = decode_per_round_max(intensities, codebook)?;
    println!("Decoded {} spots", spots.num_decoded());

    let decoder = config.pixel_decoder()?;
    let (pixel_spots, decoding) = decoder.run(&filtered, codebook)?;
    println!(
        "Pixel decoding found {} regions, {} within area bounds",
        decoding.regions.len(),
        pixel_spots.len()
    );

    let physical = AxisTicks {
        z: Some(filtered.physical_ticks(Axes::Zplane)),
        y: Some(filtered.physical_ticks(Axes::Y)),
        x: Some(filtered.physical_ticks(Axes::X)),
    };
    let masks = BinaryMaskCollection::from_label_array_and_ticks(
        decoding.label_image.view(),
        AxisTicks::default(),
        physical,
    )?;

    Ok(PipelineResult {
        filtered,
        spots,
        pixel_spots,
        decoding,
        decoder,
        masks,
    })
}

// Find spots once on an auxiliary image (e.g. nuclei or dots), projected
// and cropped the way the primary image is, then measure them in every
// (round, channel) of the filtered stack and decode by per-round max.
pub fn run_reference_detection(
    reference: &ImageStack,
    filtered: &ImageStack,
    codebook: &Codebook,
    config: &PipelineConfig,
) -> Result<DecodedIntensityTable> {
    let reference = reference
        .max_proj(&[Axes::Zplane])
        .crop(config.crop_y, config.crop_x)?;
    let (rs, fs) = (reference.shape(), filtered.shape());
    if (rs.ny, rs.nx) != (fs.ny, fs.nx) {
        return Err(PipelineError::Shape(format!(
            "reference image is {} x {} after cropping but the primary image is {} x {}",
            rs.ny, rs.nx, fs.ny, fs.nx
        )));
    }

    let t0 = Instant::now();
    let blobs = config.blob_detector()?;
    let measure = config.reference_measure;
    let intensities = detect_spots(
        filtered,
        &blobs,
        Some(&reference),
        |values| measure.apply(values),
        false,
    );
    println!(
        "Found {} spots on the reference image ({:.1}s)",
        intensities.len(),
        t0.elapsed().as_secs_f64()
    );
    decode_per_round_max(intensities, codebook)
}
