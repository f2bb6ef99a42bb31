
use clap::Parser;
use rayon::current_num_threads;

mod codebook;
mod compare;
mod error;
mod experiment;
mod filter;
mod imagestack;
mod label;
mod masks;
mod math;
mod output;
mod pipeline;
mod schemas;
mod spots;

use error::Result;
use experiment::{Experiment, PRIMARY_IMAGE};
use output::{write_decoded_spots, write_regions, write_target_counts};
use pipeline::{run_pipeline, run_reference_detection, PipelineConfig};
use schemas::OutputFormat;
use spots::measure::SpotMeasure;

#[derive(Parser, Debug)]
#[command(name = "spotdecode")]
#[command(author, version)]
#[command(about = "Find and decode barcoded spots in one field of view of a BaristaSeq experiment.")]
struct Args {
    // Path or URL of the experiment manifest (experiment.json)
    experiment: String,

    #[arg(long, default_value = None)]
    fov: Option<String>,

    #[arg(long, default_value_t = 100)]
    crop_y: usize,

    #[arg(long, default_value_t = 50)]
    crop_x: usize,

    #[arg(long, default_value_t = 5)]
    masking_radius: usize,

    #[arg(long, default_value_t = 99.5)]
    percentile: f32,

    #[arg(long, default_value_t = 0.5)]
    clip_threshold: f32,

    #[arg(long, default_value_t = 0.5)]
    min_sigma: f32,

    #[arg(long, default_value_t = 8.0)]
    max_sigma: f32,

    #[arg(long, default_value_t = 10)]
    num_sigma: usize,

    #[arg(long, default_value_t = 0.5)]
    detection_threshold: f32,

    #[arg(long, default_value_t = 7.0)]
    search_radius: f32,

    #[arg(long, default_value_t = 0)]
    anchor_round: usize,

    #[arg(long, default_value_t = 0.5)]
    distance_threshold: f32,

    #[arg(long, default_value_t = 0.1)]
    magnitude_threshold: f32,

    #[arg(long, default_value_t = 7)]
    min_area: usize,

    #[arg(long, default_value_t = 50)]
    max_area: usize,

    // Also find spots on this auxiliary image (e.g. nuclei or dots) and
    // measure them in every round and channel
    #[arg(long, default_value = None)]
    reference_image: Option<String>,

    #[arg(long, value_enum, default_value_t = SpotMeasure::Max)]
    reference_measure: SpotMeasure,

    #[arg(long, default_value = None)]
    output_reference_spots: Option<String>,

    // Print the codebook entry of these targets
    #[arg(long, num_args = 1)]
    inspect_target: Vec<String>,

    #[arg(long, default_value = None)]
    output_spots: Option<String>,

    #[arg(long, default_value = None)]
    output_pixel_spots: Option<String>,

    #[arg(long, default_value = None)]
    output_regions: Option<String>,

    #[arg(long, default_value = None)]
    output_counts: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Infer)]
    output_fmt: OutputFormat,

    #[arg(short = 't', long, default_value = None)]
    nthreads: Option<usize>,

    #[arg(short, long, default_value_t = false)]
    quiet: bool,
}

impl Args {
    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            crop_y: self.crop_y,
            crop_x: self.crop_x,
            masking_radius: self.masking_radius,
            percentile: self.percentile,
            clip_threshold: self.clip_threshold,
            min_sigma: self.min_sigma,
            max_sigma: self.max_sigma,
            num_sigma: self.num_sigma,
            detection_threshold: self.detection_threshold,
            search_radius: self.search_radius,
            anchor_round: self.anchor_round,
            distance_threshold: self.distance_threshold,
            magnitude_threshold: self.magnitude_threshold,
            min_area: self.min_area,
            max_area: self.max_area,
            reference_measure: self.reference_measure,
            quiet: self.quiet,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let config = args.config();

    if let Some(nthreads) = args.nthreads {
        // Fails only if the pool was already built.
        let _ = rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build_global();
    }
    println!("Using {} threads", current_num_threads());

    let experiment = Experiment::from_json(&args.experiment)?;
    println!(
        "Read experiment with {} fields of view and {} codebook targets",
        experiment.fovs().len(),
        experiment.codebook().len()
    );

    let fov = experiment.fov(args.fov.as_deref())?;
    let primary = fov.get_image(PRIMARY_IMAGE, &config.progress_bar("Loading tiles"))?;
    let shape = primary.shape();
    println!(
        "Loaded {} image of '{}': {} rounds, {} channels, {} z-planes, {} x {} pixels",
        PRIMARY_IMAGE,
        fov.name(),
        shape.nrounds,
        shape.nchannels,
        shape.nz,
        shape.ny,
        shape.nx
    );

    let codebook = experiment.codebook();
    let result = run_pipeline(&primary, codebook, &config)?;

    let spot_counts = result.spots.target_counts();
    let pixel_counts = result.pixel_spots.target_counts();
    println!("Local search decoded spots per target:");
    for (target, count) in &spot_counts {
        println!("  {}: {}", target, count);
    }
    println!("Pixel decoded spots per target:");
    for (target, count) in &pixel_counts {
        println!("  {}: {}", target, count);
    }

    write_decoded_spots(&args.output_spots, args.output_fmt, &result.spots)?;
    write_decoded_spots(&args.output_pixel_spots, args.output_fmt, &result.pixel_spots)?;
    write_regions(
        &args.output_regions,
        args.output_fmt,
        &result.decoding.regions,
        &result.decoder,
        codebook,
    )?;
    write_target_counts(&args.output_counts, args.output_fmt, &spot_counts, &pixel_counts)?;

    let comparison = result.comparison()?;
    println!(
        "Pearson correlation over {} shared targets: {}",
        comparison.targets.len(),
        comparison
    );

    for target in &args.inspect_target {
        match codebook.format_entry(target) {
            Some(entry) => println!("{}\n{}", target, entry),
            None => println!("{} is not in the codebook", target),
        }
    }

    println!("Label image shape: {:?}", result.label_image_shape());
    println!("{} pixel decoded regions as masks", result.masks.len());

    if let Some(name) = &args.reference_image {
        let reference = fov.get_image(name, &config.progress_bar("Loading reference tiles"))?;
        let reference_spots = run_reference_detection(&reference, &result.filtered, codebook, &config)?;
        println!("Spots found on {} decoded per target:", name);
        for (target, count) in &reference_spots.target_counts() {
            println!("  {}: {}", target, count);
        }
        write_decoded_spots(&args.output_reference_spots, args.output_fmt, &reference_spots)?;
    }

    Ok(())
}
