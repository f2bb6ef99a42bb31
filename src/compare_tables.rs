
use clap::Parser;
use itertools::izip;

#[allow(dead_code)]
mod compare;
#[allow(dead_code)]
mod error;
#[allow(dead_code)]
mod math;
#[allow(dead_code)]
mod schemas;

use compare::{compare_counts, count_targets, read_decoded_targets};
use error::Result;

#[derive(Parser, Debug)]
#[command(name = "spotdecode-compare")]
#[command(author, version)]
#[command(about = "Compare per-target counts of two decoded spot tables written by spotdecode.")]
struct Args {
    spots_a: String,
    spots_b: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let counts_a = count_targets(read_decoded_targets(&args.spots_a)?);
    let counts_b = count_targets(read_decoded_targets(&args.spots_b)?);
    println!(
        "Read {} decoded spots from {} and {} from {}",
        counts_a.values().sum::<usize>(),
        args.spots_a,
        counts_b.values().sum::<usize>(),
        args.spots_b
    );

    let comparison = compare_counts(&counts_a, &counts_b)?;
    println!("{:>16} {:>10} {:>10}", "target", "a", "b");
    for (target, a, b) in izip!(
        &comparison.targets,
        &comparison.counts_a,
        &comparison.counts_b
    ) {
        println!("{:>16} {:>10} {:>10}", target, a, b);
    }
    println!(
        "Pearson correlation over {} shared targets: {}",
        comparison.targets.len(),
        comparison
    );

    Ok(())
}
