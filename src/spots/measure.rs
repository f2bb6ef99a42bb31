use clap::ValueEnum;
use ndarray::{s, ArrayView3};
use rayon::prelude::*;

use super::blob::{Blob, BlobDetector};
use super::intensity_table::IntensityTable;
use super::Spot;
use crate::imagestack::{Axes, ImageStack};

// Reduction applied to the box around each spot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum SpotMeasure {
    Max,
    Mean,
}

impl SpotMeasure {
    pub fn apply(&self, values: ArrayView3<f32>) -> f32 {
        match self {
            SpotMeasure::Max => measure_max(values),
            SpotMeasure::Mean => measure_mean(values),
        }
    }
}

pub fn measure_max(values: ArrayView3<f32>) -> f32 {
    values.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
}

pub fn measure_mean(values: ArrayView3<f32>) -> f32 {
    values.mean().unwrap_or(0.0)
}

// Half-open box [c - (r - 1), c + r) along one axis, clipped to [0, n).
fn spot_range(center: f32, radius: usize, n: usize) -> (usize, usize) {
    let c = center.round() as isize;
    let r = radius as isize;
    let lo = (c - (r - 1)).clamp(0, n as isize) as usize;
    let hi = (c + r).clamp(0, n as isize) as usize;
    (lo, hi)
}

// Integer box radius for a spot. Radii below one would give an empty box,
// so they are raised to one (the center pixel).
fn box_radius(radius: f32, radius_is_gyration: bool) -> usize {
    let r = if radius_is_gyration {
        radius.ceil() as usize + 1
    } else {
        radius as usize
    };
    r.max(1)
}

// Measure every spot in a single (z, y, x) volume by reducing the box
// around it with `measure`. Empty boxes measure as 0.
pub fn measure_spot_intensity<F>(
    volume: ArrayView3<f32>,
    spots: &[Spot],
    measure: F,
    radius_is_gyration: bool,
) -> Vec<f32>
where
    F: Fn(ArrayView3<f32>) -> f32,
{
    let (nz, ny, nx) = volume.dim();
    spots
        .iter()
        .map(|spot| {
            let r = box_radius(spot.radius, radius_is_gyration);
            let (z0, z1) = spot_range(spot.z, r, nz);
            let (y0, y1) = spot_range(spot.y, r, ny);
            let (x0, x1) = spot_range(spot.x, r, nx);
            if z0 >= z1 || y0 >= y1 || x0 >= x1 {
                return 0.0;
            }
            measure(volume.slice(s![z0..z1, y0..y1, x0..x1]))
        })
        .collect()
}

// Measure the given spots in every (round, channel) of the stack.
pub fn measure_spot_intensities<F>(
    stack: &ImageStack,
    spots: Vec<Spot>,
    measure: F,
    radius_is_gyration: bool,
) -> IntensityTable
where
    F: Fn(ArrayView3<f32>) -> f32 + Sync,
{
    let (nrounds, nchannels) = (stack.nrounds(), stack.nchannels());
    let mut table = IntensityTable::zeros(spots, nrounds, nchannels);
    if table.is_empty() {
        return table;
    }

    let measured: Vec<Vec<f32>> = (0..nrounds * nchannels)
        .into_par_iter()
        .map(|i| {
            measure_spot_intensity(
                stack.volume(i / nchannels, i % nchannels),
                &table.spots,
                &measure,
                radius_is_gyration,
            )
        })
        .collect();

    for (i, values) in measured.iter().enumerate() {
        let (r, c) = (i / nchannels, i % nchannels);
        for (f, &v) in values.iter().enumerate() {
            table.intensities[[f, r, c]] = v;
        }
    }
    table
}

// Merge blobs found independently in each (round, channel) into one table.
// Each blob becomes its own feature with only its own cell set.
pub fn concatenate_spot_attributes_to_intensities(
    found: &[(Vec<Blob>, usize, usize)],
    nrounds: usize,
    nchannels: usize,
) -> IntensityTable {
    let spots = found
        .iter()
        .flat_map(|(blobs, _, _)| blobs.iter().map(|b| b.spot()))
        .collect();
    let mut table = IntensityTable::zeros(spots, nrounds, nchannels);

    let cells = found
        .iter()
        .flat_map(|(blobs, r, c)| blobs.iter().map(move |b| (*r, *c, b.intensity)));
    for (f, (r, c, intensity)) in cells.enumerate() {
        table.intensities[[f, r, c]] = intensity;
    }
    table
}

// Find spots and build an intensity table. With a reference image, spots
// are found once on its max projection over rounds and channels and then
// measured everywhere; otherwise each (round, channel) is searched on its
// own.
pub fn detect_spots<F>(
    stack: &ImageStack,
    detector: &BlobDetector,
    reference: Option<&ImageStack>,
    measure: F,
    radius_is_gyration: bool,
) -> IntensityTable
where
    F: Fn(ArrayView3<f32>) -> f32 + Sync,
{
    let mut table = match reference {
        Some(reference) => {
            let projected = reference.max_proj(&[Axes::Round, Axes::Ch]);
            let spots = detector
                .find(projected.volume(0, 0))
                .iter()
                .map(|b| b.spot())
                .collect();
            measure_spot_intensities(stack, spots, measure, radius_is_gyration)
        }
        None => {
            let (nrounds, nchannels) = (stack.nrounds(), stack.nchannels());
            let found: Vec<(Vec<Blob>, usize, usize)> = (0..nrounds * nchannels)
                .into_par_iter()
                .map(|i| {
                    let (r, c) = (i / nchannels, i % nchannels);
                    (detector.find(stack.volume(r, c)), r, c)
                })
                .collect();
            concatenate_spot_attributes_to_intensities(&found, nrounds, nchannels)
        }
    };
    table.transfer_physical_coords(stack);
    table
}
