use ndarray::{Array2, Array3, Axis};
use std::f32::consts::PI;

use super::intensity_table::{DecodedIntensityTable, IntensityTable};
use super::Spot;
use crate::codebook::Codebook;
use crate::error::{PipelineError, Result};
use crate::imagestack::ImageStack;
use crate::label::{label_regions, Connectivity};

// Summary of one connected region of pixels decoded to the same target.
#[derive(Clone, Debug)]
pub struct RegionProperties {
    pub label: u32,
    pub target: usize,
    pub area: usize,

    // (z, y, x) in pixels
    pub centroid: [f32; 3],

    // [rounds, channels], averaged over the region's pixels
    pub mean_trace: Array2<f32>,
    pub mean_distance: f32,
}

impl RegionProperties {
    // Radius of the disk with the region's area.
    pub fn radius(&self) -> f32 {
        (self.area as f32 / PI).sqrt()
    }
}

pub struct ConnectedComponentDecodingResult {
    // target index + 1 of every passing pixel, 0 elsewhere
    pub decoded_image: Array3<u32>,
    pub label_image: Array3<u32>,

    // every labeled region, in label order, regardless of area
    pub regions: Vec<RegionProperties>,
}

// Decodes every pixel's (round, channel) trace against the codebook, then
// merges adjacent pixels with the same target into spots.
pub struct PixelSpotDecoder {
    pub distance_threshold: f32,
    pub magnitude_threshold: f32,
    pub min_area: usize,
    pub max_area: usize,
    pub norm_order: i32,
}

impl PixelSpotDecoder {
    pub fn new(
        distance_threshold: f32,
        magnitude_threshold: f32,
        min_area: usize,
        max_area: usize,
    ) -> Result<Self> {
        if min_area > max_area {
            return Err(PipelineError::Config(format!(
                "min area {} exceeds max area {}",
                min_area, max_area
            )));
        }
        Ok(PixelSpotDecoder {
            distance_threshold,
            magnitude_threshold,
            min_area,
            max_area,
            norm_order: 2,
        })
    }

    pub fn run(
        &self,
        stack: &ImageStack,
        codebook: &Codebook,
    ) -> Result<(DecodedIntensityTable, ConnectedComponentDecodingResult)> {
        let shape = stack.shape();
        if shape.nrounds != codebook.nrounds() || shape.nchannels != codebook.nchannels() {
            return Err(PipelineError::Shape(format!(
                "stack is {}x{} (rounds x channels), codebook is {}x{}",
                shape.nrounds,
                shape.nchannels,
                codebook.nrounds(),
                codebook.nchannels()
            )));
        }

        let traces = pixel_traces(stack);
        let decoded = codebook.decode_metric(
            traces.view(),
            self.distance_threshold,
            self.magnitude_threshold,
            self.norm_order,
        )?;

        let dim = (shape.nz, shape.ny, shape.nx);
        let mut decoded_image = Array3::<u32>::zeros(dim);
        for (v, d) in decoded_image.iter_mut().zip(decoded.iter()) {
            if d.passes_thresholds {
                *v = d.target as u32 + 1;
            }
        }

        let (label_image, nlabels) = label_regions(decoded_image.view(), Connectivity(2));

        // accumulate per-label sums in one pass over the pixels
        let ncodes = shape.nrounds * shape.nchannels;
        let mut area = vec![0_usize; nlabels];
        let mut target = vec![0_usize; nlabels];
        let mut position_sum = vec![[0.0_f64; 3]; nlabels];
        let mut distance_sum = vec![0.0_f64; nlabels];
        let mut trace_sum = Array2::<f64>::zeros((nlabels, ncodes));
        for (i, ((z, y, x), &label)) in label_image.indexed_iter().enumerate() {
            if label == 0 {
                continue;
            }
            let k = (label - 1) as usize;
            area[k] += 1;
            target[k] = decoded[i].target;
            position_sum[k][0] += z as f64;
            position_sum[k][1] += y as f64;
            position_sum[k][2] += x as f64;
            distance_sum[k] += decoded[i].distance as f64;
            trace_sum
                .row_mut(k)
                .zip_mut_with(&traces.row(i), |s, &t| *s += t as f64);
        }

        let regions: Vec<RegionProperties> = (0..nlabels)
            .map(|k| -> Result<RegionProperties> {
                let n = area[k] as f64;
                let mean_trace = trace_sum
                    .row(k)
                    .mapv(|s| (s / n) as f32)
                    .into_shape_with_order((shape.nrounds, shape.nchannels))
                    .map_err(|err| PipelineError::Shape(err.to_string()))?;
                Ok(RegionProperties {
                    label: k as u32 + 1,
                    target: target[k],
                    area: area[k],
                    centroid: [
                        (position_sum[k][0] / n) as f32,
                        (position_sum[k][1] / n) as f32,
                        (position_sum[k][2] / n) as f32,
                    ],
                    mean_trace,
                    mean_distance: (distance_sum[k] / n) as f32,
                })
            })
            .collect::<Result<_>>()?;

        let table = self.regions_table(&regions, stack, codebook);
        Ok((
            table,
            ConnectedComponentDecodingResult {
                decoded_image,
                label_image,
                regions,
            },
        ))
    }

    pub fn passes_area(&self, region: &RegionProperties) -> bool {
        region.area >= self.min_area && region.area <= self.max_area
    }

    // One feature per region within the area bounds.
    fn regions_table(
        &self,
        regions: &[RegionProperties],
        stack: &ImageStack,
        codebook: &Codebook,
    ) -> DecodedIntensityTable {
        let kept: Vec<&RegionProperties> =
            regions.iter().filter(|r| self.passes_area(r)).collect();

        let spots = kept
            .iter()
            .map(|r| Spot::new(r.centroid[0], r.centroid[1], r.centroid[2], r.radius()))
            .collect();
        let mut table = IntensityTable::zeros(spots, stack.nrounds(), stack.nchannels());
        for (mut feature, region) in table.intensities.axis_iter_mut(Axis(0)).zip(kept.iter()) {
            feature.assign(&region.mean_trace);
        }
        table.transfer_physical_coords(stack);

        let targets = kept
            .iter()
            .map(|r| Some(codebook.target_name(r.target).to_string()))
            .collect();
        let distances = kept.iter().map(|r| r.mean_distance).collect();
        DecodedIntensityTable::new(table, targets, distances, vec![true; kept.len()])
    }
}

// [pixels, rounds * channels] traces, pixels in (z, y, x) raster order.
pub fn pixel_traces(stack: &ImageStack) -> Array2<f32> {
    let shape = stack.shape();
    let npixels = shape.nz * shape.ny * shape.nx;
    let mut traces = Array2::<f32>::zeros((npixels, shape.nrounds * shape.nchannels));
    for r in 0..shape.nrounds {
        for c in 0..shape.nchannels {
            let j = r * shape.nchannels + c;
            for (i, &v) in stack.volume(r, c).iter().enumerate() {
                traces[[i, j]] = v;
            }
        }
    }
    traces
}
