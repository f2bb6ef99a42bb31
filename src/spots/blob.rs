use ndarray::{Array3, Array4, ArrayView3, Axis, Zip};
use std::f32::consts::PI;

use super::index::SpotIndex;
use super::Spot;
use crate::error::{PipelineError, Result};
use crate::math::{gaussian_kernel1d, reflect_index};

const GAUSSIAN_TRUNCATE: f32 = 4.0;

// A blob found in one (round, channel) volume.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Blob {
    pub z: usize,
    pub y: usize,
    pub x: usize,
    pub sigma: f32,
    pub radius: f32,
    pub intensity: f32,
}

impl Blob {
    pub fn spot(&self) -> Spot {
        Spot::new(self.z as f32, self.y as f32, self.x as f32, self.radius)
    }
}

// Laplacian-of-Gaussian blob detection over a range of scales.
#[derive(Clone, Debug)]
pub struct BlobDetector {
    // (z, y, x) sigmas at the smallest and largest scale
    pub min_sigma: [f32; 3],
    pub max_sigma: [f32; 3],
    pub num_sigma: usize,
    pub threshold: f32,
    pub overlap: f32,
}

impl BlobDetector {
    pub fn new(
        min_sigma: [f32; 3],
        max_sigma: [f32; 3],
        num_sigma: usize,
        threshold: f32,
    ) -> Result<Self> {
        if num_sigma == 0 {
            return Err(PipelineError::Config(String::from(
                "num_sigma must be at least 1",
            )));
        }
        for i in 0..3 {
            if min_sigma[i] <= 0.0 || max_sigma[i] < min_sigma[i] {
                return Err(PipelineError::Config(format!(
                    "invalid sigma range {:?}..{:?}",
                    min_sigma, max_sigma
                )));
            }
        }
        Ok(BlobDetector {
            min_sigma,
            max_sigma,
            num_sigma,
            threshold,
            overlap: 0.5,
        })
    }

    // Linearly spaced per-axis sigmas from min_sigma to max_sigma.
    pub fn sigma_list(&self) -> Vec<[f32; 3]> {
        if self.num_sigma == 1 {
            return vec![self.min_sigma];
        }
        (0..self.num_sigma)
            .map(|i| {
                let t = i as f32 / (self.num_sigma - 1) as f32;
                let mut s = [0.0; 3];
                for a in 0..3 {
                    s[a] = self.min_sigma[a] + t * (self.max_sigma[a] - self.min_sigma[a]);
                }
                s
            })
            .collect()
    }

    pub fn find(&self, volume: ArrayView3<f32>) -> Vec<Blob> {
        let is_volume = volume.len_of(Axis(0)) > 1;
        let sigma_list = self.sigma_list();

        let (nz, ny, nx) = volume.dim();
        let mut cube = Array4::zeros((sigma_list.len(), nz, ny, nx));
        for (mut scale, sigma) in cube.outer_iter_mut().zip(&sigma_list) {
            let norm = (sigma[0] + sigma[1] + sigma[2]) / 3.0;
            let response = gaussian_laplace(volume, sigma);
            Zip::from(&mut scale)
                .and(&response)
                .for_each(|s, &r| *s = -r * norm * norm);
        }

        let mut blobs: Vec<Blob> = local_maxima(&cube, self.threshold)
            .into_iter()
            .map(|(s, z, y, x)| {
                let sigma = sigma_list[s].iter().cloned().fold(0.0, f32::max);
                Blob {
                    z,
                    y,
                    x,
                    sigma,
                    radius: blob_radius(sigma, is_volume),
                    intensity: volume[[z, y, x]],
                }
            })
            .collect();

        blobs.sort_by_key(|b| (b.z, b.y, b.x));
        prune_blobs(&mut blobs, self.overlap, is_volume);
        blobs
    }
}

pub fn blob_radius(sigma: f32, is_volume: bool) -> f32 {
    if is_volume {
        sigma * 3.0_f32.sqrt()
    } else {
        sigma * 2.0_f32.sqrt()
    }
}

// Separable Laplacian of Gaussian: the sum over axes of the second
// derivative along that axis smoothed along the others.
pub fn gaussian_laplace(volume: ArrayView3<f32>, sigma: &[f32; 3]) -> Array3<f32> {
    let g: Vec<Vec<f32>> = sigma
        .iter()
        .map(|&s| gaussian_kernel1d(s, 0, GAUSSIAN_TRUNCATE))
        .collect();
    let d2: Vec<Vec<f32>> = sigma
        .iter()
        .map(|&s| gaussian_kernel1d(s, 2, GAUSSIAN_TRUNCATE))
        .collect();

    let gx = correlate1d(volume, 2, &g[2]);
    let dx = correlate1d(volume, 2, &d2[2]);

    let gy_gx = correlate1d(gx.view(), 1, &g[1]);

    let mut out = correlate1d(correlate1d(dx.view(), 1, &g[1]).view(), 0, &g[0]);
    out += &correlate1d(correlate1d(gx.view(), 1, &d2[1]).view(), 0, &g[0]);
    out += &correlate1d(gy_gx.view(), 0, &d2[0]);
    out
}

// 1-d correlation along `axis` with reflected boundaries.
fn correlate1d(input: ArrayView3<f32>, axis: usize, kernel: &[f32]) -> Array3<f32> {
    let n = input.len_of(Axis(axis));

    // every reflected index of a length-1 axis is 0
    if n == 1 {
        let total: f32 = kernel.iter().sum();
        return input.mapv(|v| v * total);
    }

    let radius = (kernel.len() / 2) as isize;
    let mut output = Array3::zeros(input.raw_dim());
    Zip::from(output.lanes_mut(Axis(axis)))
        .and(input.lanes(Axis(axis)))
        .for_each(|mut out_lane, in_lane| {
            for i in 0..n {
                let mut acc = 0.0;
                for (k, w) in kernel.iter().enumerate() {
                    let j = reflect_index(i as isize + k as isize - radius, n);
                    acc += w * in_lane[j];
                }
                out_lane[i] = acc;
            }
        });
    output
}

// Points of a (scale, z, y, x) cube that are above `threshold` and equal to
// the maximum of their 3x3x3x3 neighborhood (edges replicated).
fn local_maxima(cube: &Array4<f32>, threshold: f32) -> Vec<(usize, usize, usize, usize)> {
    let (ns, nz, ny, nx) = cube.dim();
    let range = |i: usize, n: usize| i.saturating_sub(1)..(i + 2).min(n);

    let mut peaks = Vec::new();
    for ((s, z, y, x), &v) in cube.indexed_iter() {
        if v <= threshold {
            continue;
        }
        let mut is_max = true;
        'neighborhood: for s2 in range(s, ns) {
            for z2 in range(z, nz) {
                for y2 in range(y, ny) {
                    for x2 in range(x, nx) {
                        if cube[[s2, z2, y2, x2]] > v {
                            is_max = false;
                            break 'neighborhood;
                        }
                    }
                }
            }
        }
        if is_max {
            peaks.push((s, z, y, x));
        }
    }
    peaks
}

// Fraction of the smaller of two disks/spheres covered by their
// intersection.
pub fn blob_overlap(r1: f32, r2: f32, d: f32, is_volume: bool) -> f32 {
    if d >= r1 + r2 {
        return 0.0;
    }
    let rmin = r1.min(r2);
    if d <= (r1 - r2).abs() {
        return 1.0;
    }

    if is_volume {
        let vol = PI * (r1 + r2 - d).powi(2) * (d * d + 2.0 * d * (r1 + r2) - 3.0 * (r1 - r2).powi(2))
            / (12.0 * d);
        vol / (4.0 / 3.0 * PI * rmin.powi(3))
    } else {
        let ratio1 = ((d * d + r1 * r1 - r2 * r2) / (2.0 * d * r1)).clamp(-1.0, 1.0);
        let ratio2 = ((d * d + r2 * r2 - r1 * r1) / (2.0 * d * r2)).clamp(-1.0, 1.0);
        let a = -d + r2 + r1;
        let b = d - r2 + r1;
        let c = d + r2 - r1;
        let e = d + r2 + r1;
        let area = r1 * r1 * ratio1.acos() + r2 * r2 * ratio2.acos() - 0.5 * (a * b * c * e).abs().sqrt();
        area / (PI * rmin * rmin)
    }
}

// Drop the smaller of every pair of blobs overlapping by more than
// `overlap`. Ties drop the earlier blob.
fn prune_blobs(blobs: &mut Vec<Blob>, overlap: f32, is_volume: bool) {
    if blobs.len() < 2 {
        return;
    }

    let positions: Vec<[f32; 3]> = blobs
        .iter()
        .map(|b| [b.z as f32, b.y as f32, b.x as f32])
        .collect();
    let index = SpotIndex::new(&positions, is_volume);
    let max_radius = blobs.iter().map(|b| b.radius).fold(0.0, f32::max);

    let mut removed = vec![false; blobs.len()];
    for i in 0..blobs.len() {
        for (j, d) in index.within(&positions[i], 2.0 * max_radius) {
            if j <= i || removed[i] || removed[j] {
                continue;
            }
            let (bi, bj) = (&blobs[i], &blobs[j]);
            if blob_overlap(bi.radius, bj.radius, d, is_volume) > overlap {
                if bi.sigma > bj.sigma {
                    removed[j] = true;
                } else {
                    removed[i] = true;
                }
            }
        }
    }

    let mut keep = removed.iter().map(|r| !r);
    blobs.retain(|_| keep.next().unwrap_or(false));
}
