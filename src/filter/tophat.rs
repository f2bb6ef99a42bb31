use ndarray::{Array2, ArrayView2, Zip};
use std::collections::BTreeMap;

use super::Filter;
use crate::error::{PipelineError, Result};
use crate::imagestack::ImageStack;
use crate::math::reflect_index;

// Background removal by white tophat: each plane minus its grayscale
// opening with a flat disk. Features smaller than the disk survive,
// broader background does not.
pub struct WhiteTophat {
    masking_radius: usize,
}

impl WhiteTophat {
    pub fn new(masking_radius: usize) -> Result<Self> {
        if masking_radius == 0 {
            return Err(PipelineError::Config(String::from(
                "white tophat masking radius must be positive",
            )));
        }
        Ok(WhiteTophat { masking_radius })
    }
}

impl Filter for WhiteTophat {
    fn name(&self) -> &'static str {
        "white tophat"
    }

    fn run(&self, stack: &ImageStack) -> Result<ImageStack> {
        let spans = disk_spans(self.masking_radius);
        Ok(stack.map_planes(|plane| white_tophat(plane, &spans)))
    }
}

// Rows of a disk footprint as (dy, half width), covering x^2 + y^2 <= r^2.
pub fn disk_spans(radius: usize) -> Vec<(isize, isize)> {
    let r = radius as isize;
    (-r..=r)
        .map(|dy| {
            let mut w = 0;
            while (w + 1) * (w + 1) + dy * dy <= r * r {
                w += 1;
            }
            (dy, w)
        })
        .collect()
}

pub fn white_tophat(plane: ArrayView2<f32>, spans: &[(isize, isize)]) -> Array2<f32> {
    let eroded = morph_filter(plane, spans, f32::min, f32::INFINITY);
    let opened = morph_filter(eroded.view(), spans, f32::max, f32::NEG_INFINITY);

    let mut out = plane.to_owned();
    Zip::from(&mut out)
        .and(&opened)
        .for_each(|v, &o| *v = (*v - o).max(0.0));
    out
}

// Flat min/max filter over a footprint given as row spans. Each distinct
// span width gets one horizontal pass; rows are then combined vertically.
fn morph_filter(
    plane: ArrayView2<f32>,
    spans: &[(isize, isize)],
    op: fn(f32, f32) -> f32,
    init: f32,
) -> Array2<f32> {
    let (ny, nx) = plane.dim();

    let mut horizontal: BTreeMap<isize, Array2<f32>> = BTreeMap::new();
    for &(_, w) in spans {
        horizontal.entry(w).or_insert_with(|| {
            Array2::from_shape_fn((ny, nx), |(y, x)| {
                (-w..=w).fold(init, |acc, dx| {
                    op(acc, plane[[y, reflect_index(x as isize + dx, nx)]])
                })
            })
        });
    }

    Array2::from_shape_fn((ny, nx), |(y, x)| {
        spans.iter().fold(init, |acc, (dy, w)| {
            op(acc, horizontal[w][[reflect_index(y as isize + dy, ny), x]])
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array5};

    #[test]
    fn test_disk_spans() {
        // skimage-style disk(2):
        // 0 0 1 0 0
        // 0 1 1 1 0
        // 1 1 1 1 1
        // 0 1 1 1 0
        // 0 0 1 0 0
        assert_eq!(
            disk_spans(2),
            vec![(-2, 0), (-1, 1), (0, 2), (1, 1), (2, 0)]
        );
        let npoints: isize = disk_spans(5).iter().map(|(_, w)| 2 * w + 1).sum();
        assert_eq!(npoints, 81);
    }

    #[test]
    fn test_small_spot_survives_background_removed() {
        let mut plane = Array2::from_elem((30, 30), 0.2_f32);
        plane.slice_mut(s![14..17, 14..17]).fill(1.0);

        let out = white_tophat(plane.view(), &disk_spans(5));
        assert!((out[[15, 15]] - 0.8).abs() < 1e-6);
        assert!(out[[2, 2]].abs() < 1e-6);
        assert!(out[[14, 20]].abs() < 1e-6);
    }

    #[test]
    fn test_broad_band_removed() {
        let mut plane = Array2::zeros((40, 40));
        plane.slice_mut(s![10..30, ..]).fill(1.0_f32);

        let out = white_tophat(plane.view(), &disk_spans(5));
        assert!(out.iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn test_filter_runs_per_plane() {
        let mut data = Array5::from_elem((2, 2, 1, 20, 20), 0.5_f32);
        data[[1, 0, 0, 10, 10]] = 2.0;
        let stack = ImageStack::from_data(data);

        let out = WhiteTophat::new(3).unwrap().run(&stack).unwrap();
        assert!((out.data()[[1, 0, 0, 10, 10]] - 1.5).abs() < 1e-6);
        assert_eq!(out.data().iter().filter(|&&v| v > 0.0).count(), 1);
    }

    #[test]
    fn test_zero_radius_rejected() {
        assert!(WhiteTophat::new(0).is_err());
    }
}
