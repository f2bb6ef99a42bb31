use ndarray::{s, Array3, ArrayView3};
use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};

// Optional per-axis ticks for a (z, y, x) label array.
#[derive(Clone, Debug)]
pub struct AxisTicks<T> {
    pub z: Option<Vec<T>>,
    pub y: Option<Vec<T>>,
    pub x: Option<Vec<T>>,
}

impl<T> Default for AxisTicks<T> {
    fn default() -> Self {
        AxisTicks {
            z: None,
            y: None,
            x: None,
        }
    }
}

impl<T> AxisTicks<T> {
    fn axes(self) -> [(&'static str, Option<Vec<T>>); 3] {
        [("z", self.z), ("y", self.y), ("x", self.x)]
    }
}

// One label's pixels, cropped to its bounding box.
#[derive(Clone, Debug)]
pub struct BinaryMask {
    pub name: String,
    pub label: u32,
    pub mask: Array3<bool>,

    // (z, y, x) ticks of the cropped mask
    pub pixel_ticks: [Vec<usize>; 3],
    pub physical_ticks: [Vec<f32>; 3],
}

impl BinaryMask {
    pub fn area(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }
}

#[derive(Clone, Debug, Default)]
pub struct BinaryMaskCollection {
    masks: Vec<BinaryMask>,
}

// Inclusive (min, max) per axis.
type BoundingBox = [(usize, usize); 3];

impl BinaryMaskCollection {
    // One mask per nonzero label, in label order. Pixel ticks default to
    // 0..n along each axis. Physical ticks are required for y and x, and for
    // z unless the label array has a single plane. Ticks whose length
    // doesn't match the label array are an error.
    pub fn from_label_array_and_ticks(
        labels: ArrayView3<u32>,
        pixel_ticks: AxisTicks<usize>,
        physical_ticks: AxisTicks<f32>,
    ) -> Result<Self> {
        let dim = labels.dim();
        let sizes = [dim.0, dim.1, dim.2];

        let mut pixel: Vec<Vec<usize>> = Vec::with_capacity(3);
        for ((name, ticks), &n) in pixel_ticks.axes().into_iter().zip(sizes.iter()) {
            let ticks = ticks.unwrap_or_else(|| (0..n).collect());
            check_ticks(name, "pixel", ticks.len(), n)?;
            pixel.push(ticks);
        }

        let mut physical: Vec<Vec<f32>> = Vec::with_capacity(3);
        for (((name, ticks), &n), px) in physical_ticks
            .axes()
            .into_iter()
            .zip(sizes.iter())
            .zip(pixel.iter())
        {
            let ticks = match ticks {
                Some(ticks) => ticks,
                // a single plane is a 2-d label image with no physical z
                None if name == "z" && n == 1 => px.iter().map(|&t| t as f32).collect(),
                None => {
                    return Err(PipelineError::Shape(format!(
                        "missing physical ticks for axis {}",
                        name
                    )))
                }
            };
            check_ticks(name, "physical", ticks.len(), n)?;
            physical.push(ticks);
        }

        let mut bounds: BTreeMap<u32, BoundingBox> = BTreeMap::new();
        for ((z, y, x), &label) in labels.indexed_iter() {
            if label == 0 {
                continue;
            }
            let p = [z, y, x];
            let bbox = bounds.entry(label).or_insert([(z, z), (y, y), (x, x)]);
            for (b, &v) in bbox.iter_mut().zip(p.iter()) {
                b.0 = b.0.min(v);
                b.1 = b.1.max(v);
            }
        }

        let masks = bounds
            .iter()
            .enumerate()
            .map(|(i, (&label, bbox))| {
                let [(z0, z1), (y0, y1), (x0, x1)] = *bbox;
                let mask = labels
                    .slice(s![z0..=z1, y0..=y1, x0..=x1])
                    .mapv(|v| v == label);
                BinaryMask {
                    name: i.to_string(),
                    label,
                    mask,
                    pixel_ticks: [
                        pixel[0][z0..=z1].to_vec(),
                        pixel[1][y0..=y1].to_vec(),
                        pixel[2][x0..=x1].to_vec(),
                    ],
                    physical_ticks: [
                        physical[0][z0..=z1].to_vec(),
                        physical[1][y0..=y1].to_vec(),
                        physical[2][x0..=x1].to_vec(),
                    ],
                }
            })
            .collect();

        Ok(BinaryMaskCollection { masks })
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    pub fn masks(&self) -> &[BinaryMask] {
        &self.masks
    }

    pub fn get(&self, name: &str) -> Option<&BinaryMask> {
        self.masks.iter().find(|m| m.name == name)
    }
}

fn check_ticks(axis: &str, kind: &str, len: usize, n: usize) -> Result<()> {
    if len != n {
        return Err(PipelineError::Shape(format!(
            "{} has {} {} ticks but the label array has {} pixels",
            axis, len, kind, n
        )));
    }
    Ok(())
}
