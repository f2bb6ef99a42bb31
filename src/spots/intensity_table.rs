use ndarray::{Array3, Axis};
use std::collections::BTreeMap;

use super::Spot;
use crate::imagestack::{Axes, ImageStack};

// Per-feature (spot) intensities over every (round, channel).
#[derive(Clone, Debug)]
pub struct IntensityTable {
    pub spots: Vec<Spot>,

    // [features, rounds, channels]
    pub intensities: Array3<f32>,
}

impl IntensityTable {
    pub fn zeros(spots: Vec<Spot>, nrounds: usize, nchannels: usize) -> Self {
        let intensities = Array3::zeros((spots.len(), nrounds, nchannels));
        IntensityTable { spots, intensities }
    }

    pub fn len(&self) -> usize {
        self.spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    pub fn nrounds(&self) -> usize {
        self.intensities.len_of(Axis(1))
    }

    pub fn nchannels(&self) -> usize {
        self.intensities.len_of(Axis(2))
    }

    // Fill in physical coordinates of every spot from the stack's extent.
    pub fn transfer_physical_coords(&mut self, stack: &ImageStack) {
        let shape = stack.shape();
        let coords = stack.coords();
        for spot in self.spots.iter_mut() {
            spot.zc = physical_coord(coords.range(Axes::Zplane), shape.nz, spot.z);
            spot.yc = physical_coord(coords.range(Axes::Y), shape.ny, spot.y);
            spot.xc = physical_coord(coords.range(Axes::X), shape.nx, spot.x);
        }
    }
}

// Linear map of a (possibly fractional) pixel position onto a physical range.
pub fn physical_coord(range: (f32, f32), n: usize, pos: f32) -> f32 {
    if n <= 1 {
        return range.0;
    }
    range.0 + (range.1 - range.0) * pos / (n - 1) as f32
}

// An IntensityTable where every feature has been assigned a target, or
// left uncalled.
#[derive(Clone, Debug)]
pub struct DecodedIntensityTable {
    pub table: IntensityTable,
    pub targets: Vec<Option<String>>,
    pub distances: Vec<f32>,
    pub passes_thresholds: Vec<bool>,
}

impl DecodedIntensityTable {
    pub fn new(
        table: IntensityTable,
        targets: Vec<Option<String>>,
        distances: Vec<f32>,
        passes_thresholds: Vec<bool>,
    ) -> Self {
        assert_eq!(table.len(), targets.len());
        assert_eq!(table.len(), distances.len());
        assert_eq!(table.len(), passes_thresholds.len());
        DecodedIntensityTable {
            table,
            targets,
            distances,
            passes_thresholds,
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    // Number of features called as each target, among features passing
    // thresholds. Uncalled features are not counted.
    pub fn target_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for (target, &passes) in self.targets.iter().zip(&self.passes_thresholds) {
            if let (Some(target), true) = (target, passes) {
                *counts.entry(target.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn num_decoded(&self) -> usize {
        self.target_counts().values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imagestack::Coordinates;
    use ndarray::Array5;

    fn table3() -> IntensityTable {
        let spots = vec![
            Spot::new(0.0, 1.0, 2.0, 1.0),
            Spot::new(0.0, 3.0, 4.0, 1.0),
            Spot::new(0.0, 5.0, 6.0, 1.0),
        ];
        let mut table = IntensityTable::zeros(spots, 2, 2);
        for (i, mut feature) in table.intensities.outer_iter_mut().enumerate() {
            feature.fill(i as f32);
        }
        table.intensities[[1, 1, 0]] = 7.0;
        table
    }

    #[test]
    fn test_transfer_physical_coords() {
        let coords = Coordinates {
            x: (100.0, 110.0),
            y: (0.0, 0.5),
            z: (3.0, 3.0),
        };
        let stack = ImageStack::new(Array5::zeros((1, 1, 1, 6, 11)), coords);
        let mut table = table3();
        table.transfer_physical_coords(&stack);
        assert_eq!(table.spots[0].xc, 102.0);
        assert_eq!(table.spots[0].yc, 0.1);
        assert_eq!(table.spots[0].zc, 3.0);
    }

    #[test]
    fn test_target_counts_skip_no_calls() {
        let decoded = DecodedIntensityTable::new(
            table3(),
            vec![Some(String::from("A")), None, Some(String::from("A"))],
            vec![0.0, 0.0, 0.0],
            vec![true, true, true],
        );
        let counts = decoded.target_counts();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts["A"], 2);
        assert_eq!(decoded.num_decoded(), 2);
    }
}
