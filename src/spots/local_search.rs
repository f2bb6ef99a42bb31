use indicatif::ProgressBar;
use rayon::prelude::*;

use super::blob::{Blob, BlobDetector};
use super::index::SpotIndex;
use super::intensity_table::{DecodedIntensityTable, IntensityTable};
use crate::codebook::Codebook;
use crate::error::{PipelineError, Result};
use crate::imagestack::ImageStack;

// Blobs found in one round, tagged with the channel they were found in.
struct RoundSpots {
    blobs: Vec<(usize, Blob)>,
    index: SpotIndex,
}

// Finds blobs independently in every (round, channel), then for each blob
// in the anchor round looks for the nearest blob of every other round
// within `search_radius`. Anchor blobs without a partner in every round
// are dropped.
pub struct LocalSearchBlobDetector {
    detector: BlobDetector,
    search_radius: f32,
    anchor_round: usize,
}

impl LocalSearchBlobDetector {
    pub fn new(detector: BlobDetector, search_radius: f32, anchor_round: usize) -> Result<Self> {
        if !(search_radius > 0.0) {
            return Err(PipelineError::Config(format!(
                "search radius must be positive, got {}",
                search_radius
            )));
        }
        Ok(LocalSearchBlobDetector {
            detector,
            search_radius,
            anchor_round,
        })
    }

    // Blobs for every (round, channel), indexed [round][channel].
    pub fn find_blobs(&self, stack: &ImageStack, progress: &ProgressBar) -> Vec<Vec<Vec<Blob>>> {
        let (nrounds, nchannels) = (stack.nrounds(), stack.nchannels());
        progress.set_length((nrounds * nchannels) as u64);

        let found: Vec<Vec<Blob>> = (0..nrounds * nchannels)
            .into_par_iter()
            .map(|i| {
                let blobs = self
                    .detector
                    .find(stack.volume(i / nchannels, i % nchannels));
                progress.inc(1);
                blobs
            })
            .collect();
        progress.finish_and_clear();

        let mut by_round = vec![Vec::with_capacity(nchannels); nrounds];
        for (i, blobs) in found.into_iter().enumerate() {
            by_round[i / nchannels].push(blobs);
        }
        by_round
    }

    pub fn run(&self, stack: &ImageStack, progress: &ProgressBar) -> Result<IntensityTable> {
        let nrounds = stack.nrounds();
        if self.anchor_round >= nrounds {
            return Err(PipelineError::Config(format!(
                "anchor round {} but the stack has {} rounds",
                self.anchor_round, nrounds
            )));
        }

        let blobs = self.find_blobs(stack, progress);
        let mut table = self.match_rounds(&blobs, stack.nchannels(), stack.is_volume());
        table.transfer_physical_coords(stack);
        Ok(table)
    }

    // Build the intensity table from per-(round, channel) blobs.
    pub fn match_rounds(
        &self,
        blobs: &[Vec<Vec<Blob>>],
        nchannels: usize,
        is_volume: bool,
    ) -> IntensityTable {
        let nrounds = blobs.len();
        let rounds: Vec<RoundSpots> = blobs
            .iter()
            .map(|channels| {
                let blobs: Vec<(usize, Blob)> = channels
                    .iter()
                    .enumerate()
                    .flat_map(|(c, bs)| bs.iter().map(move |&b| (c, b)))
                    .collect();
                let positions: Vec<[f32; 3]> = blobs
                    .iter()
                    .map(|(_, b)| [b.z as f32, b.y as f32, b.x as f32])
                    .collect();
                let index = SpotIndex::new(&positions, is_volume);
                RoundSpots { blobs, index }
            })
            .collect();

        // for each anchor blob, the (channel, intensity) matched in each round
        let anchor = &rounds[self.anchor_round];
        let mut spots = Vec::new();
        let mut matches: Vec<Vec<(usize, f32)>> = Vec::new();
        for &(anchor_ch, anchor_blob) in anchor.blobs.iter() {
            let position = [
                anchor_blob.z as f32,
                anchor_blob.y as f32,
                anchor_blob.x as f32,
            ];

            let matched: Option<Vec<(usize, f32)>> = rounds
                .iter()
                .enumerate()
                .map(|(r, round)| {
                    if r == self.anchor_round {
                        return Some((anchor_ch, anchor_blob.intensity));
                    }
                    round
                        .index
                        .nearest(&position)
                        .filter(|&(_, d)| d <= self.search_radius)
                        .map(|(j, _)| {
                            let (c, b) = round.blobs[j];
                            (c, b.intensity)
                        })
                })
                .collect();

            if let Some(matched) = matched {
                spots.push(anchor_blob.spot());
                matches.push(matched);
            }
        }

        let mut table = IntensityTable::zeros(spots, nrounds, nchannels);
        for (f, matched) in matches.iter().enumerate() {
            for (r, &(c, intensity)) in matched.iter().enumerate() {
                table.intensities[[f, r, c]] = intensity;
            }
        }
        table
    }
}

// Assign each feature the target whose code matches its max channel in
// every round.
pub fn decode_per_round_max(
    table: IntensityTable,
    codebook: &Codebook,
) -> Result<DecodedIntensityTable> {
    let decoded = codebook.decode_per_round_max(&table.intensities)?;
    let n = table.len();
    let targets = decoded
        .iter()
        .map(|t| t.map(|i| codebook.target_name(i).to_string()))
        .collect();
    Ok(DecodedIntensityTable::new(
        table,
        targets,
        vec![0.0; n],
        vec![true; n],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebook::tests::small_codebook;
    use crate::spots::blob::tests::gaussian_plane;
    use ndarray::{s, Array5};

    fn blob(y: usize, x: usize, intensity: f32) -> Blob {
        Blob {
            z: 0,
            y,
            x,
            sigma: 1.0,
            radius: 1.4,
            intensity,
        }
    }

    fn detector() -> LocalSearchBlobDetector {
        let blobs = BlobDetector::new([0.5; 3], [8.0; 3], 10, 0.1).unwrap();
        LocalSearchBlobDetector::new(blobs, 7.0, 0).unwrap()
    }

    #[test]
    fn test_match_rounds_within_radius() {
        // round 0: spot in ch0 at (10, 10), ch2 at (40, 40)
        // round 1: partner of the first in ch1 at (12, 13); nothing near the second
        let blobs = vec![
            vec![vec![blob(10, 10, 0.9)], vec![], vec![blob(40, 40, 0.8)]],
            vec![vec![], vec![blob(12, 13, 0.7)], vec![blob(40, 60, 0.6)]],
        ];
        let table = detector().match_rounds(&blobs, 3, false);

        assert_eq!(table.len(), 1);
        assert_eq!(table.spots[0].y, 10.0);
        assert_eq!(table.intensities[[0, 0, 0]], 0.9);
        assert_eq!(table.intensities[[0, 1, 1]], 0.7);
        assert_eq!(table.intensities.iter().filter(|&&v| v > 0.0).count(), 2);
    }

    #[test]
    fn test_match_dense_row() {
        // 48 blobs on one row, split over three channels, shifted by a pixel in round 1
        let row = |dx: usize| -> Vec<Vec<Blob>> {
            (0..3)
                .map(|c| (0..16).map(|i| blob(20, dx + 10 * (3 * i + c), 0.5)).collect())
                .collect()
        };
        let blobs = vec![row(0), row(1)];
        let table = detector().match_rounds(&blobs, 3, false);
        assert_eq!(table.len(), 48);
        for (f, spot) in table.spots.iter().enumerate() {
            let c = (spot.x as usize / 10) % 3;
            assert_eq!(table.intensities[[f, 1, c]], 0.5);
        }
    }

    #[test]
    fn test_anchor_round_out_of_range() {
        let blobs = BlobDetector::new([0.5; 3], [8.0; 3], 10, 0.1).unwrap();
        let detector = LocalSearchBlobDetector::new(blobs, 7.0, 3).unwrap();
        let stack = ImageStack::from_data(Array5::zeros((2, 3, 1, 8, 8)));
        assert!(detector.run(&stack, &ProgressBar::hidden()).is_err());
    }

    #[test]
    fn test_find_and_decode() {
        // GAPDH: round 0 channel 1, round 1 channel 2, with a one pixel shift
        let mut data = Array5::zeros((2, 3, 1, 40, 40));
        data.slice_mut(s![0, 1, .., .., ..])
            .assign(&gaussian_plane(40, 40, &[(15.0, 20.0, 1.5, 1.0)]));
        data.slice_mut(s![1, 2, .., .., ..])
            .assign(&gaussian_plane(40, 40, &[(16.0, 20.0, 1.5, 1.0)]));
        let stack = ImageStack::from_data(data);

        let table = detector().run(&stack, &ProgressBar::hidden()).unwrap();
        assert_eq!(table.len(), 1);

        let decoded = decode_per_round_max(table, &small_codebook()).unwrap();
        assert_eq!(decoded.targets, vec![Some(String::from("GAPDH"))]);
        assert_eq!(decoded.target_counts()["GAPDH"], 1);
    }
}
