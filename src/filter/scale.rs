use ndarray::{s, Axis};

use super::Filter;
use crate::error::{PipelineError, Result};
use crate::imagestack::ImageStack;
use crate::math::percentile;

// Clips each channel at a percentile of its intensities and divides by it,
// so that percentile lands at 1.0 in every channel. With
// `group_by_channel` false, one percentile is taken over the whole stack.
pub struct ScaleByPercentile {
    p: f32,
    group_by_channel: bool,
}

impl ScaleByPercentile {
    pub fn new(p: f32, group_by_channel: bool) -> Result<Self> {
        if !(0.0..=100.0).contains(&p) || p.is_nan() {
            return Err(PipelineError::Config(format!(
                "percentile must be within [0, 100], got {}",
                p
            )));
        }
        Ok(ScaleByPercentile {
            p,
            group_by_channel,
        })
    }

    // Value at the configured percentile for every channel.
    pub fn channel_levels(&self, stack: &ImageStack) -> Vec<f32> {
        let data = stack.data();
        if self.group_by_channel {
            data.axis_iter(Axis(1))
                .map(|channel| {
                    let mut values: Vec<f32> = channel.iter().copied().collect();
                    percentile(&mut values, self.p)
                })
                .collect()
        } else {
            let mut values: Vec<f32> = data.iter().copied().collect();
            vec![percentile(&mut values, self.p); stack.nchannels()]
        }
    }
}

impl Filter for ScaleByPercentile {
    fn name(&self) -> &'static str {
        "percentile scaling"
    }

    fn run(&self, stack: &ImageStack) -> Result<ImageStack> {
        let levels = self.channel_levels(stack);

        Ok(stack.map_data(|data| {
            let mut out = data.clone();
            for (c, &level) in levels.iter().enumerate() {
                let mut channel = out.slice_mut(s![.., c, .., .., ..]);
                if level > 0.0 {
                    channel.mapv_inplace(|v| v.min(level).max(0.0) / level);
                } else {
                    channel.fill(0.0);
                }
            }
            out
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array5;

    #[test]
    fn test_channels_aligned_at_percentile() {
        let mut data = Array5::zeros((2, 2, 1, 10, 10));
        for ((_, c, _, y, x), v) in data.indexed_iter_mut() {
            let base = (y * 10 + x) as f32;
            *v = if c == 0 { base } else { 10.0 * base };
        }
        let stack = ImageStack::from_data(data);

        let scale = ScaleByPercentile::new(99.5, true).unwrap();
        let levels = scale.channel_levels(&stack);
        assert!((levels[1] / levels[0] - 10.0).abs() < 1e-4);

        let out = scale.run(&stack).unwrap();
        let max0 = out.volume(0, 0).iter().cloned().fold(0.0, f32::max);
        let max1 = out.volume(0, 1).iter().cloned().fold(0.0, f32::max);
        assert_eq!(max0, 1.0);
        assert_eq!(max1, 1.0);

        // both channels carry the same relative ramp
        for y in 0..10 {
            for x in 0..10 {
                let a = out.data()[[1, 0, 0, y, x]];
                let b = out.data()[[1, 1, 0, y, x]];
                assert!((a - b).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_dark_channel_is_zeroed() {
        let mut data = Array5::zeros((1, 2, 1, 4, 4));
        data.slice_mut(s![.., 0, .., .., ..]).fill(3.0_f32);
        let stack = ImageStack::from_data(data);

        let out = ScaleByPercentile::new(50.0, true).unwrap().run(&stack).unwrap();
        assert!(out.volume(0, 0).iter().all(|&v| v == 1.0));
        assert!(out.volume(0, 1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_invalid_percentile() {
        assert!(ScaleByPercentile::new(100.5, true).is_err());
        assert!(ScaleByPercentile::new(-1.0, true).is_err());
        assert!(ScaleByPercentile::new(f32::NAN, true).is_err());
    }
}
