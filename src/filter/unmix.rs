use ndarray::{s, Array2, Array5};

use super::Filter;
use crate::error::{PipelineError, Result};
use crate::imagestack::ImageStack;

// BaristaSeq bleed-through between the four imaging channels. Entry [j][c]
// is the fraction of channel j's signal that appears in channel c.
pub fn baristaseq_bleed_matrix() -> Array2<f32> {
    ndarray::array![
        [0.0, 0.05, 0.0, 0.0],
        [0.35, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.84],
        [0.0, 0.0, 0.05, 0.0],
    ]
}

// Removes linear bleed-through between channels:
//   out[c] = max(0, x[c] - sum_j coeff_mat[j][c] * x[j])
pub struct LinearUnmixing {
    coeff_mat: Array2<f32>,
}

impl LinearUnmixing {
    pub fn new(coeff_mat: Array2<f32>) -> Result<Self> {
        let (m, n) = coeff_mat.dim();
        if m != n {
            return Err(PipelineError::Config(format!(
                "unmixing matrix must be square, got {}x{}",
                m, n
            )));
        }
        Ok(LinearUnmixing { coeff_mat })
    }
}

impl Filter for LinearUnmixing {
    fn name(&self) -> &'static str {
        "linear unmixing"
    }

    fn run(&self, stack: &ImageStack) -> Result<ImageStack> {
        let nch = stack.nchannels();
        if self.coeff_mat.nrows() != nch {
            return Err(PipelineError::Shape(format!(
                "unmixing matrix is {}x{} but the stack has {} channels",
                self.coeff_mat.nrows(),
                self.coeff_mat.ncols(),
                nch
            )));
        }

        Ok(stack.map_data(|data| {
            let mut out: Array5<f32> = data.clone();
            for c in 0..nch {
                for j in 0..nch {
                    let k = self.coeff_mat[[j, c]];
                    if k == 0.0 {
                        continue;
                    }
                    let src = data.slice(s![.., j, .., .., ..]);
                    out.slice_mut(s![.., c, .., .., ..])
                        .scaled_add(-k, &src);
                }
            }
            out.mapv_inplace(|v| v.max(0.0));
            out
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array5;

    #[test]
    fn test_zero_diagonal_keeps_isolated_channel() {
        // signal only in channel 3, which nothing bleeds into except
        // channel 2 (which is dark here)
        let mut data = Array5::zeros((1, 4, 1, 3, 3));
        data.slice_mut(s![.., 3, .., .., ..]).fill(0.7);
        let stack = ImageStack::from_data(data);

        let unmixed = LinearUnmixing::new(baristaseq_bleed_matrix())
            .unwrap()
            .run(&stack)
            .unwrap();

        assert_eq!(unmixed.volume(0, 3), stack.volume(0, 3));
        // channel 2 receives 0.05 of channel 3, and is clipped at zero
        assert!(unmixed.volume(0, 2).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_bleed_is_subtracted() {
        let mut data = Array5::zeros((1, 4, 1, 1, 1));
        data[[0, 0, 0, 0, 0]] = 1.0;
        data[[0, 1, 0, 0, 0]] = 0.5;
        let stack = ImageStack::from_data(data);

        let unmixed = LinearUnmixing::new(baristaseq_bleed_matrix())
            .unwrap()
            .run(&stack)
            .unwrap();

        // ch0 = 1.0 - 0.35 * 0.5, ch1 = 0.5 - 0.05 * 1.0
        assert!((unmixed.data()[[0, 0, 0, 0, 0]] - 0.825).abs() < 1e-6);
        assert!((unmixed.data()[[0, 1, 0, 0, 0]] - 0.45).abs() < 1e-6);
    }

    #[test]
    fn test_matrix_shape_checks() {
        assert!(LinearUnmixing::new(Array2::zeros((3, 4))).is_err());

        let stack = ImageStack::from_data(Array5::zeros((1, 3, 1, 2, 2)));
        let unmix = LinearUnmixing::new(baristaseq_bleed_matrix()).unwrap();
        assert!(matches!(unmix.run(&stack), Err(PipelineError::Shape(_))));
    }
}
