use libm::lgamma;

// Percentile (0-100) of `values` with linear interpolation between the
// bracketing order statistics. Reorders `values`.
pub fn percentile(values: &mut [f32], p: f32) -> f32 {
    if values.is_empty() {
        return f32::NAN;
    }

    let n = values.len();
    let rank = (p.clamp(0.0, 100.0) as f64 / 100.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;

    let (_, &mut lo_value, upper) = values.select_nth_unstable_by(lo, |a, b| a.total_cmp(b));
    if hi == lo {
        return lo_value;
    }

    // the next order statistic is the minimum of the upper partition
    let hi_value = upper.iter().copied().fold(f32::INFINITY, f32::min);
    let frac = (rank - lo as f64) as f32;
    lo_value + (hi_value - lo_value) * frac
}

// Pearson correlation coefficient, None if either series is constant or
// the series are shorter than two.
pub fn pearson_r(xs: &[f64], ys: &[f64]) -> Option<f64> {
    assert_eq!(xs.len(), ys.len());
    let n = xs.len();
    if n < 2 {
        return None;
    }

    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;

    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    if sxx == 0.0 || syy == 0.0 {
        return None;
    }

    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

// Two-sided p-value for a Pearson r over n samples under the null of no
// correlation (Student t with n - 2 degrees of freedom).
pub fn pearson_pvalue(r: f64, n: usize) -> f64 {
    if n <= 2 {
        return 1.0;
    }
    if r.abs() >= 1.0 {
        return 0.0;
    }

    let df = (n - 2) as f64;
    let t2 = r * r * df / (1.0 - r * r);
    regularized_incomplete_beta(df / 2.0, 0.5, df / (df + t2))
}

// I_x(a, b), using the continued fraction expansion.
pub fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = lgamma(a + b) - lgamma(a) - lgamma(b) + a * x.ln() + b * (1.0 - x).ln();

    // the continued fraction converges quickly only on this side
    if x < (a + 1.0) / (a + b + 2.0) {
        ln_front.exp() * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - ln_front.exp() * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

// Modified Lentz evaluation.
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAXITER: usize = 300;
    const EPS: f64 = 1e-15;
    const TINY: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAXITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }

    h
}

// Normalized 1-d Gaussian kernel of the given derivative order (0 or 2),
// truncated at `truncate` standard deviations.
pub fn gaussian_kernel1d(sigma: f32, order: u32, truncate: f32) -> Vec<f32> {
    let radius = (truncate * sigma + 0.5) as i32;
    let σ2 = sigma * sigma;

    let weights: Vec<f32> = (-radius..=radius)
        .map(|x| (-((x * x) as f32) / (2.0 * σ2)).exp())
        .collect();
    let total: f32 = weights.iter().sum();
    let weights = weights.into_iter().map(|w| w / total);

    match order {
        0 => weights.collect(),
        2 => weights
            .zip(-radius..=radius)
            .map(|(w, x)| w * ((x * x) as f32 - σ2) / (σ2 * σ2))
            .collect(),
        _ => panic!("unsupported Gaussian derivative order {}", order),
    }
}

// Index into [0, n) for a position outside it, mirroring about the edges
// (d c b a | a b c d | d c b a).
pub fn reflect_index(i: isize, n: usize) -> usize {
    let n = n as isize;
    if n == 1 {
        return 0;
    }
    let period = 2 * n;
    let mut i = i.rem_euclid(period);
    if i >= n {
        i = period - 1 - i;
    }
    i as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&mut values, 50.0), 3.0);
        assert_eq!(percentile(&mut values, 0.0), 1.0);
        assert_eq!(percentile(&mut values, 100.0), 5.0);
        assert!((percentile(&mut values, 90.0) - 4.6).abs() < 1e-6);

        let mut values: Vec<f32> = (0..1000).map(|v| v as f32).collect();
        assert!((percentile(&mut values, 99.5) - 994.005).abs() < 1e-2);
    }

    #[test]
    fn test_percentile_empty() {
        assert!(percentile(&mut [], 50.0).is_nan());
    }

    #[test]
    fn test_pearson_identical_series() {
        let xs = vec![3.0, 17.0, 4.0, 120.0, 9.0, 33.0];
        assert_eq!(pearson_r(&xs, &xs), Some(1.0));
        assert_eq!(pearson_pvalue(1.0, xs.len()), 0.0);
    }

    #[test]
    fn test_pearson_anticorrelated() {
        let xs = vec![1.0, 2.0, 3.0];
        let ys = vec![6.0, 4.0, 2.0];
        assert!((pearson_r(&xs, &ys).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pearson_undefined() {
        assert_eq!(pearson_r(&[1.0], &[2.0]), None);
        assert_eq!(pearson_r(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), None);
    }

    #[test]
    fn test_pearson_pvalue_known() {
        // r = 0.5 over 10 samples: t = 1.633 with 8 df, two-sided p = 0.1411
        let p = pearson_pvalue(0.5, 10);
        assert!((p - 0.1411).abs() < 1e-3, "p = {}", p);

        assert_eq!(pearson_pvalue(0.3, 2), 1.0);
        assert!((pearson_pvalue(0.0, 20) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_incomplete_beta_symmetry() {
        let v = regularized_incomplete_beta(2.0, 3.0, 0.4);
        let w = regularized_incomplete_beta(3.0, 2.0, 0.6);
        assert!((v + w - 1.0).abs() < 1e-12);
        // I_x(1, 1) = x
        assert!((regularized_incomplete_beta(1.0, 1.0, 0.25) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_gaussian_kernels() {
        let k = gaussian_kernel1d(1.0, 0, 4.0);
        assert_eq!(k.len(), 9);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert_eq!(k[0], k[8]);

        let d2 = gaussian_kernel1d(2.0, 2, 4.0);
        assert_eq!(d2.len(), 17);
        // second derivative of a Gaussian is negative at the center
        assert!(d2[8] < 0.0);
        assert!(d2.iter().sum::<f32>().abs() < 1e-3);
    }

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect_index(-1, 4), 0);
        assert_eq!(reflect_index(-2, 4), 1);
        assert_eq!(reflect_index(4, 4), 3);
        assert_eq!(reflect_index(5, 4), 2);
        assert_eq!(reflect_index(2, 4), 2);
        assert_eq!(reflect_index(-7, 1), 0);
    }
}
