//! Small robust-statistics helpers shared by the core.

use statrs::function::erf::{erf, erf_inv};

/// MAD to Gaussian sigma.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Median of a slice; `NaN` for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    let n = v.len();
    if n % 2 == 1 {
        v[n / 2]
    } else {
        0.5 * (v[n / 2 - 1] + v[n / 2])
    }
}

/// Unscaled median absolute deviation about the median.
pub fn mad(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = median(values);
    let dev: Vec<f64> = values.iter().map(|v| (v - m).abs()).collect();
    median(&dev)
}

pub fn scaled_mad(values: &[f64]) -> f64 {
    mad(values) * MAD_TO_SIGMA
}

/// Minimum and maximum; `None` for an empty slice.
pub fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    values.iter().fold(None, |acc, &v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Sigma level at which `events` false positives are expected among
/// `population` Gaussian samples: `sqrt(2) * erfinv(1 - events / population)`.
pub fn ten_event_sigma(population: usize, events: f64) -> f64 {
    if population == 0 || events >= population as f64 {
        return 0.0;
    }
    let p = 1.0 - events / population as f64;
    std::f64::consts::SQRT_2 * erf_inv(p)
}

pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

pub fn normal_quantile(q: f64) -> f64 {
    std::f64::consts::SQRT_2 * erf_inv(2.0 * q - 1.0)
}

/// Unscaled MAD of a unit Gaussian restricted to the quantile slice
/// `[q_lo, q_hi]`, found by bisection on the half-width.
pub fn gaussian_slice_mad(q_lo: f64, q_hi: f64) -> f64 {
    let q_lo = q_lo.clamp(0.0, 1.0);
    let q_hi = q_hi.clamp(q_lo, 1.0);
    let mass = q_hi - q_lo;
    if mass <= 0.0 {
        return 0.0;
    }
    let z_mid = normal_quantile(0.5 * (q_lo + q_hi));
    let covered = |t: f64| {
        let upper = normal_cdf(z_mid + t).min(q_hi);
        let lower = normal_cdf(z_mid - t).max(q_lo);
        (upper - lower).max(0.0) / mass
    };
    let (mut lo, mut hi) = (0.0, 10.0);
    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        if covered(mid) < 0.5 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

// ---------------------------------------------------------------------------
// Least-squares polynomial fit (order 0..=2)
// ---------------------------------------------------------------------------

/// Fit `y = c0 + c1 x + c2 x^2 ...` of the given order by normal equations.
/// Returns `None` when the system is singular or under-determined.
pub fn polyfit(x: &[f64], y: &[f64], order: usize) -> Option<Vec<f64>> {
    let m = order + 1;
    if x.len() != y.len() || x.len() < m || order > 2 {
        return None;
    }
    // Centre x to keep the normal matrix well conditioned.
    let x0 = x.iter().sum::<f64>() / x.len() as f64;

    let mut a = [[0.0f64; 4]; 3];
    for (&xi, &yi) in x.iter().zip(y) {
        let t = xi - x0;
        let pows = [1.0, t, t * t, t * t * t, t * t * t * t];
        for r in 0..m {
            for c in 0..m {
                a[r][c] += pows[r + c];
            }
            a[r][3] += pows[r] * yi;
        }
    }

    // Gauss-Jordan with partial pivoting.
    for col in 0..m {
        let piv = (col..m).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[piv][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, piv);
        for r in 0..m {
            if r != col {
                let f = a[r][col] / a[col][col];
                for c in col..4 {
                    a[r][c] -= f * a[col][c];
                }
            }
        }
    }
    let centred: Vec<f64> = (0..m).map(|i| a[i][3] / a[i][i]).collect();

    // Expand back to powers of the uncentred x.
    let mut coeffs = vec![0.0; m];
    match m {
        1 => coeffs[0] = centred[0],
        2 => {
            coeffs[0] = centred[0] - centred[1] * x0;
            coeffs[1] = centred[1];
        }
        _ => {
            coeffs[0] = centred[0] - centred[1] * x0 + centred[2] * x0 * x0;
            coeffs[1] = centred[1] - 2.0 * centred[2] * x0;
            coeffs[2] = centred[2];
        }
    }
    Some(coeffs)
}

pub fn polyval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}
