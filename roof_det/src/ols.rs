/*
This file is part of the Roof Detection Tool
Copyright (C) 2022 Novel-T

The Roof Detection Tool is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>.
*/
use serde::Serialize;

/// The plane z = a*x + b*y + d
#[derive(Debug, Copy, Clone, Serialize)]
pub struct PlaneFit {
    pub a: f64,
    pub b: f64,
    pub d: f64,
}

impl PlaneFit {
    #[inline]
    pub fn predict(&self, x: f64, y: f64) -> f64 {
        self.a * x + self.b * y + self.d
    }
}

/// Ordinary least squares over the indexed subset of the pixels.
/// None when the points are degenerate (collinear or fewer than 3).
pub fn fit_plane(xy: &[(f64, f64)], z: &[f64], idxs: &[usize]) -> Option<PlaneFit> {
    let n = idxs.len();
    if n < 3 {
        return None;
    }
    let nf = n as f64;

    let mut x_mean = 0.0;
    let mut y_mean = 0.0;
    let mut z_mean = 0.0;
    for &i in idxs {
        x_mean += xy[i].0;
        y_mean += xy[i].1;
        z_mean += z[i];
    }
    x_mean /= nf;
    y_mean /= nf;
    z_mean /= nf;

    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    let mut sxz = 0.0;
    let mut syz = 0.0;
    for &i in idxs {
        let dx = xy[i].0 - x_mean;
        let dy = xy[i].1 - y_mean;
        let dz = z[i] - z_mean;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
        sxz += dx * dz;
        syz += dy * dz;
    }

    let det = sxx * syy - sxy * sxy;
    let scale = (sxx.abs() + syy.abs()).max(1e-12);
    if det.abs() < 1e-12 * scale {
        return None;
    }

    let a = (syz * -sxy + sxz * syy) / det;
    let b = (syz * sxx - sxz * sxy) / det;
    let d = z_mean - a * x_mean - b * y_mean;

    if !a.is_finite() || !b.is_finite() || !d.is_finite() {
        return None;
    }

    Some(PlaneFit { a, b, d })
}

/// Absolute residuals of every pixel to the plane
pub fn abs_residuals(fit: &PlaneFit, xy: &[(f64, f64)], z: &[f64]) -> Vec<f64> {
    xy.iter()
        .zip(z.iter())
        .map(|(&(x, y), &zv)| (zv - fit.predict(x, y)).abs())
        .collect()
}

#[derive(Debug, Copy, Clone, Serialize)]
pub struct FitMetrics {
    pub r2: f64,
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub msle: f64,
    pub mape: f64,
}

pub fn mean_absolute_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let n = y_true.len() as f64;
    y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).abs())
        .sum::<f64>()
        / n
}

pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let n = y_true.len() as f64;
    let mean = y_true.iter().sum::<f64>() / n;
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p) * (t - p))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean) * (t - mean)).sum();

    if ss_tot == 0.0 {
        //constant targets: perfect prediction scores 1, anything else 0
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}

pub fn fit_metrics(y_true: &[f64], y_pred: &[f64]) -> FitMetrics {
    let n = y_true.len() as f64;

    let mae = mean_absolute_error(y_true, y_pred);
    let mse = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p) * (t - p))
        .sum::<f64>()
        / n;
    let rmse = mse.sqrt();

    //undefined when log1p cannot be taken
    let msle = if y_true
        .iter()
        .chain(y_pred.iter())
        .any(|&v| v <= -1.0 || !v.is_finite())
    {
        f64::NAN
    } else {
        y_true
            .iter()
            .zip(y_pred.iter())
            .map(|(t, p)| {
                let d = t.ln_1p() - p.ln_1p();
                d * d
            })
            .sum::<f64>()
            / n
    };

    let mape = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).abs() / t.abs().max(f64::EPSILON))
        .sum::<f64>()
        / n;

    FitMetrics {
        r2: r2_score(y_true, y_pred),
        mae,
        mse,
        rmse,
        msle,
        mape,
    }
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt()
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn test_fit_exact_plane() {
        //z = 0.5x - 0.25y + 3
        let mut xy = Vec::new();
        let mut z = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                let (x, y) = (i as f64, j as f64);
                xy.push((x, y));
                z.push(0.5 * x - 0.25 * y + 3.0);
            }
        }
        let idxs: Vec<usize> = (0..xy.len()).collect();
        let fit = fit_plane(&xy, &z, &idxs).unwrap();
        assert!(approx_eq!(f64, fit.a, 0.5, epsilon = 1e-9));
        assert!(approx_eq!(f64, fit.b, -0.25, epsilon = 1e-9));
        assert!(approx_eq!(f64, fit.d, 3.0, epsilon = 1e-9));
    }

    #[test]
    fn test_fit_degenerate_is_none() {
        //collinear points do not define a plane
        let xy = vec![(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.0, 3.0)];
        let z = vec![0.0, 1.0, 2.0, 3.0];
        let idxs: Vec<usize> = (0..4).collect();
        assert!(fit_plane(&xy, &z, &idxs).is_none());
    }

    #[test]
    fn test_fit_too_few_points() {
        let xy = vec![(0.0, 0.0), (1.0, 0.0)];
        let z = vec![0.0, 1.0];
        assert!(fit_plane(&xy, &z, &[0, 1]).is_none());
    }

    #[test]
    fn test_r2_score() {
        let y = vec![1.0, 2.0, 3.0];
        assert!((r2_score(&y, &y) - 1.0).abs() < 1e-12);
        assert!(r2_score(&y, &[2.0, 2.0, 2.0]).abs() < 1e-12);

        let constant = vec![5.0, 5.0];
        assert_eq!(r2_score(&constant, &constant), 1.0);
        assert_eq!(r2_score(&constant, &[5.0, 6.0]), 0.0);
    }

    #[test]
    fn test_metrics_perfect_fit() {
        let y = vec![1.0, 2.0, 4.0];
        let m = fit_metrics(&y, &y);
        assert_eq!(m.mae, 0.0);
        assert_eq!(m.mse, 0.0);
        assert_eq!(m.rmse, 0.0);
        assert_eq!(m.msle, 0.0);
        assert_eq!(m.mape, 0.0);
        assert_eq!(m.r2, 1.0);
    }

    #[test]
    fn test_msle_undefined_below_minus_one() {
        let m = fit_metrics(&[-2.0, 1.0], &[-2.0, 1.0]);
        assert!(m.msle.is_nan());
    }

    #[test]
    fn test_std_dev() {
        assert_eq!(std_dev(&[2.0, 2.0, 2.0]), 0.0);
        assert!((std_dev(&[1.0, 3.0]) - 1.0).abs() < 1e-12);
    }
}
