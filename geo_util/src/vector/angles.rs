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
use std::f64::consts::PI;

pub fn to_positive_angle(deg: f64) -> f64 {
    let a = deg % 360.0;
    if a < 0.0 {
        a + 360.0
    } else {
        a
    }
}

/// Compass bearing from p1 to p2, degrees clockwise from north in [0, 360)
pub fn azimuth_deg(p1: (f64, f64), p2: (f64, f64)) -> f64 {
    let angle = (p2.0 - p1.0).atan2(p2.1 - p1.1);
    to_positive_angle(angle.to_degrees())
}

/// Slope of the plane z = a*x + b*y + d, degrees from horizontal
pub fn slope_deg(a: f64, b: f64) -> f64 {
    (a * a + b * b).sqrt().atan().to_degrees()
}

/// Aspect of the plane z = a*x + b*y + d as a compass bearing in [0, 2pi)
pub fn aspect_rad(a: f64, b: f64) -> f64 {
    let r = a.atan2(b);
    if r < 0.0 {
        r + 2.0 * PI
    } else {
        r
    }
}

pub fn aspect_deg(a: f64, b: f64) -> f64 {
    to_positive_angle(aspect_rad(a, b).to_degrees())
}

/// Smallest difference between 2 bearings, in [0, 180]
pub fn deg_diff(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % 360.0;
    d.min(360.0 - d)
}

/// Smallest difference between 2 angles in radians, in [0, pi]
pub fn rad_diff(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % (2.0 * PI);
    d.min(2.0 * PI - d)
}

/// Mean of angles computed in the complex plane, in [0, 2pi)
pub fn circular_mean_rad(angles: &[f64]) -> f64 {
    let n = angles.len() as f64;
    let sin_mean = angles.iter().map(|a| a.sin()).sum::<f64>() / n;
    let cos_mean = angles.iter().map(|a| a.cos()).sum::<f64>() / n;
    let r = sin_mean.atan2(cos_mean);
    if r < 0.0 {
        r + 2.0 * PI
    } else {
        r
    }
}

/// Circular standard deviation, sqrt(-2 ln R)
pub fn circular_sd_rad(angles: &[f64]) -> f64 {
    let n = angles.len() as f64;
    let sin_mean = angles.iter().map(|a| a.sin()).sum::<f64>() / n;
    let cos_mean = angles.iter().map(|a| a.cos()).sum::<f64>() / n;
    let r = (sin_mean * sin_mean + cos_mean * cos_mean).sqrt();
    if r <= 0.0 {
        //uniformly spread angles
        return f64::INFINITY;
    }
    (-2.0 * r.ln()).sqrt()
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn test_azimuth_deg() {
        assert!(approx_eq!(f64, azimuth_deg((0.0, 0.0), (0.0, 1.0)), 0.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, azimuth_deg((0.0, 0.0), (1.0, 0.0)), 90.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, azimuth_deg((0.0, 0.0), (0.0, -1.0)), 180.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, azimuth_deg((0.0, 0.0), (-1.0, 0.0)), 270.0, epsilon = 1e-9));
    }

    #[test]
    fn test_slope_deg() {
        assert!((slope_deg(0.0, 0.0)).abs() < 1e-9);
        assert!((slope_deg(1.0, 0.0) - 45.0).abs() < 1e-9);
        assert!(slope_deg(100.0, 100.0) < 90.0);
    }

    #[test]
    fn test_aspect_deg_quadrants() {
        assert!((aspect_deg(0.0, 1.0) - 0.0).abs() < 1e-9);
        assert!((aspect_deg(1.0, 0.0) - 90.0).abs() < 1e-9);
        assert!((aspect_deg(0.0, -1.0) - 180.0).abs() < 1e-9);
        assert!((aspect_deg(-1.0, 0.0) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_deg_diff_wraps() {
        assert!((deg_diff(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((deg_diff(10.0, 350.0) - 20.0).abs() < 1e-9);
        assert!((deg_diff(180.0, 0.0) - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_circular_mean_wraps_north() {
        let angles = [350.0f64.to_radians(), 10.0f64.to_radians()];
        let mean = circular_mean_rad(&angles);
        //350 and 10 average to north, not to 180
        assert!(rad_diff(mean, 0.0) < 1e-9);
    }

    #[test]
    fn test_circular_sd() {
        let tight = [1.0, 1.01, 0.99];
        let spread = [0.0, 2.0, 4.0];
        assert!(circular_sd_rad(&tight) < 0.05);
        assert!(circular_sd_rad(&spread) > 1.0);
    }
}
