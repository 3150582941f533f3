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

/// A roof is considered flat if its slope is at or below this. Not to be
/// confused with the parameter `flat_roof_degrees`, which is the slope at
/// which panels are mounted on flat roofs.
pub const FLAT_ROOF_DEGREES_THRESHOLD: f64 = 5.0;

/// If a roof plane has an aspect closer than this to the azimuth of one of
/// the facings of the building, re-align the roof plane to that azimuth.
pub const AZIMUTH_ALIGNMENT_THRESHOLD: f64 = 15.0;

/// Same as above, but for flat roofs
pub const FLAT_ROOF_AZIMUTH_ALIGNMENT_THRESHOLD: f64 = 46.0;

/// Mean absolute error in metres under which a plane fit counts as good.
/// Between two good fits the fitters prefer the larger plane; the merger
/// accepts a merge outright when the merged fit is still good.
pub const ROOFDET_GOOD_SCORE: f64 = 0.08;

/// Residual threshold for non-flat planes, metres
pub const RESIDUAL_THRESHOLD: f64 = 0.25;

/// More restrictive residual threshold for flat roofs, which tend to be
/// covered with obstacles, HVAC, pipes etc
pub const FLAT_ROOF_RESIDUAL_THRESHOLD: f64 = 0.1;

/// Residual forced onto pixels already taken by another plane
pub const NEVER_INLIER: f64 = 9999.0;

/// Minimum size of the largest connected inlier group as a fraction of the
/// pixels in the building.  Only affects larger buildings; stops the fitters
/// finding lots of tiny little sections.
pub const MIN_POINTS_PER_PLANE_PERC: f64 = 0.008;

pub const MIN_CONVEX_HULL_RATIO: f64 = 0.65;

/// Max difference between the circular mean of the inlier aspects and the
/// plane's own aspect, degrees
pub const MAX_ASPECT_CIRCULAR_MEAN_DEGREES: f64 = 80.0;

/// Max circular standard deviation of the inlier aspects, radians
pub const MAX_ASPECT_CIRCULAR_SD: f64 = 1.5;

pub const MAX_SLOPE: f64 = 75.0;
pub const MIN_SLOPE: f64 = 0.0;

/// Area in m2 of a building to consider large for RANSAC purposes
pub const RANSAC_LARGE_BUILDING: f64 = 1000.0;
/// Area in m2 of a building to consider small for RANSAC purposes
/// (which has the effect of increasing `max_trials`, as it is harder to fit
/// a good plane to a smaller set of points)
pub const RANSAC_SMALL_BUILDING: f64 = 100.0;

pub const RANSAC_LARGE_MAX_TRIALS: usize = 2000;
pub const RANSAC_MEDIUM_MAX_TRIALS: usize = 2000;
pub const RANSAC_SMALL_MAX_TRIALS: usize = 3000;

/// R2 above which a merged non-flat plane pair is accepted outright
pub const R2_GOOD: f64 = 0.925;

/// A flat plane is rejected when the obstacle pixels around it exceed this
/// fraction of its size
pub const MESS_THRESHOLD_PCT: f64 = 0.14;

/// The whole building is rejected when obstacle and rejected-flat pixels
/// exceed this fraction of the total
pub const TOTAL_MESS_THRESHOLD_PCT: f64 = 0.85;

/// Sample residual thresholds used by the premade plane candidates, metres
pub const SAMPLE_RESIDUAL_THRESHOLDS: [f64; 2] = [0.25, 2.0];

/// Height clustering parameters (metres / samples)
pub const HEIGHT_CLUSTER_EPS: f64 = 0.6;
pub const HEIGHT_CLUSTER_MIN_SAMPLES: usize = 5;

/// Gap kept between two deconflicted roof planes, metres
pub const MIN_DIST_BETWEEN_PLANES: f64 = 0.1;

pub fn min_points_per_plane(resolution_metres: f64) -> usize {
    std::cmp::min(8, (8.0 / resolution_metres).round() as i64) as usize
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_min_points_per_plane_scaling() {
        assert_eq!(min_points_per_plane(2.0), 4);
        assert_eq!(min_points_per_plane(1.0), 8);
        assert_eq!(min_points_per_plane(0.5), 8);
    }
}
