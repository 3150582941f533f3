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
use crate::constants::FLAT_ROOF_DEGREES_THRESHOLD;
use crate::datatypes::RoofPlane;
use crate::ols::{fit_metrics, PlaneFit};
use geo::EuclideanDistance;
use geo_types::{Point, Polygon};
use itertools::Itertools;
use geo_util::raster::{crofton_perimeter_4, convex_hull_ratio, thinness_ratio, PixelGrid};
use geo_util::vector::{aspect_deg, azimuth_deg, deg_diff, polygon_line_segments, simplify_by_angle, slope_deg};

/// Read-only per-building state shared by both fitters
pub struct FitContext<'a> {
    pub grid: &'a PixelGrid,
    pub xy: &'a [(f64, f64)],
    pub z: &'a [f64],
    pub aspect: &'a [f64],
    pub polygon: &'a Polygon<f64>,
    pub total_points_in_building: usize,
    pub min_points_per_plane: usize,
}

/// Properties of the winning candidate, carried through to the refit
#[derive(Debug, Clone)]
pub struct PlaneProperties {
    pub sd: f64,
    pub score: f64,
    pub aspect_circ_mean: Option<f64>,
    pub aspect_circ_sd: Option<f64>,
    pub thinness_ratio: f64,
    pub cv_hull_ratio: f64,
    pub plane_type: String,
    pub plane_id: String,
    pub aspect_adjusted: f64,
}

/// One invocation of a fitter produces at most one plane
pub enum FitOutcome {
    /// No further planes will be found, stop invoking
    Finished,
    /// The best candidate failed the refit, invoke again
    Rejected,
    /// An accepted plane and its inlier mask over the building pixels
    Accepted(Box<RoofPlane>, Vec<bool>),
}

/// Builds the output plane from the refit coefficients and final inliers
pub fn finalize_plane(
    ctx: &FitContext,
    refit: &PlaneFit,
    final_mask: &[bool],
    props: &PlaneProperties,
) -> RoofPlane {
    let mut y_true = Vec::new();
    let mut y_pred = Vec::new();
    let mut inliers_xy = Vec::new();
    for (i, &m) in final_mask.iter().enumerate() {
        if m {
            y_true.push(ctx.z[i]);
            y_pred.push(refit.predict(ctx.xy[i].0, ctx.xy[i].1));
            inliers_xy.push(ctx.xy[i]);
        }
    }
    let metrics = fit_metrics(&y_true, &y_pred);
    let slope = slope_deg(refit.a, refit.b);

    RoofPlane {
        toid: String::new(),
        plane_type: props.plane_type.clone(),
        plane_id: props.plane_id.clone(),
        x_coef: refit.a,
        y_coef: refit.b,
        intercept: refit.d,
        slope,
        is_flat: slope <= FLAT_ROOF_DEGREES_THRESHOLD,
        aspect_raw: aspect_deg(refit.a, refit.b),
        aspect: props.aspect_adjusted,
        sd: props.sd,
        score: props.score,
        r2: metrics.r2,
        mae: metrics.mae,
        mse: metrics.mse,
        rmse: metrics.rmse,
        msle: metrics.msle,
        mape: metrics.mape,
        aspect_circ_mean: props.aspect_circ_mean,
        aspect_circ_sd: props.aspect_circ_sd,
        thinness_ratio: props.thinness_ratio,
        cv_hull_ratio: props.cv_hull_ratio,
        inliers_xy,
    }
}

/// Minimum acceptable thinness ratio by component area, pixels.
/// Worked out experimentally against a labelled corpus.
pub fn min_thinness_ratio(area: usize) -> f64 {
    if area <= 40 {
        0.45
    } else if area <= 50 {
        0.4
    } else if area <= 300 {
        0.24
    } else if area <= 500 {
        0.2
    } else if area <= 750 {
        0.15
    } else if area <= 3000 {
        0.10
    } else {
        0.07
    }
}

/// Convex hull ratio and thinness of the given inlier component
pub fn component_morphology(grid: &PixelGrid, component: &[bool], area: usize) -> (f64, f64) {
    let img = grid.mask_image(component);
    let cv_hull_ratio = convex_hull_ratio(&img, area);
    let perimeter = crofton_perimeter_4(&img);
    let thinness = thinness_ratio(area, perimeter);
    (cv_hull_ratio, thinness)
}

/// The azimuths a roof plane may snap to, derived from the building
/// footprint: the bearing of each straight face of at least a metre, plus
/// each rotated by 90, 180 and 270 degrees.  Empty when no face lies within
/// 10m of the inliers.
pub fn get_potential_aspects(inliers_xy: &[(f64, f64)], polygon: &Polygon<f64>) -> Vec<f64> {
    let simplified = simplify_by_angle(polygon, 2.0);
    let segments = polygon_line_segments(&simplified, 1.0);
    if segments.is_empty() {
        return vec![];
    }

    let mut nearby = false;
    for buf in [1.0, 3.0, 10.0] {
        'outer: for segment in &segments {
            for &(x, y) in inliers_xy {
                if Point::new(x, y).euclidean_distance(segment) <= buf {
                    nearby = true;
                    break 'outer;
                }
            }
        }
        if nearby {
            break;
        }
    }
    if !nearby {
        return vec![];
    }

    segments
        .iter()
        .flat_map(|segment| {
            let az = azimuth_deg(
                (segment.start.x, segment.start.y),
                (segment.end.x, segment.end.y),
            ) as i64;
            [0, 90, 180, 270].into_iter().map(move |rot| (az + rot) % 360)
        })
        .sorted_unstable()
        .dedup()
        .map(|a| a as f64)
        .collect()
}

/// The azimuth closest to the aspect, when it is within the threshold
pub fn closest_azimuth(azimuths: &[f64], aspect: f64, thresh: f64) -> Option<f64> {
    let az = azimuths.iter().copied().min_by(|a, b| {
        deg_diff(*a, aspect)
            .partial_cmp(&deg_diff(*b, aspect))
            .unwrap_or(std::cmp::Ordering::Equal)
    })?;
    if deg_diff(az, aspect) < thresh {
        Some(az)
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use geo_util::vector::square;

    #[test]
    fn test_min_thinness_ratio_table() {
        assert_eq!(min_thinness_ratio(20), 0.45);
        assert_eq!(min_thinness_ratio(45), 0.4);
        assert_eq!(min_thinness_ratio(200), 0.24);
        assert_eq!(min_thinness_ratio(400), 0.2);
        assert_eq!(min_thinness_ratio(600), 0.15);
        assert_eq!(min_thinness_ratio(2500), 0.10);
        assert_eq!(min_thinness_ratio(5000), 0.07);
    }

    #[test]
    fn test_potential_aspects_of_square() {
        let poly = square(0.0, 0.0, 10.0);
        let inliers = vec![(5.0, 5.0)];
        let mut aspects = get_potential_aspects(&inliers, &poly);
        aspects.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(aspects, vec![0.0, 90.0, 180.0, 270.0]);
    }

    #[test]
    fn test_potential_aspects_far_away() {
        let poly = square(0.0, 0.0, 10.0);
        //inliers more than 10m from any face
        let inliers = vec![(50.0, 50.0)];
        assert!(get_potential_aspects(&inliers, &poly).is_empty());
    }

    #[test]
    fn test_closest_azimuth() {
        let azimuths = vec![0.0, 90.0, 180.0, 270.0];
        assert_eq!(closest_azimuth(&azimuths, 95.0, 15.0), Some(90.0));
        assert_eq!(closest_azimuth(&azimuths, 45.0, 15.0), None);
        //wraps across north
        assert_eq!(closest_azimuth(&azimuths, 355.0, 15.0), Some(0.0));
    }
}
