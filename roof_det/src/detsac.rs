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

//! Deterministic sample consensus: instead of sampling random triples, each
//! trial consumes one premade candidate inlier set and fits a plane to it,
//! with the LiDAR-specific acceptance rules:
//!
//! * inliers must form one 4-connected region of a minimum size (planes
//!   that fit disconnected scraps of other roofs are rejected);
//! * the candidate's own pixels get a looser residual threshold than the
//!   classification threshold, so a roughly planar seed can pull in its
//!   neighbourhood;
//! * non-flat planes must agree with the circular mean of the detected
//!   per-pixel aspects;
//! * the inlier region must be compact (convex hull ratio) and not a sliver
//!   (thinness ratio);
//! * the plane aspect must snap to one of the building's face azimuths.

use crate::constants::*;
use crate::datatypes::PremadePlane;
use crate::fit_rules::{
    closest_azimuth, component_morphology, finalize_plane, get_potential_aspects, min_thinness_ratio,
    FitContext, FitOutcome, PlaneProperties,
};
use crate::ols::{abs_residuals, fit_plane, mean_absolute_error, std_dev};
use bitvec::vec::BitVec;
use geo_util::raster::{component_areas, pixel_components};
use geo_util::vector::{aspect_deg, aspect_rad, circular_mean_rad, circular_sd_rad, rad_diff, slope_deg};
use std::collections::HashSet;

struct BestCandidate {
    props: PlaneProperties,
    n_inliers: usize,
    restricted_mask: Vec<bool>,
    sample_idxs: Vec<usize>,
    sample_residual_threshold: f64,
}

/// Runs one DETSAC pass over the remaining candidates.  Mutates
/// `skip_planes`; the caller re-invokes until `FitOutcome::Finished`.
pub fn detsac_fit(
    ctx: &FitContext,
    premade_planes: &[PremadePlane],
    mask: &BitVec,
    skip_planes: &mut HashSet<String>,
) -> FitOutcome {
    if premade_planes
        .iter()
        .all(|p| skip_planes.contains(&p.plane_id))
    {
        return FitOutcome::Finished;
    }

    let mut best: Option<BestCandidate> = None;
    let mut score_best = f64::INFINITY;
    let mut n_inliers_best = 1usize;

    for plane in premade_planes {
        if skip_planes.contains(&plane.plane_id) {
            continue;
        }

        let fit = match fit_plane(ctx.xy, ctx.z, &plane.idxs) {
            Some(f) => f,
            None => {
                //degenerate candidate, never retry
                skip_planes.insert(plane.plane_id.clone());
                continue;
            }
        };

        let slope = slope_deg(fit.a, fit.b);
        let residual_threshold = if slope <= FLAT_ROOF_DEGREES_THRESHOLD {
            FLAT_ROOF_RESIDUAL_THRESHOLD
        } else {
            RESIDUAL_THRESHOLD
        };

        let residuals = abs_residuals(&fit, ctx.xy, ctx.z);

        //the candidate's own pixels may sit further from the plane,
        //pixels already on another plane may never be inliers
        let mut adjusted = residuals.clone();
        for &i in &plane.idxs {
            if adjusted[i] < plane.sample_residual_threshold {
                adjusted[i] = 0.0;
            }
        }
        for i in 0..adjusted.len() {
            if !mask[i] {
                adjusted[i] = NEVER_INLIER;
            }
        }

        let inlier_mask: Vec<bool> = adjusted.iter().map(|&r| r < residual_threshold).collect();
        let n_inliers = inlier_mask.iter().filter(|&&m| m).count();

        if n_inliers < ctx.min_points_per_plane {
            skip_planes.insert(plane.plane_id.clone());
            continue;
        }

        //the plane must be one contiguous roof area, not scraps
        let (labels, num_groups) = pixel_components(ctx.grid, &inlier_mask);
        let areas = component_areas(&labels, num_groups);
        let (largest_idx, &largest_area) = areas
            .iter()
            .enumerate()
            .max_by_key(|&(i, &a)| (a, std::cmp::Reverse(i)))
            .expect("non-empty inlier set");
        if largest_area < ctx.min_points_per_plane
            || (largest_area as f64)
                < ctx.total_points_in_building as f64 * MIN_POINTS_PER_PLANE_PERC
        {
            skip_planes.insert(plane.plane_id.clone());
            continue;
        }

        let largest_label = (largest_idx + 1) as i32;
        let restricted: Vec<bool> = labels.iter().map(|&l| l == largest_label).collect();

        let mut y_true = Vec::with_capacity(largest_area);
        let mut y_pred = Vec::with_capacity(largest_area);
        let mut restricted_residuals = Vec::with_capacity(largest_area);
        for (i, &m) in restricted.iter().enumerate() {
            if m {
                y_true.push(ctx.z[i]);
                y_pred.push(fit.predict(ctx.xy[i].0, ctx.xy[i].1));
                restricted_residuals.push(residuals[i]);
            }
        }
        let score = mean_absolute_error(&y_true, &y_pred);
        let sd = std_dev(&restricted_residuals);

        //between two good fits prefer the bigger plane, otherwise the
        //better fit.  Worse candidates are not skipped permanently, they
        //may win a later pass once the current best's pixels are taken.
        if score < ROOFDET_GOOD_SCORE && score_best < ROOFDET_GOOD_SCORE {
            if n_inliers <= n_inliers_best
                || (n_inliers == n_inliers_best && score > score_best)
            {
                continue;
            }
        } else if score > score_best || (score == score_best && n_inliers <= n_inliers_best) {
            continue;
        }

        let (aspect_circ_mean, aspect_circ_sd) = if slope > FLAT_ROOF_DEGREES_THRESHOLD {
            let aspect_inliers: Vec<f64> = restricted
                .iter()
                .enumerate()
                .filter(|(_, &m)| m)
                .map(|(i, _)| ctx.aspect[i].to_radians())
                .collect();
            let plane_aspect = aspect_rad(fit.a, fit.b);
            let circ_mean = circular_mean_rad(&aspect_inliers);
            if rad_diff(plane_aspect, circ_mean) > MAX_ASPECT_CIRCULAR_MEAN_DEGREES.to_radians() {
                skip_planes.insert(plane.plane_id.clone());
                continue;
            }
            let circ_sd = circular_sd_rad(&aspect_inliers);
            if circ_sd > MAX_ASPECT_CIRCULAR_SD {
                skip_planes.insert(plane.plane_id.clone());
                continue;
            }
            (Some(circ_mean.to_degrees()), Some(circ_sd))
        } else {
            (None, None)
        };

        let (cv_hull_ratio, thinness) = component_morphology(ctx.grid, &restricted, largest_area);
        if cv_hull_ratio < MIN_CONVEX_HULL_RATIO {
            skip_planes.insert(plane.plane_id.clone());
            continue;
        }
        if thinness < min_thinness_ratio(largest_area) {
            skip_planes.insert(plane.plane_id.clone());
            continue;
        }

        let inliers_xy: Vec<(f64, f64)> = restricted
            .iter()
            .enumerate()
            .filter(|(_, &m)| m)
            .map(|(i, _)| ctx.xy[i])
            .collect();
        let azimuths = get_potential_aspects(&inliers_xy, ctx.polygon);
        if azimuths.is_empty() {
            skip_planes.insert(plane.plane_id.clone());
            continue;
        }

        let aspect_adjusted = if slope > FLAT_ROOF_DEGREES_THRESHOLD {
            let target = aspect_deg(fit.a, fit.b);
            closest_azimuth(&azimuths, target, AZIMUTH_ALIGNMENT_THRESHOLD).or_else(|| {
                aspect_circ_mean
                    .and_then(|m| closest_azimuth(&azimuths, m, AZIMUTH_ALIGNMENT_THRESHOLD))
            })
        } else {
            closest_azimuth(&azimuths, 180.0, FLAT_ROOF_AZIMUTH_ALIGNMENT_THRESHOLD)
        };
        let aspect_adjusted = match aspect_adjusted {
            Some(a) => a,
            None => {
                skip_planes.insert(plane.plane_id.clone());
                continue;
            }
        };

        score_best = score;
        n_inliers_best = n_inliers;
        best = Some(BestCandidate {
            props: PlaneProperties {
                sd,
                score,
                aspect_circ_mean,
                aspect_circ_sd,
                thinness_ratio: thinness,
                cv_hull_ratio,
                plane_type: plane.plane_type.to_string(),
                plane_id: plane.plane_id.clone(),
                aspect_adjusted,
            },
            n_inliers,
            restricted_mask: restricted,
            sample_idxs: plane.idxs.clone(),
            sample_residual_threshold: plane.sample_residual_threshold,
        });
    }

    let best = match best {
        Some(b) => b,
        None => return FitOutcome::Finished,
    };

    //the winning candidate is never revisited, whatever the refit decides
    skip_planes.insert(best.props.plane_id.clone());

    //refit on the accepted inliers and reclassify every pixel
    let refit_idxs: Vec<usize> = best
        .restricted_mask
        .iter()
        .enumerate()
        .filter(|(_, &m)| m)
        .map(|(i, _)| i)
        .collect();
    let refit = match fit_plane(ctx.xy, ctx.z, &refit_idxs) {
        Some(f) => f,
        None => return FitOutcome::Rejected,
    };

    let refit_slope = slope_deg(refit.a, refit.b);
    let residual_threshold = if refit_slope <= FLAT_ROOF_DEGREES_THRESHOLD {
        FLAT_ROOF_RESIDUAL_THRESHOLD
    } else {
        RESIDUAL_THRESHOLD
    };

    let mut residuals = abs_residuals(&refit, ctx.xy, ctx.z);
    for &i in &best.sample_idxs {
        if residuals[i] < best.sample_residual_threshold {
            residuals[i] = 0.0;
        }
    }
    for i in 0..residuals.len() {
        if !mask[i] {
            residuals[i] = NEVER_INLIER;
        }
    }
    let inlier_mask: Vec<bool> = residuals.iter().map(|&r| r < residual_threshold).collect();

    let final_mask = match geo_util::raster::largest_component_mask(ctx.grid, &inlier_mask) {
        Some((m, area)) if area >= ctx.min_points_per_plane => m,
        _ => return FitOutcome::Rejected,
    };

    let plane = finalize_plane(ctx, &refit, &final_mask, &best.props);
    FitOutcome::Accepted(Box::new(plane), final_mask)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::*;

    #[test]
    fn test_detsac_accepts_a_clean_plane() {
        let b = single_slope_building();
        let fixture = BuildingFixture::new(&b);
        let ctx = fixture.fit_context();

        let premade =
            crate::premade_planes::create_premade_planes(fixture.grid(), &fixture.aspect, &fixture.z);
        assert!(!premade.is_empty());

        let mask = fixture.full_mask();
        let mut skip = HashSet::new();
        match detsac_fit(&ctx, &premade, &mask, &mut skip) {
            FitOutcome::Accepted(plane, inliers) => {
                assert!((plane.slope - 30.0).abs() < 1.0);
                assert!(inliers.iter().filter(|&&m| m).count() >= 8);
                //southerly plane snapped to the south face
                assert!((plane.aspect - 180.0).abs() < 1e-9);
                assert!(!plane.is_flat);
                assert!(skip.contains(&plane.plane_id));
            }
            _ => panic!("expected a plane"),
        }
    }

    #[test]
    fn test_detsac_finished_when_all_skipped() {
        let b = single_slope_building();
        let fixture = BuildingFixture::new(&b);
        let ctx = fixture.fit_context();

        let premade =
            crate::premade_planes::create_premade_planes(fixture.grid(), &fixture.aspect, &fixture.z);
        let mask = fixture.full_mask();
        let mut skip: HashSet<String> =
            premade.iter().map(|p| p.plane_id.clone()).collect();

        assert!(matches!(
            detsac_fit(&ctx, &premade, &mask, &mut skip),
            FitOutcome::Finished
        ));
    }

    #[test]
    fn test_detsac_respects_assigned_pixels() {
        let b = single_slope_building();
        let fixture = BuildingFixture::new(&b);
        let ctx = fixture.fit_context();

        let premade =
            crate::premade_planes::create_premade_planes(fixture.grid(), &fixture.aspect, &fixture.z);
        //everything already taken
        let mut mask = fixture.full_mask();
        for i in 0..mask.len() {
            mask.set(i, false);
        }
        let mut skip = HashSet::new();

        match detsac_fit(&ctx, &premade, &mask, &mut skip) {
            FitOutcome::Finished => {}
            _ => panic!("no pixels available, nothing should fit"),
        }
    }
}
