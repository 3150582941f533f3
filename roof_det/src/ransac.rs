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

//! Fallback randomised fitter, run once the premade candidates are
//! exhausted and a decent number of pixels remain.  Samples random triples
//! of still-available pixels and applies the same acceptance rules as
//! DETSAC, plus hard slope limits (walls and near-vertical junk show up as
//! steep triples once the LiDAR is cropped to the building).

use crate::constants::*;
use crate::fit_rules::{
    closest_azimuth, component_morphology, finalize_plane, get_potential_aspects, min_thinness_ratio,
    FitContext, FitOutcome, PlaneProperties,
};
use crate::ols::{abs_residuals, fit_plane, mean_absolute_error, std_dev};
use bitvec::vec::BitVec;
use geo_util::raster::{component_areas, largest_component_mask, pixel_components};
use geo_util::vector::{aspect_deg, aspect_rad, circular_mean_rad, circular_sd_rad, rad_diff, slope_deg};
use rand::rngs::StdRng;
use std::collections::HashSet;

const SAMPLE_ATTEMPTS: usize = 1000;

fn sample_key(sample: &[usize]) -> String {
    format!("RANSAC_{}_{}_{}", sample[0], sample[1], sample[2])
}

/// A random triple of distinct, still-available pixels
fn sample_available(n: usize, mask: &BitVec, rng: &mut StdRng) -> Option<Vec<usize>> {
    for _ in 0..SAMPLE_ATTEMPTS {
        let sample: Vec<usize> = rand::seq::index::sample(rng, n, 3).into_vec();
        if sample.iter().all(|&i| mask[i]) {
            return Some(sample);
        }
    }
    None
}

struct BestSample {
    props: PlaneProperties,
    inlier_idxs: Vec<usize>,
    key: String,
}

/// One RANSAC invocation: at most one accepted plane out of `max_trials`
/// random samples.  `skip_planes` persists across invocations for one
/// building; bad samples are only remembered within the invocation.
pub fn ransac_fit(
    ctx: &FitContext,
    mask: &BitVec,
    skip_planes: &mut HashSet<String>,
    max_trials: usize,
    rng: &mut StdRng,
) -> FitOutcome {
    let n_samples = ctx.xy.len();
    if n_samples < 3 {
        return FitOutcome::Finished;
    }

    let mut bad_samples: HashSet<String> = HashSet::new();
    let mut best: Option<BestSample> = None;
    let mut score_best = f64::INFINITY;
    let mut n_inliers_best = 1usize;

    for _ in 0..max_trials {
        let sample = match sample_available(n_samples, mask, rng) {
            Some(s) => s,
            None => return FitOutcome::Finished,
        };
        let key = sample_key(&sample);

        if bad_samples.contains(&key) || skip_planes.contains(&key) {
            continue;
        }

        let fit = match fit_plane(ctx.xy, ctx.z, &sample) {
            Some(f) => f,
            None => {
                bad_samples.insert(key);
                continue;
            }
        };

        let slope = slope_deg(fit.a, fit.b);
        if slope > MAX_SLOPE {
            skip_planes.insert(key);
            continue;
        }
        if slope < MIN_SLOPE {
            skip_planes.insert(key);
            continue;
        }

        let residual_threshold = if slope <= FLAT_ROOF_DEGREES_THRESHOLD {
            FLAT_ROOF_RESIDUAL_THRESHOLD
        } else {
            RESIDUAL_THRESHOLD
        };

        let residuals = abs_residuals(&fit, ctx.xy, ctx.z);
        let mut adjusted = residuals.clone();
        for i in 0..adjusted.len() {
            if !mask[i] {
                adjusted[i] = NEVER_INLIER;
            }
        }

        let inlier_mask: Vec<bool> = adjusted.iter().map(|&r| r < residual_threshold).collect();
        let n_inliers = inlier_mask.iter().filter(|&&m| m).count();

        if n_inliers < ctx.min_points_per_plane {
            skip_planes.insert(key);
            continue;
        }

        //score and aspect spread are judged on the unrestricted inlier set,
        //the sample defines the plane rather than a premade region
        let mut y_true = Vec::with_capacity(n_inliers);
        let mut y_pred = Vec::with_capacity(n_inliers);
        let mut inlier_residuals = Vec::with_capacity(n_inliers);
        for (i, &m) in inlier_mask.iter().enumerate() {
            if m {
                y_true.push(ctx.z[i]);
                y_pred.push(fit.predict(ctx.xy[i].0, ctx.xy[i].1));
                inlier_residuals.push(residuals[i]);
            }
        }
        let score = mean_absolute_error(&y_true, &y_pred);
        let sd = std_dev(&inlier_residuals);

        if score < ROOFDET_GOOD_SCORE && score_best < ROOFDET_GOOD_SCORE {
            if n_inliers <= n_inliers_best
                || (n_inliers == n_inliers_best && score > score_best)
            {
                bad_samples.insert(key);
                continue;
            }
        } else if score > score_best || (score == score_best && n_inliers <= n_inliers_best) {
            bad_samples.insert(key);
            continue;
        }

        let (aspect_circ_mean, aspect_circ_sd) = if slope > FLAT_ROOF_DEGREES_THRESHOLD {
            let aspect_inliers: Vec<f64> = inlier_mask
                .iter()
                .enumerate()
                .filter(|(_, &m)| m)
                .map(|(i, _)| ctx.aspect[i].to_radians())
                .collect();
            let plane_aspect = aspect_rad(fit.a, fit.b);
            let circ_mean = circular_mean_rad(&aspect_inliers);
            if rad_diff(plane_aspect, circ_mean) > MAX_ASPECT_CIRCULAR_MEAN_DEGREES.to_radians() {
                skip_planes.insert(key);
                continue;
            }
            let circ_sd = circular_sd_rad(&aspect_inliers);
            if circ_sd > MAX_ASPECT_CIRCULAR_SD {
                skip_planes.insert(key);
                continue;
            }
            (Some(circ_mean.to_degrees()), Some(circ_sd))
        } else {
            (None, None)
        };

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
            skip_planes.insert(key);
            continue;
        }

        let largest_label = (largest_idx + 1) as i32;
        let restricted: Vec<bool> = labels.iter().map(|&l| l == largest_label).collect();

        let (cv_hull_ratio, thinness) = component_morphology(ctx.grid, &restricted, largest_area);
        if cv_hull_ratio < MIN_CONVEX_HULL_RATIO {
            skip_planes.insert(key);
            continue;
        }
        if thinness < min_thinness_ratio(largest_area) {
            skip_planes.insert(key);
            continue;
        }

        let inliers_xy: Vec<(f64, f64)> = inlier_mask
            .iter()
            .enumerate()
            .filter(|(_, &m)| m)
            .map(|(i, _)| ctx.xy[i])
            .collect();
        let azimuths = get_potential_aspects(&inliers_xy, ctx.polygon);
        if azimuths.is_empty() {
            skip_planes.insert(key);
            continue;
        }

        let (target_az, az_diff_thresh) = if slope > FLAT_ROOF_DEGREES_THRESHOLD {
            (aspect_deg(fit.a, fit.b), AZIMUTH_ALIGNMENT_THRESHOLD)
        } else {
            (180.0, FLAT_ROOF_AZIMUTH_ALIGNMENT_THRESHOLD)
        };
        let aspect_adjusted = match closest_azimuth(&azimuths, target_az, az_diff_thresh) {
            Some(a) => a,
            None => {
                skip_planes.insert(key);
                continue;
            }
        };

        score_best = score;
        n_inliers_best = n_inliers;
        //the refit runs on the full inlier set, not only the largest group
        let inlier_idxs: Vec<usize> = inlier_mask
            .iter()
            .enumerate()
            .filter(|(_, &m)| m)
            .map(|(i, _)| i)
            .collect();
        best = Some(BestSample {
            props: PlaneProperties {
                sd,
                score,
                aspect_circ_mean,
                aspect_circ_sd,
                thinness_ratio: thinness,
                cv_hull_ratio,
                plane_type: "RANSAC".to_string(),
                plane_id: key,
                aspect_adjusted,
            },
            inlier_idxs,
            key: sample_key(&sample),
        });
    }

    let best = match best {
        Some(b) => b,
        None => return FitOutcome::Finished,
    };

    let refit = match fit_plane(ctx.xy, ctx.z, &best.inlier_idxs) {
        Some(f) => f,
        None => {
            skip_planes.insert(best.key);
            return FitOutcome::Rejected;
        }
    };

    let refit_slope = slope_deg(refit.a, refit.b);
    let residual_threshold = if refit_slope <= FLAT_ROOF_DEGREES_THRESHOLD {
        FLAT_ROOF_RESIDUAL_THRESHOLD
    } else {
        RESIDUAL_THRESHOLD
    };

    let mut residuals = abs_residuals(&refit, ctx.xy, ctx.z);
    for i in 0..residuals.len() {
        if !mask[i] {
            residuals[i] = NEVER_INLIER;
        }
    }
    let inlier_mask: Vec<bool> = residuals.iter().map(|&r| r < residual_threshold).collect();

    let final_mask = match largest_component_mask(ctx.grid, &inlier_mask) {
        Some((m, area)) if area >= ctx.min_points_per_plane => m,
        _ => {
            skip_planes.insert(best.key);
            return FitOutcome::Rejected;
        }
    };

    let plane = finalize_plane(ctx, &refit, &final_mask, &best.props);
    FitOutcome::Accepted(Box::new(plane), final_mask)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::*;
    use rand::SeedableRng;

    #[test]
    fn test_ransac_finds_plane_without_candidates() {
        let b = single_slope_building();
        let fixture = BuildingFixture::new(&b);
        let ctx = fixture.fit_context();

        let mask = fixture.full_mask();
        let mut skip = HashSet::new();
        let mut rng = StdRng::seed_from_u64(42);

        match ransac_fit(&ctx, &mask, &mut skip, 3000, &mut rng) {
            FitOutcome::Accepted(plane, inliers) => {
                assert!((plane.slope - 30.0).abs() < 1.0);
                assert!(inliers.iter().filter(|&&m| m).count() >= 8);
                assert_eq!(plane.plane_type, "RANSAC");
            }
            _ => panic!("expected a plane"),
        }
    }

    #[test]
    fn test_ransac_deterministic_with_seed() {
        let b = single_slope_building();
        let fixture = BuildingFixture::new(&b);
        let ctx = fixture.fit_context();
        let mask = fixture.full_mask();

        let run = |seed: u64| -> Option<(f64, f64, usize)> {
            let mut skip = HashSet::new();
            let mut rng = StdRng::seed_from_u64(seed);
            match ransac_fit(&ctx, &mask, &mut skip, 500, &mut rng) {
                FitOutcome::Accepted(plane, inliers) => Some((
                    plane.slope,
                    plane.aspect,
                    inliers.iter().filter(|&&m| m).count(),
                )),
                _ => None,
            }
        };

        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_ransac_no_pixels_is_finished() {
        let b = single_slope_building();
        let fixture = BuildingFixture::new(&b);
        let ctx = fixture.fit_context();

        let mut mask = fixture.full_mask();
        for i in 0..mask.len() {
            mask.set(i, false);
        }
        let mut skip = HashSet::new();
        let mut rng = StdRng::seed_from_u64(1);

        assert!(matches!(
            ransac_fit(&ctx, &mask, &mut skip, 100, &mut rng),
            FitOutcome::Finished
        ));
    }
}
