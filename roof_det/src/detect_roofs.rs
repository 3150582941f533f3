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

//! The per-building driver: premade planes, the DETSAC loop, the RANSAC
//! fallback, region merging, the messy-roof check and polygonisation, in
//! that order.  Each building is independent, batches run in parallel.

use crate::constants::*;
use crate::datatypes::{
    BuildingResult, Pixel, RoofDetBuilding, RoofDetError, RoofDetParams, RoofPolygon,
    NO_ROOF_PLANES_DETECTED,
};
use crate::detsac::detsac_fit;
use crate::fit_rules::{FitContext, FitOutcome};
use crate::merge_adjacent::{merge_adjacent, LABELS_NODATA};
use crate::messy_roofs::detect_messy_roofs;
use crate::premade_planes::create_premade_planes;
use crate::ransac::ransac_fit;
use crate::roof_polygons::create_roof_polygons;
use anyhow::Result;
use bitvec::bitvec;
use bitvec::vec::BitVec;
use geo_util::raster::PixelGrid;
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};

/// Use 3/4s of available CPUs for roof plane detection
pub fn roof_det_cpu_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus * 3 / 4).max(1)
}

fn max_trials_for(total_pixels: usize, resolution_metres: f64) -> usize {
    let total = total_pixels as f64;
    if total > RANSAC_LARGE_BUILDING / resolution_metres {
        RANSAC_LARGE_MAX_TRIALS
    } else if total < RANSAC_SMALL_BUILDING / resolution_metres {
        RANSAC_SMALL_MAX_TRIALS
    } else {
        RANSAC_MEDIUM_MAX_TRIALS
    }
}

/// Detects the roof planes of a single building and polygonises them
pub fn detect_building_roof_planes(
    building: &RoofDetBuilding,
    params: &RoofDetParams,
) -> Result<Vec<RoofPolygon>> {
    let pixels: Vec<&Pixel> = building
        .pixels
        .iter()
        .filter(|p| p.within_building)
        .collect();
    if pixels.is_empty() {
        return Err(RoofDetError::InvalidInput("no pixels within the footprint".to_string()).into());
    }
    if building.polygon.exterior().0.len() < 4 {
        return Err(RoofDetError::InvalidInput("degenerate footprint".to_string()).into());
    }

    let xy: Vec<(f64, f64)> = pixels.iter().map(|p| (p.x, p.y)).collect();
    let z: Vec<f64> = pixels.iter().map(|p| p.elevation).collect();
    let aspect: Vec<f64> = pixels.iter().map(|p| p.aspect).collect();
    for (&(x, y), &zv) in xy.iter().zip(z.iter()) {
        if !x.is_finite() || !y.is_finite() || !zv.is_finite() {
            return Err(
                RoofDetError::InvalidInput("non finite pixel coordinates".to_string()).into(),
            );
        }
    }

    let grid = PixelGrid::new(&xy, params.resolution_metres)?;
    let total_points_in_building = xy.len();
    let min_points = min_points_per_plane(params.resolution_metres);

    //pixels at or below ground never take part in plane fitting
    let mut mask: BitVec = match building.max_ground_height {
        Some(mgh) => z.iter().map(|&zv| zv > mgh).collect(),
        None => bitvec![1; xy.len()],
    };

    let ctx = FitContext {
        grid: &grid,
        xy: &xy,
        z: &z,
        aspect: &aspect,
        polygon: &building.polygon,
        total_points_in_building,
        min_points_per_plane: min_points,
    };

    let premade_planes = create_premade_planes(&grid, &aspect, &z);
    let mut skip_planes: HashSet<String> = HashSet::new();

    let mut labels = vec![LABELS_NODATA; xy.len()];
    let mut planes = BTreeMap::new();
    let mut plane_idx = 0i32;

    while mask.count_ones() > min_points {
        match detsac_fit(&ctx, &premade_planes, &mask, &mut skip_planes) {
            FitOutcome::Finished => break,
            FitOutcome::Rejected => continue,
            FitOutcome::Accepted(plane, inlier_mask) => {
                let mut plane = *plane;
                plane.toid = building.toid.clone();
                planes.insert(plane_idx, plane);
                for (i, &m) in inlier_mask.iter().enumerate() {
                    if m {
                        labels[i] = plane_idx;
                        mask.set(i, false);
                    }
                }
                plane_idx += 1;
            }
        }
    }

    //only fall back to RANSAC if a decent fraction of pixels is left
    let max_trials = max_trials_for(total_points_in_building, params.resolution_metres);
    let pixels_required_for_ransac = min_points * 5;
    let mut rng = StdRng::seed_from_u64(params.ransac_seed);

    while mask.count_ones() > pixels_required_for_ransac {
        match ransac_fit(&ctx, &mask, &mut skip_planes, max_trials, &mut rng) {
            FitOutcome::Finished => break,
            FitOutcome::Rejected => continue,
            FitOutcome::Accepted(plane, inlier_mask) => {
                let mut plane = *plane;
                plane.toid = building.toid.clone();
                planes.insert(plane_idx, plane);
                for (i, &m) in inlier_mask.iter().enumerate() {
                    if m {
                        labels[i] = plane_idx;
                        mask.set(i, false);
                    }
                }
                plane_idx += 1;
            }
        }
    }

    //remaining pixels become individually labelled outliers
    let mut next_outlier = plane_idx + 1;
    for i in 0..xy.len() {
        if mask[i] {
            labels[i] = next_outlier;
            next_outlier += 1;
        }
    }

    let merged = merge_adjacent(&grid, &xy, &z, &labels, planes)?;
    let kept = detect_messy_roofs(&grid, &merged.planes, &merged.labels);

    create_roof_polygons(&building.polygon, kept, params)
}

/// Runs a batch of buildings in parallel.  Failures are logged and marked,
/// never propagated, so one broken building cannot take the batch down.
pub fn detect_roofs(
    buildings: &[RoofDetBuilding],
    params: &RoofDetParams,
) -> Vec<BuildingResult> {
    let results: Vec<BuildingResult> = buildings
        .par_iter()
        .map(|building| match detect_building_roof_planes(building, params) {
            Ok(roof_polygons) => {
                let exclusion_reason = if roof_polygons.is_empty() {
                    Some(NO_ROOF_PLANES_DETECTED.to_string())
                } else {
                    None
                };
                BuildingResult {
                    toid: building.toid.clone(),
                    roof_polygons,
                    exclusion_reason,
                }
            }
            Err(e) => {
                error!(
                    "roof plane detection failed for {}: {:#}",
                    building.toid, e
                );
                BuildingResult {
                    toid: building.toid.clone(),
                    roof_polygons: vec![],
                    exclusion_reason: Some(NO_ROOF_PLANES_DETECTED.to_string()),
                }
            }
        })
        .collect();

    let found: usize = results
        .iter()
        .filter(|r| r.exclusion_reason.is_none())
        .count();
    info!(
        "batch of {} buildings complete, {} with roof planes",
        buildings.len(),
        found
    );

    results
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::*;
    use geo_util::vector::deg_diff;

    fn aspects(polys: &[RoofPolygon]) -> Vec<f64> {
        let mut a: Vec<f64> = polys.iter().map(|p| p.plane.aspect).collect();
        a.sort_by(|x, y| x.partial_cmp(y).unwrap());
        a
    }

    #[test]
    fn test_single_plane_building() {
        let polys =
            detect_building_roof_planes(&single_slope_building(), &RoofDetParams::default())
                .unwrap();
        assert_eq!(polys.len(), 1);
        assert!((polys[0].plane.aspect - 180.0).abs() < 1e-9);
        assert!((polys[0].plane.slope - 30.0).abs() < 1.0);
        assert!(polys[0].usable);
    }

    #[test]
    fn test_gable_gives_two_opposite_planes() {
        let polys =
            detect_building_roof_planes(&gable_building(), &RoofDetParams::default()).unwrap();
        assert_eq!(polys.len(), 2);
        let a = aspects(&polys);
        assert!((deg_diff(a[0], a[1]) - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_building_single_plane() {
        let polys =
            detect_building_roof_planes(&flat_building(), &RoofDetParams::default()).unwrap();
        assert_eq!(polys.len(), 1);
        assert!(polys[0].plane.is_flat);
        //flat planes snap towards one of the building faces
        assert_eq!(polys[0].plane.aspect, 180.0);
    }

    #[test]
    fn test_tiny_building_has_no_planes() {
        let polys =
            detect_building_roof_planes(&tiny_building(), &RoofDetParams::default()).unwrap();
        assert!(polys.is_empty());
    }

    #[test]
    fn test_messy_flat_building_rejected() {
        let polys =
            detect_building_roof_planes(&messy_flat_building(), &RoofDetParams::default())
                .unwrap();
        assert!(polys.is_empty());
    }

    #[test]
    fn test_no_mutual_overlap_and_containment() {
        use simple_geos::{geo_polygon_to_geos, geo_polygons_to_geos_multi, GeosContext};

        let params = RoofDetParams::default();
        let polys = detect_building_roof_planes(&gable_building(), &params).unwrap();
        let context = GeosContext::new();

        for i in 0..polys.len() {
            for j in 0..i {
                let gi = geo_polygon_to_geos(&context, &polys[i].roof_geom).unwrap();
                let gj = geo_polygon_to_geos(&context, &polys[j].roof_geom).unwrap();
                let overlap = gi.intersection(&context, &gj).unwrap();
                assert!(overlap.area().unwrap() < 1e-9);
            }
        }

        let shrunk = geo_util::vector::buffer_polygon(
            &context,
            &gable_building().polygon,
            -params.min_dist_to_edge_m,
        )
        .unwrap();
        let g_shrunk = geo_polygons_to_geos_multi(&context, &shrunk).unwrap();
        for p in &polys {
            let g = geo_polygon_to_geos(&context, &p.roof_geom).unwrap();
            let outside = g.difference(&context, &g_shrunk).unwrap();
            assert!(outside.area().unwrap() < 0.1);
        }
    }

    #[test]
    fn test_deterministic_reruns() {
        let params = RoofDetParams::default();
        let first = detect_building_roof_planes(&gable_building(), &params).unwrap();
        let second = detect_building_roof_planes(&gable_building(), &params).unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.plane.plane_id, b.plane.plane_id);
            assert_eq!(a.plane.aspect, b.plane.aspect);
            assert_eq!(a.roof_geom.exterior().0, b.roof_geom.exterior().0);
        }
    }

    #[test]
    fn test_batch_marks_empty_buildings() {
        let buildings = vec![tiny_building(), single_slope_building()];
        let results = detect_roofs(&buildings, &RoofDetParams::default());

        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].exclusion_reason.as_deref(),
            Some(NO_ROOF_PLANES_DETECTED)
        );
        assert!(results[1].exclusion_reason.is_none());
    }
}
