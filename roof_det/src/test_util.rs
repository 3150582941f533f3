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

//! Synthetic buildings for tests: perfect planes on a regular pixel grid
//! with aspect/slope rasters computed the same way the upstream derivation
//! would.

use crate::constants::{min_points_per_plane, FLAT_ROOF_DEGREES_THRESHOLD};
use crate::datatypes::{Pixel, RoofDetBuilding, RoofPlane};
use crate::fit_rules::FitContext;
use crate::ols::{fit_metrics, fit_plane, std_dev};
use bitvec::bitvec;
use bitvec::vec::BitVec;
use geo_util::raster::PixelGrid;
use geo_util::vector::{aspect_deg, deg_diff, rect, slope_deg};
use geo_types::Polygon;

/// Per-building arrays plus the rasteriser, as the driver prepares them
pub struct BuildingFixture {
    pub xy: Vec<(f64, f64)>,
    pub z: Vec<f64>,
    pub aspect: Vec<f64>,
    pub slope: Vec<f64>,
    pub polygon: Polygon<f64>,
    pub min_points: usize,
    grid: PixelGrid,
}

impl BuildingFixture {
    pub fn new(building: &RoofDetBuilding) -> BuildingFixture {
        let pixels: Vec<&Pixel> = building
            .pixels
            .iter()
            .filter(|p| p.within_building)
            .collect();
        let xy: Vec<(f64, f64)> = pixels.iter().map(|p| (p.x, p.y)).collect();
        let z: Vec<f64> = pixels.iter().map(|p| p.elevation).collect();
        let aspect: Vec<f64> = pixels.iter().map(|p| p.aspect).collect();
        let slope: Vec<f64> = pixels.iter().map(|p| p.slope).collect();
        let grid = PixelGrid::new(&xy, 1.0).unwrap();

        BuildingFixture {
            xy,
            z,
            aspect,
            slope,
            polygon: building.polygon.clone(),
            min_points: min_points_per_plane(1.0),
            grid,
        }
    }

    pub fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    pub fn fit_context(&self) -> FitContext {
        FitContext {
            grid: &self.grid,
            xy: &self.xy,
            z: &self.z,
            aspect: &self.aspect,
            polygon: &self.polygon,
            total_points_in_building: self.xy.len(),
            min_points_per_plane: self.min_points,
        }
    }

    pub fn full_mask(&self) -> BitVec {
        bitvec![1; self.xy.len()]
    }

    /// A plane fitted to the given pixels, aspect snapped to the nearest
    /// cardinal direction
    pub fn plane_for(&self, idxs: &[usize], plane_id: &str) -> RoofPlane {
        let fit = fit_plane(&self.xy, &self.z, idxs).expect("fixture plane fits");
        let y_true: Vec<f64> = idxs.iter().map(|&i| self.z[i]).collect();
        let y_pred: Vec<f64> = idxs
            .iter()
            .map(|&i| fit.predict(self.xy[i].0, self.xy[i].1))
            .collect();
        let metrics = fit_metrics(&y_true, &y_pred);
        let residuals: Vec<f64> = y_true
            .iter()
            .zip(y_pred.iter())
            .map(|(t, p)| (t - p).abs())
            .collect();

        let slope = slope_deg(fit.a, fit.b);
        let aspect_raw = aspect_deg(fit.a, fit.b);
        let aspect = [0.0, 90.0, 180.0, 270.0]
            .into_iter()
            .min_by(|a, b| {
                deg_diff(*a, aspect_raw)
                    .partial_cmp(&deg_diff(*b, aspect_raw))
                    .unwrap()
            })
            .unwrap();

        RoofPlane {
            toid: "fixture".to_string(),
            plane_type: "segmented_aspect".to_string(),
            plane_id: plane_id.to_string(),
            x_coef: fit.a,
            y_coef: fit.b,
            intercept: fit.d,
            slope,
            is_flat: slope <= FLAT_ROOF_DEGREES_THRESHOLD,
            aspect_raw,
            aspect: if slope <= FLAT_ROOF_DEGREES_THRESHOLD {
                180.0
            } else {
                aspect
            },
            sd: std_dev(&residuals),
            score: metrics.mae,
            r2: metrics.r2,
            mae: metrics.mae,
            mse: metrics.mse,
            rmse: metrics.rmse,
            msle: metrics.msle,
            mape: metrics.mape,
            aspect_circ_mean: None,
            aspect_circ_sd: None,
            thinness_ratio: 1.0,
            cv_hull_ratio: 1.0,
            inliers_xy: idxs.iter().map(|&i| self.xy[i]).collect(),
        }
    }
}

fn building_from_surface<F>(
    toid: &str,
    cols: usize,
    rows: usize,
    mut surface: F,
) -> RoofDetBuilding
where
    F: FnMut(f64, f64) -> (f64, f64, f64), //(z, slope, aspect)
{
    let mut pixels = Vec::with_capacity(cols * rows);
    let mut pixel_id = 0i64;
    for i in 0..cols {
        for j in 0..rows {
            let x = i as f64 + 0.5;
            let y = j as f64 + 0.5;
            let (elevation, slope, aspect) = surface(x, y);
            pixels.push(Pixel {
                pixel_id,
                x,
                y,
                elevation,
                slope,
                aspect,
                within_building: true,
                without_building: false,
            });
            pixel_id += 1;
        }
    }

    RoofDetBuilding {
        toid: toid.to_string(),
        pixels,
        polygon: rect(0.0, 0.0, cols as f64, rows as f64),
        min_ground_height: Some(0.0),
        max_ground_height: None,
    }
}

/// 10x12 building, one southerly 30 degree plane over the whole roof
pub fn single_slope_building() -> RoofDetBuilding {
    let grad = 30.0f64.to_radians().tan();
    building_from_surface("slope1", 10, 12, |_x, y| {
        (20.0 - grad * y, 30.0, 180.0)
    })
}

/// As `single_slope_building` but with +-1cm alternating noise, the last
/// two pixels exact
pub fn noisy_slope_building() -> RoofDetBuilding {
    let grad = 30.0f64.to_radians().tan();
    let mut b = building_from_surface("slope1n", 10, 12, |_x, y| {
        (20.0 - grad * y, 30.0, 180.0)
    });
    let n = b.pixels.len();
    for (i, p) in b.pixels.iter_mut().enumerate() {
        if i < n - 2 {
            p.elevation += if i % 2 == 0 { 0.01 } else { -0.01 };
        }
    }
    b
}

/// 10x12 building with a north-south ridge at x=5, west half aspect 90,
/// east half aspect 270
pub fn gable_building() -> RoofDetBuilding {
    let grad = 30.0f64.to_radians().tan();
    building_from_surface("gable1", 10, 12, |x, _y| {
        let z = 18.0 - grad * (x - 5.0).abs();
        if x < 5.0 {
            (z, 30.0, 90.0)
        } else {
            (z, 30.0, 270.0)
        }
    })
}

/// 12x10 perfectly flat building
pub fn flat_building() -> RoofDetBuilding {
    building_from_surface("flat1", 12, 10, |_x, _y| (8.0, 0.0, 0.0))
}

/// 30x30 flat building riddled with 7 interior 4x4 obstacle blocks whose
/// heights are scattered, the typical HVAC-covered roof
pub fn messy_flat_building() -> RoofDetBuilding {
    let blocks: [(usize, usize); 7] = [
        (3, 3),
        (3, 12),
        (3, 21),
        (13, 7),
        (13, 17),
        (22, 4),
        (22, 14),
    ];
    let mut k = 0usize;
    building_from_surface("messy1", 30, 30, move |x, y| {
        let (ci, cj) = (x as usize, y as usize);
        let in_block = blocks
            .iter()
            .any(|&(bi, bj)| ci >= bi && ci < bi + 4 && cj >= bj && cj < bj + 4);
        if in_block {
            k += 1;
            let bump = ((k * 7) % 13) as f64 * 0.3;
            (11.0 + bump, 45.0, ((k * 53) % 360) as f64)
        } else {
            (8.0, 0.0, 0.0)
        }
    })
}

/// A building with too few pixels for any plane
pub fn tiny_building() -> RoofDetBuilding {
    building_from_surface("tiny1", 5, 1, |_x, _y| (8.0, 0.0, 0.0))
}
