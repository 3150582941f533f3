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
use anyhow::{Context, Result};
use geo_types::Polygon;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wkt::{ToWkt, TryFromWkt};

#[derive(Debug, Error)]
pub enum RoofDetError {
    #[error("invalid building input: {0}")]
    InvalidInput(String),

    #[error("merger invariant violated: {0}")]
    MergerInvariant(String),
}

fn default_true() -> bool {
    true
}

/// A rasterised LiDAR pixel, immutable for the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pixel {
    #[serde(default)]
    pub pixel_id: i64,
    pub x: f64,
    pub y: f64,
    pub elevation: f64,
    /// degrees from horizontal, 0 to 90
    pub slope: f64,
    /// degrees clockwise from north, 0 to 360
    pub aspect: f64,
    #[serde(default = "default_true")]
    pub within_building: bool,
    #[serde(default)]
    pub without_building: bool,
}

/// Building-level inputs to roof plane detection
#[derive(Debug, Clone)]
pub struct RoofDetBuilding {
    pub toid: String,
    pub pixels: Vec<Pixel>,
    pub polygon: Polygon<f64>,
    pub min_ground_height: Option<f64>,
    pub max_ground_height: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoofDetBuildingJson {
    toid: String,
    pixels: Vec<Pixel>,
    /// WKT in a metric CRS
    polygon: String,
    #[serde(default)]
    min_ground_height: Option<f64>,
    #[serde(default)]
    max_ground_height: Option<f64>,
}

impl RoofDetBuilding {
    pub fn from_json_str(json: &str) -> Result<RoofDetBuilding> {
        let raw: RoofDetBuildingJson =
            serde_json::from_str(json).context("parsing building json")?;
        let polygon = Polygon::try_from_wkt_str(&raw.polygon)
            .map_err(|e| RoofDetError::InvalidInput(format!("footprint wkt: {}", e)))?;
        Ok(RoofDetBuilding {
            toid: raw.toid,
            pixels: raw.pixels,
            polygon,
            min_ground_height: raw.min_ground_height,
            max_ground_height: raw.max_ground_height,
        })
    }
}

/// A candidate inlier set produced by the premade plane generator.
/// Holds indices into the building's pixel arrays, never copies.
#[derive(Debug, Clone)]
pub struct PremadePlane {
    pub idxs: Vec<usize>,
    pub sample_residual_threshold: f64,
    pub plane_type: &'static str,
    pub plane_id: String,
}

/// An accepted plane, output of the fitters and the merger
#[derive(Debug, Clone, Serialize)]
pub struct RoofPlane {
    pub toid: String,
    pub plane_type: String,
    pub plane_id: String,

    pub x_coef: f64,
    pub y_coef: f64,
    pub intercept: f64,

    pub slope: f64,
    pub is_flat: bool,
    /// aspect of the fitted coefficients
    pub aspect_raw: f64,
    /// aspect snapped to a building orientation
    pub aspect: f64,

    pub sd: f64,
    /// MAE of the winning fit
    pub score: f64,
    pub r2: f64,
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub msle: f64,
    pub mape: f64,

    pub aspect_circ_mean: Option<f64>,
    pub aspect_circ_sd: Option<f64>,
    pub thinness_ratio: f64,
    pub cv_hull_ratio: f64,

    pub inliers_xy: Vec<(f64, f64)>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum NotUsableReason {
    #[serde(rename = "SLOPE")]
    Slope,
    #[serde(rename = "ASPECT")]
    Aspect,
    #[serde(rename = "AREA")]
    Area,
}

/// A roof plane with its final geometry and usability
#[derive(Debug, Clone)]
pub struct RoofPolygon {
    pub plane: RoofPlane,
    pub roof_geom_raw: Polygon<f64>,
    pub roof_geom: Polygon<f64>,
    pub usable: bool,
    pub not_usable_reason: Option<NotUsableReason>,
}

/// Flat record for the outputs, geometry as WKT
#[derive(Debug, Clone, Serialize)]
pub struct RoofPolygonRecord {
    pub toid: String,
    pub plane_id: String,
    pub plane_type: String,
    pub roof_geom: String,
    pub roof_geom_raw: String,
    pub x_coef: f64,
    pub y_coef: f64,
    pub intercept: f64,
    pub slope: f64,
    pub aspect: f64,
    pub aspect_raw: f64,
    pub is_flat: bool,
    pub sd: f64,
    pub score: f64,
    pub r2: f64,
    pub mse: f64,
    pub rmse: f64,
    pub msle: f64,
    pub mape: f64,
    pub aspect_circ_mean: Option<f64>,
    pub aspect_circ_sd: Option<f64>,
    pub thinness_ratio: f64,
    pub cv_hull_ratio: f64,
    pub usable: bool,
    pub not_usable_reason: Option<NotUsableReason>,
    pub inliers_xy: Vec<(f64, f64)>,
}

impl RoofPolygonRecord {
    pub fn from_roof_polygon(rp: &RoofPolygon) -> RoofPolygonRecord {
        let p = &rp.plane;
        RoofPolygonRecord {
            toid: p.toid.clone(),
            plane_id: p.plane_id.clone(),
            plane_type: p.plane_type.clone(),
            roof_geom: rp.roof_geom.wkt_string(),
            roof_geom_raw: rp.roof_geom_raw.wkt_string(),
            x_coef: p.x_coef,
            y_coef: p.y_coef,
            intercept: p.intercept,
            slope: p.slope,
            aspect: p.aspect,
            aspect_raw: p.aspect_raw,
            is_flat: p.is_flat,
            sd: p.sd,
            score: p.score,
            r2: p.r2,
            mse: p.mse,
            rmse: p.rmse,
            msle: p.msle,
            mape: p.mape,
            aspect_circ_mean: p.aspect_circ_mean,
            aspect_circ_sd: p.aspect_circ_sd,
            thinness_ratio: p.thinness_ratio,
            cv_hull_ratio: p.cv_hull_ratio,
            usable: rp.usable,
            not_usable_reason: rp.not_usable_reason,
            inliers_xy: p.inliers_xy.clone(),
        }
    }
}

/// Model parameters, as the job runner passes them in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoofDetParams {
    /// usability cut-off only, the fitters have their own hard limit
    pub max_roof_slope_degrees: f64,
    /// minimum corrected roof area for usability, m2
    pub min_roof_area_m: f64,
    /// usability cut-off on azimuth distance from north
    pub min_roof_degrees_from_north: f64,
    /// mounting angle reported for flat roofs
    pub flat_roof_degrees: f64,
    /// shrinkage of the footprint for polygonisation, metres
    pub min_dist_to_edge_m: f64,
    /// pixel spacing, metres
    pub resolution_metres: f64,
    /// seed for the RANSAC fallback; fixed seed means reproducible output
    pub ransac_seed: u64,
}

impl Default for RoofDetParams {
    fn default() -> Self {
        RoofDetParams {
            max_roof_slope_degrees: 80.0,
            min_roof_area_m: 10.0,
            min_roof_degrees_from_north: 45.0,
            flat_roof_degrees: 10.0,
            min_dist_to_edge_m: 0.3,
            resolution_metres: 1.0,
            ransac_seed: 0,
        }
    }
}

/// Per-building result of the whole pipeline
#[derive(Debug, Clone)]
pub struct BuildingResult {
    pub toid: String,
    pub roof_polygons: Vec<RoofPolygon>,
    pub exclusion_reason: Option<String>,
}

pub const NO_ROOF_PLANES_DETECTED: &str = "NO_ROOF_PLANES_DETECTED";

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_building_from_json() {
        let json = r#"{
            "toid": "osgb1",
            "polygon": "POLYGON((0 0, 10 0, 10 10, 0 10, 0 0))",
            "max_ground_height": 2.5,
            "pixels": [
                {"pixel_id": 1, "x": 0.5, "y": 0.5, "elevation": 5.0, "slope": 30.0, "aspect": 180.0}
            ]
        }"#;
        let building = RoofDetBuilding::from_json_str(json).unwrap();
        assert_eq!(building.toid, "osgb1");
        assert_eq!(building.pixels.len(), 1);
        assert!(building.pixels[0].within_building);
        assert_eq!(building.max_ground_height, Some(2.5));
        assert_eq!(building.polygon.exterior().0.len(), 5);
    }

    #[test]
    fn test_building_bad_wkt_is_invalid_input() {
        let json = r#"{"toid": "x", "polygon": "POLYGON((", "pixels": []}"#;
        assert!(RoofDetBuilding::from_json_str(json).is_err());
    }
}
