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

//! Turns each plane's inlier pixels into a clean roof polygon: union of
//! pixel squares, de-zigzagged, constrained to the shrunk footprint, then
//! replaced by its aspect-aligned envelope when that is close enough or an
//! aspect-aligned 1m gridding otherwise.  Finally touching same-aspect
//! planes merge and mutual overlaps are split.

use crate::constants::FLAT_ROOF_DEGREES_THRESHOLD;
use crate::datatypes::{NotUsableReason, RoofDetParams, RoofPlane, RoofPolygon};
use crate::split_evenly::split_evenly;
use anyhow::Result;
use geo::{Area, BoundingRect, Intersects};
use geo_types::Polygon;
use geo_util::vector::{
    de_zigzag, grid_cells_bounds, largest_polygon, make_valid_polygons, polygon_centroid,
    rotate_polygon, set_precision_polygon, square, union_polygons,
};
use log::debug;
use simple_geos::{geo_polygon_to_geos, geos_to_geo_polygons, GeosContext};

//an aspect-aligned envelope replaces the pixel outline when it adds less
//area than this
const MAX_AREA_DIFF: f64 = 5.0;
const MAX_AREA_DIFF_PCT: f64 = 0.35;

const PRECISION_GRID: f64 = 0.01;
const MERGE_MAX_SLOPE_DIFF: f64 = 4.0;

struct PlanePoly {
    plane: RoofPlane,
    raw: Polygon<f64>,
    roof: Polygon<f64>,
}

fn zigzag_step(resolution_metres: f64) -> f64 {
    resolution_metres.max(1.0) * 1.5
}

fn constrain_to_building(
    context: &GeosContext,
    building_geom: &Polygon<f64>,
    roof_poly: &Polygon<f64>,
    min_dist_to_edge_m: f64,
) -> Result<Option<Polygon<f64>>> {
    let g_building = geo_polygon_to_geos(context, building_geom)?;
    let shrunk = g_building.buffer_with_style(
        context,
        -min_dist_to_edge_m,
        8,
        simple_geos::CapStyle::Square,
        simple_geos::JoinStyle::Mitre,
        5.0,
    )?;
    let g_roof = geo_polygon_to_geos(context, roof_poly)?;
    let intersection = g_roof.intersection(context, &shrunk)?;
    Ok(largest_polygon(geos_to_geo_polygons(&intersection)?))
}

fn grid_polygon(
    context: &GeosContext,
    roof_poly: &Polygon<f64>,
    aspect: f64,
    grid_size: f64,
) -> Result<Option<Polygon<f64>>> {
    let centroid = polygon_centroid(roof_poly);

    //rotate so the plane is axis aligned, grid it, rotate the cells back
    let plane_points = rotate_polygon(roof_poly, aspect, centroid);
    let cells = grid_cells_bounds(&plane_points, grid_size, grid_size);
    let cells_back: Vec<Polygon<f64>> = cells
        .iter()
        .map(|c| rotate_polygon(c, -aspect, centroid))
        .collect();
    let unioned = union_polygons(context, &cells_back)?;
    let poly = match largest_polygon(unioned) {
        Some(p) => p,
        None => return Ok(None),
    };
    Ok(largest_polygon(make_valid_polygons(context, &poly)?))
}

/// The initial pixel-union polygon and its cleaned successor
fn make_polygon(
    context: &GeosContext,
    plane: &RoofPlane,
    building_geom: &Polygon<f64>,
    params: &RoofDetParams,
) -> Result<Option<(Polygon<f64>, Polygon<f64>)>> {
    let halfr = params.resolution_metres / 2.0;
    let r = params.resolution_metres;
    let max_step = zigzag_step(r);

    let pixels: Vec<Polygon<f64>> = plane
        .inliers_xy
        .iter()
        .map(|&(x, y)| square(x - halfr, y - halfr, r))
        .collect();
    let unioned = union_polygons(context, &pixels)?;
    let smoothed: Vec<Polygon<f64>> = unioned.iter().map(|p| de_zigzag(p, max_step)).collect();
    let raw_roof_poly = match largest_polygon(smoothed) {
        Some(p) => p,
        None => return Ok(None),
    };
    let raw_roof_poly = match constrain_to_building(
        context,
        building_geom,
        &raw_roof_poly,
        params.min_dist_to_edge_m,
    )? {
        Some(p) => p,
        None => return Ok(None),
    };

    //if a bbox rotated to match the aspect is close enough area-wise to the
    //initial polygon, just use that
    let centroid = polygon_centroid(&raw_roof_poly);
    let rotated = rotate_polygon(&raw_roof_poly, plane.aspect, centroid);
    let bbox = match rotated.bounding_rect() {
        Some(b) => b.to_polygon(),
        None => return Ok(None),
    };
    let area_diff = bbox.unsigned_area() - rotated.unsigned_area();

    let roof_poly = if area_diff < MAX_AREA_DIFF
        && area_diff / rotated.unsigned_area() < MAX_AREA_DIFF_PCT
    {
        Some(rotate_polygon(&bbox, -plane.aspect, centroid))
    } else {
        //grid on a 1m grid oriented to the aspect, then de-zigzag again
        grid_polygon(context, &raw_roof_poly, plane.aspect, 1.0)?
            .map(|p| de_zigzag(&p, 1.5))
    };
    let roof_poly = match roof_poly {
        Some(p) => p,
        None => return Ok(None),
    };

    let roof_poly = constrain_to_building(
        context,
        building_geom,
        &roof_poly,
        params.min_dist_to_edge_m,
    )?;

    match roof_poly {
        Some(p) => Ok(Some((raw_roof_poly, p))),
        None => Ok(None),
    }
}

/// Merge any planes that have the same snapped aspect, a slope within 4
/// degrees, are not flat, and touch each other
fn merge_touching(
    context: &GeosContext,
    planes: Vec<PlanePoly>,
    building_geom: &Polygon<f64>,
    params: &RoofDetParams,
) -> Result<Vec<PlanePoly>> {
    use std::collections::BTreeMap;

    let mut by_aspect: BTreeMap<i64, Vec<PlanePoly>> = BTreeMap::new();
    for plane in planes {
        by_aspect
            .entry(plane.plane.aspect.round() as i64)
            .or_default()
            .push(plane);
    }

    let mut merged = Vec::new();
    for (_, group) in by_aspect {
        if group.len() == 1 {
            merged.extend(group);
            continue;
        }

        let n = group.len();
        let mut checked = vec![false; n];
        let mut group: Vec<Option<PlanePoly>> = group.into_iter().map(Some).collect();

        for i in 0..n {
            if checked[i] {
                continue;
            }
            checked[i] = true;
            let mut plane = group[i].take().expect("unchecked plane present");

            let mut mergeable = Vec::new();
            for (j, candidate) in group.iter().enumerate() {
                if let Some(p) = candidate {
                    if !checked[j]
                        && !p.plane.is_flat
                        && (p.plane.slope - plane.plane.slope).abs() <= MERGE_MAX_SLOPE_DIFF
                        && p.roof.intersects(&plane.roof)
                    {
                        mergeable.push(j);
                    }
                }
            }

            if !mergeable.is_empty() {
                for &j in &mergeable {
                    checked[j] = true;
                    let p = group[j].take().expect("mergeable plane present");
                    plane.plane.inliers_xy.extend(p.plane.inliers_xy);
                }
                if let Some((raw, roof)) =
                    make_polygon(context, &plane.plane, building_geom, params)?
                {
                    plane.raw = raw;
                    plane.roof = roof;
                    merged.push(plane);
                } else {
                    debug!("merged plane {} lost its polygon", plane.plane.plane_id);
                }
            } else {
                merged.push(plane);
            }
        }
    }

    Ok(merged)
}

fn remove_overlaps(context: &GeosContext, planes: &mut [PlanePoly]) -> Result<()> {
    for i in 0..planes.len() {
        for j in 0..i {
            let p1 = planes[i].roof.clone();
            let p2 = planes[j].roof.clone();
            let (new_p1, new_p2) = split_evenly(context, &p1, &p2)?;
            planes[i].roof = new_p1;
            planes[j].roof = new_p2;
        }
    }
    Ok(())
}

/// Adds roof polygons and usability to the detected planes of one building
pub fn create_roof_polygons(
    building_geom: &Polygon<f64>,
    planes: Vec<RoofPlane>,
    params: &RoofDetParams,
) -> Result<Vec<RoofPolygon>> {
    if planes.is_empty() {
        return Ok(vec![]);
    }

    let context = GeosContext::new();

    let mut plane_polys: Vec<PlanePoly> = Vec::new();
    for mut plane in planes {
        if plane.is_flat {
            //flat roofs get panels on mounts at the configured pitch
            plane.slope = params.flat_roof_degrees;
        }
        if let Some((raw, roof)) = make_polygon(&context, &plane, building_geom, params)? {
            plane_polys.push(PlanePoly {
                plane,
                raw,
                roof,
            });
        }
    }

    debug!("made {} initial roof polygons", plane_polys.len());

    let mut plane_polys = merge_touching(&context, plane_polys, building_geom, params)?;

    //snap to a coarse grid so the overlap splitting is robust
    for p in plane_polys.iter_mut() {
        if let Some(snapped) =
            largest_polygon(set_precision_polygon(&context, &p.roof, PRECISION_GRID)?)
        {
            p.roof = snapped;
        }
    }

    remove_overlaps(&context, &mut plane_polys)?;

    let mut roof_polygons = Vec::new();
    for p in plane_polys {
        let PlanePoly { plane, raw, roof } = p;

        let raw = {
            let g_raw = geo_polygon_to_geos(&context, &raw)?;
            let g_roof = geo_polygon_to_geos(&context, &roof)?;
            largest_polygon(geos_to_geo_polygons(&g_raw.intersection(&context, &g_roof)?)?)
                .unwrap_or_else(|| roof.clone())
        };

        let area = roof.unsigned_area() / plane.slope.to_radians().cos();

        let (usable, not_usable_reason) = if plane.slope > params.max_roof_slope_degrees {
            (false, Some(NotUsableReason::Slope))
        } else if plane.aspect < params.min_roof_degrees_from_north {
            (false, Some(NotUsableReason::Aspect))
        } else if plane.aspect > 360.0 - params.min_roof_degrees_from_north {
            (false, Some(NotUsableReason::Aspect))
        } else if area < params.min_roof_area_m {
            (false, Some(NotUsableReason::Area))
        } else {
            (true, None)
        };

        roof_polygons.push(RoofPolygon {
            plane,
            roof_geom_raw: raw,
            roof_geom: roof,
            usable,
            not_usable_reason,
        });
    }

    Ok(roof_polygons)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::*;
    use geo_util::vector::buffer_polygon;

    fn params() -> RoofDetParams {
        RoofDetParams::default()
    }

    #[test]
    fn test_single_plane_polygon_inside_footprint() {
        let b = single_slope_building();
        let fixture = BuildingFixture::new(&b);
        let all: Vec<usize> = (0..fixture.xy.len()).collect();
        let plane = fixture.plane_for(&all, "p");

        let polys = create_roof_polygons(&fixture.polygon, vec![plane], &params()).unwrap();
        assert_eq!(polys.len(), 1);
        let rp = &polys[0];

        assert!(rp.usable);
        assert!(rp.roof_geom.unsigned_area() > 50.0);

        //inside the footprint shrunk by min_dist_to_edge (0.1m2 tolerance)
        let context = GeosContext::new();
        let shrunk = buffer_polygon(&context, &fixture.polygon, -0.3).unwrap();
        let g_roof = geo_polygon_to_geos(&context, &rp.roof_geom).unwrap();
        let g_shrunk = simple_geos::geo_polygons_to_geos_multi(&context, &shrunk).unwrap();
        let outside = g_roof.difference(&context, &g_shrunk).unwrap();
        assert!(outside.area().unwrap() < 0.1);
    }

    #[test]
    fn test_polygonisation_idempotent() {
        let b = single_slope_building();
        let fixture = BuildingFixture::new(&b);
        let all: Vec<usize> = (0..fixture.xy.len()).collect();
        let plane = fixture.plane_for(&all, "p");

        let first = create_roof_polygons(&fixture.polygon, vec![plane.clone()], &params()).unwrap();
        let second = create_roof_polygons(&fixture.polygon, vec![plane], &params()).unwrap();
        assert_eq!(
            first[0].roof_geom.exterior().0,
            second[0].roof_geom.exterior().0
        );
    }

    #[test]
    fn test_flat_plane_reports_mounting_slope() {
        let b = flat_building();
        let fixture = BuildingFixture::new(&b);
        let all: Vec<usize> = (0..fixture.xy.len()).collect();
        let plane = fixture.plane_for(&all, "p");
        assert!(plane.is_flat);

        let polys = create_roof_polygons(&fixture.polygon, vec![plane], &params()).unwrap();
        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0].plane.slope, 10.0);
        assert!(polys[0].plane.is_flat);
    }

    #[test]
    fn test_not_usable_reasons() {
        let b = single_slope_building();
        let fixture = BuildingFixture::new(&b);
        let all: Vec<usize> = (0..fixture.xy.len()).collect();

        //northerly aspect
        let mut plane = fixture.plane_for(&all, "p");
        plane.aspect = 0.0;
        let polys = create_roof_polygons(&fixture.polygon, vec![plane], &params()).unwrap();
        assert!(!polys[0].usable);
        assert_eq!(polys[0].not_usable_reason, Some(NotUsableReason::Aspect));

        //too steep comes before aspect in the cascade
        let mut plane = fixture.plane_for(&all, "p");
        plane.aspect = 0.0;
        plane.slope = 85.0;
        let polys = create_roof_polygons(&fixture.polygon, vec![plane], &params()).unwrap();
        assert!(!polys[0].usable);
        assert_eq!(polys[0].not_usable_reason, Some(NotUsableReason::Slope));
    }

    #[test]
    fn test_same_aspect_touching_planes_merge() {
        let b = single_slope_building();
        let fixture = BuildingFixture::new(&b);
        let n = fixture.xy.len();

        //two halves of the same sloped surface
        let west: Vec<usize> = (0..n).filter(|&i| fixture.xy[i].0 < 5.0).collect();
        let east: Vec<usize> = (0..n).filter(|&i| fixture.xy[i].0 >= 5.0).collect();
        let p1 = fixture.plane_for(&west, "w");
        let p2 = fixture.plane_for(&east, "e");

        let polys = create_roof_polygons(&fixture.polygon, vec![p1, p2], &params()).unwrap();
        assert_eq!(polys.len(), 1);
    }

    #[test]
    fn test_overlapping_planes_deconflicted() {
        let b = single_slope_building();
        let fixture = BuildingFixture::new(&b);
        let n = fixture.xy.len();

        //overlapping thirds of the same surface but with different snapped
        //aspects, so they are not merged
        let left: Vec<usize> = (0..n).filter(|&i| fixture.xy[i].0 < 7.0).collect();
        let right: Vec<usize> = (0..n).filter(|&i| fixture.xy[i].0 >= 4.0).collect();
        let p1 = fixture.plane_for(&left, "l");
        let mut p2 = fixture.plane_for(&right, "r");
        p2.aspect = 90.0;

        let polys = create_roof_polygons(&fixture.polygon, vec![p1, p2], &params()).unwrap();
        assert_eq!(polys.len(), 2);

        let context = GeosContext::new();
        let g1 = geo_polygon_to_geos(&context, &polys[0].roof_geom).unwrap();
        let g2 = geo_polygon_to_geos(&context, &polys[1].roof_geom).unwrap();
        let overlap = g1.intersection(&context, &g2).unwrap();
        assert!(overlap.area().unwrap() < 1e-6);
    }

    #[test]
    fn test_raw_geom_contained_in_roof_geom() {
        let b = single_slope_building();
        let fixture = BuildingFixture::new(&b);
        let all: Vec<usize> = (0..fixture.xy.len()).collect();
        let plane = fixture.plane_for(&all, "p");

        let polys = create_roof_polygons(&fixture.polygon, vec![plane], &params()).unwrap();
        let rp = &polys[0];
        //raw is clipped to the final geometry
        let context = GeosContext::new();
        let g_raw = geo_polygon_to_geos(&context, &rp.roof_geom_raw).unwrap();
        let g_roof = geo_polygon_to_geos(&context, &rp.roof_geom).unwrap();
        let outside = g_raw.difference(&context, &g_roof).unwrap();
        assert!(outside.area().unwrap() < 1e-6);
    }
}
