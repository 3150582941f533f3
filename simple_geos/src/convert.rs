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
/// Convert between rust geo types and GEOS geometries
use crate::{GeometryTypes, GeosContext, SimpleGeometry};
use anyhow::Result;
use geo_types::{Coord, LineString, Polygon};

fn ring_points(ls: &LineString<f64>) -> Vec<(f64, f64)> {
    let mut pts: Vec<(f64, f64)> = ls.0.iter().map(|c| (c.x, c.y)).collect();

    //geos rings must be explicitly closed
    if let (Some(first), Some(last)) = (pts.first().copied(), pts.last().copied()) {
        if first != last {
            pts.push(first);
        }
    }
    pts
}

pub fn geo_polygon_to_geos<'c>(
    context: &'c GeosContext,
    polygon: &Polygon<f64>,
) -> Result<SimpleGeometry<'c>> {
    let exterior = ring_points(polygon.exterior());
    let interiors: Vec<Vec<(f64, f64)>> =
        polygon.interiors().iter().map(ring_points).collect();
    SimpleGeometry::create_polygon(context, &exterior, &interiors)
}

pub fn geo_polygons_to_geos_multi<'c>(
    context: &'c GeosContext,
    polygons: &[Polygon<f64>],
) -> Result<SimpleGeometry<'c>> {
    let members = polygons
        .iter()
        .map(|p| geo_polygon_to_geos(context, p))
        .collect::<Result<Vec<_>>>()?;
    SimpleGeometry::create_collection(context, members, GeometryTypes::MultiPolygon)
}

pub fn geo_linestring_to_geos<'c>(
    context: &'c GeosContext,
    line: &LineString<f64>,
) -> Result<SimpleGeometry<'c>> {
    let pts: Vec<(f64, f64)> = line.0.iter().map(|c| (c.x, c.y)).collect();
    SimpleGeometry::create_line_string(context, &pts)
}

pub fn points_to_geos_multi<'c>(
    context: &'c GeosContext,
    points: &[(f64, f64)],
) -> Result<SimpleGeometry<'c>> {
    let members = points
        .iter()
        .map(|&(x, y)| SimpleGeometry::create_point(context, x, y))
        .collect::<Result<Vec<_>>>()?;
    SimpleGeometry::create_collection(context, members, GeometryTypes::MultiPoint)
}

fn geos_ring_to_linestring(ring: &SimpleGeometry) -> Result<LineString<f64>> {
    let pts = ring.ring_points()?;
    Ok(LineString::from(
        pts.into_iter().map(|(x, y)| Coord { x, y }).collect::<Vec<_>>(),
    ))
}

fn geos_polygon_to_geo(geom: &SimpleGeometry) -> Result<Polygon<f64>> {
    let exterior = geos_ring_to_linestring(&geom.exterior_ring()?)?;
    let num_interior = geom.num_interior_rings()?;
    let mut interiors = Vec::with_capacity(num_interior);
    for i in 0..num_interior {
        interiors.push(geos_ring_to_linestring(&geom.interior_ring(i)?)?);
    }
    Ok(Polygon::new(exterior, interiors))
}

/// All polygons contained in the geometry, in geometry order
pub fn geos_to_geo_polygons(geom: &SimpleGeometry) -> Result<Vec<Polygon<f64>>> {
    let mut polygons = Vec::new();

    match geom.geometry_type() {
        GeometryTypes::Polygon => {
            if !geom.is_empty()? {
                polygons.push(geos_polygon_to_geo(geom)?);
            }
        }
        GeometryTypes::MultiPolygon | GeometryTypes::GeometryCollection => {
            let n = geom.num_geometries()?;
            for i in 0..n {
                let g = geom.geometry_at(i)?;
                polygons.extend(geos_to_geo_polygons(&g)?);
            }
        }
        _ => {}
    }

    Ok(polygons)
}

/// All linestrings contained in the geometry
pub fn geos_to_geo_linestrings(geom: &SimpleGeometry) -> Result<Vec<LineString<f64>>> {
    let mut lines = Vec::new();

    match geom.geometry_type() {
        GeometryTypes::LineString | GeometryTypes::LinearRing => {
            if !geom.is_empty()? {
                lines.push(geos_ring_to_linestring(geom)?);
            }
        }
        GeometryTypes::MultiLineString | GeometryTypes::GeometryCollection => {
            let n = geom.num_geometries()?;
            for i in 0..n {
                let g = geom.geometry_at(i)?;
                lines.extend(geos_to_geo_linestrings(&g)?);
            }
        }
        _ => {}
    }

    Ok(lines)
}

#[cfg(test)]
mod test {
    use super::*;

    fn unit_square() -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
            vec![],
        )
    }

    #[test]
    fn test_polygon_roundtrip() {
        let context = GeosContext::new();
        let poly = unit_square();

        let geos = geo_polygon_to_geos(&context, &poly).unwrap();
        assert_eq!(geos.geometry_type(), GeometryTypes::Polygon);
        assert!((geos.area().unwrap() - 1.0).abs() < 1e-12);

        let back = geos_to_geo_polygons(&geos).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].exterior().0.len(), 5);
    }

    #[test]
    fn test_to_wkt() {
        let context = GeosContext::new();
        let geos = geo_polygon_to_geos(&context, &unit_square()).unwrap();
        let wkt = geos.to_wkt_precision(0).unwrap();
        assert!(wkt.starts_with("POLYGON"));
        assert!(geos.to_wkt().unwrap().starts_with("POLYGON"));
    }

    #[test]
    fn test_multipoint_and_linestring() {
        let context = GeosContext::new();
        let mp = points_to_geos_multi(&context, &[(0.0, 0.0), (2.0, 2.0)]).unwrap();
        assert_eq!(mp.geometry_type(), GeometryTypes::MultiPoint);
        assert_eq!(mp.num_geometries().unwrap(), 2);

        let ls = geo_linestring_to_geos(
            &context,
            &LineString::from(vec![(0.0, 0.0), (3.0, 4.0)]),
        )
        .unwrap();
        let lines = geos_to_geo_linestrings(&ls).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0.len(), 2);
    }
}
