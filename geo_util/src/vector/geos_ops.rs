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
use anyhow::Result;
use geo_types::{LineString, Polygon};
use simple_geos::{
    geo_linestring_to_geos, geo_polygon_to_geos, geo_polygons_to_geos_multi, geos_to_geo_polygons,
    CapStyle, JoinStyle, GeosContext,
};

//shapely's default mitre limit
const MITRE_LIMIT: f64 = 5.0;

/// Unary union of polygons, returning the polygonal parts
pub fn union_polygons(
    context: &GeosContext,
    polygons: &[Polygon<f64>],
) -> Result<Vec<Polygon<f64>>> {
    if polygons.is_empty() {
        return Ok(vec![]);
    }
    let multi = geo_polygons_to_geos_multi(context, polygons)?;
    let unioned = multi.unary_union(context)?;
    geos_to_geo_polygons(&unioned)
}

/// Buffer with square caps and mitred joins, as the roof polygons need
/// (negative width shrinks)
pub fn buffer_polygon(
    context: &GeosContext,
    polygon: &Polygon<f64>,
    width: f64,
) -> Result<Vec<Polygon<f64>>> {
    let g = geo_polygon_to_geos(context, polygon)?;
    let buffered = g.buffer_with_style(
        context,
        width,
        8,
        CapStyle::Square,
        JoinStyle::Mitre,
        MITRE_LIMIT,
    )?;
    geos_to_geo_polygons(&buffered)
}

/// Buffer a set of lines into a single splitter area
pub fn buffer_lines(
    context: &GeosContext,
    lines: &[LineString<f64>],
    width: f64,
) -> Result<Vec<Polygon<f64>>> {
    let mut buffered = Vec::new();
    for line in lines {
        let g = geo_linestring_to_geos(context, line)?;
        let b = g.buffer_with_style(
            context,
            width,
            1,
            CapStyle::Square,
            JoinStyle::Mitre,
            MITRE_LIMIT,
        )?;
        buffered.extend(geos_to_geo_polygons(&b)?);
    }
    union_polygons(context, &buffered)
}

/// Snaps coordinates to a grid, keeping the output valid
pub fn set_precision_polygon(
    context: &GeosContext,
    polygon: &Polygon<f64>,
    grid_size: f64,
) -> Result<Vec<Polygon<f64>>> {
    let g = geo_polygon_to_geos(context, polygon)?;
    geos_to_geo_polygons(&g.set_precision(context, grid_size)?)
}

pub fn make_valid_polygons(
    context: &GeosContext,
    polygon: &Polygon<f64>,
) -> Result<Vec<Polygon<f64>>> {
    let g = geo_polygon_to_geos(context, polygon)?;
    if g.is_valid() {
        return Ok(vec![polygon.clone()]);
    }
    geos_to_geo_polygons(&g.make_valid(context)?)
}
