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

//! Splits two overlapping roof polygons evenly.  A simple overlap is cut on
//! the straight line between the two boundary crossing points.  Otherwise
//! the cut follows the centre of the overlap, found by pruning a Voronoi
//! diagram of the densified overlap ring down to a single spine, the same
//! approach used for finding road centre lines.

use crate::constants::MIN_DIST_BETWEEN_PLANES;
use anyhow::Result;
use geo::{Intersects, Simplify};
use geo_types::{Coord, LineString, Polygon};
use geo_util::vector::{buffer_lines, densify_ring, fill_holes, largest_polygon, union_polygons};
use log::debug;
use simple_geos::{
    geo_linestring_to_geos, geo_polygon_to_geos, geos_to_geo_linestrings, geos_to_geo_polygons,
    points_to_geos_multi, GeosContext, SimpleGeometry,
};
use std::collections::{BTreeMap, BTreeSet};

const MIN_OVERLAP_AREA: f64 = 0.25;
const VORONOI_DENSITY_START: f64 = 0.1;
const VORONOI_DENSITY_MIN: f64 = 0.001;

type NodeKey = (u64, u64);

fn node_key(c: Coord<f64>) -> NodeKey {
    (c.x.to_bits(), c.y.to_bits())
}

fn key_coord(k: NodeKey) -> Coord<f64> {
    Coord {
        x: f64::from_bits(k.0),
        y: f64::from_bits(k.1),
    }
}

fn edge_id(a: NodeKey, b: NodeKey) -> (NodeKey, NodeKey) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn line_length(ls: &LineString<f64>) -> f64 {
    ls.lines()
        .map(|l| (l.dx() * l.dx() + l.dy() * l.dy()).sqrt())
        .sum()
}

#[derive(Default)]
struct SpineGraph {
    adjacency: BTreeMap<NodeKey, BTreeSet<NodeKey>>,
    edges: BTreeMap<(NodeKey, NodeKey), LineString<f64>>,
}

impl SpineGraph {
    fn add_edge(&mut self, a: NodeKey, b: NodeKey, geom: LineString<f64>) {
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
        self.edges.insert(edge_id(a, b), geom);
    }

    fn remove_edge(&mut self, a: NodeKey, b: NodeKey) -> Option<LineString<f64>> {
        if let Some(s) = self.adjacency.get_mut(&a) {
            s.remove(&b);
        }
        if let Some(s) = self.adjacency.get_mut(&b) {
            s.remove(&a);
        }
        self.edges.remove(&edge_id(a, b))
    }

    fn remove_node(&mut self, n: NodeKey) {
        self.adjacency.remove(&n);
    }

    fn degree(&self, n: NodeKey) -> usize {
        self.adjacency.get(&n).map(|s| s.len()).unwrap_or(0)
    }

    fn max_degree(&self) -> usize {
        self.adjacency.values().map(|s| s.len()).max().unwrap_or(0)
    }

    fn contains_node(&self, n: NodeKey) -> bool {
        self.adjacency.contains_key(&n)
    }

    fn degree_one_nodes(&self) -> Vec<NodeKey> {
        self.adjacency
            .iter()
            .filter(|(_, s)| s.len() == 1)
            .map(|(&k, _)| k)
            .collect()
    }
}

/// Medial spine of the overlap polygon from its Voronoi diagram, a single
/// open path with exactly 2 ends.  None when no spine can be found even at
/// the minimum densification spacing.
fn find_spine(
    context: &GeosContext,
    overlap_part: &Polygon<f64>,
) -> Result<Option<(SpineGraph, Vec<NodeKey>)>> {
    let mut density = VORONOI_DENSITY_START;

    loop {
        let ring_points = densify_ring(overlap_part, density);
        let mp = points_to_geos_multi(context, &ring_points)?;
        let voronoi = mp.voronoi(None, 0.0, true)?;
        let edges = geos_to_geo_linestrings(&voronoi)?;

        let g_part = geo_polygon_to_geos(context, overlap_part)?;
        let mut graph = SpineGraph::default();
        for edge in edges {
            let touches = overlap_part.intersects(&edge);
            let fully_inside = touches && {
                let g_edge = geo_linestring_to_geos(context, &edge)?;
                g_part.contains(&g_edge)?
            };
            //short edges that poke out are kept, the overlap is narrow there
            let keep = fully_inside || (line_length(&edge) <= density && touches);
            if keep {
                let n1 = node_key(edge.0[0]);
                let n2 = node_key(edge.0[edge.0.len() - 1]);
                if n1 != n2 {
                    graph.add_edge(n1, n2, edge);
                }
            }
        }

        if graph.adjacency.len() <= 1 || graph.edges.is_empty() {
            return Ok(None);
        }

        //break cycles deterministically: a spanning forest keeping shorter
        //edges, drop the rest
        {
            let mut sorted: Vec<((NodeKey, NodeKey), f64)> = graph
                .edges
                .iter()
                .map(|(&k, geom)| (k, line_length(geom)))
                .collect();
            sorted.sort_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.cmp(&b.0))
            });

            let node_ids: BTreeMap<NodeKey, usize> = graph
                .adjacency
                .keys()
                .enumerate()
                .map(|(i, &k)| (k, i))
                .collect();
            let mut uf = geo_util::util::UnionFind::new(node_ids.len());
            let mut to_drop = Vec::new();
            for (key, _) in sorted {
                let (a, b) = key;
                if !uf.union(node_ids[&a], node_ids[&b]) {
                    to_drop.push(key);
                }
            }
            for (a, b) in to_drop {
                graph.remove_edge(a, b);
            }
        }

        //prune the leaves back until only a spine of degree <=2 remains,
        //remembering the removed edges
        let mut candidate_edges: Vec<(NodeKey, NodeKey, LineString<f64>)> = Vec::new();
        while graph.max_degree() > 2 {
            for node in graph.degree_one_nodes() {
                if !graph.contains_node(node) {
                    continue;
                }
                let nbs: Vec<NodeKey> = graph
                    .adjacency
                    .get(&node)
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default();
                for nb in nbs {
                    if let Some(geom) = graph.remove_edge(node, nb) {
                        candidate_edges.push((node, nb, geom));
                    }
                }
                graph.remove_node(node);
            }
        }

        let retry = |graph: &SpineGraph| graph.degree_one_nodes().len() != 2;

        if retry(&graph) {
            density /= 2.0;
            debug!("pruning left no single spine, retrying at density {}", density);
            if density < VORONOI_DENSITY_MIN {
                return Ok(None);
            }
            continue;
        }

        //grow back any pruned edges that do not create a fork, last removed
        //first so the spine extends outward
        while let Some((n1, n2, geom)) = candidate_edges.pop() {
            let in1 = graph.contains_node(n1);
            let in2 = graph.contains_node(n2);
            if (in1 || in2)
                && (!in1 || graph.degree(n1) < 2)
                && (!in2 || graph.degree(n2) < 2)
            {
                graph.add_edge(n1, n2, geom);
            }
        }

        if retry(&graph) {
            density /= 2.0;
            debug!(
                "re-adding edges broke the spine, retrying at density {}",
                density
            );
            if density < VORONOI_DENSITY_MIN {
                return Ok(None);
            }
            continue;
        }

        let ends = graph.degree_one_nodes();
        return Ok(Some((graph, ends)));
    }
}

/// The centre points of the pieces where the boundaries of the two polygons
/// cross, in overlap-part terms
fn boundary_crossing_points(
    context: &GeosContext,
    p1: &SimpleGeometry,
    p2: &SimpleGeometry,
    overlap_part: &SimpleGeometry,
) -> Result<Vec<(f64, f64)>> {
    let b1 = p1.boundary()?;
    let b2 = p2.boundary()?;
    let crossings = b1.intersection(context, &b2)?;

    let mut pieces = Vec::new();
    match crossings.geometry_type() {
        simple_geos::GeometryTypes::GeometryCollection
        | simple_geos::GeometryTypes::MultiPoint
        | simple_geos::GeometryTypes::MultiLineString => {
            for i in 0..crossings.num_geometries()? {
                pieces.push(crossings.geometry_at(i)?.clone_geom(context)?);
            }
        }
        _ => pieces.push(crossings.clone_geom(context)?),
    }

    let mut points = Vec::new();
    for g in pieces {
        if g.is_empty()? || !g.intersects(overlap_part)? {
            continue;
        }
        match g.geometry_type() {
            simple_geos::GeometryTypes::Point => {
                points.push(g.point_xy()?);
            }
            simple_geos::GeometryTypes::LineString => {
                let clipped = g.intersection(context, overlap_part)?;
                let centroid = if clipped.is_empty()? {
                    g.centroid()?
                } else {
                    clipped.centroid()?
                };
                points.push(centroid.point_xy()?);
            }
            _ => {}
        }
    }
    Ok(points)
}

fn nearest_point(points: &[(f64, f64)], from: Coord<f64>) -> Option<(f64, f64)> {
    points
        .iter()
        .copied()
        .min_by(|a, b| {
            let da = (a.0 - from.x).powi(2) + (a.1 - from.y).powi(2);
            let db = (b.0 - from.x).powi(2) + (b.1 - from.y).powi(2);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Splits two overlapping polygons evenly, returning the adjusted pair.
/// Polygons that do not overlap come back unchanged.
pub fn split_evenly(
    context: &GeosContext,
    p1: &Polygon<f64>,
    p2: &Polygon<f64>,
) -> Result<(Polygon<f64>, Polygon<f64>)> {
    let g1 = geo_polygon_to_geos(context, p1)?;
    let g2 = geo_polygon_to_geos(context, p2)?;

    //containment and near-containment short circuit: carve the smaller out
    //of the larger
    let p1_fh = geo_polygon_to_geos(context, &fill_holes(p1))?;
    let p2_fh = geo_polygon_to_geos(context, &fill_holes(p2))?;
    let a1 = g1.area()?;
    let a2 = g2.area()?;
    let inter_12 = p1_fh.intersection(context, &g2)?.area()?;
    if p1_fh.contains(&g2)? || inter_12 > 0.9 * a2 {
        let carved = g1.difference(
            context,
            &g2.buffer(context, MIN_DIST_BETWEEN_PLANES / 2.0, 8)?,
        )?;
        let p1_new = largest_polygon(geos_to_geo_polygons(&carved)?).unwrap_or_else(|| p1.clone());
        return Ok((p1_new, p2.clone()));
    }
    let inter_21 = p2_fh.intersection(context, &g1)?.area()?;
    if p2_fh.contains(&g1)? || inter_21 > 0.9 * a1 {
        let carved = g2.difference(
            context,
            &g1.buffer(context, MIN_DIST_BETWEEN_PLANES / 2.0, 8)?,
        )?;
        let p2_new = largest_polygon(geos_to_geo_polygons(&carved)?).unwrap_or_else(|| p2.clone());
        return Ok((p1.clone(), p2_new));
    }

    let overlap = g1.intersection(context, &g2)?;
    let overlap_parts = geos_to_geo_polygons(&overlap)?;
    if overlap_parts.is_empty() {
        return Ok((p1.clone(), p2.clone()));
    }

    let mut splitter_pieces: Vec<Polygon<f64>> = Vec::new();

    for part in &overlap_parts {
        let part = fill_holes(part);
        let part_area = {
            let g = geo_polygon_to_geos(context, &part)?;
            g.area()?
        };
        if part_area < MIN_OVERLAP_AREA {
            continue;
        }
        let g_part = geo_polygon_to_geos(context, &part)?;

        let crossing_points = boundary_crossing_points(context, &g1, &g2, &g_part)?;
        if crossing_points.len() < 2 {
            debug!("overlap with {} boundary crossings, skipping", crossing_points.len());
            continue;
        }

        //a straight cut when the line between the crossing points stays
        //inside the overlap
        let straight: LineString<f64> = LineString::from(crossing_points.clone());
        let g_straight = geo_linestring_to_geos(context, &straight)?;
        let fattened = g_part.buffer(context, 0.1, 8)?;
        if fattened.contains(&g_straight)? {
            splitter_pieces.extend(buffer_lines(
                context,
                &[straight],
                MIN_DIST_BETWEEN_PLANES / 2.0,
            )?);
            continue;
        }

        //otherwise follow the centre of the overlap
        let (graph, ends) = match find_spine(context, &part)? {
            Some(g) => g,
            None => {
                debug!("no spine found in overlap, skipping the piece");
                continue;
            }
        };

        let mut spine_lines: Vec<LineString<f64>> =
            graph.edges.values().cloned().collect();
        for &end in &ends {
            let from = key_coord(end);
            if let Some((tx, ty)) = nearest_point(&crossing_points, from) {
                spine_lines.push(LineString::from(vec![(from.x, from.y), (tx, ty)]));
            }
        }

        //merge into continuous lines and straighten them out
        let g_lines: Result<Vec<SimpleGeometry>> = spine_lines
            .iter()
            .map(|l| geo_linestring_to_geos(context, l))
            .collect();
        let collection = SimpleGeometry::create_collection(
            context,
            g_lines?,
            simple_geos::GeometryTypes::MultiLineString,
        )?;
        let merged = collection.line_merge(context)?;
        let merged_lines: Vec<LineString<f64>> = geos_to_geo_linestrings(&merged)?
            .iter()
            .map(|l| l.simplify(&1.0))
            .collect();

        splitter_pieces.extend(buffer_lines(
            context,
            &merged_lines,
            MIN_DIST_BETWEEN_PLANES / 2.0,
        )?);
    }

    if splitter_pieces.is_empty() {
        return Ok((p1.clone(), p2.clone()));
    }

    let splitter = union_polygons(context, &splitter_pieces)?;

    let g_splitter = simple_geos::geo_polygons_to_geos_multi(context, &splitter)?;
    let p1_new = largest_polygon(geos_to_geo_polygons(&g1.difference(context, &g_splitter)?)?)
        .unwrap_or_else(|| p1.clone());
    let p2_new = largest_polygon(geos_to_geo_polygons(&g2.difference(context, &g_splitter)?)?)
        .unwrap_or_else(|| p2.clone());

    Ok((p1_new, p2_new))
}

#[cfg(test)]
mod test {
    use super::*;
    use geo::Area;
    use geo_util::vector::rect;

    fn overlap_area(context: &GeosContext, a: &Polygon<f64>, b: &Polygon<f64>) -> f64 {
        let ga = geo_polygon_to_geos(context, a).unwrap();
        let gb = geo_polygon_to_geos(context, b).unwrap();
        ga.intersection(context, &gb).unwrap().area().unwrap()
    }

    #[test]
    fn test_disjoint_polygons_unchanged() {
        let context = GeosContext::new();
        let p1 = rect(0.0, 0.0, 4.0, 4.0);
        let p2 = rect(10.0, 0.0, 4.0, 4.0);
        let (n1, n2) = split_evenly(&context, &p1, &p2).unwrap();
        assert_eq!(n1.exterior().0, p1.exterior().0);
        assert_eq!(n2.exterior().0, p2.exterior().0);
    }

    #[test]
    fn test_simple_overlap_split_on_chord() {
        let context = GeosContext::new();
        //two 6x6 squares overlapping by 2m
        let p1 = rect(0.0, 0.0, 6.0, 6.0);
        let p2 = rect(4.0, 0.0, 6.0, 6.0);

        let (n1, n2) = split_evenly(&context, &p1, &p2).unwrap();
        assert!(overlap_area(&context, &n1, &n2) < 1e-9);
        //both sides keep roughly their own area minus half the overlap
        assert!((n1.unsigned_area() - 30.0).abs() < 1.0);
        assert!((n2.unsigned_area() - 30.0).abs() < 1.0);
    }

    #[test]
    fn test_contained_polygon_carved_out() {
        let context = GeosContext::new();
        let p1 = rect(0.0, 0.0, 10.0, 10.0);
        let p2 = rect(3.0, 3.0, 2.0, 2.0);

        let (n1, n2) = split_evenly(&context, &p1, &p2).unwrap();
        //the smaller polygon survives, the larger loses the hole
        assert_eq!(n2.exterior().0, p2.exterior().0);
        assert!(n1.unsigned_area() < 100.0 - 4.0);
        assert!(overlap_area(&context, &n1, &n2) < 1e-9);
    }

    #[test]
    fn test_l_shaped_overlap_uses_spine() {
        let context = GeosContext::new();
        //an L-shaped p1 overlapping a square p2 so the crossing chord
        //leaves the overlap
        let p1 = Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (8.0, 0.0),
                (8.0, 8.0),
                (5.0, 8.0),
                (5.0, 3.0),
                (0.0, 3.0),
                (0.0, 0.0),
            ]),
            vec![],
        );
        let p2 = rect(3.0, 1.0, 4.0, 6.0);

        let (n1, n2) = split_evenly(&context, &p1, &p2).unwrap();
        assert!(overlap_area(&context, &n1, &n2) < 0.05);
        //neither side swallowed the whole overlap
        assert!(n1.unsigned_area() < p1.unsigned_area());
        assert!(n2.unsigned_area() < p2.unsigned_area());
    }
}
