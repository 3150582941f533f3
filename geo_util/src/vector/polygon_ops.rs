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
use crate::vector::{azimuth_deg, deg_diff};
use geo::{Area, Centroid, Intersects, Rotate};
use geo_types::{Coord, Line, LineString, Point, Polygon};

pub fn rect(x: f64, y: f64, w: f64, h: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            (x, y),
            (x, y + h),
            (x + w, y + h),
            (x + w, y),
            (x, y),
        ]),
        vec![],
    )
}

pub fn square(x: f64, y: f64, edge: f64) -> Polygon<f64> {
    rect(x, y, edge, edge)
}

pub fn largest_polygon(polygons: Vec<Polygon<f64>>) -> Option<Polygon<f64>> {
    polygons
        .into_iter()
        .filter(|p| p.unsigned_area() > 0.0)
        .max_by(|a, b| {
            a.unsigned_area()
                .partial_cmp(&b.unsigned_area())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

pub fn fill_holes(polygon: &Polygon<f64>) -> Polygon<f64> {
    Polygon::new(polygon.exterior().clone(), vec![])
}

pub fn polygon_centroid(polygon: &Polygon<f64>) -> (f64, f64) {
    match polygon.centroid() {
        Some(c) => (c.x(), c.y()),
        None => (0.0, 0.0),
    }
}

pub fn rotate_polygon(polygon: &Polygon<f64>, angle_deg: f64, origin: (f64, f64)) -> Polygon<f64> {
    polygon.rotate_around_point(angle_deg, Point::new(origin.0, origin.1))
}

/// Open ring coordinates (without the closing point)
fn open_ring(ring: &LineString<f64>) -> Vec<Coord<f64>> {
    let mut pts: Vec<Coord<f64>> = ring.0.clone();
    if pts.len() > 1 && pts.first() == pts.last() {
        pts.pop();
    }
    pts
}

fn close_ring(mut pts: Vec<Coord<f64>>) -> LineString<f64> {
    if let Some(first) = pts.first().copied() {
        pts.push(first);
    }
    LineString::from(pts)
}

/// Removes vertices whose incoming and outgoing directions differ by less
/// than the tolerance, i.e. near-collinear points.
pub fn simplify_by_angle(polygon: &Polygon<f64>, tolerance_degrees: f64) -> Polygon<f64> {
    let simplify_ring = |ring: &LineString<f64>| -> LineString<f64> {
        let pts = open_ring(ring);
        let n = pts.len();
        if n < 4 {
            return ring.clone();
        }

        let mut keep = Vec::with_capacity(n);
        for i in 0..n {
            let prev = pts[(i + n - 1) % n];
            let cur = pts[i];
            let next = pts[(i + 1) % n];
            let incoming = azimuth_deg((prev.x, prev.y), (cur.x, cur.y));
            let outgoing = azimuth_deg((cur.x, cur.y), (next.x, next.y));
            if deg_diff(incoming, outgoing) >= tolerance_degrees {
                keep.push(cur);
            }
        }

        if keep.len() < 3 {
            return ring.clone();
        }
        close_ring(keep)
    };

    Polygon::new(
        simplify_ring(polygon.exterior()),
        polygon.interiors().iter().map(simplify_ring).collect(),
    )
}

/// Straight line segments of all rings with at least the given length
pub fn polygon_line_segments(polygon: &Polygon<f64>, min_length: f64) -> Vec<Line<f64>> {
    let mut segments = Vec::new();
    let mut add_ring = |ring: &LineString<f64>| {
        for line in ring.lines() {
            let len = (line.dx() * line.dx() + line.dy() * line.dy()).sqrt();
            if len >= min_length {
                segments.push(line);
            }
        }
    };
    add_ring(polygon.exterior());
    for interior in polygon.interiors() {
        add_ring(interior);
    }
    segments
}

/// Points along the exterior ring spaced at most `spacing` apart,
/// keeping the original vertices
pub fn densify_ring(polygon: &Polygon<f64>, spacing: f64) -> Vec<(f64, f64)> {
    let mut pts = Vec::new();
    for line in polygon.exterior().lines() {
        let len = (line.dx() * line.dx() + line.dy() * line.dy()).sqrt();
        pts.push((line.start.x, line.start.y));
        if len > spacing {
            let n = (len / spacing).ceil() as usize;
            for k in 1..n {
                let t = k as f64 / n as f64;
                pts.push((line.start.x + line.dx() * t, line.start.y + line.dy() * t));
            }
        }
    }
    pts
}

/// Cells of a w x h grid anchored at the bounds min corner that intersect
/// the polygon
pub fn grid_cells_bounds(polygon: &Polygon<f64>, cell_w: f64, cell_h: f64) -> Vec<Polygon<f64>> {
    use geo::BoundingRect;

    let bounds = match polygon.bounding_rect() {
        Some(b) => b,
        None => return vec![],
    };

    let mut cells = Vec::new();
    let mut x = bounds.min().x;
    while x < bounds.max().x {
        let mut y = bounds.min().y;
        while y < bounds.max().y {
            let cell = rect(x, y, cell_w, cell_h);
            if cell.intersects(polygon) {
                cells.push(cell);
            }
            y += cell_h;
        }
        x += cell_w;
    }
    cells
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum StepDir {
    PlusX,
    MinusX,
    PlusY,
    MinusY,
    Other,
}

fn step_dir(a: Coord<f64>, b: Coord<f64>) -> StepDir {
    let eps = 1e-9;
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    if dy.abs() < eps && dx.abs() >= eps {
        if dx > 0.0 {
            StepDir::PlusX
        } else {
            StepDir::MinusX
        }
    } else if dx.abs() < eps && dy.abs() >= eps {
        if dy > 0.0 {
            StepDir::PlusY
        } else {
            StepDir::MinusY
        }
    } else {
        StepDir::Other
    }
}

fn is_horizontal(d: StepDir) -> bool {
    d == StepDir::PlusX || d == StepDir::MinusX
}

fn is_vertical(d: StepDir) -> bool {
    d == StepDir::PlusY || d == StepDir::MinusY
}

fn seg_len(a: Coord<f64>, b: Coord<f64>) -> f64 {
    ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt()
}

fn merge_collinear(pts: &[Coord<f64>]) -> Vec<Coord<f64>> {
    let n = pts.len();
    if n < 3 {
        return pts.to_vec();
    }
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let prev = pts[(i + n - 1) % n];
        let cur = pts[i];
        let next = pts[(i + 1) % n];
        let cross = (cur.x - prev.x) * (next.y - prev.y) - (cur.y - prev.y) * (next.x - prev.x);
        if cross.abs() > 1e-9 {
            out.push(cur);
        }
    }
    if out.len() < 3 {
        pts.to_vec()
    } else {
        out
    }
}

fn de_zigzag_ring(ring: &LineString<f64>, max_step: f64) -> LineString<f64> {
    let mut pts = merge_collinear(&open_ring(ring));
    let n = pts.len();
    if n < 6 {
        return close_ring(pts);
    }

    //start scanning after the longest segment so that runs do not wrap
    let mut longest = 0usize;
    let mut longest_len = -1.0f64;
    for i in 0..n {
        let l = seg_len(pts[i], pts[(i + 1) % n]);
        if l > longest_len {
            longest_len = l;
            longest = i;
        }
    }
    pts.rotate_left((longest + 1) % n);

    //segment i goes from pts[i] to pts[i+1]
    let nseg = n - 1;
    let dir_of = |pts: &[Coord<f64>], i: usize| step_dir(pts[i], pts[i + 1]);
    let short = |pts: &[Coord<f64>], i: usize| seg_len(pts[i], pts[i + 1]) <= max_step;

    let mut out: Vec<Coord<f64>> = vec![pts[0]];
    let mut i = 0usize;
    while i < nseg {
        let d0 = dir_of(&pts, i);
        let mut run_end = i;

        if (is_horizontal(d0) || is_vertical(d0)) && short(&pts, i) {
            //extend while the steps keep alternating axis with consistent signs
            let mut h_sign = if is_horizontal(d0) { Some(d0) } else { None };
            let mut v_sign = if is_vertical(d0) { Some(d0) } else { None };
            let mut j = i + 1;
            while j < nseg && short(&pts, j) {
                let d = dir_of(&pts, j);
                let prev_d = dir_of(&pts, j - 1);
                let alternates = (is_horizontal(prev_d) && is_vertical(d))
                    || (is_vertical(prev_d) && is_horizontal(d));
                if !alternates {
                    break;
                }
                if is_horizontal(d) {
                    match h_sign {
                        Some(s) if s != d => break,
                        _ => h_sign = Some(d),
                    }
                } else {
                    match v_sign {
                        Some(s) if s != d => break,
                        _ => v_sign = Some(d),
                    }
                }
                run_end = j;
                j += 1;
            }
        }

        if run_end >= i + 2 {
            //replace the whole staircase with its chord
            out.push(pts[run_end + 1]);
            i = run_end + 1;
        } else {
            out.push(pts[i + 1]);
            i += 1;
        }
    }

    let out = merge_collinear(&out);
    if out.len() < 3 {
        close_ring(pts)
    } else {
        close_ring(out)
    }
}

/// Smooths stair-stepped edges: maximal runs of 3 or more short axis-aligned
/// segments that alternate between the two axes with consistent direction are
/// replaced by their chord.
pub fn de_zigzag(polygon: &Polygon<f64>, max_step: f64) -> Polygon<f64> {
    Polygon::new(
        de_zigzag_ring(polygon.exterior(), max_step),
        polygon
            .interiors()
            .iter()
            .map(|r| de_zigzag_ring(r, max_step))
            .collect(),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_largest_polygon() {
        let small = square(0.0, 0.0, 1.0);
        let big = square(5.0, 5.0, 3.0);
        let largest = largest_polygon(vec![small, big.clone()]).unwrap();
        assert!((largest.unsigned_area() - big.unsigned_area()).abs() < 1e-9);
        assert!(largest_polygon(vec![]).is_none());
    }

    #[test]
    fn test_simplify_by_angle_removes_collinear() {
        //square with an extra collinear vertex on the bottom edge
        let poly = Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (5.0, 0.001),
                (10.0, 0.0),
                (10.0, 10.0),
                (0.0, 10.0),
                (0.0, 0.0),
            ]),
            vec![],
        );
        let simplified = simplify_by_angle(&poly, 2.0);
        assert_eq!(simplified.exterior().0.len(), 5);
    }

    #[test]
    fn test_polygon_line_segments_min_length() {
        let poly = rect(0.0, 0.0, 10.0, 0.5);
        let segments = polygon_line_segments(&poly, 1.0);
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn test_densify_ring_spacing() {
        let poly = square(0.0, 0.0, 10.0);
        let pts = densify_ring(&poly, 1.0);
        assert_eq!(pts.len(), 40);
        for w in pts.windows(2) {
            let d = ((w[1].0 - w[0].0).powi(2) + (w[1].1 - w[0].1).powi(2)).sqrt();
            assert!(d <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn test_grid_cells_bounds_covers() {
        let poly = square(0.0, 0.0, 3.0);
        let cells = grid_cells_bounds(&poly, 1.0, 1.0);
        assert_eq!(cells.len(), 9);
    }

    #[test]
    fn test_de_zigzag_collapses_staircase() {
        //a staircase of 1m steps climbing from (10,0) to (14,4) closed by
        //two long edges
        let mut coords = vec![(0.0, 0.0), (10.0, 0.0)];
        for k in 0..4 {
            let x = 10.0 + k as f64;
            let y = k as f64;
            coords.push((x, y + 1.0));
            coords.push((x + 1.0, y + 1.0));
        }
        coords.push((0.0, 4.0));
        coords.push((0.0, 0.0));
        let poly = Polygon::new(LineString::from(coords), vec![]);

        let smoothed = de_zigzag(&poly, 1.5);
        assert!(smoothed.exterior().0.len() < poly.exterior().0.len());

        //idempotent
        let again = de_zigzag(&smoothed, 1.5);
        assert_eq!(again.exterior().0.len(), smoothed.exterior().0.len());
    }

    #[test]
    fn test_de_zigzag_keeps_rectangles() {
        let poly = rect(0.0, 0.0, 8.0, 5.0);
        let smoothed = de_zigzag(&poly, 1.5);
        assert_eq!(smoothed.exterior().0.len(), poly.exterior().0.len());
    }
}
