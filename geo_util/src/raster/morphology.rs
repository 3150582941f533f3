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
use geo::{ConvexHull, Intersects};
use geo_types::{Coord, MultiPoint, Point};
use itertools::Itertools;
use ndarray::Array2;

/// Number of cells of the image whose centre falls inside the convex hull of
/// the masked cells.  Hull points are the cell corners so that diagonal
/// strips get a hull wider than the strip itself.
pub fn convex_hull_area(mask: &Array2<bool>) -> usize {
    let mut corners: Vec<Point<f64>> = Vec::new();
    for ((r, c), &on) in mask.indexed_iter() {
        if !on {
            continue;
        }
        let (rf, cf) = (r as f64, c as f64);
        corners.push(Point::new(cf - 0.5, rf - 0.5));
        corners.push(Point::new(cf - 0.5, rf + 0.5));
        corners.push(Point::new(cf + 0.5, rf - 0.5));
        corners.push(Point::new(cf + 0.5, rf + 0.5));
    }

    if corners.is_empty() {
        return 0;
    }

    let hull = MultiPoint::from(corners).convex_hull();

    let (rows, cols) = mask.dim();
    (0..rows)
        .cartesian_product(0..cols)
        .filter(|&(r, c)| {
            let centre = Coord {
                x: c as f64,
                y: r as f64,
            };
            hull.intersects(&Point::from(centre))
        })
        .count()
}

pub fn convex_hull_ratio(mask: &Array2<bool>, component_area: usize) -> f64 {
    let hull_area = convex_hull_area(mask);
    if hull_area == 0 {
        return 0.0;
    }
    component_area as f64 / hull_area as f64
}

/// Crofton perimeter estimate with 4 directions, matching the usual
/// image-processing formulation: histogram the 2x2 neighbour codes
/// (cell + 4*left + 2*above) and weight them.
pub fn crofton_perimeter_4(mask: &Array2<bool>) -> f64 {
    let (rows, cols) = mask.dim();
    let mut hist = [0usize; 16];

    let at = |r: i64, c: i64| -> usize {
        if r < 0 || c < 0 || r >= rows as i64 || c >= cols as i64 {
            0
        } else if mask[[r as usize, c as usize]] {
            1
        } else {
            0
        }
    };

    for r in 0..rows as i64 {
        for c in 0..cols as i64 {
            let code = at(r, c) + 4 * at(r, c - 1) + 2 * at(r - 1, c);
            hist[code] += 1;
        }
    }

    let sqrt2 = std::f64::consts::SQRT_2;
    let pi = std::f64::consts::PI;
    let coefs = [
        0.0,
        pi / 4.0 * (1.0 + 1.0 / sqrt2),
        pi / (4.0 * sqrt2),
        pi / (2.0 * sqrt2),
        0.0,
        pi / 4.0 * (1.0 + 1.0 / sqrt2),
        0.0,
        pi / (4.0 * sqrt2),
        pi / 4.0,
        pi / 2.0,
        pi / (4.0 * sqrt2),
        pi / (4.0 * sqrt2),
        pi / 4.0,
        pi / 2.0,
        0.0,
        0.0,
    ];

    hist.iter()
        .zip(coefs.iter())
        .map(|(&h, &w)| h as f64 * w)
        .sum()
}

/// 4 pi area / perimeter^2, low for slivers
pub fn thinness_ratio(area: usize, perimeter: f64) -> f64 {
    if perimeter <= 0.0 {
        return 0.0;
    }
    4.0 * std::f64::consts::PI * area as f64 / (perimeter * perimeter)
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::Array2;

    fn square_mask(n: usize) -> Array2<bool> {
        Array2::from_elem((n, n), true)
    }

    #[test]
    fn test_convex_hull_of_square_is_square() {
        let mask = square_mask(4);
        assert_eq!(convex_hull_area(&mask), 16);
        assert!((convex_hull_ratio(&mask, 16) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_convex_hull_of_l_shape() {
        //7 cells in an L whose hull covers most of the 4x4 block
        let mut mask = Array2::from_elem((4, 4), false);
        for i in 0..4 {
            mask[[i, 0]] = true;
            mask[[3, i]] = true;
        }
        let comp = 7;
        let hull = convex_hull_area(&mask);
        assert!(hull > comp);
        assert!(convex_hull_ratio(&mask, comp) < 0.7);
    }

    #[test]
    fn test_thinness_square_vs_strip() {
        let sq = square_mask(6);
        let p_sq = crofton_perimeter_4(&sq);
        let t_sq = thinness_ratio(36, p_sq);

        let mut strip = Array2::from_elem((1, 36), true);
        strip[[0, 0]] = true;
        let p_strip = crofton_perimeter_4(&strip);
        let t_strip = thinness_ratio(36, p_strip);

        assert!(t_sq > t_strip);
        assert!(t_strip < 0.2);
    }

    #[test]
    fn test_crofton_scales_with_size() {
        let small = crofton_perimeter_4(&square_mask(2));
        let big = crofton_perimeter_4(&square_mask(8));
        assert!(big > small * 2.0);
    }
}
