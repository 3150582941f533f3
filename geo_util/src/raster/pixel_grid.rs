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
use anyhow::{bail, Result};
use ndarray::Array2;

/// Cell back reference for cells with no pixel
pub const CELL_NODATA: i32 = -1;

/// Maps pixel centres on a regular grid of the given resolution to an integer
/// image.  Image y increases downward: col = floor((x - x_min)/res),
/// row = floor((y_max - y)/res).
pub struct PixelGrid {
    pub num_rows: usize,
    pub num_cols: usize,
    pub min_x: f64,
    pub max_y: f64,
    pub res: f64,
    //pixel array index per cell, CELL_NODATA where empty
    cells: Array2<i32>,
    rowcols: Vec<(usize, usize)>,
}

impl PixelGrid {
    pub fn new(xy: &[(f64, f64)], res: f64) -> Result<PixelGrid> {
        if xy.is_empty() {
            bail!("no pixels to rasterize");
        }
        if res <= 0.0 {
            bail!("invalid resolution: {}", res);
        }

        let mut min_x = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for &(x, y) in xy {
            if !x.is_finite() || !y.is_finite() {
                bail!("non finite pixel coordinate ({}, {})", x, y);
            }
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }

        let num_cols = ((max_x - min_x) / res).floor() as usize + 1;
        let num_rows = ((max_y - min_y) / res).floor() as usize + 1;

        let mut cells = Array2::from_elem((num_rows, num_cols), CELL_NODATA);
        let mut rowcols = Vec::with_capacity(xy.len());
        for (i, &(x, y)) in xy.iter().enumerate() {
            let col = ((x - min_x) / res).floor() as usize;
            let row = ((max_y - y) / res).floor() as usize;
            cells[[row, col]] = i as i32;
            rowcols.push((row, col));
        }

        Ok(PixelGrid {
            num_rows,
            num_cols,
            min_x,
            max_y,
            res,
            cells,
            rowcols,
        })
    }

    #[inline]
    pub fn rowcol(&self, pixel_idx: usize) -> (usize, usize) {
        self.rowcols[pixel_idx]
    }

    #[inline]
    pub fn cell_pixel(&self, row: usize, col: usize) -> Option<usize> {
        let v = self.cells[[row, col]];
        if v == CELL_NODATA {
            None
        } else {
            Some(v as usize)
        }
    }

    pub fn num_pixels(&self) -> usize {
        self.rowcols.len()
    }

    /// 4 connected neighbour pixels of a pixel
    pub fn neighbours4(&self, pixel_idx: usize) -> Vec<usize> {
        let (r, c) = self.rowcols[pixel_idx];
        let mut out = Vec::with_capacity(4);
        if r > 0 {
            if let Some(p) = self.cell_pixel(r - 1, c) {
                out.push(p);
            }
        }
        if r + 1 < self.num_rows {
            if let Some(p) = self.cell_pixel(r + 1, c) {
                out.push(p);
            }
        }
        if c > 0 {
            if let Some(p) = self.cell_pixel(r, c - 1) {
                out.push(p);
            }
        }
        if c + 1 < self.num_cols {
            if let Some(p) = self.cell_pixel(r, c + 1) {
                out.push(p);
            }
        }
        out
    }

    pub fn rasterize_i32(&self, vals: &[i32], nodata: i32) -> Array2<i32> {
        let mut img = Array2::from_elem((self.num_rows, self.num_cols), nodata);
        for (i, &(r, c)) in self.rowcols.iter().enumerate() {
            img[[r, c]] = vals[i];
        }
        img
    }

    pub fn rasterize_f64(&self, vals: &[f64], nodata: f64) -> Array2<f64> {
        let mut img = Array2::from_elem((self.num_rows, self.num_cols), nodata);
        for (i, &(r, c)) in self.rowcols.iter().enumerate() {
            img[[r, c]] = vals[i];
        }
        img
    }

    pub fn mask_image(&self, mask: &[bool]) -> Array2<bool> {
        let mut img = Array2::from_elem((self.num_rows, self.num_cols), false);
        for (i, &(r, c)) in self.rowcols.iter().enumerate() {
            if mask[i] {
                img[[r, c]] = true;
            }
        }
        img
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pixel_grid_indexing() {
        //2x3 grid at 1m resolution, pixel centres on half metres
        let xy = vec![
            (0.5, 1.5),
            (1.5, 1.5),
            (2.5, 1.5),
            (0.5, 0.5),
            (1.5, 0.5),
            (2.5, 0.5),
        ];
        let grid = PixelGrid::new(&xy, 1.0).unwrap();

        assert_eq!(grid.num_rows, 2);
        assert_eq!(grid.num_cols, 3);
        //top left is the pixel with the highest y
        assert_eq!(grid.rowcol(0), (0, 0));
        assert_eq!(grid.rowcol(5), (1, 2));
        assert_eq!(grid.cell_pixel(0, 1), Some(1));
        assert_eq!(grid.cell_pixel(1, 0), Some(3));
    }

    #[test]
    fn test_pixel_grid_nodata_cells() {
        //L shape, top right cell empty
        let xy = vec![(0.5, 1.5), (0.5, 0.5), (1.5, 0.5)];
        let grid = PixelGrid::new(&xy, 1.0).unwrap();

        assert_eq!(grid.cell_pixel(0, 1), None);
        assert_eq!(grid.cell_pixel(0, 0), Some(0));
    }

    #[test]
    fn test_pixel_grid_rejects_bad_input() {
        assert!(PixelGrid::new(&[], 1.0).is_err());
        assert!(PixelGrid::new(&[(f64::NAN, 0.0)], 1.0).is_err());
    }

    #[test]
    fn test_neighbours4() {
        let xy = vec![(0.5, 1.5), (0.5, 0.5), (1.5, 0.5), (2.5, 1.5)];
        let grid = PixelGrid::new(&xy, 1.0).unwrap();

        let mut n = grid.neighbours4(1);
        n.sort();
        assert_eq!(n, vec![0, 2]);
        //diagonal is not a neighbour
        assert_eq!(grid.neighbours4(3), Vec::<usize>::new());
    }
}
