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
use crate::raster::PixelGrid;
use ndarray::Array2;
use std::collections::VecDeque;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Connectivity {
    Four,
    Eight,
}

/// Labels 4-connected components of the masked pixels.  Returns a label per
/// pixel (0 where the mask is off, labels 1..=num otherwise) and the number
/// of components.
pub fn pixel_components(grid: &PixelGrid, mask: &[bool]) -> (Vec<i32>, usize) {
    let n = grid.num_pixels();
    assert_eq!(n, mask.len());

    let mut labels = vec![0i32; n];
    let mut num = 0i32;
    let mut deq = VecDeque::new();

    for start in 0..n {
        if !mask[start] || labels[start] != 0 {
            continue;
        }
        num += 1;
        labels[start] = num;
        deq.push_back(start);

        while let Some(cur) = deq.pop_front() {
            for nb in grid.neighbours4(cur) {
                if mask[nb] && labels[nb] == 0 {
                    labels[nb] = num;
                    deq.push_back(nb);
                }
            }
        }
    }

    (labels, num as usize)
}

/// Sizes of each component, indexed by label - 1
pub fn component_areas(labels: &[i32], num: usize) -> Vec<usize> {
    let mut areas = vec![0usize; num];
    for &l in labels {
        if l > 0 {
            areas[(l - 1) as usize] += 1;
        }
    }
    areas
}

/// Restricts the mask to its largest 4-connected component.
/// Returns None when the mask is empty.
pub fn largest_component_mask(grid: &PixelGrid, mask: &[bool]) -> Option<(Vec<bool>, usize)> {
    let (labels, num) = pixel_components(grid, mask);
    if num == 0 {
        return None;
    }
    let areas = component_areas(&labels, num);
    let largest = areas
        .iter()
        .enumerate()
        .max_by_key(|&(i, &a)| (a, std::cmp::Reverse(i)))
        .map(|(i, _)| (i + 1) as i32)?;

    let out: Vec<bool> = labels.iter().map(|&l| l == largest).collect();
    let area = areas[(largest - 1) as usize];
    Some((out, area))
}

/// Labels connected regions of equal cell value, skipping the background
/// value.  Output cells hold 0 for background and labels 1..=num otherwise.
pub fn label_equal_values(
    img: &Array2<i32>,
    background: i32,
    connectivity: Connectivity,
) -> (Array2<i32>, usize) {
    let (rows, cols) = img.dim();
    let mut labels = Array2::from_elem((rows, cols), 0i32);
    let mut num = 0i32;
    let mut deq: VecDeque<(usize, usize)> = VecDeque::new();

    let offsets: &[(i64, i64)] = match connectivity {
        Connectivity::Four => &[(-1, 0), (1, 0), (0, -1), (0, 1)],
        Connectivity::Eight => &[
            (-1, -1),
            (-1, 0),
            (-1, 1),
            (0, -1),
            (0, 1),
            (1, -1),
            (1, 0),
            (1, 1),
        ],
    };

    for r in 0..rows {
        for c in 0..cols {
            if img[[r, c]] == background || labels[[r, c]] != 0 {
                continue;
            }
            let value = img[[r, c]];
            num += 1;
            labels[[r, c]] = num;
            deq.push_back((r, c));

            while let Some((cr, cc)) = deq.pop_front() {
                for &(dr, dc) in offsets {
                    let nr = cr as i64 + dr;
                    let nc = cc as i64 + dc;
                    if nr < 0 || nr >= rows as i64 || nc < 0 || nc >= cols as i64 {
                        continue;
                    }
                    let (nr, nc) = (nr as usize, nc as usize);
                    if img[[nr, nc]] == value && labels[[nr, nc]] == 0 {
                        labels[[nr, nc]] = num;
                        deq.push_back((nr, nc));
                    }
                }
            }
        }
    }

    (labels, num as usize)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pixel_components_splits_diagonal() {
        //two pixels touching only diagonally are separate components
        let xy = vec![(0.5, 1.5), (1.5, 0.5)];
        let grid = PixelGrid::new(&xy, 1.0).unwrap();
        let (labels, num) = pixel_components(&grid, &[true, true]);
        assert_eq!(num, 2);
        assert_ne!(labels[0], labels[1]);
    }

    #[test]
    fn test_largest_component() {
        //a 3 pixel strip and an isolated pixel
        let xy = vec![(0.5, 0.5), (1.5, 0.5), (2.5, 0.5), (4.5, 0.5)];
        let grid = PixelGrid::new(&xy, 1.0).unwrap();
        let (mask, area) = largest_component_mask(&grid, &[true, true, true, true]).unwrap();
        assert_eq!(area, 3);
        assert_eq!(mask, vec![true, true, true, false]);
    }

    #[test]
    fn test_label_equal_values() {
        let img = ndarray::arr2(&[[1, 1, 2], [0, 1, 2], [3, 0, 2]]);
        let (labels, num) = label_equal_values(&img, 0, Connectivity::Four);
        assert_eq!(num, 3);
        assert_eq!(labels[[0, 0]], labels[[0, 1]]);
        assert_eq!(labels[[0, 1]], labels[[1, 1]]);
        assert_eq!(labels[[0, 2]], labels[[2, 2]]);
        assert_ne!(labels[[0, 0]], labels[[0, 2]]);
        assert_eq!(labels[[1, 0]], 0);
    }

    #[test]
    fn test_label_equal_values_eight_conn() {
        let img = ndarray::arr2(&[[1, 0], [0, 1]]);
        let (_, num4) = label_equal_values(&img, 0, Connectivity::Four);
        let (_, num8) = label_equal_values(&img, 0, Connectivity::Eight);
        assert_eq!(num4, 2);
        assert_eq!(num8, 1);
    }
}
