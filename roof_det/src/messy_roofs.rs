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

//! Flat roofs covered in obstacles (pipes, air con, plant) show up as flat
//! planes full of holes.  Each flat plane is scored by the outlier groups
//! it touches that do not reach the edge of the building: good flat roofs
//! run to the edge, obstacle holes sit in the interior.

use crate::constants::{MESS_THRESHOLD_PCT, TOTAL_MESS_THRESHOLD_PCT};
use crate::datatypes::RoofPlane;
use crate::merge_adjacent::LABELS_NODATA;
use geo_util::raster::PixelGrid;
use ndarray::Array2;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

const EDGE_OF_BUILDING: i32 = -1;
const OUTLIER: i32 = -2;

/// Drops obstacle-ridden flat planes, or every plane when the whole roof is
/// mostly mess.  Only runs when a flat plane exists.
pub fn detect_messy_roofs(
    grid: &PixelGrid,
    planes: &BTreeMap<i32, RoofPlane>,
    labels: &[i32],
) -> Vec<RoofPlane> {
    let has_flat = planes.values().any(|p| p.is_flat);
    if !has_flat {
        return planes.values().cloned().collect();
    }

    let (rows, cols) = (grid.num_rows, grid.num_cols);

    //cells on a plane keep the plane id, everything else (outliers and
    //uncovered cells alike) is an obstacle candidate
    let mut img = Array2::from_elem((rows, cols), OUTLIER);
    for r in 0..rows {
        for c in 0..cols {
            if let Some(p) = grid.cell_pixel(r, c) {
                let l = labels[p];
                if l != LABELS_NODATA && planes.contains_key(&l) {
                    img[[r, c]] = l;
                }
            }
        }
    }

    //obstacle cells reachable from the image border belong to the moat
    let mut deq: VecDeque<(usize, usize)> = VecDeque::new();
    for r in 0..rows {
        for c in 0..cols {
            if (r == 0 || c == 0 || r == rows - 1 || c == cols - 1) && img[[r, c]] == OUTLIER {
                img[[r, c]] = EDGE_OF_BUILDING;
                deq.push_back((r, c));
            }
        }
    }
    while let Some((r, c)) = deq.pop_front() {
        for (dr, dc) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
            let (nr, nc) = (r as i64 + dr, c as i64 + dc);
            if nr < 0 || nc < 0 || nr >= rows as i64 || nc >= cols as i64 {
                continue;
            }
            let (nr, nc) = (nr as usize, nc as usize);
            if img[[nr, nc]] == OUTLIER {
                img[[nr, nc]] = EDGE_OF_BUILDING;
                deq.push_back((nr, nc));
            }
        }
    }

    //label the interior obstacle groups
    let max_plane_id = planes.keys().max().copied().unwrap_or(0);
    let mut next_group = max_plane_id + 1;
    let mut group_sizes: BTreeMap<i32, usize> = BTreeMap::new();
    for r in 0..rows {
        for c in 0..cols {
            if img[[r, c]] != OUTLIER {
                continue;
            }
            let group = next_group;
            next_group += 1;
            let mut size = 0usize;
            img[[r, c]] = group;
            deq.push_back((r, c));
            while let Some((gr, gc)) = deq.pop_front() {
                size += 1;
                for (dr, dc) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
                    let (nr, nc) = (gr as i64 + dr, gc as i64 + dc);
                    if nr < 0 || nc < 0 || nr >= rows as i64 || nc >= cols as i64 {
                        continue;
                    }
                    let (nr, nc) = (nr as usize, nc as usize);
                    if img[[nr, nc]] == OUTLIER {
                        img[[nr, nc]] = group;
                        deq.push_back((nr, nc));
                    }
                }
            }
            group_sizes.insert(group, size);
        }
    }

    //plane sizes from the image
    let mut plane_sizes: BTreeMap<i32, usize> = planes.keys().map(|&k| (k, 0)).collect();
    for &v in img.iter() {
        if let Some(s) = plane_sizes.get_mut(&v) {
            *s += 1;
        }
    }

    //adjacency between planes and obstacle groups
    let mut adjacent_groups: BTreeMap<i32, BTreeSet<i32>> =
        planes.keys().map(|&k| (k, BTreeSet::new())).collect();
    for r in 0..rows {
        for c in 0..cols {
            let v = img[[r, c]];
            if !plane_sizes.contains_key(&v) {
                continue;
            }
            for (dr, dc) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
                let (nr, nc) = (r as i64 + dr, c as i64 + dc);
                if nr < 0 || nc < 0 || nr >= rows as i64 || nc >= cols as i64 {
                    continue;
                }
                let nv = img[[nr as usize, nc as usize]];
                if group_sizes.contains_key(&nv) {
                    adjacent_groups.get_mut(&v).unwrap().insert(nv);
                }
            }
        }
    }

    let mut kept = Vec::new();
    let mut total_inliers = group_sizes.values().sum::<usize>();
    let mut mess_inliers = group_sizes.values().sum::<usize>();

    for (&id, plane) in planes {
        let size = plane_sizes[&id];
        total_inliers += size;
        if plane.is_flat {
            let mess_score: usize = adjacent_groups[&id]
                .iter()
                .map(|g| group_sizes[g])
                .sum();
            let mess_score_pct = if size > 0 {
                mess_score as f64 / size as f64
            } else {
                1.0
            };
            if mess_score_pct < MESS_THRESHOLD_PCT {
                kept.push(plane.clone());
            } else {
                mess_inliers += size;
            }
        } else {
            kept.push(plane.clone());
        }
    }

    let total_mess_score = if total_inliers > 0 {
        mess_inliers as f64 / total_inliers as f64
    } else {
        0.0
    };
    if total_mess_score >= TOTAL_MESS_THRESHOLD_PCT {
        return vec![];
    }

    kept
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::*;

    fn flat_plane_fixture() -> (BuildingFixture, Vec<i32>) {
        let b = messy_flat_building();
        let fixture = BuildingFixture::new(&b);
        //flat pixels on plane 0, obstacle pixels unassigned outliers
        let mut labels = Vec::with_capacity(fixture.z.len());
        let mut next_outlier = 1i32;
        for &z in &fixture.z {
            if z < 9.0 {
                labels.push(0);
            } else {
                labels.push(next_outlier);
                next_outlier += 1;
            }
        }
        (fixture, labels)
    }

    #[test]
    fn test_messy_flat_roof_rejected() {
        let (fixture, labels) = flat_plane_fixture();
        let plane_idxs: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == 0)
            .map(|(i, _)| i)
            .collect();
        let plane = fixture.plane_for(&plane_idxs, "flat");
        assert!(plane.is_flat);

        let mut planes = BTreeMap::new();
        planes.insert(0, plane);

        //obstacles make up over 14% of the plane and the whole building is
        //then mess, so nothing survives
        let kept = detect_messy_roofs(fixture.grid(), &planes, &labels);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_non_flat_planes_skip_the_check() {
        let b = gable_building();
        let fixture = BuildingFixture::new(&b);
        let n = fixture.xy.len();
        let west: Vec<usize> = (0..n).filter(|&i| fixture.xy[i].0 < 5.0).collect();
        let plane = fixture.plane_for(&west, "west");
        assert!(!plane.is_flat);

        let mut labels = vec![LABELS_NODATA; n];
        for &i in &west {
            labels[i] = 0;
        }
        let mut planes = BTreeMap::new();
        planes.insert(0, plane);

        let kept = detect_messy_roofs(fixture.grid(), &planes, &labels);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_clean_flat_roof_kept() {
        let b = flat_building();
        let fixture = BuildingFixture::new(&b);
        let n = fixture.xy.len();
        let all: Vec<usize> = (0..n).collect();
        let plane = fixture.plane_for(&all, "flat");
        assert!(plane.is_flat);

        let labels = vec![0i32; n];
        let mut planes = BTreeMap::new();
        planes.insert(0, plane);

        let kept = detect_messy_roofs(fixture.grid(), &planes, &labels);
        assert_eq!(kept.len(), 1);
    }
}
