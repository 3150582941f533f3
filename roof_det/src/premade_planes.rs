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
use crate::constants::{HEIGHT_CLUSTER_EPS, HEIGHT_CLUSTER_MIN_SAMPLES, SAMPLE_RESIDUAL_THRESHOLDS};
use crate::datatypes::PremadePlane;
use geo_util::raster::{label_equal_values, Connectivity, PixelGrid};
use geo_util::util::UnionFind;
use ndarray::Array2;

const NOISE: i32 = -1;

struct PlaneDef {
    plane_type: &'static str,
    segmenting_threshold: f64,
    sample_residual_threshold: f64,
}

fn plane_defs() -> Vec<PlaneDef> {
    let mut defs = Vec::new();
    for &threshold in &[29.0, 15.0] {
        for &sample_residual_threshold in &SAMPLE_RESIDUAL_THRESHOLDS {
            defs.push(PlaneDef {
                plane_type: "segmented_aspect",
                segmenting_threshold: threshold,
                sample_residual_threshold,
            });
        }
    }
    defs
}

/// Density based clustering of the height values.  Returns NOISE for noise
/// points and cluster labels that never use 0, so that 0 can act as the
/// raster background.
pub fn height_clusters(z: &[f64]) -> Vec<i32> {
    let n = z.len();
    let mut labels = vec![NOISE; n];
    if n == 0 {
        return labels;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| z[a].partial_cmp(&z[b]).unwrap_or(std::cmp::Ordering::Equal));

    //neighbour counts within eps via a sliding window over the sorted values
    let sorted_z: Vec<f64> = order.iter().map(|&i| z[i]).collect();
    let mut lo = 0usize;
    let mut hi = 0usize;
    let mut is_core = vec![false; n];
    for k in 0..n {
        while sorted_z[k] - sorted_z[lo] > HEIGHT_CLUSTER_EPS {
            lo += 1;
        }
        while hi < n && sorted_z[hi] - sorted_z[k] <= HEIGHT_CLUSTER_EPS {
            hi += 1;
        }
        if hi - lo >= HEIGHT_CLUSTER_MIN_SAMPLES {
            is_core[k] = true;
        }
    }

    //chain core points whose gap is within eps
    let mut cluster = -1i32;
    let mut prev_core: Option<usize> = None;
    let mut cluster_of_sorted = vec![NOISE; n];
    for k in 0..n {
        if !is_core[k] {
            continue;
        }
        match prev_core {
            Some(p) if sorted_z[k] - sorted_z[p] <= HEIGHT_CLUSTER_EPS => {}
            _ => cluster += 1,
        }
        cluster_of_sorted[k] = cluster;
        prev_core = Some(k);
    }

    //border points join the cluster of the nearest core point within eps
    for k in 0..n {
        if is_core[k] || cluster < 0 {
            continue;
        }
        let mut best: Option<(f64, i32)> = None;
        //cores are contiguous runs, only the nearest on each side matters
        for j in (0..k).rev() {
            if is_core[j] {
                let d = sorted_z[k] - sorted_z[j];
                if d <= HEIGHT_CLUSTER_EPS {
                    best = Some((d, cluster_of_sorted[j]));
                }
                break;
            }
        }
        for j in k + 1..n {
            if is_core[j] {
                let d = sorted_z[j] - sorted_z[k];
                if d <= HEIGHT_CLUSTER_EPS && best.map(|(bd, _)| d < bd).unwrap_or(true) {
                    best = Some((d, cluster_of_sorted[j]));
                }
                break;
            }
        }
        if let Some((_, c)) = best {
            cluster_of_sorted[k] = c;
        }
    }

    for (k, &i) in order.iter().enumerate() {
        labels[i] = cluster_of_sorted[k];
    }

    //cluster 0 is renamed so that 0 stays free for the raster background
    let max_label = labels.iter().copied().max().unwrap_or(NOISE);
    for l in labels.iter_mut() {
        if *l == 0 {
            *l = max_label + 1;
        }
    }
    labels
}

/// SLIC-like superpixel segmentation of a single-channel image restricted to
/// a mask, followed by merging adjacent segments whose mean value differs by
/// less than the threshold.  Returns 4-connected segment labels (0 outside
/// the mask) and the number of segments.
fn segment(image: &Array2<f64>, mask: &Array2<bool>, threshold: f64) -> (Array2<i32>, usize) {
    const N_SEGMENTS: f64 = 100.0;
    const COMPACTNESS: f64 = 30.0;
    const ITERATIONS: usize = 10;

    let (rows, cols) = image.dim();
    let masked: Vec<(usize, usize)> = mask
        .indexed_iter()
        .filter(|(_, &m)| m)
        .map(|((r, c), _)| (r, c))
        .collect();
    if masked.is_empty() {
        return (Array2::from_elem((rows, cols), 0), 0);
    }

    let spacing = ((masked.len() as f64 / N_SEGMENTS).sqrt().round() as usize).max(1);

    //centres seeded on a regular grid, snapped to the nearest masked cell
    #[derive(Clone)]
    struct Centre {
        val: f64,
        r: f64,
        c: f64,
    }
    let mut centres: Vec<Centre> = Vec::new();
    let half = spacing / 2;
    let mut gr = half;
    while gr < rows {
        let mut gc = half;
        while gc < cols {
            let mut best: Option<(usize, (usize, usize))> = None;
            for &(r, c) in &masked {
                let d = r.abs_diff(gr) + c.abs_diff(gc);
                if d <= spacing && best.map(|(bd, _)| d < bd).unwrap_or(true) {
                    best = Some((d, (r, c)));
                }
            }
            if let Some((_, (r, c))) = best {
                centres.push(Centre {
                    val: image[[r, c]],
                    r: r as f64,
                    c: c as f64,
                });
            }
            gc += spacing;
        }
        gr += spacing;
    }
    if centres.is_empty() {
        let (r, c) = masked[0];
        centres.push(Centre {
            val: image[[r, c]],
            r: r as f64,
            c: c as f64,
        });
    }

    let s = spacing as f64;
    let dist = |centre: &Centre, r: usize, c: usize| -> f64 {
        let dv = image[[r, c]] - centre.val;
        let dr = r as f64 - centre.r;
        let dc = c as f64 - centre.c;
        let ds = (dr * dr + dc * dc).sqrt();
        (dv * dv + (ds / s) * (ds / s) * COMPACTNESS * COMPACTNESS).sqrt()
    };

    let mut assignment = vec![usize::MAX; masked.len()];
    let cell_index: std::collections::HashMap<(usize, usize), usize> = masked
        .iter()
        .enumerate()
        .map(|(i, &rc)| (rc, i))
        .collect();

    for _ in 0..ITERATIONS {
        let mut best_dist = vec![f64::INFINITY; masked.len()];
        for (ci, centre) in centres.iter().enumerate() {
            let r0 = (centre.r - 2.0 * s).floor().max(0.0) as usize;
            let r1 = ((centre.r + 2.0 * s).ceil() as usize).min(rows - 1);
            let c0 = (centre.c - 2.0 * s).floor().max(0.0) as usize;
            let c1 = ((centre.c + 2.0 * s).ceil() as usize).min(cols - 1);
            for r in r0..=r1 {
                for c in c0..=c1 {
                    if let Some(&mi) = cell_index.get(&(r, c)) {
                        let d = dist(centre, r, c);
                        if d < best_dist[mi] {
                            best_dist[mi] = d;
                            assignment[mi] = ci;
                        }
                    }
                }
            }
        }

        //cells no centre window reached fall back to a global search
        for (mi, &(r, c)) in masked.iter().enumerate() {
            if assignment[mi] == usize::MAX {
                let mut best = (f64::INFINITY, 0usize);
                for (ci, centre) in centres.iter().enumerate() {
                    let d = dist(centre, r, c);
                    if d < best.0 {
                        best = (d, ci);
                    }
                }
                assignment[mi] = best.1;
            }
        }

        //recompute the centres
        let mut sums = vec![(0.0f64, 0.0f64, 0.0f64, 0usize); centres.len()];
        for (mi, &(r, c)) in masked.iter().enumerate() {
            let ci = assignment[mi];
            sums[ci].0 += image[[r, c]];
            sums[ci].1 += r as f64;
            sums[ci].2 += c as f64;
            sums[ci].3 += 1;
        }
        for (ci, centre) in centres.iter_mut().enumerate() {
            let (v, r, c, count) = sums[ci];
            if count > 0 {
                let n = count as f64;
                centre.val = v / n;
                centre.r = r / n;
                centre.c = c / n;
            }
        }
    }

    //superpixel labels, split into 4-connected pieces
    let mut seg_img = Array2::from_elem((rows, cols), 0i32);
    for (mi, &(r, c)) in masked.iter().enumerate() {
        seg_img[[r, c]] = assignment[mi] as i32 + 1;
    }
    let (seg_img, num_initial) = label_equal_values(&seg_img, 0, Connectivity::Four);
    if num_initial == 0 {
        return (seg_img, 0);
    }

    //mean field value per segment
    let mut mean_sum = vec![0.0f64; num_initial];
    let mut mean_count = vec![0usize; num_initial];
    for ((r, c), &l) in seg_img.indexed_iter() {
        if l > 0 {
            mean_sum[(l - 1) as usize] += image[[r, c]];
            mean_count[(l - 1) as usize] += 1;
        }
    }
    let means: Vec<f64> = mean_sum
        .iter()
        .zip(mean_count.iter())
        .map(|(&s, &n)| if n > 0 { s / n as f64 } else { 0.0 })
        .collect();

    //merge neighbouring segments with close means, 8-connected adjacency
    let mut uf = UnionFind::new(num_initial);
    for r in 0..rows {
        for c in 0..cols {
            let l = seg_img[[r, c]];
            if l == 0 {
                continue;
            }
            for (dr, dc) in [(0i64, 1i64), (1, 0), (1, 1), (1, -1)] {
                let nr = r as i64 + dr;
                let nc = c as i64 + dc;
                if nr < 0 || nr >= rows as i64 || nc < 0 || nc >= cols as i64 {
                    continue;
                }
                let nl = seg_img[[nr as usize, nc as usize]];
                if nl > 0
                    && nl != l
                    && (means[(l - 1) as usize] - means[(nl - 1) as usize]).abs() < threshold
                {
                    uf.union((l - 1) as usize, (nl - 1) as usize);
                }
            }
        }
    }
    let (merged_labels, _) = uf.labels();

    let mut merged_img = Array2::from_elem((rows, cols), 0i32);
    for ((r, c), &l) in seg_img.indexed_iter() {
        if l > 0 {
            merged_img[[r, c]] = merged_labels[(l - 1) as usize] as i32;
        }
    }

    //final regions re-labelled by 4-connectivity
    label_equal_values(&merged_img, 0, Connectivity::Four)
}

/// Builds the candidate planes for DETSAC: height clusters sub-segmented by
/// aspect at two thresholds, each emitted with two sample residual
/// thresholds.
pub fn create_premade_planes(grid: &PixelGrid, aspect: &[f64], z: &[f64]) -> Vec<PremadePlane> {
    let mut planes = Vec::new();

    let labels = height_clusters(z);
    let label_img = grid.rasterize_i32(&labels, 0);

    let noise_cells: Vec<(usize, usize)> = label_img
        .indexed_iter()
        .filter(|(_, &v)| v == NOISE)
        .map(|(rc, _)| rc)
        .collect();

    let (mut z_segments, num_z_segments) =
        label_equal_values(&label_img, 0, Connectivity::Four);
    for &(r, c) in &noise_cells {
        z_segments[[r, c]] = NOISE;
    }

    let aspect_img = grid.rasterize_f64(aspect, 0.0);
    let defs = plane_defs();

    for z_segment_id in 1..=num_z_segments as i32 {
        let mask = z_segments.mapv(|v| v == z_segment_id);
        let cluster_size = mask.iter().filter(|&&m| m).count();
        if cluster_size <= 3 {
            continue;
        }

        for def in &defs {
            let (segments, num_segments) = segment(&aspect_img, &mask, def.segmenting_threshold);

            for segment_id in 1..=num_segments as i32 {
                let mut idxs = Vec::new();
                for ((r, c), &l) in segments.indexed_iter() {
                    if l == segment_id {
                        if let Some(p) = grid.cell_pixel(r, c) {
                            idxs.push(p);
                        }
                    }
                }
                if idxs.len() > 3 {
                    let plane_id = format!(
                        "{}_{}_{}_{}_{}",
                        def.plane_type,
                        z_segment_id,
                        def.segmenting_threshold,
                        def.sample_residual_threshold,
                        segment_id
                    );
                    planes.push(PremadePlane {
                        idxs,
                        sample_residual_threshold: def.sample_residual_threshold,
                        plane_type: def.plane_type,
                        plane_id,
                    });
                }
            }
        }
    }

    planes
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_height_clusters_two_levels() {
        //two well separated height bands
        let mut z = vec![2.0; 10];
        z.extend(vec![8.0; 10]);
        let labels = height_clusters(&z);

        assert!(labels.iter().all(|&l| l != NOISE));
        assert_eq!(labels[0], labels[9]);
        assert_eq!(labels[10], labels[19]);
        assert_ne!(labels[0], labels[10]);
        //0 never used as a cluster label
        assert!(labels.iter().all(|&l| l != 0));
    }

    #[test]
    fn test_height_clusters_noise() {
        let mut z = vec![2.0; 10];
        z.push(50.0);
        let labels = height_clusters(&z);
        assert_eq!(labels[10], NOISE);
        assert!(labels[..10].iter().all(|&l| l > 0));
    }

    #[test]
    fn test_height_clusters_all_noise() {
        //too spread out for any core point
        let z: Vec<f64> = (0..6).map(|i| i as f64 * 10.0).collect();
        let labels = height_clusters(&z);
        assert!(labels.iter().all(|&l| l == NOISE));
    }

    #[test]
    fn test_create_premade_planes_gable() {
        //10x10 building, west half aspect 90, east half aspect 270
        let mut xy = Vec::new();
        let mut z = Vec::new();
        let mut aspect = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                let (x, y) = (i as f64 + 0.5, j as f64 + 0.5);
                xy.push((x, y));
                if x < 5.0 {
                    z.push(10.0 + x);
                    aspect.push(270.0);
                } else {
                    z.push(20.0 - x);
                    aspect.push(90.0);
                }
            }
        }
        let grid = PixelGrid::new(&xy, 1.0).unwrap();
        let planes = create_premade_planes(&grid, &aspect, &z);

        assert!(!planes.is_empty());
        //4 plane defs, at least one candidate each
        assert!(planes.len() >= 4);
        //every candidate holds pixel indices, not copies
        for plane in &planes {
            assert!(plane.idxs.len() > 3);
            assert!(plane.idxs.iter().all(|&i| i < 100));
            assert!(plane.plane_id.starts_with("segmented_aspect_"));
        }
        //both residual thresholds appear
        assert!(planes
            .iter()
            .any(|p| p.sample_residual_threshold == 0.25));
        assert!(planes.iter().any(|p| p.sample_residual_threshold == 2.0));
    }
}
