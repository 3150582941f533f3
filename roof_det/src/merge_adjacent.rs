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

//! Region adjacency merging.  Nodes are the accepted planes plus one node
//! per unassigned pixel; an edge weight says how much a merged fit would be
//! worse than the two current fits.  Edges under weight 0 are merged
//! hierarchically, smallest weight first, ties by node id, the higher node
//! id merging into the lower.

use crate::constants::*;
use crate::datatypes::{RoofDetError, RoofPlane};
use crate::ols::{fit_metrics, fit_plane, std_dev, PlaneFit};
use anyhow::{anyhow, Result};
use geo_util::raster::PixelGrid;
use geo_util::vector::{aspect_deg, deg_diff, slope_deg};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

pub const LABELS_NODATA: i32 = -1;

const DO_NOT_MERGE: f64 = 9999.0;
const DO_MERGE: f64 = -9999.0;

struct Node {
    pixel_idxs: Vec<usize>,
    merged_labels: Vec<i32>,
    plane: Option<RoofPlane>,
}

impl Node {
    fn is_outlier(&self) -> bool {
        self.plane.is_none()
    }
}

pub struct MergeResult {
    /// surviving planes by node id
    pub planes: BTreeMap<i32, RoofPlane>,
    /// final label per pixel: a plane node id, an outlier id, or nodata
    pub labels: Vec<i32>,
}

fn fit_union(
    xy: &[(f64, f64)],
    z: &[f64],
    a: &Node,
    b: &Node,
) -> Option<(PlaneFit, Vec<usize>)> {
    let mut idxs = Vec::with_capacity(a.pixel_idxs.len() + b.pixel_idxs.len());
    idxs.extend_from_slice(&a.pixel_idxs);
    idxs.extend_from_slice(&b.pixel_idxs);
    fit_plane(xy, z, &idxs).map(|f| (f, idxs))
}

fn union_mae(fit: &PlaneFit, xy: &[(f64, f64)], z: &[f64], idxs: &[usize]) -> f64 {
    idxs.iter()
        .map(|&i| (z[i] - fit.predict(xy[i].0, xy[i].1)).abs())
        .sum::<f64>()
        / idxs.len() as f64
}

fn edge_weight(xy: &[(f64, f64)], z: &[f64], a: &Node, b: &Node) -> f64 {
    match (&a.plane, &b.plane) {
        (None, None) => DO_NOT_MERGE,

        (Some(pa), Some(pb)) => {
            let (fit, idxs) = match fit_union(xy, z, a, b) {
                Some(f) => f,
                None => return DO_NOT_MERGE,
            };
            let na = a.pixel_idxs.len() as f64;
            let nb = b.pixel_idxs.len() as f64;
            let new_slope = slope_deg(fit.a, fit.b);

            if pa.slope > FLAT_ROOF_DEGREES_THRESHOLD
                && pb.slope > FLAT_ROOF_DEGREES_THRESHOLD
                && new_slope > FLAT_ROOF_DEGREES_THRESHOLD
            {
                let curr_r2 = (pa.r2 * na + pb.r2 * nb) / (na + nb);
                let y_true: Vec<f64> = idxs.iter().map(|&i| z[i]).collect();
                let y_pred: Vec<f64> = idxs
                    .iter()
                    .map(|&i| fit.predict(xy[i].0, xy[i].1))
                    .collect();
                let new_r2 = crate::ols::r2_score(&y_true, &y_pred);

                //a still-good merged fit does not have to beat the parts
                let mut weight = if new_r2 < R2_GOOD {
                    curr_r2 - new_r2
                } else {
                    DO_MERGE
                };

                //a merged aspect outside both snapped aspects is not a roof
                let new_aspect = aspect_deg(fit.a, fit.b);
                if deg_diff(new_aspect, pa.aspect) > AZIMUTH_ALIGNMENT_THRESHOLD
                    && deg_diff(new_aspect, pb.aspect) > AZIMUTH_ALIGNMENT_THRESHOLD
                {
                    weight = DO_NOT_MERGE;
                }
                weight
            } else if pa.is_flat != pb.is_flat {
                DO_NOT_MERGE
            } else {
                let curr_mae = (pa.mae * na + pb.mae * nb) / (na + nb);
                let new_mae = union_mae(&fit, xy, z, &idxs);
                if new_mae > ROOFDET_GOOD_SCORE {
                    new_mae - curr_mae
                } else {
                    DO_MERGE
                }
            }
        }

        //a plane and an outlier pixel
        _ => {
            let plane = a.plane.as_ref().or(b.plane.as_ref()).unwrap();
            let (fit, idxs) = match fit_union(xy, z, a, b) {
                Some(f) => f,
                None => return DO_NOT_MERGE,
            };
            let new_mae = union_mae(&fit, xy, z, &idxs);
            let mut weight = new_mae - plane.mae;

            let slope = slope_deg(fit.a, fit.b);
            //absorbing the outlier may not flip the roof between flat and
            //pitched
            if slope > FLAT_ROOF_DEGREES_THRESHOLD
                && plane.slope <= FLAT_ROOF_DEGREES_THRESHOLD
            {
                weight = DO_NOT_MERGE;
            }
            if slope <= FLAT_ROOF_DEGREES_THRESHOLD
                && plane.slope > FLAT_ROOF_DEGREES_THRESHOLD
            {
                weight = DO_NOT_MERGE;
            }

            if slope > FLAT_ROOF_DEGREES_THRESHOLD && weight < 0.0 {
                let new_aspect = aspect_deg(fit.a, fit.b);
                if deg_diff(new_aspect, plane.aspect) > AZIMUTH_ALIGNMENT_THRESHOLD {
                    weight = DO_NOT_MERGE;
                }
            }
            weight
        }
    }
}

/// Recomputes the surviving node's plane after a merge
fn merged_plane_data(
    grid: &PixelGrid,
    xy: &[(f64, f64)],
    z: &[f64],
    dst: &Node,
    src: &Node,
) -> Result<RoofPlane> {
    let mut idxs = Vec::with_capacity(dst.pixel_idxs.len() + src.pixel_idxs.len());
    idxs.extend_from_slice(&dst.pixel_idxs);
    idxs.extend_from_slice(&src.pixel_idxs);

    let fit = fit_plane(xy, z, &idxs)
        .ok_or_else(|| anyhow!("degenerate refit while merging accepted planes"))?;

    let y_true: Vec<f64> = idxs.iter().map(|&i| z[i]).collect();
    let y_pred: Vec<f64> = idxs
        .iter()
        .map(|&i| fit.predict(xy[i].0, xy[i].1))
        .collect();
    let metrics = fit_metrics(&y_true, &y_pred);
    let residuals: Vec<f64> = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).abs())
        .collect();

    let slope = slope_deg(fit.a, fit.b);
    let aspect_raw = aspect_deg(fit.a, fit.b);

    let (plane_type, plane_id) = match (&dst.plane, &src.plane) {
        (Some(pd), Some(ps)) => (
            format!("{}_MERGED_{}", pd.plane_type, ps.plane_type),
            format!("{}_MERGED_{}", pd.plane_id, ps.plane_id),
        ),
        (Some(pd), None) => (pd.plane_type.clone(), pd.plane_id.clone()),
        (None, Some(ps)) => (ps.plane_type.clone(), ps.plane_id.clone()),
        (None, None) => {
            return Err(RoofDetError::MergerInvariant(
                "merged two outlier nodes".to_string(),
            )
            .into())
        }
    };

    //keep whichever snapped aspect sits closer to the merged raw aspect
    let aspect = match (&dst.plane, &src.plane) {
        (Some(pd), Some(ps)) => {
            if deg_diff(pd.aspect, aspect_raw) < deg_diff(ps.aspect, aspect_raw) {
                pd.aspect
            } else {
                ps.aspect
            }
        }
        (Some(pd), None) => pd.aspect,
        (None, Some(ps)) => ps.aspect,
        (None, None) => unreachable!(),
    };

    let toid = dst
        .plane
        .as_ref()
        .or(src.plane.as_ref())
        .map(|p| p.toid.clone())
        .unwrap_or_default();

    let mask: Vec<bool> = {
        let mut m = vec![false; xy.len()];
        for &i in &idxs {
            m[i] = true;
        }
        m
    };
    let (cv_hull_ratio, thinness_ratio) =
        crate::fit_rules::component_morphology(grid, &mask, idxs.len());

    Ok(RoofPlane {
        toid,
        plane_type,
        plane_id,
        x_coef: fit.a,
        y_coef: fit.b,
        intercept: fit.d,
        slope,
        is_flat: slope <= FLAT_ROOF_DEGREES_THRESHOLD,
        aspect_raw,
        aspect,
        sd: std_dev(&residuals),
        score: metrics.mae,
        r2: metrics.r2,
        mae: metrics.mae,
        mse: metrics.mse,
        rmse: metrics.rmse,
        msle: metrics.msle,
        mape: metrics.mape,
        aspect_circ_mean: Some(0.0),
        aspect_circ_sd: Some(0.0),
        thinness_ratio,
        cv_hull_ratio,
        inliers_xy: idxs.iter().map(|&i| xy[i]).collect(),
    })
}

#[derive(PartialEq)]
struct HeapEdge {
    weight: f64,
    a: i32,
    b: i32,
}

impl Eq for HeapEdge {}

impl Ord for HeapEdge {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .partial_cmp(&other.weight)
            .unwrap_or(Ordering::Equal)
            .then(self.a.cmp(&other.a))
            .then(self.b.cmp(&other.b))
    }
}

impl PartialOrd for HeapEdge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges compatible adjacent regions.  `labels` carries a plane index, a
/// unique outlier id, or LABELS_NODATA per pixel; `planes` maps plane
/// indices to the fitted planes.
pub fn merge_adjacent(
    grid: &PixelGrid,
    xy: &[(f64, f64)],
    z: &[f64],
    labels: &[i32],
    planes: BTreeMap<i32, RoofPlane>,
) -> Result<MergeResult> {
    //sanity: a plane id may only appear once per building
    let mut seen_ids = HashSet::new();
    for plane in planes.values() {
        if !seen_ids.insert(plane.plane_id.clone()) {
            return Err(RoofDetError::MergerInvariant(format!(
                "duplicate plane id {}",
                plane.plane_id
            ))
            .into());
        }
    }

    let mut nodes: BTreeMap<i32, Node> = BTreeMap::new();
    for (i, &l) in labels.iter().enumerate() {
        if l == LABELS_NODATA {
            continue;
        }
        nodes
            .entry(l)
            .or_insert_with(|| Node {
                pixel_idxs: vec![],
                merged_labels: vec![l],
                plane: None,
            })
            .pixel_idxs
            .push(i);
    }
    for (idx, plane) in planes {
        match nodes.get_mut(&idx) {
            Some(n) => n.plane = Some(plane),
            None => {
                return Err(RoofDetError::MergerInvariant(format!(
                    "plane {} has no labelled pixels",
                    idx
                ))
                .into())
            }
        }
    }

    //4-connected adjacency between labels
    let mut adjacency: HashMap<i32, HashSet<i32>> = HashMap::new();
    for (i, &l) in labels.iter().enumerate() {
        if l == LABELS_NODATA {
            continue;
        }
        for nb in grid.neighbours4(i) {
            let ln = labels[nb];
            if ln != LABELS_NODATA && ln != l {
                adjacency.entry(l).or_default().insert(ln);
                adjacency.entry(ln).or_default().insert(l);
            }
        }
    }

    let mut weights: HashMap<(i32, i32), f64> = HashMap::new();
    let mut heap: BinaryHeap<std::cmp::Reverse<HeapEdge>> = BinaryHeap::new();
    let edge_key = |a: i32, b: i32| (a.min(b), a.max(b));

    for (&a, nbs) in &adjacency {
        for &b in nbs {
            let key = edge_key(a, b);
            if weights.contains_key(&key) {
                continue;
            }
            let w = edge_weight(xy, z, &nodes[&key.0], &nodes[&key.1]);
            weights.insert(key, w);
            heap.push(std::cmp::Reverse(HeapEdge {
                weight: w,
                a: key.0,
                b: key.1,
            }));
        }
    }

    while let Some(std::cmp::Reverse(edge)) = heap.pop() {
        let key = (edge.a, edge.b);
        //stale entries are skipped, both ends must be alive and the weight
        //current
        if !nodes.contains_key(&edge.a) || !nodes.contains_key(&edge.b) {
            continue;
        }
        match weights.get(&key) {
            Some(&w) if w == edge.weight => {}
            _ => continue,
        }
        if edge.weight >= 0.0 {
            break;
        }

        //the higher node id merges into the lower
        let (dst_id, src_id) = (edge.a, edge.b);
        let src = nodes.remove(&src_id).expect("src node alive");
        let dst = nodes.remove(&dst_id).expect("dst node alive");

        let merged_plane = merged_plane_data(grid, xy, z, &dst, &src)?;
        let mut merged = Node {
            pixel_idxs: dst.pixel_idxs,
            merged_labels: dst.merged_labels,
            plane: Some(merged_plane),
        };
        merged.pixel_idxs.extend(src.pixel_idxs);
        merged.merged_labels.extend(src.merged_labels);
        nodes.insert(dst_id, merged);

        //rewire the adjacency of src into dst
        let src_nbs = adjacency.remove(&src_id).unwrap_or_default();
        for nb in src_nbs {
            if nb == dst_id {
                continue;
            }
            adjacency.entry(nb).or_default().remove(&src_id);
            adjacency.entry(nb).or_default().insert(dst_id);
            adjacency.entry(dst_id).or_default().insert(nb);
            weights.remove(&edge_key(nb, src_id));
        }
        adjacency.entry(dst_id).or_default().remove(&src_id);
        weights.remove(&key);

        //refresh the weights of every edge at the merged node
        let nbs: Vec<i32> = adjacency
            .get(&dst_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        for nb in nbs {
            if !nodes.contains_key(&nb) {
                continue;
            }
            let k = edge_key(dst_id, nb);
            let w = edge_weight(xy, z, &nodes[&k.0], &nodes[&k.1]);
            weights.insert(k, w);
            heap.push(std::cmp::Reverse(HeapEdge {
                weight: w,
                a: k.0,
                b: k.1,
            }));
        }
    }

    //final labelling and surviving planes
    let mut label_to_node: HashMap<i32, i32> = HashMap::new();
    for (&id, node) in &nodes {
        for &l in &node.merged_labels {
            label_to_node.insert(l, id);
        }
    }
    let final_labels: Vec<i32> = labels
        .iter()
        .map(|&l| {
            if l == LABELS_NODATA {
                LABELS_NODATA
            } else {
                *label_to_node.get(&l).unwrap_or(&l)
            }
        })
        .collect();

    let mut merged_planes = BTreeMap::new();
    for (&id, node) in &nodes {
        if let Some(plane) = &node.plane {
            merged_planes.insert(id, plane.clone());
        }
    }

    Ok(MergeResult {
        planes: merged_planes,
        labels: final_labels,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::*;

    #[test]
    fn test_outliers_absorbed_into_plane() {
        //a slightly noisy plane plus 2 outlier pixels sitting exactly on
        //the fitted surface: absorbing them improves the fit
        let b = noisy_slope_building();
        let fixture = BuildingFixture::new(&b);
        let n = fixture.xy.len();

        let plane_idxs: Vec<usize> = (0..n - 2).collect();
        let plane = fixture.plane_for(&plane_idxs, "p1");

        let mut labels = vec![0i32; n];
        labels[n - 2] = 1;
        labels[n - 1] = 2;

        let mut planes = BTreeMap::new();
        planes.insert(0, plane);

        let result =
            merge_adjacent(fixture.grid(), &fixture.xy, &fixture.z, &labels, planes).unwrap();

        assert_eq!(result.planes.len(), 1);
        let merged = &result.planes[&0];
        //the outliers sat on the same surface, so they join the plane
        assert_eq!(merged.inliers_xy.len(), n);
        assert!(result.labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn test_gable_halves_stay_separate() {
        let b = gable_building();
        let fixture = BuildingFixture::new(&b);
        let n = fixture.xy.len();

        //left and right halves as separate planes
        let west: Vec<usize> = (0..n).filter(|&i| fixture.xy[i].0 < 5.0).collect();
        let east: Vec<usize> = (0..n).filter(|&i| fixture.xy[i].0 >= 5.0).collect();
        let p_west = fixture.plane_for(&west, "west");
        let p_east = fixture.plane_for(&east, "east");

        let mut labels = vec![0i32; n];
        for &i in &east {
            labels[i] = 1;
        }
        let mut planes = BTreeMap::new();
        planes.insert(0, p_west);
        planes.insert(1, p_east);

        let result =
            merge_adjacent(fixture.grid(), &fixture.xy, &fixture.z, &labels, planes).unwrap();

        //opposite aspects must not merge
        assert_eq!(result.planes.len(), 2);
    }

    #[test]
    fn test_duplicate_plane_id_is_fatal() {
        let b = single_slope_building();
        let fixture = BuildingFixture::new(&b);
        let n = fixture.xy.len();

        let half: Vec<usize> = (0..n / 2).collect();
        let rest: Vec<usize> = (n / 2..n).collect();
        let p1 = fixture.plane_for(&half, "same");
        let p2 = fixture.plane_for(&rest, "same");

        let mut labels = vec![0i32; n];
        for &i in &rest {
            labels[i] = 1;
        }
        let mut planes = BTreeMap::new();
        planes.insert(0, p1);
        planes.insert(1, p2);

        assert!(merge_adjacent(fixture.grid(), &fixture.xy, &fixture.z, &labels, planes).is_err());
    }
}
