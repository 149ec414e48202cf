// Rewrite mask labels into temporally consistent track ids. Frames are visited
// in order; each frame's labels are matched against the (already relabeled)
// labels of the preceding window by maximum total overlap.

use ndarray::{Array2, ArrayViewMut3, Axis};
use petgraph::Direction::Incoming;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use super::assignment::max_weight_assignment;
use super::diagnostics::Diagnostics;
use super::error::{Result, TrackingError};
use super::mask::{label_histogram, Label, BACKGROUND};
use super::overlapgraph::OverlapGraph;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelabelSummary {
    pub ntracks: usize,
    pub matched: usize,
    pub fresh: usize,
}

pub fn relabel(
    mut mask: ArrayViewMut3<Label>,
    graph: &mut OverlapGraph,
    beta: f64,
    diag: &mut Diagnostics,
) -> Result<RelabelSummary> {
    if !beta.is_finite() || beta < 1.0 {
        return Err(TrackingError::InvalidParameter(format!(
            "beta must be >= 1, got {}",
            beta
        )));
    }
    if mask.dim() != graph.shape() {
        return Err(TrackingError::ShapeMismatch {
            expected: graph.shape(),
            found: mask.dim(),
        });
    }

    let mut summary = RelabelSummary::default();
    if graph.is_empty() {
        return Ok(summary);
    }

    let t0 = Instant::now();
    let mut next_id: Label = 1;

    for frame in 0..graph.nframes() {
        let labels: Vec<Label> = graph.frame_labels(frame).collect();
        check_frame_labels(&mask, frame, &labels)?;
        if labels.is_empty() {
            continue;
        }

        // accumulated, decayed overlap between this frame's labels (rows) and
        // track ids seen in the window (columns)
        let mut window_ids: BTreeMap<Label, usize> = BTreeMap::new();
        let mut contributions: Vec<(usize, Label, f64)> = Vec::new();
        for (row, &label) in labels.iter().enumerate() {
            let v = graph
                .node_index(frame, label)
                .ok_or(TrackingError::LabelMismatch { frame, label })?;
            for e in graph.graph().edges_directed(v, Incoming) {
                let edge = e.weight();
                let k = (frame - edge.frame_source) as i32;
                let weight = edge.overlap_area as f64 / beta.powi(k - 1);
                let ncols = window_ids.len();
                window_ids.entry(edge.mask_id_source).or_insert(ncols);
                contributions.push((row, edge.mask_id_source, weight));
            }
        }

        let mut weights = Array2::<f64>::zeros((labels.len(), window_ids.len()));
        for (row, id, weight) in contributions {
            weights[[row, window_ids[&id]]] += weight;
        }
        let col_ids: Vec<Label> = {
            let mut col_ids = vec![BACKGROUND; window_ids.len()];
            for (&id, &col) in &window_ids {
                col_ids[col] = id;
            }
            col_ids
        };

        let assignment = max_weight_assignment(weights.view());

        let mut relabeling: HashMap<Label, Label> = HashMap::with_capacity(labels.len() + 1);
        relabeling.insert(BACKGROUND, BACKGROUND);
        for (row, &label) in labels.iter().enumerate() {
            match assignment[row] {
                Some(col) if weights[[row, col]] > 0.0 => {
                    relabeling.insert(label, col_ids[col]);
                    summary.matched += 1;
                }
                _ => {
                    relabeling.insert(label, next_id);
                    next_id += 1;
                    summary.fresh += 1;
                }
            }
        }

        mask.index_axis_mut(Axis(0), frame)
            .mapv_inplace(|label| relabeling.get(&label).copied().unwrap_or(label));
        graph.relabel_frame(frame, &relabeling)?;
    }

    summary.ntracks = (next_id - 1) as usize;
    diag.debug(format!(
        "relabeled {} frames into {} tracks ({} matched, {} new) in {:?}",
        graph.nframes(),
        summary.ntracks,
        summary.matched,
        summary.fresh,
        t0.elapsed()
    ));

    Ok(summary)
}

fn check_frame_labels(mask: &ArrayViewMut3<Label>, frame: usize, labels: &[Label]) -> Result<()> {
    let present: BTreeSet<Label> = label_histogram(mask.index_axis(Axis(0), frame))
        .into_keys()
        .filter(|&label| label != BACKGROUND)
        .collect();
    let expected: BTreeSet<Label> = labels.iter().copied().collect();
    if let Some(&label) = present.symmetric_difference(&expected).next() {
        return Err(TrackingError::LabelMismatch { frame, label });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::mask::MaskVolume;
    use ndarray::s;

    fn build(mask: &MaskVolume, w: usize) -> OverlapGraph {
        let mut diag = Diagnostics::new();
        OverlapGraph::build(mask.view(), w, 0.0, &mut diag).unwrap()
    }

    // Two squares drifting right one pixel per frame with scrambled labels.
    fn drifting_squares() -> MaskVolume {
        let mut mask = MaskVolume::zeros((4, 12, 12));
        let labels = [(4, 9), (2, 7), (11, 3), (5, 6)];
        for t in 0..4 {
            mask.slice_mut(s![t, 1..5, t..t + 4]).fill(labels[t].0);
            mask.slice_mut(s![t, 7..11, t..t + 4]).fill(labels[t].1);
        }
        mask
    }

    #[test]
    fn test_relabel_follows_tracks() {
        let mut mask = drifting_squares();
        let mut graph = build(&mask, 1);
        let mut diag = Diagnostics::new();
        let summary = relabel(mask.view_mut(), &mut graph, 1.0, &mut diag).unwrap();

        assert_eq!(summary.ntracks, 2);
        for t in 0..4 {
            assert_eq!(mask[[t, 2, t + 1]], 1);
            assert_eq!(mask[[t, 8, t + 1]], 2);
            assert_eq!(graph.vertex(t, 1).unwrap().area, 16);
        }
        assert!(graph.verify_areas(mask.view()).is_ok());

        let edge = graph.edge_between((0, 1), (1, 1)).unwrap();
        assert_eq!(edge.mask_id_source, 1);
        assert_eq!(edge.mask_id_target, 1);
    }

    #[test]
    fn test_relabel_is_idempotent() {
        let mut mask = drifting_squares();
        // a third cell appearing in frame 2
        mask.slice_mut(s![2..4, 5..7, 9..11]).fill(8);

        let mut graph = build(&mask, 2);
        let mut diag = Diagnostics::new();
        relabel(mask.view_mut(), &mut graph, 2.0, &mut diag).unwrap();
        let once = mask.clone();
        let vertices = graph.sorted_vertices();

        relabel(mask.view_mut(), &mut graph, 2.0, &mut diag).unwrap();
        assert_eq!(mask, once);
        assert_eq!(graph.sorted_vertices(), vertices);

        let mut rebuilt = build(&mask, 2);
        relabel(mask.view_mut(), &mut rebuilt, 2.0, &mut diag).unwrap();
        assert_eq!(mask, once);
        assert_eq!(mask[[3, 6, 10]], 3);
    }

    #[test]
    fn test_unmatched_labels_get_fresh_ids() {
        let mut mask = MaskVolume::zeros((2, 6, 6));
        mask.slice_mut(s![0, 0..2, 0..2]).fill(7);
        mask.slice_mut(s![1, 4..6, 4..6]).fill(7);

        let mut graph = build(&mask, 1);
        let mut diag = Diagnostics::new();
        let summary = relabel(mask.view_mut(), &mut graph, 1.0, &mut diag).unwrap();
        assert_eq!(summary.fresh, 2);
        assert_eq!(mask[[0, 0, 0]], 1);
        assert_eq!(mask[[1, 5, 5]], 2);
    }

    #[test]
    fn test_relabel_detects_mismatch() {
        let mut mask = drifting_squares();
        let mut graph = build(&mask, 1);
        mask[[2, 0, 0]] = 42;
        let mut diag = Diagnostics::new();
        assert!(matches!(
            relabel(mask.view_mut(), &mut graph, 1.0, &mut diag),
            Err(TrackingError::LabelMismatch { frame: 2, label: 42 })
        ));
    }

    #[test]
    fn test_relabel_rejects_small_beta() {
        let mut mask = drifting_squares();
        let mut graph = build(&mask, 1);
        let mut diag = Diagnostics::new();
        assert!(relabel(mask.view_mut(), &mut graph, 0.5, &mut diag).is_err());
    }
}
