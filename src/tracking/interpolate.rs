// Repair of labels over a frame range by taking, frame by frame, the median
// of the signed distance maps of the surrounding frames.

use ndarray::{s, Array2, Array3, ArrayViewMut3, Axis, Zip};
use rayon::prelude::*;
use std::ops::Range;
use std::time::Instant;

use super::diagnostics::Diagnostics;
use super::distance::signed_distance;
use super::error::{Result, TrackingError};
use super::mask::{labels_bounding_box, Label, Region, BACKGROUND};
use super::overlapgraph::OverlapGraph;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InterpolationSummary {
    // the block handed to the graph update, if any
    pub region: Option<Region>,
    // frames that had a full window of neighbours and were rewritten
    pub frames_written: usize,
    // (frame, label) pairs dropped for falling under the minimum area
    pub removed: Vec<(usize, Label)>,
}

// Re-synthesize `labels` over `frames` from the `window` frames on either
// side. Only frames whose whole centered window lies inside the volume are
// rewritten; in those, old occurrences of `labels` inside the block are
// erased and replaced. Pixels holding any other label are left untouched.
// The graph is updated to match.
pub fn interpolate(
    mut mask: ArrayViewMut3<Label>,
    graph: &mut OverlapGraph,
    labels: &[Label],
    frames: Range<usize>,
    window: usize,
    min_area: Option<u64>,
    diag: &mut Diagnostics,
) -> Result<InterpolationSummary> {
    if window == 0 {
        return Err(TrackingError::InvalidParameter(String::from(
            "interpolation window must be at least 1",
        )));
    }
    if mask.dim() != graph.shape() {
        return Err(TrackingError::ShapeMismatch {
            expected: graph.shape(),
            found: mask.dim(),
        });
    }

    let mut summary = InterpolationSummary::default();
    let nframes = mask.dim().0;
    let fstart = frames.start.min(nframes);
    let fend = frames.end.min(nframes);
    let labels: Vec<Label> = labels.iter().copied().filter(|&l| l != BACKGROUND).collect();
    if fstart >= fend || labels.is_empty() {
        return Ok(summary);
    }

    let t0 = Instant::now();
    let pstart = fstart.saturating_sub(window);
    let pend = (fend + window).min(nframes);

    let (rows, cols) = match labels_bounding_box(&mask.slice(s![pstart..pend, .., ..]), &labels) {
        Some(bbox) => bbox,
        None => {
            diag.trace(format!(
                "interpolate: labels {:?} absent from frames {}..{}",
                labels, pstart, pend
            ));
            return Ok(summary);
        }
    };
    let region = Region::new(fstart..fend, rows.clone(), cols.clone());

    let mut best = Array3::<f32>::zeros(region.shape());
    let mut winner = Array3::<Label>::zeros(region.shape());
    let full_window = |t: usize| t >= window && t + window < nframes;

    {
        let padded = mask.slice(s![pstart..pend, rows.clone(), cols.clone()]);
        for &label in &labels {
            let (lrows, lcols) = match labels_bounding_box(&padded, &[label]) {
                Some(bbox) => bbox,
                None => continue,
            };
            let (h, w) = (lrows.len(), lcols.len());

            // one pixel margin of background so regions touching the box
            // edge still get a boundary
            let maps: Vec<Array2<f32>> = (pstart..pend)
                .into_par_iter()
                .map(|t| {
                    let mut inside = Array2::from_elem((h + 2, w + 2), false);
                    inside.slice_mut(s![1..h + 1, 1..w + 1]).assign(
                        &padded
                            .slice(s![t - pstart, lrows.clone(), lcols.clone()])
                            .mapv(|x| x == label),
                    );
                    signed_distance(inside.view())
                        .slice(s![1..h + 1, 1..w + 1])
                        .to_owned()
                })
                .collect();

            let mut values = vec![0.0f32; 2 * window + 1];
            for t in fstart..fend {
                if !full_window(t) {
                    continue;
                }
                let stack = &maps[t - window - pstart..=t + window - pstart];
                for i in 0..h {
                    for j in 0..w {
                        for (value, map) in values.iter_mut().zip(stack) {
                            *value = map[[i, j]];
                        }
                        let (_, &mut median, _) = values.select_nth_unstable_by(window, f32::total_cmp);
                        let at = [t - fstart, lrows.start + i, lcols.start + j];
                        if median > 0.0 && median > best[at] {
                            best[at] = median;
                            winner[at] = label;
                        }
                    }
                }
            }
        }
    }

    let mut block = region.crop(mask.view()).to_owned();
    for t in fstart..fend {
        if !full_window(t) {
            continue;
        }
        summary.frames_written += 1;
        Zip::from(block.index_axis_mut(Axis(0), t - fstart))
            .and(winner.index_axis(Axis(0), t - fstart))
            .for_each(|x, &w| {
                if labels.contains(&*x) {
                    *x = BACKGROUND;
                }
                if w != BACKGROUND && *x == BACKGROUND {
                    *x = w;
                }
            });
    }

    graph.update_region(mask.view(), block.view(), &region, diag)?;
    mask.slice_mut(s![fstart..fend, rows, cols]).assign(&block);

    if let Some(min_area) = min_area {
        for t in (fstart..fend).filter(|&t| full_window(t)) {
            for &label in &labels {
                if let Some(vertex) = graph.vertex(t, label) {
                    if vertex.area < min_area {
                        summary.removed.push((t, label));
                    }
                }
            }
        }
        for &(t, label) in &summary.removed {
            mask.index_axis_mut(Axis(0), t)
                .mapv_inplace(|x| if x == label { BACKGROUND } else { x });
        }
        graph.remove_vertices(&summary.removed);
    }

    diag.debug(format!(
        "interpolated labels {:?} over frames {}..{} ({} written, {} removed) in {:?}",
        labels,
        fstart,
        fend,
        summary.frames_written,
        summary.removed.len(),
        t0.elapsed()
    ));
    summary.region = Some(region);

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::mask::MaskVolume;

    fn disc(mask: &mut MaskVolume, t: usize, cy: f32, cx: f32, r: f32, label: Label) {
        let (_, h, w) = mask.dim();
        for i in 0..h {
            for j in 0..w {
                let (dy, dx) = (i as f32 - cy, j as f32 - cx);
                if dy * dy + dx * dx <= r * r {
                    mask[[t, i, j]] = label;
                }
            }
        }
    }

    fn build(mask: &MaskVolume) -> OverlapGraph {
        let mut diag = Diagnostics::new();
        OverlapGraph::build(mask.view(), 1, 0.0, &mut diag).unwrap()
    }

    #[test]
    fn test_fills_missing_frame() {
        let mut mask = MaskVolume::zeros((5, 10, 10));
        for t in [0, 1, 3, 4] {
            disc(&mut mask, t, 4.5, 4.5, 3.0, 1);
        }
        let mut graph = build(&mask);
        let mut diag = Diagnostics::new();
        let summary =
            interpolate(mask.view_mut(), &mut graph, &[1], 2..3, 2, None, &mut diag).unwrap();

        assert_eq!(summary.frames_written, 1);
        assert_eq!(mask.index_axis(Axis(0), 2), mask.index_axis(Axis(0), 1));
        assert!(graph.verify_areas(mask.view()).is_ok());
        let edge = graph.edge_between((1, 1), (2, 1)).unwrap();
        assert_eq!(edge.overlap_fraction_source, 1.0);
        assert_eq!(edge.overlap_fraction_target, 1.0);
    }

    #[test]
    fn test_leaves_other_labels_alone() {
        let mut mask = MaskVolume::zeros((5, 12, 12));
        for t in [0, 1, 3, 4] {
            disc(&mut mask, t, 5.0, 5.0, 3.0, 1);
        }
        // a different cell occupying part of the gap
        mask.slice_mut(s![2, 0..5, 0..12]).fill(2);
        let before = mask.clone();

        let mut graph = build(&mask);
        let mut diag = Diagnostics::new();
        let summary =
            interpolate(mask.view_mut(), &mut graph, &[1], 2..3, 2, None, &mut diag).unwrap();
        let region = summary.region.unwrap();

        for ((t, i, j), &x) in mask.indexed_iter() {
            let inside = region.frames.contains(&t)
                && region.rows.contains(&i)
                && region.cols.contains(&j);
            if !inside || before[[t, i, j]] == 2 {
                assert_eq!(x, before[[t, i, j]]);
            }
        }
        assert_eq!(mask[[2, 6, 5]], 1);
        assert!(graph.verify_areas(mask.view()).is_ok());
    }

    #[test]
    fn test_absent_labels_are_a_no_op() {
        let mut mask = MaskVolume::zeros((5, 6, 6));
        mask.slice_mut(s![.., 1..3, 1..3]).fill(4);
        let before = mask.clone();
        let mut graph = build(&mask);
        let mut diag = Diagnostics::new();
        let summary =
            interpolate(mask.view_mut(), &mut graph, &[9], 1..3, 1, Some(5), &mut diag).unwrap();
        assert_eq!(summary, InterpolationSummary::default());
        assert_eq!(mask, before);
    }

    #[test]
    fn test_small_results_are_removed() {
        // a single pixel flickering around a gap
        let mut mask = MaskVolume::zeros((3, 6, 6));
        mask[[0, 2, 2]] = 3;
        mask[[2, 2, 2]] = 3;
        let mut graph = build(&mask);
        let mut diag = Diagnostics::new();
        let summary =
            interpolate(mask.view_mut(), &mut graph, &[3], 1..2, 1, Some(2), &mut diag).unwrap();
        assert_eq!(summary.removed, vec![(1, 3)]);
        assert_eq!(mask[[1, 2, 2]], 0);
        assert!(graph.vertex(1, 3).is_none());
        assert!(graph.verify_areas(mask.view()).is_ok());
    }

    #[test]
    fn test_small_labels_in_skipped_frames_are_kept() {
        // frame 0 has no full window, so only frame 1 is rewritten
        let mut mask = MaskVolume::zeros((3, 6, 6));
        mask[[0, 2, 2]] = 3;
        mask[[2, 2, 2]] = 3;
        let mut graph = build(&mask);
        let mut diag = Diagnostics::new();
        let summary =
            interpolate(mask.view_mut(), &mut graph, &[3], 0..2, 1, Some(2), &mut diag).unwrap();
        assert_eq!(summary.frames_written, 1);
        assert_eq!(summary.removed, vec![(1, 3)]);
        assert_eq!(mask[[0, 2, 2]], 3);
        assert!(graph.vertex(0, 3).is_some());
        assert!(graph.verify_areas(mask.view()).is_ok());
    }

    #[test]
    fn test_edge_frames_are_skipped() {
        let mut mask = MaskVolume::zeros((3, 6, 6));
        mask.slice_mut(s![1..3, 1..4, 1..4]).fill(1);
        let before = mask.clone();
        let mut graph = build(&mask);
        let mut diag = Diagnostics::new();
        let summary =
            interpolate(mask.view_mut(), &mut graph, &[1], 0..1, 1, None, &mut diag).unwrap();
        assert_eq!(summary.frames_written, 0);
        assert_eq!(mask, before);
    }
}
