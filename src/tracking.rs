pub mod assignment;
pub mod defects;
pub mod diagnostics;
pub mod distance;
pub mod error;
pub mod events;
pub mod interpolate;
pub mod mask;
pub mod overlapgraph;
pub mod regions;
pub mod relabel;
pub mod trackstats;
pub mod workinggraph;

use clap::Args;
use ndarray::{s, ArrayView3, ArrayViewMut3};
use std::ops::Range;
use std::time::Instant;

pub use defects::{Defect, DefectParams};
pub use diagnostics::Diagnostics;
pub use error::{Result, TrackingError};
pub use interpolate::InterpolationSummary;
pub use mask::{Label, MaskVolume, Region, BACKGROUND};
pub use overlapgraph::{Edge, OverlapGraph, UpdateSummary, Vertex};
pub use regions::Connectivity;
pub use relabel::RelabelSummary;
pub use trackstats::{TrackFilter, TrackStats};
pub use workinggraph::WorkingGraph;

#[derive(Args, Clone, Debug, PartialEq)]
pub struct TrackingParams {
    // Compare each frame against this many preceding frames.
    #[arg(long, default_value_t = 2)]
    pub max_delta_frame: usize,

    // Edges covering less than this fraction of either region are left out
    // of the working graph.
    #[arg(long, default_value_t = 0.2)]
    pub min_overlap_fraction: f32,

    // Decay applied to overlaps with frames further back when relabeling.
    #[arg(long, default_value_t = 1.0)]
    pub beta: f64,

    #[arg(long, default_value_t = 2)]
    pub max_defect_frames: usize,

    #[arg(long, default_value_t = 3)]
    pub min_stable_frames: usize,

    #[arg(long, default_value_t = 0.5)]
    pub stable_overlap_fraction: f32,

    // Only repair labels missing for a stretch of frames, nothing else.
    #[arg(long, default_value_t = false)]
    pub only_missing: bool,

    // Frames on either side used when interpolating a defect.
    #[arg(long, default_value_t = 2)]
    pub interpolation_window: usize,

    // Regions smaller than this (in pixels) are dropped during clean-up.
    #[arg(long, default_value_t = 20)]
    pub min_area: u64,

    #[arg(long, default_value_t = 3)]
    pub clean_passes: usize,

    // Split disconnected labels and drop small regions before building.
    #[arg(long, default_value_t = false)]
    pub pre_clean: bool,

    #[arg(long, value_enum, default_value_t = Connectivity::Eight)]
    pub connectivity: Connectivity,
}

impl Default for TrackingParams {
    fn default() -> Self {
        TrackingParams {
            max_delta_frame: 2,
            min_overlap_fraction: 0.2,
            beta: 1.0,
            max_defect_frames: 2,
            min_stable_frames: 3,
            stable_overlap_fraction: 0.5,
            only_missing: false,
            interpolation_window: 2,
            min_area: 20,
            clean_passes: 3,
            pre_clean: false,
            connectivity: Connectivity::Eight,
        }
    }
}

impl TrackingParams {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TrackingError::InvalidParameter(msg));

        if self.max_delta_frame == 0 {
            return invalid(String::from("max_delta_frame must be at least 1"));
        }
        if !self.beta.is_finite() || self.beta < 1.0 {
            return invalid(format!("beta must be >= 1, got {}", self.beta));
        }
        for (name, value) in [
            ("min_overlap_fraction", self.min_overlap_fraction),
            ("stable_overlap_fraction", self.stable_overlap_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{} must be in [0, 1], got {}", name, value));
            }
        }
        if self.interpolation_window == 0 {
            return invalid(String::from("interpolation_window must be at least 1"));
        }

        Ok(())
    }

    pub fn defect_params(&self) -> DefectParams {
        DefectParams {
            max_defect_frames: self.max_defect_frames,
            min_stable_frames: self.min_stable_frames,
            stable_overlap_fraction: self.stable_overlap_fraction,
            only_missing: self.only_missing,
        }
    }
}

// Owns the overlap graph of one mask volume and the working graph derived
// from it. Every operation that changes the overlap graph drops the working
// graph; it is rebuilt on the next read.
pub struct CellTracker {
    params: TrackingParams,
    graph: OverlapGraph,
    working: Option<WorkingGraph>,
}

impl CellTracker {
    pub fn build(
        mut mask: ArrayViewMut3<Label>,
        params: TrackingParams,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        params.validate()?;

        if params.pre_clean {
            regions::split_disconnected_regions(mask.view_mut(), params.connectivity, diag);
            regions::remove_small_regions(mask.view_mut(), params.min_area, diag);
        }
        if !mask::has_labels(&mask.view()) {
            diag.warn("mask volume holds no labels");
        }

        let graph = OverlapGraph::build(
            mask.view(),
            params.max_delta_frame,
            params.min_overlap_fraction,
            diag,
        )?;

        Ok(CellTracker {
            params,
            graph,
            working: None,
        })
    }

    pub fn params(&self) -> &TrackingParams {
        &self.params
    }

    pub fn graph(&self) -> &OverlapGraph {
        &self.graph
    }

    // Replace the content of `region` in `mask` with `new_values`, updating
    // the graph first.
    pub fn apply_edit(
        &mut self,
        mut mask: ArrayViewMut3<Label>,
        new_values: ArrayView3<Label>,
        region: &Region,
        diag: &mut Diagnostics,
    ) -> Result<UpdateSummary> {
        let summary = self.graph.update_region(mask.view(), new_values, region, diag)?;
        if !region.is_empty() {
            mask.slice_mut(s![
                region.frames.clone(),
                region.rows.clone(),
                region.cols.clone()
            ])
            .assign(&new_values);
        }
        self.working = None;
        Ok(summary)
    }

    pub fn relabel(
        &mut self,
        mask: ArrayViewMut3<Label>,
        diag: &mut Diagnostics,
    ) -> Result<RelabelSummary> {
        self.working = None;
        relabel::relabel(mask, &mut self.graph, self.params.beta, diag)
    }

    pub fn working_graph(&mut self) -> &WorkingGraph {
        let graph = &self.graph;
        self.working
            .get_or_insert_with(|| WorkingGraph::from_overlaps(graph))
    }

    pub fn find_isolated_defects(&mut self) -> Vec<Defect> {
        if self.graph.is_empty() {
            return Vec::new();
        }
        let params = self.params.defect_params();
        defects::find_isolated_defects(self.working_graph(), &params)
    }

    pub fn interpolate(
        &mut self,
        mask: ArrayViewMut3<Label>,
        labels: &[Label],
        frames: Range<usize>,
        diag: &mut Diagnostics,
    ) -> Result<InterpolationSummary> {
        self.working = None;
        interpolate::interpolate(
            mask,
            &mut self.graph,
            labels,
            frames,
            self.params.interpolation_window,
            Some(self.params.min_area),
            diag,
        )
    }

    // One round of repair: interpolate every isolated defect, tidy the
    // regions, rebuild the graph and relabel. Returns the number of defects
    // that got interpolated frames.
    pub fn clean_pass(
        &mut self,
        mut mask: ArrayViewMut3<Label>,
        diag: &mut Diagnostics,
    ) -> Result<usize> {
        let t0 = Instant::now();
        let defects: Vec<Defect> = self
            .find_isolated_defects()
            .into_iter()
            .filter(|defect| defect.nframes() > 0)
            .collect();
        if defects.is_empty() {
            return Ok(0);
        }

        let mut repaired = 0;
        for defect in &defects {
            let summary = self.interpolate(
                mask.view_mut(),
                &defect.labels,
                defect.frame_start..defect.frame_end,
                diag,
            )?;
            if summary.frames_written > 0 {
                repaired += 1;
            }
        }
        if repaired == 0 {
            return Ok(0);
        }

        regions::split_disconnected_regions(mask.view_mut(), self.params.connectivity, diag);
        regions::remove_small_regions(mask.view_mut(), self.params.min_area, diag);

        self.graph = OverlapGraph::build(
            mask.view(),
            self.params.max_delta_frame,
            self.params.min_overlap_fraction,
            diag,
        )?;
        self.relabel(mask, diag)?;

        diag.info(format!(
            "repaired {} of {} defects in {:?}",
            repaired,
            defects.len(),
            t0.elapsed()
        ));
        Ok(repaired)
    }

    // Repeat `clean_pass` until nothing is left to repair or the pass limit
    // is reached. Returns the total number of repairs.
    pub fn clean(&mut self, mut mask: ArrayViewMut3<Label>, diag: &mut Diagnostics) -> Result<usize> {
        let mut total = 0;
        for _ in 0..self.params.clean_passes {
            let repaired = self.clean_pass(mask.view_mut(), diag)?;
            if repaired == 0 {
                break;
            }
            total += repaired;
        }
        Ok(total)
    }

    pub fn track_statistics(&mut self) -> Vec<TrackStats> {
        let threshold = self.params.stable_overlap_fraction;
        trackstats::track_statistics(self.working_graph(), threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Axis;

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

    fn gap_mask() -> MaskVolume {
        let mut mask = MaskVolume::zeros((5, 10, 10));
        for t in [0, 1, 3, 4] {
            disc(&mut mask, t, 4.5, 4.5, 3.0, 1);
        }
        mask
    }

    fn gap_params() -> TrackingParams {
        TrackingParams {
            max_delta_frame: 2,
            min_overlap_fraction: 0.0,
            max_defect_frames: 2,
            min_stable_frames: 1,
            stable_overlap_fraction: 0.0,
            ..TrackingParams::default()
        }
    }

    #[test]
    fn test_params_validate() {
        assert!(TrackingParams::default().validate().is_ok());
        let bad = [
            TrackingParams {
                max_delta_frame: 0,
                ..TrackingParams::default()
            },
            TrackingParams {
                beta: 0.5,
                ..TrackingParams::default()
            },
            TrackingParams {
                min_overlap_fraction: 1.5,
                ..TrackingParams::default()
            },
            TrackingParams {
                stable_overlap_fraction: -0.1,
                ..TrackingParams::default()
            },
            TrackingParams {
                interpolation_window: 0,
                ..TrackingParams::default()
            },
        ];
        for params in bad {
            assert!(matches!(
                params.validate(),
                Err(TrackingError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn test_missing_frame_is_detected_and_filled() {
        let mut mask = gap_mask();
        let mut diag = Diagnostics::new();
        let mut tracker = CellTracker::build(mask.view_mut(), gap_params(), &mut diag).unwrap();

        let defects = tracker.find_isolated_defects();
        assert_eq!(
            defects,
            vec![Defect {
                labels: vec![1],
                frame_start: 2,
                frame_end: 3
            }]
        );

        let defect = &defects[0];
        tracker
            .interpolate(
                mask.view_mut(),
                &defect.labels,
                defect.frame_start..defect.frame_end,
                &mut diag,
            )
            .unwrap();

        assert_eq!(mask.index_axis(Axis(0), 2), mask.index_axis(Axis(0), 1));
        let graph = tracker.graph();
        assert!(graph.vertex(2, 1).unwrap().area > 0);
        for (source, target) in [((1, 1), (2, 1)), ((2, 1), (3, 1))] {
            let edge = graph.edge_between(source, target).unwrap();
            assert!(edge.overlap_fraction_source > 0.0);
            assert!(edge.overlap_fraction_target > 0.0);
        }
        assert!(tracker.find_isolated_defects().is_empty());
    }

    #[test]
    fn test_clean_repairs_and_converges() {
        let mut mask = gap_mask();
        let mut diag = Diagnostics::new();
        let mut tracker = CellTracker::build(mask.view_mut(), gap_params(), &mut diag).unwrap();

        assert_eq!(tracker.clean(mask.view_mut(), &mut diag).unwrap(), 1);
        assert!(mask.index_axis(Axis(0), 2).iter().any(|&x| x == 1));
        assert!(tracker.graph().verify_areas(mask.view()).is_ok());
        assert_eq!(tracker.clean(mask.view_mut(), &mut diag).unwrap(), 0);

        let stats = tracker.track_statistics();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].frames_present, 5);
        assert_eq!(stats[0].missing, 0);
    }

    #[test]
    fn test_working_graph_follows_edits() {
        let mut mask = gap_mask();
        let mut diag = Diagnostics::new();
        let mut tracker = CellTracker::build(mask.view_mut(), gap_params(), &mut diag).unwrap();
        assert!(tracker.working_graph().vertex(2, 1).is_none());

        let region = Region::new(2..3, 3..6, 3..6);
        let new_values = ndarray::Array3::from_elem(region.shape(), 1);
        tracker
            .apply_edit(mask.view_mut(), new_values.view(), &region, &mut diag)
            .unwrap();

        assert_eq!(mask[[2, 4, 4]], 1);
        assert_eq!(tracker.working_graph().vertex(2, 1).map(|v| v.area), Some(9));
        assert!(tracker.graph().verify_areas(mask.view()).is_ok());

        let rebuilt = OverlapGraph::build(mask.view(), 2, 0.0, &mut diag).unwrap();
        assert_eq!(tracker.graph().sorted_vertices(), rebuilt.sorted_vertices());
        assert_eq!(tracker.graph().sorted_edges(), rebuilt.sorted_edges());
    }

    #[test]
    fn test_empty_mask() {
        let mut mask = MaskVolume::zeros((3, 4, 4));
        let mut diag = Diagnostics::new();
        let mut tracker =
            CellTracker::build(mask.view_mut(), TrackingParams::default(), &mut diag).unwrap();
        assert!(tracker.graph().is_empty());
        assert!(tracker.find_isolated_defects().is_empty());
        assert_eq!(tracker.relabel(mask.view_mut(), &mut diag).unwrap(), RelabelSummary::default());
        assert_eq!(tracker.clean(mask.view_mut(), &mut diag).unwrap(), 0);
        assert!(diag.at_least(log::Level::Warn).count() >= 1);
    }

    #[test]
    fn test_pre_clean_splits_regions() {
        let mut mask = MaskVolume::zeros((2, 12, 12));
        mask.slice_mut(s![.., 0..5, 0..5]).fill(4);
        mask.slice_mut(s![.., 7..12, 7..12]).fill(4);
        mask[[0, 11, 0]] = 9;

        let params = TrackingParams {
            pre_clean: true,
            min_area: 2,
            ..TrackingParams::default()
        };
        let mut diag = Diagnostics::new();
        let tracker = CellTracker::build(mask.view_mut(), params, &mut diag).unwrap();

        assert_eq!(mask[[0, 11, 0]], 0);
        assert_eq!(tracker.graph().frame_labels(0).count(), 2);
        assert!(tracker.graph().verify_areas(mask.view()).is_ok());
    }
}
