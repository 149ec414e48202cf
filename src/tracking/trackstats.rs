// Per-track summaries of the working graph and track selection by them.

use std::collections::BTreeMap;

use super::events::{find_events, EventKind};
use super::mask::Label;
use super::workinggraph::WorkingGraph;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackStats {
    pub mask_id: Label,
    pub first_frame: usize,
    pub last_frame: usize,
    pub frames_present: usize,
    // frames between first and last where the label is absent
    pub missing: usize,
    pub divisions: usize,
    pub fusions: usize,
}

impl TrackStats {
    pub fn length(&self) -> usize {
        self.last_frame - self.first_frame + 1
    }
}

// Statistics for every track, ascending by mask id. Events only count when
// each edge involved covers at least `stability_threshold` of its region.
pub fn track_statistics(working: &WorkingGraph, stability_threshold: f32) -> Vec<TrackStats> {
    let mut stats: BTreeMap<Label, TrackStats> = BTreeMap::new();
    for vertex in working.graph().node_weights() {
        let entry = stats.entry(vertex.mask_id).or_insert(TrackStats {
            mask_id: vertex.mask_id,
            first_frame: vertex.frame,
            last_frame: vertex.frame,
            frames_present: 0,
            missing: 0,
            divisions: 0,
            fusions: 0,
        });
        entry.first_frame = entry.first_frame.min(vertex.frame);
        entry.last_frame = entry.last_frame.max(vertex.frame);
        entry.frames_present += 1;
    }

    let divisions = find_events(
        working,
        EventKind::Division {
            min_overlap_fraction: stability_threshold,
        },
    );
    for event in divisions {
        if let Some(entry) = stats.get_mut(&event.mask_id) {
            entry.divisions += 1;
        }
    }

    let fusions = find_events(
        working,
        EventKind::Fusion {
            min_overlap_fraction: stability_threshold,
        },
    );
    for event in fusions {
        if let Some(entry) = stats.get_mut(&event.mask_id) {
            entry.fusions += 1;
        }
    }

    stats
        .into_values()
        .map(|mut s| {
            s.missing = s.length() - s.frames_present;
            s
        })
        .collect()
}

// Bounds a track must satisfy to be selected. Unset bounds are not checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackFilter {
    pub min_length: Option<usize>,
    pub max_missing: Option<usize>,
    pub max_divisions: Option<usize>,
    pub max_fusions: Option<usize>,
}

impl TrackFilter {
    pub fn accepts(&self, stats: &TrackStats) -> bool {
        self.min_length.map_or(true, |n| stats.length() >= n)
            && self.max_missing.map_or(true, |n| stats.missing <= n)
            && self.max_divisions.map_or(true, |n| stats.divisions <= n)
            && self.max_fusions.map_or(true, |n| stats.fusions <= n)
    }

    pub fn select(&self, stats: &[TrackStats]) -> Vec<Label> {
        stats
            .iter()
            .filter(|s| self.accepts(s))
            .map(|s| s.mask_id)
            .collect()
    }
}
