// Fusion and division events on the working graph, and extraction of the
// sub-graph around each one.

use itertools::Itertools;
use petgraph::Direction::{Incoming, Outgoing};
use std::fmt;

use super::mask::Label;
use super::workinggraph::WorkingGraph;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EventKind {
    // several labels flowing into one vertex; each incoming edge must cover
    // at least this fraction of its source region
    Fusion { min_overlap_fraction: f32 },
    // one vertex flowing into several labels; each outgoing edge must cover
    // at least this fraction of its target region
    Division { min_overlap_fraction: f32 },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Fusion { .. } => "fusion",
            EventKind::Division { .. } => "division",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    pub kind: EventKind,
    // frame and label of the vertex where the labels meet or part
    pub frame: usize,
    pub mask_id: Label,
    // distinct labels on the other side of the event, ascending
    pub partners: Vec<Label>,
}

impl EventRecord {
    // Every label taking part in the event, ascending.
    pub fn labels(&self) -> Vec<Label> {
        self.partners
            .iter()
            .copied()
            .chain(std::iter::once(self.mask_id))
            .sorted_unstable()
            .dedup()
            .collect()
    }

    // Sub-graph of the involved labels from `frames_before` frames before the
    // event to `frames_after` frames after it, inclusive.
    pub fn window(
        &self,
        working: &WorkingGraph,
        frames_before: usize,
        frames_after: usize,
    ) -> WorkingGraph {
        let labels = self.labels();
        let first = self.frame.saturating_sub(frames_before);
        let last = self.frame + frames_after;
        working.filter_vertices(|vertex| {
            vertex.frame >= first && vertex.frame <= last && labels.contains(&vertex.mask_id)
        })
    }
}

pub fn find_events(working: &WorkingGraph, kind: EventKind) -> Vec<EventRecord> {
    let g = working.graph();
    let mut events = Vec::new();

    for v in g.node_indices() {
        let partners: Vec<Label> = match kind {
            EventKind::Fusion {
                min_overlap_fraction,
            } => g
                .edges_directed(v, Incoming)
                .filter(|e| e.weight().overlap_fraction_source >= min_overlap_fraction)
                .map(|e| e.weight().mask_id_source)
                .sorted_unstable()
                .dedup()
                .collect(),
            EventKind::Division {
                min_overlap_fraction,
            } => g
                .edges_directed(v, Outgoing)
                .filter(|e| e.weight().overlap_fraction_target >= min_overlap_fraction)
                .map(|e| e.weight().mask_id_target)
                .sorted_unstable()
                .dedup()
                .collect(),
        };

        if partners.len() >= 2 {
            events.push(EventRecord {
                kind,
                frame: g[v].frame,
                mask_id: g[v].mask_id,
                partners,
            });
        }
    }

    events.sort_by_key(|event| (event.frame, event.mask_id));
    events
}
