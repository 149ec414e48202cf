// The filtered view of the overlap graph that stability analysis, defect
// detection and track statistics run on:
//   1. only edges whose overlap fractions both reach the threshold survive;
//   2. consecutive occurrences of a label that lost their connecting edge
//      are rejoined by a synthetic, zero-overlap edge;
//   3. an edge is dropped when another edge joining the same pair of labels
//      spans a frame interval inside its own.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::mask::Label;
use super::overlapgraph::{Edge, OverlapGraph, Vertex};

#[derive(Clone, Debug)]
pub struct WorkingGraph {
    graph: DiGraph<Vertex, Edge>,
    index: HashMap<(usize, Label), NodeIndex>,
    nframes: usize,
    min_overlap_fraction: f32,
}

impl WorkingGraph {
    pub fn from_overlaps(overlaps: &OverlapGraph) -> Self {
        Self::with_threshold(overlaps, overlaps.min_overlap_fraction())
    }

    pub fn with_threshold(overlaps: &OverlapGraph, min_overlap_fraction: f32) -> Self {
        let full = overlaps.graph();
        let mut graph = DiGraph::with_capacity(full.node_count(), full.edge_count());
        let mut index = HashMap::with_capacity(full.node_count());
        let mut full_to_working = HashMap::with_capacity(full.node_count());

        // vertices in (frame, label) order, so per-label lists come out sorted
        // by frame
        let mut tracks: BTreeMap<Label, Vec<NodeIndex>> = BTreeMap::new();
        for frame in 0..overlaps.nframes() {
            for (label, v) in overlaps.frame_nodes(frame) {
                let w = graph.add_node(full[v]);
                index.insert((frame, label), w);
                full_to_working.insert(v, w);
                tracks.entry(label).or_default().push(w);
            }
        }

        let mut candidates: Vec<(NodeIndex, NodeIndex, Edge)> = Vec::new();
        for e in full.edge_references() {
            let edge = *e.weight();
            if edge.overlap_fraction_source >= min_overlap_fraction
                && edge.overlap_fraction_target >= min_overlap_fraction
            {
                candidates.push((full_to_working[&e.source()], full_to_working[&e.target()], edge));
            }
        }
        candidates.sort_by_key(|&(_, _, e)| {
            (e.frame_source, e.mask_id_source, e.frame_target, e.mask_id_target)
        });

        let connected: HashSet<(NodeIndex, NodeIndex)> =
            candidates.iter().map(|&(u, v, _)| (u, v)).collect();
        for nodes in tracks.values() {
            for pair in nodes.windows(2) {
                let (u, v) = (pair[0], pair[1]);
                if !connected.contains(&(u, v)) {
                    candidates.push((u, v, Edge::synthetic(&graph[u], &graph[v])));
                }
            }
        }

        let redundant = redundant_edges(&candidates);
        for (i, &(u, v, edge)) in candidates.iter().enumerate() {
            if !redundant.contains(&i) {
                graph.add_edge(u, v, edge);
            }
        }

        WorkingGraph {
            graph,
            index,
            nframes: overlaps.nframes(),
            min_overlap_fraction,
        }
    }

    pub fn graph(&self) -> &DiGraph<Vertex, Edge> {
        &self.graph
    }

    pub fn nframes(&self) -> usize {
        self.nframes
    }

    pub fn min_overlap_fraction(&self) -> f32 {
        self.min_overlap_fraction
    }

    pub fn node_index(&self, frame: usize, label: Label) -> Option<NodeIndex> {
        self.index.get(&(frame, label)).copied()
    }

    pub fn vertex(&self, frame: usize, label: Label) -> Option<&Vertex> {
        self.node_index(frame, label).map(|v| &self.graph[v])
    }

    pub fn edge_between(&self, source: (usize, Label), target: (usize, Label)) -> Option<&Edge> {
        let u = self.node_index(source.0, source.1)?;
        let v = self.node_index(target.0, target.1)?;
        self.graph.find_edge(u, v).map(|e| &self.graph[e])
    }

    // Distinct mask ids, ascending.
    pub fn track_ids(&self) -> Vec<Label> {
        let mut ids: Vec<Label> = self.graph.node_weights().map(|v| v.mask_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    // The sub-graph induced by every vertex satisfying `keep`.
    pub fn filter_vertices(&self, mut keep: impl FnMut(&Vertex) -> bool) -> WorkingGraph {
        let graph = self.graph.filter_map(
            |_, vertex| if keep(vertex) { Some(*vertex) } else { None },
            |_, edge| Some(*edge),
        );
        let index = graph
            .node_indices()
            .map(|v| ((graph[v].frame, graph[v].mask_id), v))
            .collect();
        WorkingGraph {
            graph,
            index,
            nframes: self.nframes,
            min_overlap_fraction: self.min_overlap_fraction,
        }
    }

    pub fn subgraph_for_tracks(&self, ids: &[Label]) -> WorkingGraph {
        let ids: HashSet<Label> = ids.iter().copied().collect();
        self.filter_vertices(|vertex| ids.contains(&vertex.mask_id))
    }
}

// Indices of edges whose frame span strictly contains the span of another edge
// between the same pair of labels.
fn redundant_edges(edges: &[(NodeIndex, NodeIndex, Edge)]) -> HashSet<usize> {
    let mut by_labels: HashMap<(Label, Label), Vec<usize>> = HashMap::new();
    for (i, (_, _, edge)) in edges.iter().enumerate() {
        by_labels
            .entry((edge.mask_id_source, edge.mask_id_target))
            .or_default()
            .push(i);
    }

    let mut redundant = HashSet::new();
    for group in by_labels.values() {
        for &i in group {
            let ei = &edges[i].2;
            let contains_other = group.iter().any(|&j| {
                let ej = &edges[j].2;
                j != i && ej.frame_source >= ei.frame_source && ej.frame_target <= ei.frame_target
            });
            if contains_other {
                redundant.insert(i);
            }
        }
    }
    redundant
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::diagnostics::Diagnostics;
    use crate::tracking::mask::MaskVolume;
    use ndarray::s;

    fn build(mask: &MaskVolume, w: usize, threshold: f32) -> OverlapGraph {
        let mut diag = Diagnostics::new();
        OverlapGraph::build(mask.view(), w, threshold, &mut diag).unwrap()
    }

    #[test]
    fn test_synthetic_edge_bridges_gap() {
        let mut mask = MaskVolume::zeros((4, 6, 6));
        mask.slice_mut(s![0..2, 1..4, 1..4]).fill(1);
        mask.slice_mut(s![3, 1..4, 1..4]).fill(1);

        let overlaps = build(&mask, 1, 0.0);
        let working = WorkingGraph::from_overlaps(&overlaps);
        assert_eq!(working.graph().edge_count(), 2);
        let bridge = working.edge_between((1, 1), (3, 1)).unwrap();
        assert!(bridge.is_synthetic());
        assert_eq!(bridge.frame_delta(), 2);
    }

    #[test]
    fn test_long_edges_are_redundant() {
        let mut mask = MaskVolume::zeros((4, 6, 6));
        mask.slice_mut(s![.., 1..4, 1..4]).fill(1);

        let overlaps = build(&mask, 3, 0.0);
        assert_eq!(overlaps.edge_count(), 6);
        let working = WorkingGraph::from_overlaps(&overlaps);
        assert_eq!(working.graph().edge_count(), 3);
        assert!(working.graph().edge_weights().all(|e| e.frame_delta() == 1));
    }

    #[test]
    fn test_threshold_drops_weak_edges() {
        // label 2 barely touches label 1 in the next frame
        let mut mask = MaskVolume::zeros((2, 6, 6));
        mask.slice_mut(s![0, 0..3, 0..6]).fill(1);
        mask.slice_mut(s![1, 0..3, 0..6]).fill(1);
        mask.slice_mut(s![0, 3..6, 0..6]).fill(2);
        mask.slice_mut(s![1, 3..6, 0..6]).fill(2);
        mask[[1, 2, 0]] = 2;

        let overlaps = build(&mask, 1, 0.25);
        assert_eq!(overlaps.edge_count(), 3);
        let working = WorkingGraph::from_overlaps(&overlaps);
        assert_eq!(working.graph().edge_count(), 2);
        assert!(working.edge_between((0, 1), (1, 2)).is_none());

        let loose = WorkingGraph::with_threshold(&overlaps, 0.0);
        assert_eq!(loose.graph().edge_count(), 3);
    }

    #[test]
    fn test_subgraph_for_tracks() {
        let mut mask = MaskVolume::zeros((3, 6, 6));
        mask.slice_mut(s![.., 0..2, ..]).fill(1);
        mask.slice_mut(s![.., 4..6, ..]).fill(2);

        let overlaps = build(&mask, 1, 0.0);
        let working = WorkingGraph::from_overlaps(&overlaps);
        assert_eq!(working.track_ids(), vec![1, 2]);

        let sub = working.subgraph_for_tracks(&[2]);
        assert_eq!(sub.graph().node_count(), 3);
        assert_eq!(sub.graph().edge_count(), 2);
        assert!(sub.vertex(1, 2).is_some());
        assert!(sub.vertex(1, 1).is_none());
    }
}
