// Stability analysis on the working graph and enumeration of small, isolated
// unstable regions (gaps, flickering labels) that interpolation can repair.

use petgraph::graph::NodeIndex;
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use petgraph::Direction::{Incoming, Outgoing};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::mask::Label;
use super::workinggraph::WorkingGraph;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Defect {
    pub labels: Vec<Label>,
    // frames to repair, half-open
    pub frame_start: usize,
    pub frame_end: usize,
}

impl Defect {
    pub fn nframes(&self) -> usize {
        self.frame_end - self.frame_start
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DefectParams {
    pub max_defect_frames: usize,
    pub min_stable_frames: usize,
    pub stable_overlap_fraction: f32,
    pub only_missing: bool,
}

pub struct Stability {
    // indexed by working graph edge index
    pub stable_edge: Vec<bool>,
    // size of the vertex's component in the stable-edge sub-graph, indexed
    // by working graph node index
    pub stable_run: Vec<usize>,
}

// An edge is stable when it continues one label into the very next frame,
// is the only way out of its source and the only way into its target, and
// covers enough of both regions.
pub fn stability(working: &WorkingGraph, stable_overlap_fraction: f32) -> Stability {
    let g = working.graph();
    let nnodes = g.node_count();

    let stable_edge: Vec<bool> = g
        .edge_references()
        .map(|e| {
            let edge = e.weight();
            edge.frame_delta() == 1
                && edge.mask_id_source == edge.mask_id_target
                && g.edges_directed(e.source(), Outgoing).count() == 1
                && g.edges_directed(e.target(), Incoming).count() == 1
                && edge.overlap_fraction_source >= stable_overlap_fraction
                && edge.overlap_fraction_target >= stable_overlap_fraction
        })
        .collect();

    let mut components = UnionFind::<usize>::new(nnodes);
    for e in g.edge_references() {
        if stable_edge[e.id().index()] {
            components.union(e.source().index(), e.target().index());
        }
    }
    let roots = components.into_labeling();
    let mut sizes: HashMap<usize, usize> = HashMap::new();
    for &root in &roots {
        *sizes.entry(root).or_insert(0) += 1;
    }
    let stable_run = roots.iter().map(|root| sizes[root]).collect();

    Stability {
        stable_edge,
        stable_run,
    }
}

// Weakly connected components of the unstable-edge sub-graph that are short,
// start and end with the same labels, and sit between long enough stable runs.
// The reported frame range leaves out the two bounding frames.
//
// Stable run length is the size of a vertex's stable component, which can
// count frames on the far side of the defect; it is kept as an upper bound on
// the run adjoining the defect.
pub fn find_isolated_defects(working: &WorkingGraph, params: &DefectParams) -> Vec<Defect> {
    let g = working.graph();
    if g.node_count() == 0 {
        return Vec::new();
    }

    let stability = stability(working, params.stable_overlap_fraction);

    let mut components = UnionFind::<usize>::new(g.node_count());
    let mut in_unstable = vec![false; g.node_count()];
    for e in g.edge_references() {
        if !stability.stable_edge[e.id().index()] {
            components.union(e.source().index(), e.target().index());
            in_unstable[e.source().index()] = true;
            in_unstable[e.target().index()] = true;
        }
    }
    let roots = components.into_labeling();
    let mut unstable: BTreeMap<usize, Vec<NodeIndex>> = BTreeMap::new();
    for v in g.node_indices() {
        if in_unstable[v.index()] {
            unstable.entry(roots[v.index()]).or_default().push(v);
        }
    }

    let mut defects = Vec::new();
    for component in unstable.values() {
        if params.only_missing && component.len() != 2 {
            continue;
        }
        if component.len() <= 1 {
            continue;
        }

        let first = component.iter().map(|&v| g[v].frame).min().unwrap_or(0);
        let last = component.iter().map(|&v| g[v].frame).max().unwrap_or(0);
        if last - first + 1 > params.max_defect_frames + 2 {
            continue;
        }

        let labels: BTreeSet<Label> = component.iter().map(|&v| g[v].mask_id).collect();

        let at_frame = |frame: usize| -> Vec<NodeIndex> {
            labels
                .iter()
                .filter_map(|&label| working.node_index(frame, label))
                .collect()
        };
        let first_nodes = at_frame(first);
        let last_nodes = at_frame(last);

        let first_labels: Vec<Label> = first_nodes.iter().map(|&v| g[v].mask_id).collect();
        let last_labels: Vec<Label> = last_nodes.iter().map(|&v| g[v].mask_id).collect();
        if first_labels != last_labels {
            continue;
        }

        let min_run = |nodes: &[NodeIndex]| {
            nodes
                .iter()
                .map(|v| stability.stable_run[v.index()])
                .min()
                .unwrap_or(0)
        };
        let nframes = working.nframes();
        if min_run(&first_nodes) < params.min_stable_frames.min(first + 1) {
            continue;
        }
        if min_run(&last_nodes) < params.min_stable_frames.min(nframes - last) {
            continue;
        }

        defects.push(Defect {
            labels: labels.into_iter().collect(),
            frame_start: first + 1,
            frame_end: last,
        });
    }

    defects.sort();
    defects
}
