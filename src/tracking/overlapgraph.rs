// The full overlap graph: one vertex per (frame, label) present in the mask,
// one forward edge per pair of labels that share pixels across two frames at
// most `max_delta_frame` apart.

use itertools::Itertools;
use ndarray::{s, ArrayView3, Axis};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction::{Incoming, Outgoing};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Instant;

use super::diagnostics::Diagnostics;
use super::error::{Result, TrackingError};
use super::mask::{
    confusion_counts, confusion_delta, label_histogram, Label, Region, BACKGROUND,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vertex {
    pub frame: usize,
    pub mask_id: Label,
    pub area: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edge {
    pub overlap_area: u64,
    pub overlap_fraction_source: f32,
    pub overlap_fraction_target: f32,

    // copies of the endpoint attributes
    pub frame_source: usize,
    pub frame_target: usize,
    pub mask_id_source: Label,
    pub mask_id_target: Label,
}

impl Edge {
    fn with_overlap(overlap_area: u64) -> Self {
        Edge {
            overlap_area,
            overlap_fraction_source: 0.0,
            overlap_fraction_target: 0.0,
            frame_source: 0,
            frame_target: 0,
            mask_id_source: BACKGROUND,
            mask_id_target: BACKGROUND,
        }
    }

    // Edge carrying no overlap, joining two vertices of the same track.
    pub fn synthetic(source: &Vertex, target: &Vertex) -> Self {
        Edge {
            overlap_area: 0,
            overlap_fraction_source: 0.0,
            overlap_fraction_target: 0.0,
            frame_source: source.frame,
            frame_target: target.frame,
            mask_id_source: source.mask_id,
            mask_id_target: target.mask_id,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.overlap_area == 0
    }

    pub fn frame_delta(&self) -> usize {
        self.frame_target - self.frame_source
    }

    pub fn min_overlap_fraction(&self) -> f32 {
        self.overlap_fraction_source.min(self.overlap_fraction_target)
    }
}

fn overlap_fraction(overlap_area: u64, area: u64) -> f32 {
    if area == 0 {
        0.0
    } else {
        (overlap_area as f64 / area as f64) as f32
    }
}

fn apply_delta(value: u64, delta: i64, what: impl FnOnce() -> String) -> Result<u64> {
    let updated = value as i64 + delta;
    if updated < 0 {
        return Err(TrackingError::Inconsistent(format!(
            "{} would become negative ({} + {})",
            what(),
            value,
            delta
        )));
    }
    Ok(updated as u64)
}

// What an incremental update did to the graph.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub vertices_added: usize,
    pub vertices_changed: usize,
    pub vertices_removed: usize,
    pub edges_added: usize,
    pub edges_changed: usize,
    pub edges_removed: usize,
}

pub struct OverlapGraph {
    graph: StableDiGraph<Vertex, Edge>,

    // per-frame label -> vertex index
    frames: Vec<BTreeMap<Label, NodeIndex>>,

    // [time, y, x] shape of the mask the graph describes
    shape: (usize, usize, usize),

    max_delta_frame: usize,
    min_overlap_fraction: f32,
}

impl OverlapGraph {
    pub fn empty(
        shape: (usize, usize, usize),
        max_delta_frame: usize,
        min_overlap_fraction: f32,
    ) -> Result<Self> {
        if max_delta_frame == 0 {
            return Err(TrackingError::InvalidParameter(String::from(
                "max_delta_frame must be at least 1",
            )));
        }
        if !(0.0..=1.0).contains(&min_overlap_fraction) {
            return Err(TrackingError::InvalidParameter(format!(
                "min_overlap_fraction must be in [0, 1], got {}",
                min_overlap_fraction
            )));
        }

        Ok(OverlapGraph {
            graph: StableDiGraph::default(),
            frames: vec![BTreeMap::new(); shape.0],
            shape,
            max_delta_frame,
            min_overlap_fraction,
        })
    }

    // Build the graph from scratch. Each frame is compared against the
    // `max_delta_frame` frames preceding it.
    pub fn build(
        mask: ArrayView3<Label>,
        max_delta_frame: usize,
        min_overlap_fraction: f32,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        let t0 = Instant::now();
        let mut overlaps = OverlapGraph::empty(mask.dim(), max_delta_frame, min_overlap_fraction)?;

        for f1 in 0..overlaps.nframes() {
            let frame1 = mask.index_axis(Axis(0), f1);
            for (label, area) in label_histogram(frame1) {
                if label != BACKGROUND {
                    overlaps.insert_vertex(f1, label, area);
                }
            }

            let window: Vec<(usize, HashMap<(Label, Label), u64>)> = (f1
                .saturating_sub(max_delta_frame)..f1)
                .into_par_iter()
                .map(|f2| (f2, confusion_counts(frame1, mask.index_axis(Axis(0), f2))))
                .collect();

            for (f2, counts) in window {
                for ((id1, id2), count) in counts.into_iter().sorted() {
                    let u = overlaps.node(f2, id2)?;
                    let v = overlaps.node(f1, id1)?;
                    overlaps.graph.add_edge(u, v, Edge::with_overlap(count));
                }
            }
        }

        let edges: Vec<EdgeIndex> = overlaps.graph.edge_indices().collect();
        for e in edges {
            overlaps.refresh_edge(e);
        }

        diag.debug(format!(
            "built overlap graph: {} vertices, {} edges over {} frames in {:?}",
            overlaps.vertex_count(),
            overlaps.edge_count(),
            overlaps.nframes(),
            t0.elapsed()
        ));

        Ok(overlaps)
    }

    // Bring the graph in line with `new_values` replacing the content of
    // `region` in `mask`. `mask` must still hold the old content; writing the
    // new values into it is left to the caller. Only vertices in the changed
    // frames and edges with an endpoint in them are visited.
    pub fn update_region(
        &mut self,
        mask: ArrayView3<Label>,
        new_values: ArrayView3<Label>,
        region: &Region,
        diag: &mut Diagnostics,
    ) -> Result<UpdateSummary> {
        if mask.dim() != self.shape {
            return Err(TrackingError::ShapeMismatch {
                expected: self.shape,
                found: mask.dim(),
            });
        }
        region.validate(self.shape)?;
        if new_values.dim() != region.shape() {
            return Err(TrackingError::ShapeMismatch {
                expected: region.shape(),
                found: new_values.dim(),
            });
        }

        let mut summary = UpdateSummary::default();
        if region.is_empty() {
            return Ok(summary);
        }

        let t0 = Instant::now();
        // one common lifetime for both views, so the crop closures below can
        // hand out either
        let mask = mask.view();
        let new_values = new_values.view();
        let old_values = region.crop(mask);
        let fstart = region.frames.start;

        // vertex areas
        let mut changed_vertices: HashSet<NodeIndex> = HashSet::new();
        for frame in region.frames.clone() {
            let old_hist = label_histogram(old_values.index_axis(Axis(0), frame - fstart));
            let new_hist = label_histogram(new_values.index_axis(Axis(0), frame - fstart));

            let mut delta: BTreeMap<Label, i64> = BTreeMap::new();
            for (&label, &count) in &new_hist {
                *delta.entry(label).or_insert(0) += count as i64;
            }
            for (&label, &count) in &old_hist {
                *delta.entry(label).or_insert(0) -= count as i64;
            }

            for (label, d) in delta {
                if label == BACKGROUND || d == 0 {
                    continue;
                }
                let v = match self.node_index(frame, label) {
                    Some(v) => v,
                    None => {
                        summary.vertices_added += 1;
                        self.insert_vertex(frame, label, 0)
                    }
                };
                let area = self.graph[v].area;
                self.graph[v].area =
                    apply_delta(area, d, || format!("area of ({}, {})", frame, label))?;
                changed_vertices.insert(v);
            }
        }

        // edge overlaps, over the changed rows and columns only
        let w = self.max_delta_frame;
        let nframes = self.nframes();
        let pairs: Vec<(usize, usize)> = (fstart..(region.frames.end + w).min(nframes))
            .flat_map(|f1| (f1.saturating_sub(w)..f1).map(move |f2| (f1, f2)))
            .filter(|&(f1, f2)| region.contains_frame(f1) || region.contains_frame(f2))
            .collect();

        let crop_old = move |frame: usize| {
            mask.slice_move(s![frame, region.rows.clone(), region.cols.clone()])
        };
        let crop_new = move |frame: usize| {
            if region.contains_frame(frame) {
                new_values.index_axis_move(Axis(0), frame - fstart)
            } else {
                crop_old(frame)
            }
        };

        let deltas: Vec<(usize, usize, BTreeMap<(Label, Label), i64>)> = pairs
            .par_iter()
            .map(|&(f1, f2)| {
                let before = confusion_counts(crop_old(f1), crop_old(f2));
                let after = confusion_counts(crop_new(f1), crop_new(f2));
                (f1, f2, confusion_delta(&before, &after))
            })
            .collect();

        let mut changed_edges: HashSet<EdgeIndex> = HashSet::new();
        for (f1, f2, delta) in deltas {
            for ((id1, id2), d) in delta {
                let u = self.node(f2, id2)?;
                let v = self.node(f1, id1)?;
                let e = match self.graph.find_edge(u, v) {
                    Some(e) => {
                        let overlap = self.graph[e].overlap_area;
                        self.graph[e].overlap_area = apply_delta(overlap, d, || {
                            format!("overlap ({}, {}) -> ({}, {})", f2, id2, f1, id1)
                        })?;
                        summary.edges_changed += 1;
                        e
                    }
                    None => {
                        let overlap = apply_delta(0, d, || {
                            format!("overlap ({}, {}) -> ({}, {})", f2, id2, f1, id1)
                        })?;
                        summary.edges_added += 1;
                        self.graph.add_edge(u, v, Edge::with_overlap(overlap))
                    }
                };
                changed_edges.insert(e);
            }
        }

        // prune emptied entities
        for &e in &changed_edges {
            if self.graph[e].overlap_area == 0 {
                self.graph.remove_edge(e);
                summary.edges_removed += 1;
            }
        }
        for &v in &changed_vertices {
            let vertex = self.graph[v];
            if vertex.area == 0 {
                summary.edges_removed += self.graph.edges_directed(v, Incoming).count()
                    + self.graph.edges_directed(v, Outgoing).count();
                self.remove_node(v);
                summary.vertices_removed += 1;
            }
        }

        // overlap fractions of every edge whose overlap or endpoint area moved
        let mut stale: BTreeSet<EdgeIndex> = changed_edges
            .into_iter()
            .filter(|&e| self.graph.edge_weight(e).is_some())
            .collect();
        for &v in &changed_vertices {
            if !self.graph.contains_node(v) {
                continue;
            }
            stale.extend(self.graph.edges_directed(v, Incoming).map(|e| e.id()));
            stale.extend(self.graph.edges_directed(v, Outgoing).map(|e| e.id()));
            summary.vertices_changed += 1;
        }
        for e in stale {
            self.refresh_edge(e);
        }

        diag.trace(format!(
            "updated region {:?}: {:?} in {:?}",
            region,
            summary,
            t0.elapsed()
        ));

        Ok(summary)
    }

    // Drop the given (frame, label) vertices and their edges. Used after the
    // corresponding pixels have been cleared from the mask.
    pub fn remove_vertices(&mut self, vertices: &[(usize, Label)]) -> usize {
        let mut nremoved = 0;
        for &(frame, label) in vertices {
            if let Some(v) = self.node_index(frame, label) {
                self.remove_node(v);
                nremoved += 1;
            }
        }
        nremoved
    }

    // Rewrite the labels of every vertex in `frame` according to `relabeling`,
    // which must cover every label present and map them to distinct labels.
    pub fn relabel_frame(&mut self, frame: usize, relabeling: &HashMap<Label, Label>) -> Result<()> {
        let old_index = std::mem::take(&mut self.frames[frame]);
        let mut new_index = BTreeMap::new();
        for (&label, &v) in &old_index {
            let new_label = match relabeling.get(&label) {
                Some(&new_label) => new_label,
                None => {
                    self.frames[frame] = old_index;
                    return Err(TrackingError::LabelMismatch { frame, label });
                }
            };
            if new_index.insert(new_label, v).is_some() {
                self.frames[frame] = old_index;
                return Err(TrackingError::InvalidParameter(format!(
                    "relabeling maps two labels of frame {} to {}",
                    frame, new_label
                )));
            }
        }

        for (&new_label, &v) in &new_index {
            self.graph[v].mask_id = new_label;
            let incident: Vec<(EdgeIndex, bool)> = self
                .graph
                .edges_directed(v, Outgoing)
                .map(|e| (e.id(), true))
                .chain(self.graph.edges_directed(v, Incoming).map(|e| (e.id(), false)))
                .collect();
            for (e, is_source) in incident {
                if is_source {
                    self.graph[e].mask_id_source = new_label;
                } else {
                    self.graph[e].mask_id_target = new_label;
                }
            }
        }
        self.frames[frame] = new_index;

        Ok(())
    }

    // Check the area invariant against a mask: every foreground label of every
    // frame has a vertex whose area is its pixel count, and nothing else does.
    pub fn verify_areas(&self, mask: ArrayView3<Label>) -> Result<()> {
        if mask.dim() != self.shape {
            return Err(TrackingError::ShapeMismatch {
                expected: self.shape,
                found: mask.dim(),
            });
        }
        for (frame, frame_mask) in mask.axis_iter(Axis(0)).enumerate() {
            let mut hist = label_histogram(frame_mask);
            hist.remove(&BACKGROUND);
            if hist.len() != self.frames[frame].len() {
                let label = hist
                    .keys()
                    .chain(self.frames[frame].keys())
                    .find(|l| !hist.contains_key(l) || !self.frames[frame].contains_key(l))
                    .copied()
                    .unwrap_or(BACKGROUND);
                return Err(TrackingError::LabelMismatch { frame, label });
            }
            for (label, area) in hist {
                match self.vertex(frame, label) {
                    Some(vertex) if vertex.area == area => {}
                    _ => return Err(TrackingError::LabelMismatch { frame, label }),
                }
            }
        }
        Ok(())
    }

    pub fn graph(&self) -> &StableDiGraph<Vertex, Edge> {
        &self.graph
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    pub fn nframes(&self) -> usize {
        self.shape.0
    }

    pub fn min_overlap_fraction(&self) -> f32 {
        self.min_overlap_fraction
    }

    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node_index(&self, frame: usize, label: Label) -> Option<NodeIndex> {
        self.frames.get(frame).and_then(|index| index.get(&label)).copied()
    }

    pub fn vertex(&self, frame: usize, label: Label) -> Option<&Vertex> {
        self.node_index(frame, label).map(|v| &self.graph[v])
    }

    pub fn frame_labels(&self, frame: usize) -> impl Iterator<Item = Label> + '_ {
        self.frames[frame].keys().copied()
    }

    pub fn frame_nodes(&self, frame: usize) -> impl Iterator<Item = (Label, NodeIndex)> + '_ {
        self.frames[frame].iter().map(|(&label, &v)| (label, v))
    }

    pub fn edge_between(
        &self,
        source: (usize, Label),
        target: (usize, Label),
    ) -> Option<&Edge> {
        let u = self.node_index(source.0, source.1)?;
        let v = self.node_index(target.0, target.1)?;
        self.graph.find_edge(u, v).map(|e| &self.graph[e])
    }

    pub fn in_degree(&self, frame: usize, label: Label) -> usize {
        self.node_index(frame, label)
            .map(|v| self.graph.edges_directed(v, Incoming).count())
            .unwrap_or(0)
    }

    // Vertices ordered by (frame, mask_id).
    pub fn sorted_vertices(&self) -> Vec<Vertex> {
        self.frames
            .iter()
            .flat_map(|index| index.values().map(|&v| self.graph[v]))
            .collect()
    }

    // Edges ordered by (frame_source, mask_id_source, frame_target, mask_id_target).
    pub fn sorted_edges(&self) -> Vec<Edge> {
        self.graph
            .edge_indices()
            .map(|e| self.graph[e])
            .sorted_by_key(|e| (e.frame_source, e.mask_id_source, e.frame_target, e.mask_id_target))
            .collect()
    }

    fn node(&self, frame: usize, label: Label) -> Result<NodeIndex> {
        self.node_index(frame, label).ok_or_else(|| {
            TrackingError::Inconsistent(format!("no vertex for label {} in frame {}", label, frame))
        })
    }

    fn insert_vertex(&mut self, frame: usize, mask_id: Label, area: u64) -> NodeIndex {
        let v = self.graph.add_node(Vertex {
            frame,
            mask_id,
            area,
        });
        self.frames[frame].insert(mask_id, v);
        v
    }

    fn remove_node(&mut self, v: NodeIndex) {
        if let Some(vertex) = self.graph.remove_node(v) {
            self.frames[vertex.frame].remove(&vertex.mask_id);
        }
    }

    fn refresh_edge(&mut self, e: EdgeIndex) {
        if let Some((u, v)) = self.graph.edge_endpoints(e) {
            let source = self.graph[u];
            let target = self.graph[v];
            let edge = &mut self.graph[e];
            edge.frame_source = source.frame;
            edge.frame_target = target.frame;
            edge.mask_id_source = source.mask_id;
            edge.mask_id_target = target.mask_id;
            edge.overlap_fraction_source = overlap_fraction(edge.overlap_area, source.area);
            edge.overlap_fraction_target = overlap_fraction(edge.overlap_area, target.area);
        }
    }
}
