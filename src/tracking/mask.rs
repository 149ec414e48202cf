// Label volumes and the histogram primitives the graph is built from.

use ndarray::{s, Array3, ArrayView2, ArrayView3, Axis, Zip};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use super::error::{Result, TrackingError};

pub type Label = u32;
pub const BACKGROUND: Label = 0;

// [time, y, x]
pub type MaskVolume = Array3<Label>;

// A rectangular time × y × x sub-volume, half-open on every axis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub frames: Range<usize>,
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl Region {
    pub fn new(frames: Range<usize>, rows: Range<usize>, cols: Range<usize>) -> Self {
        Region { frames, rows, cols }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (
            self.frames.len(),
            self.rows.len(),
            self.cols.len(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() || self.rows.is_empty() || self.cols.is_empty()
    }

    pub fn contains_frame(&self, frame: usize) -> bool {
        self.frames.contains(&frame)
    }

    // Fail unless the region is well formed and lies within a volume of the
    // given shape.
    pub fn validate(&self, shape: (usize, usize, usize)) -> Result<()> {
        let axes = [
            ("frame", &self.frames, shape.0),
            ("y", &self.rows, shape.1),
            ("x", &self.cols, shape.2),
        ];
        for (name, range, len) in axes {
            if range.end < range.start {
                return Err(TrackingError::InvalidRegion(format!(
                    "{} range {}..{} ends before it starts",
                    name, range.start, range.end
                )));
            }
            if range.end > len {
                return Err(TrackingError::InvalidRegion(format!(
                    "{} range {}..{} exceeds volume extent {}",
                    name, range.start, range.end, len
                )));
            }
        }
        Ok(())
    }

    pub fn crop<'a>(&self, mask: ArrayView3<'a, Label>) -> ArrayView3<'a, Label> {
        mask.slice_move(s![
            self.frames.clone(),
            self.rows.clone(),
            self.cols.clone()
        ])
    }
}

// Pixel count per label in a frame (or any 2D crop), background included.
pub fn label_histogram(frame: ArrayView2<Label>) -> BTreeMap<Label, u64> {
    let mut hist = BTreeMap::new();
    for &label in frame.iter() {
        *hist.entry(label).or_insert(0) += 1;
    }
    hist
}

// Joint histogram of (label in `a`, label in `b`) over co-located pixels,
// restricted to pairs where both labels are foreground.
pub fn confusion_counts(a: ArrayView2<Label>, b: ArrayView2<Label>) -> HashMap<(Label, Label), u64> {
    debug_assert_eq!(a.dim(), b.dim());
    let mut counts = HashMap::new();
    Zip::from(&a).and(&b).for_each(|&la, &lb| {
        if la != BACKGROUND && lb != BACKGROUND {
            *counts.entry((la, lb)).or_insert(0) += 1;
        }
    });
    counts
}

// Signed per-pair difference `after - before`, zero entries dropped.
pub fn confusion_delta(
    before: &HashMap<(Label, Label), u64>,
    after: &HashMap<(Label, Label), u64>,
) -> BTreeMap<(Label, Label), i64> {
    let mut delta: BTreeMap<(Label, Label), i64> = BTreeMap::new();
    for (&key, &count) in after {
        *delta.entry(key).or_insert(0) += count as i64;
    }
    for (&key, &count) in before {
        *delta.entry(key).or_insert(0) -= count as i64;
    }
    delta.retain(|_, d| *d != 0);
    delta
}

pub fn max_label(mask: &ArrayView3<Label>) -> Label {
    mask.iter().copied().max().unwrap_or(BACKGROUND)
}

pub fn has_labels(mask: &ArrayView3<Label>) -> bool {
    mask.iter().any(|&label| label != BACKGROUND)
}

// Half-open (rows, cols) bounding box of every pixel whose label is in
// `labels`, across all frames of `mask`. `None` when no such pixel exists.
pub fn labels_bounding_box(
    mask: &ArrayView3<Label>,
    labels: &[Label],
) -> Option<(Range<usize>, Range<usize>)> {
    let mut bounds: Option<(usize, usize, usize, usize)> = None;
    for frame in mask.axis_iter(Axis(0)) {
        for ((i, j), label) in frame.indexed_iter() {
            if *label == BACKGROUND || !labels.contains(label) {
                continue;
            }
            bounds = Some(match bounds {
                None => (i, i, j, j),
                Some((i0, i1, j0, j1)) => (i0.min(i), i1.max(i), j0.min(j), j1.max(j)),
            });
        }
    }
    bounds.map(|(i0, i1, j0, j1)| (i0..i1 + 1, j0..j1 + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_label_histogram_counts_background() {
        let frame = array![[0, 1, 1], [2, 0, 1]];
        let hist = label_histogram(frame.view());
        assert_eq!(hist.get(&0), Some(&2));
        assert_eq!(hist.get(&1), Some(&3));
        assert_eq!(hist.get(&2), Some(&1));
    }

    #[test]
    fn test_confusion_skips_background() {
        let a = array![[1, 1, 0], [2, 2, 2]];
        let b = array![[3, 0, 3], [3, 4, 4]];
        let counts = confusion_counts(a.view(), b.view());
        assert_eq!(counts.get(&(1, 3)), Some(&1));
        assert_eq!(counts.get(&(2, 3)), Some(&1));
        assert_eq!(counts.get(&(2, 4)), Some(&2));
        assert_eq!(counts.len(), 3);
    }

    #[test]
    fn test_confusion_delta() {
        let a = array![[1, 1], [2, 2]];
        let before = confusion_counts(a.view(), array![[1, 1], [0, 2]].view());
        let after = confusion_counts(a.view(), array![[1, 0], [2, 2]].view());
        let delta = confusion_delta(&before, &after);
        assert_eq!(delta.get(&(1, 1)), Some(&-1));
        assert_eq!(delta.get(&(2, 2)), Some(&1));
        assert_eq!(delta.len(), 2);
    }

    #[test]
    fn test_region_validation() {
        let shape = (4, 10, 10);
        assert!(Region::new(0..4, 0..10, 0..10).validate(shape).is_ok());
        assert!(Region::new(2..2, 0..10, 0..10).validate(shape).is_ok());
        #[allow(clippy::reversed_empty_ranges)]
        let reversed = Region::new(3..1, 0..10, 0..10);
        assert!(matches!(
            reversed.validate(shape),
            Err(TrackingError::InvalidRegion(_))
        ));
        assert!(Region::new(0..5, 0..10, 0..10).validate(shape).is_err());
        assert!(Region::new(0..4, 0..10, 3..11).validate(shape).is_err());
    }

    #[test]
    fn test_bounding_box() {
        let mut mask = MaskVolume::zeros((2, 6, 6));
        mask[[0, 1, 2]] = 3;
        mask[[1, 4, 1]] = 3;
        mask[[1, 5, 5]] = 7;
        let bbox = labels_bounding_box(&mask.view(), &[3]);
        assert_eq!(bbox, Some((1..5, 1..3)));
        assert_eq!(labels_bounding_box(&mask.view(), &[9]), None);
    }
}
