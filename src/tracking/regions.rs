// Mask clean-up run before graph construction and after interpolation:
// splitting labels that fell apart into several pieces, and dropping tiny
// regions.

use ndarray::{Array2, ArrayView2, ArrayViewMut3, Axis, Zip};
use std::collections::{HashMap, VecDeque};

use super::diagnostics::Diagnostics;
use super::mask::{label_histogram, max_label, Label, BACKGROUND};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Connectivity {
    // edge neighbours only
    Four,
    // edge and corner neighbours
    #[default]
    Eight,
}

impl Connectivity {
    fn offsets(&self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &[(-1, 0), (1, 0), (0, -1), (0, 1)],
            Connectivity::Eight => &[
                (-1, -1),
                (-1, 0),
                (-1, 1),
                (0, -1),
                (0, 1),
                (1, -1),
                (1, 0),
                (1, 1),
            ],
        }
    }
}

// Connected components of equal-label pixels. Returns the per-pixel component
// id (0 on background, ids starting at 1) and, per component id - 1, its
// label and pixel count.
pub fn label_components(
    frame: ArrayView2<Label>,
    connectivity: Connectivity,
) -> (Array2<u32>, Vec<(Label, usize)>) {
    let (h, w) = frame.dim();
    let mut components = Array2::<u32>::zeros((h, w));
    let mut info: Vec<(Label, usize)> = Vec::new();
    let mut queue = VecDeque::new();

    for i in 0..h {
        for j in 0..w {
            let label = frame[[i, j]];
            if label == BACKGROUND || components[[i, j]] != 0 {
                continue;
            }

            info.push((label, 0));
            let id = info.len() as u32;
            components[[i, j]] = id;
            queue.push_back((i, j));

            while let Some((ci, cj)) = queue.pop_front() {
                info[id as usize - 1].1 += 1;
                for &(di, dj) in connectivity.offsets() {
                    let ni = ci as isize + di;
                    let nj = cj as isize + dj;
                    if ni < 0 || nj < 0 || ni >= h as isize || nj >= w as isize {
                        continue;
                    }
                    let (ni, nj) = (ni as usize, nj as usize);
                    if frame[[ni, nj]] == label && components[[ni, nj]] == 0 {
                        components[[ni, nj]] = id;
                        queue.push_back((ni, nj));
                    }
                }
            }
        }
    }

    (components, info)
}

// Give every piece of a label but its largest a new label, unused anywhere
// in the volume. Returns the number of new labels handed out.
pub fn split_disconnected_regions(
    mut mask: ArrayViewMut3<Label>,
    connectivity: Connectivity,
    diag: &mut Diagnostics,
) -> usize {
    let mut next_label = max_label(&mask.view()) + 1;
    let mut nsplit = 0;

    for (t, mut frame) in mask.axis_iter_mut(Axis(0)).enumerate() {
        let (components, info) = label_components(frame.view(), connectivity);

        // largest piece per label; the earliest one wins ties
        let mut largest: HashMap<Label, usize> = HashMap::new();
        for (c, &(label, size)) in info.iter().enumerate() {
            let entry = largest.entry(label).or_insert(c);
            if size > info[*entry].1 {
                *entry = c;
            }
        }

        let mut new_labels: Vec<Label> = info.iter().map(|&(label, _)| label).collect();
        for (c, new_label) in new_labels.iter_mut().enumerate() {
            if largest[&*new_label] != c {
                *new_label = next_label;
                next_label += 1;
                nsplit += 1;
            }
        }
        if new_labels.len() == largest.len() {
            continue;
        }

        diag.trace(format!(
            "frame {}: split {} pieces off disconnected labels",
            t,
            new_labels.len() - largest.len()
        ));
        Zip::from(&mut frame).and(&components).for_each(|x, &c| {
            if c != 0 {
                *x = new_labels[c as usize - 1];
            }
        });
    }

    if nsplit > 0 {
        diag.debug(format!("split off {} disconnected regions", nsplit));
    }
    nsplit
}

// Clear every (frame, label) region smaller than `min_area` pixels.
pub fn remove_small_regions(
    mut mask: ArrayViewMut3<Label>,
    min_area: u64,
    diag: &mut Diagnostics,
) -> Vec<(usize, Label)> {
    let mut removed = Vec::new();
    for (t, mut frame) in mask.axis_iter_mut(Axis(0)).enumerate() {
        let small: Vec<Label> = label_histogram(frame.view())
            .into_iter()
            .filter(|&(label, area)| label != BACKGROUND && area < min_area)
            .map(|(label, _)| label)
            .collect();
        if small.is_empty() {
            continue;
        }
        frame.mapv_inplace(|x| if small.contains(&x) { BACKGROUND } else { x });
        removed.extend(small.into_iter().map(|label| (t, label)));
    }

    if !removed.is_empty() {
        diag.debug(format!(
            "removed {} regions smaller than {} pixels",
            removed.len(),
            min_area
        ));
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::mask::MaskVolume;
    use ndarray::{array, s};

    #[test]
    fn test_components_connectivity() {
        let frame = array![[1, 0, 0], [0, 1, 0], [0, 0, 2]];
        let (_, four) = label_components(frame.view(), Connectivity::Four);
        assert_eq!(four.len(), 3);
        let (components, eight) = label_components(frame.view(), Connectivity::Eight);
        assert_eq!(eight, vec![(1, 2), (2, 1)]);
        assert_eq!(components[[1, 1]], 1);
    }

    #[test]
    fn test_split_keeps_largest_piece() {
        let mut mask = MaskVolume::zeros((2, 6, 6));
        mask.slice_mut(s![0, 0..1, 0..1]).fill(3);
        mask.slice_mut(s![0, 3..6, 3..6]).fill(3);
        mask.slice_mut(s![1, 0..2, 0..2]).fill(5);

        let mut diag = Diagnostics::new();
        let nsplit = split_disconnected_regions(mask.view_mut(), Connectivity::Eight, &mut diag);
        assert_eq!(nsplit, 1);
        assert_eq!(mask[[0, 4, 4]], 3);
        assert_eq!(mask[[0, 0, 0]], 6);
        assert_eq!(mask[[1, 1, 1]], 5);

        // idempotent
        let once = mask.clone();
        assert_eq!(
            split_disconnected_regions(mask.view_mut(), Connectivity::Eight, &mut diag),
            0
        );
        assert_eq!(mask, once);
    }

    #[test]
    fn test_remove_small_regions() {
        let mut mask = MaskVolume::zeros((2, 5, 5));
        mask.slice_mut(s![0, 0..2, 0..2]).fill(1);
        mask[[0, 4, 4]] = 2;
        mask[[1, 3, 3]] = 1;

        let mut diag = Diagnostics::new();
        let removed = remove_small_regions(mask.view_mut(), 2, &mut diag);
        assert_eq!(removed, vec![(0, 2), (1, 1)]);
        assert_eq!(mask[[0, 0, 0]], 1);
        assert_eq!(mask[[0, 4, 4]], 0);
        assert_eq!(mask[[1, 3, 3]], 0);
        assert!(remove_small_regions(mask.view_mut(), 2, &mut diag).is_empty());
    }
}
