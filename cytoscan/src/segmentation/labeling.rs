//! Connected component labeling using union-find over row runs.
//!
//! Each row is split into runs of foreground pixels; runs touching a run of
//! the previous row are merged. Final labels are sequential `1..=n` in raster
//! order of each component's first pixel.

use common::{BitBuffer2, Buffer2};

use super::config::Connectivity;

/// A horizontal run of foreground pixels.
#[derive(Debug, Clone, Copy)]
struct Run {
    start: u32, // inclusive
    end: u32,   // exclusive
    label: u32,
}

impl Run {
    /// Window of previous-row x positions that may touch this run.
    #[inline]
    fn search_window(&self, connectivity: Connectivity) -> (u32, u32) {
        match connectivity {
            Connectivity::Four => (self.start, self.end),
            Connectivity::Eight => (self.start.saturating_sub(1), self.end + 1),
        }
    }
}

#[inline]
fn runs_connected(prev: &Run, curr: &Run, connectivity: Connectivity) -> bool {
    match connectivity {
        Connectivity::Four => prev.start < curr.end && prev.end > curr.start,
        Connectivity::Eight => prev.start < curr.end + 1 && prev.end + 1 > curr.start,
    }
}

fn extract_row_runs(mask: &BitBuffer2, y: usize, runs: &mut Vec<Run>) {
    let width = mask.width();
    let row_start = y * width;
    let mut x = 0;
    while x < width {
        if !mask.get(row_start + x) {
            x += 1;
            continue;
        }
        let start = x;
        while x < width && mask.get(row_start + x) {
            x += 1;
        }
        runs.push(Run {
            start: start as u32,
            end: x as u32,
            label: 0,
        });
    }
}

fn merge_runs_with_prev(
    curr_runs: &mut [Run],
    prev_runs: &[Run],
    connectivity: Connectivity,
    uf: &mut UnionFind,
) {
    let mut prev_idx = 0;
    for run in curr_runs.iter_mut() {
        let (search_start, search_end) = run.search_window(connectivity);

        while prev_idx < prev_runs.len() && prev_runs[prev_idx].end <= search_start {
            prev_idx += 1;
        }

        let mut assigned = None;
        let mut check_idx = prev_idx;
        while check_idx < prev_runs.len() && prev_runs[check_idx].start < search_end {
            let prev_run = &prev_runs[check_idx];
            if runs_connected(prev_run, run, connectivity) {
                match assigned {
                    Some(label) if label != prev_run.label => uf.union(label, prev_run.label),
                    None => assigned = Some(prev_run.label),
                    _ => {}
                }
            }
            check_idx += 1;
        }

        run.label = assigned.unwrap_or_else(|| uf.make_set());
    }
}

/// Disjoint-set forest over provisional labels `1..`.
#[derive(Debug, Default)]
struct UnionFind {
    parent: Vec<u32>,
}

impl UnionFind {
    fn make_set(&mut self) -> u32 {
        let label = self.parent.len() as u32 + 1;
        self.parent.push(label);
        label
    }

    fn find(&mut self, label: u32) -> u32 {
        let mut root = label;
        while self.parent[(root - 1) as usize] != root {
            root = self.parent[(root - 1) as usize];
        }

        let mut current = label;
        while current != root {
            let next = self.parent[(current - 1) as usize];
            self.parent[(current - 1) as usize] = root;
            current = next;
        }
        root
    }

    /// The smaller root wins, so a component's root is its earliest run.
    fn union(&mut self, a: u32, b: u32) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            let (smaller, larger) = if root_a < root_b {
                (root_a, root_b)
            } else {
                (root_b, root_a)
            };
            self.parent[(larger - 1) as usize] = smaller;
        }
    }

    /// Rewrites provisional labels to sequential `1..=n`. Returns `n`.
    fn flatten_labels(&mut self, labels: &mut [u32]) -> usize {
        let mut mapping = vec![0u32; self.parent.len() + 1];
        let mut next = 0u32;
        for label in 1..=self.parent.len() as u32 {
            let root = self.find(label);
            mapping[label as usize] = if root == label {
                next += 1;
                next
            } else {
                mapping[root as usize]
            };
        }
        for l in labels.iter_mut().filter(|l| **l != 0) {
            *l = mapping[*l as usize];
        }
        next as usize
    }
}

/// A 2D label map; 0 is background.
#[derive(Debug, Clone)]
pub struct LabelMap {
    labels: Buffer2<u32>,
    num_labels: usize,
}

impl LabelMap {
    pub fn from_mask(mask: &BitBuffer2, connectivity: Connectivity) -> Self {
        let width = mask.width();
        let height = mask.height();
        let mut labels = Buffer2::new_default(width, height);

        let mut uf = UnionFind::default();
        let mut prev_runs: Vec<Run> = Vec::with_capacity(width / 4);
        let mut curr_runs: Vec<Run> = Vec::with_capacity(width / 4);

        for y in 0..height {
            curr_runs.clear();
            extract_row_runs(mask, y, &mut curr_runs);

            if curr_runs.is_empty() {
                prev_runs.clear();
                continue;
            }

            merge_runs_with_prev(&mut curr_runs, &prev_runs, connectivity, &mut uf);

            let row = y * width;
            for run in &curr_runs {
                labels.pixels_mut()[row + run.start as usize..row + run.end as usize].fill(run.label);
            }

            std::mem::swap(&mut prev_runs, &mut curr_runs);
        }

        let num_labels = uf.flatten_labels(labels.pixels_mut());
        Self { labels, num_labels }
    }

    /// Renumbers arbitrary non-zero labels to `1..=n` by first raster occurrence.
    pub fn from_raw(mut labels: Buffer2<u32>) -> Self {
        let mut mapping = hashbrown::HashMap::new();
        for l in labels.iter_mut().filter(|l| **l != 0) {
            let next = mapping.len() as u32 + 1;
            *l = *mapping.entry(*l).or_insert(next);
        }
        Self {
            num_labels: mapping.len(),
            labels,
        }
    }

    /// Number of components, excluding background.
    #[inline]
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.labels.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.labels.height()
    }

    #[inline]
    pub fn labels(&self) -> &Buffer2<u32> {
        &self.labels
    }

    /// Linear pixel indices of each component in raster order.
    /// Entry `i` belongs to label `i + 1`.
    pub fn component_pixels(&self) -> Vec<Vec<usize>> {
        let mut components = vec![Vec::new(); self.num_labels];
        for (idx, &label) in self.labels.iter().enumerate() {
            if label != 0 {
                components[label as usize - 1].push(idx);
            }
        }
        components
    }
}

impl std::ops::Index<usize> for LabelMap {
    type Output = u32;

    #[inline]
    fn index(&self, idx: usize) -> &Self::Output {
        &self.labels[idx]
    }
}
