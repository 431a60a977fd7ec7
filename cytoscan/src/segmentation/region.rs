//! Growth of cell bodies from their nuclei through the cell mask.

use std::collections::VecDeque;

use common::{BitBuffer2, Buffer2};

use super::config::Connectivity;
use super::neighbors;

/// Assigns cell-mask pixels to the geodesically nearest nucleus.
///
/// Returns an owner map where `k + 1` marks pixels of `nuclei[k]` and 0 marks
/// unassigned pixels. Nucleus pixels always belong to their own nucleus.
/// Growth is breadth-first from all nuclei at once; a pixel reached at the
/// same distance from two nuclei goes to the one whose front arrived first.
pub(super) fn grow_cell_bodies(
    nuclei: &[Vec<usize>],
    cell_mask: &BitBuffer2,
    connectivity: Connectivity,
    max_radius: Option<u32>,
) -> Buffer2<u32> {
    let width = cell_mask.width();
    let height = cell_mask.height();
    let mut owner = Buffer2::new_default(width, height);
    let mut distance: Buffer2<u32> = Buffer2::new_default(width, height);
    let mut queue = VecDeque::new();

    for (k, pixels) in nuclei.iter().enumerate() {
        for &idx in pixels {
            owner[idx] = k as u32 + 1;
            queue.push_back(idx);
        }
    }

    while let Some(idx) = queue.pop_front() {
        let next_distance = distance[idx] + 1;
        if max_radius.is_some_and(|r| next_distance > r) {
            continue;
        }
        for n in neighbors(idx, width, height, connectivity) {
            if owner[n] != 0 || !cell_mask.get(n) {
                continue;
            }
            owner[n] = owner[idx];
            distance[n] = next_distance;
            queue.push_back(n);
        }
    }

    owner
}
