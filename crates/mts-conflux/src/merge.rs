//! The top-C merge.
//!
//! K per-link person lists, each already sorted by progress toward the
//! intersection, are merged so that the first `capacity` elements are in
//! true global order.  Beyond the intersection's per-tick discharge capacity
//! the relative order cannot matter, so the tails are appended unsorted —
//! concatenated in list order (ascending link id, as the conflux builds
//! them).

use std::collections::VecDeque;

/// Merge `lists` so the first `capacity` items are globally ordered by
/// `key` (ascending); remaining items follow in list order.
///
/// Each input list must itself be sorted ascending by `key`.
pub fn top_c_merge<T, K: Ord>(
    mut lists: Vec<VecDeque<T>>,
    capacity: usize,
    key: impl Fn(&T) -> K,
) -> VecDeque<T> {
    let total: usize = lists.iter().map(VecDeque::len).sum();
    let mut merged = VecDeque::with_capacity(total);

    // Repeatedly extract the minimum head across the K fronts.  K is the
    // in-degree of one intersection — small enough that a linear scan beats
    // a heap.
    while merged.len() < capacity {
        let mut best: Option<usize> = None;
        for (i, list) in lists.iter().enumerate() {
            let Some(head) = list.front() else { continue };
            match best {
                Some(b) if key(lists[b].front().expect("best list non-empty")) <= key(head) => {}
                _ => best = Some(i),
            }
        }
        match best {
            Some(i) => merged.push_back(lists[i].pop_front().expect("chosen head exists")),
            None => break, // all lists drained
        }
    }

    // Tails in list order, unsorted.
    for list in &mut lists {
        while let Some(item) = list.pop_front() {
            merged.push_back(item);
        }
    }
    merged
}
