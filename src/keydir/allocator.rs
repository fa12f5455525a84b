//! Unified page allocator and the borrow/reclaim protocol (§4.3).
//!
//! `KeydirInner::allocate_page` itself lives in `mod.rs` (it needs both
//! `memory` and `swap`, which this module only ever receives by reference);
//! this module holds `reclaim_borrower`, the one piece intricate enough to
//! deserve its own file and its own tests.

use crate::keydir::page::{PageGuard, MAX_PAGE_IDX};
use crate::keydir::KeydirInner;
use crate::common::KeydirResult;

/// Outcome of attempting to evict a borrower from a base page. `Restart`
/// means a racing thread got there first; the caller's top-level operation
/// loop should start over with a fresh epoch, per §5 "Suspension &
/// cancellation".
pub(crate) enum ReclaimOutcome {
    Done(PageGuard),
    Restart,
}

/// Evict whatever chain is currently borrowing `base_idx` so its owner can
/// use it as a chain head. `base_guard` must already be locked and show
/// `size == 0 && is_borrowed`. Consumes and returns the guard (rather than
/// taking `&mut`) because the trylock-fallback path must be free to drop and
/// re-acquire it.
pub(crate) fn reclaim_borrower(
    dir: &KeydirInner,
    base_idx: u32,
    mut base_guard: PageGuard,
) -> KeydirResult<ReclaimOutcome> {
    let prev_idx = base_guard.prev;
    if prev_idx == MAX_PAGE_IDX {
        // A racing thread already reclaimed this slot out from under us.
        return Ok(ReclaimOutcome::Restart);
    }

    // Chain order is prev -> base, but we already hold base. Try the
    // non-blocking path first; only drop base if we'd otherwise block.
    let mut prev_guard = match dir.try_lock_page(prev_idx) {
        Some(g) => g,
        None => {
            drop(base_guard);
            let g = dir.lock_page(prev_idx);
            base_guard = dir.memory.frame(base_idx).lock();
            g
        }
    };

    if prev_guard.next != base_idx || base_guard.prev != prev_idx {
        // Chain shape moved while we were re-acquiring in order.
        return Ok(ReclaimOutcome::Restart);
    }

    let (replacement_idx, mut replacement_guard) = dir.allocate_page()?;

    let mut successor_guard = if base_guard.next != MAX_PAGE_IDX {
        Some(dir.lock_page(base_guard.next))
    } else {
        None
    };
    if let Some(succ) = successor_guard.as_mut() {
        succ.prev = replacement_idx;
    }

    replacement_guard
        .data
        .as_mut_slice()
        .copy_from_slice(base_guard.data.as_slice());
    replacement_guard.prev = base_guard.prev;
    replacement_guard.next = base_guard.next;
    replacement_guard.dead_bytes = base_guard.dead_bytes;

    prev_guard.next = replacement_idx;

    drop(replacement_guard);
    drop(successor_guard);
    drop(prev_guard);

    base_guard.prev = MAX_PAGE_IDX;
    base_guard.next = MAX_PAGE_IDX;
    base_guard.size = 0;
    base_guard.dead_bytes = 0;
    base_guard.is_borrowed = false;

    Ok(ReclaimOutcome::Done(base_guard))
}
