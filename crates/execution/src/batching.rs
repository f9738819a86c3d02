//! Splits a lot count into broker-sized batches.

/// Batches of at most `max_per_batch` lots, largest first. Zero lots gives no batches.
#[must_use]
pub fn plan_batches(total_lots: u32, max_per_batch: u32) -> Vec<u32> {
    if total_lots == 0 {
        return Vec::new();
    }
    let cap = max_per_batch.max(1);
    let full = total_lots / cap;
    let rest = total_lots % cap;
    let mut batches = vec![cap; full as usize];
    if rest > 0 {
        batches.push(rest);
    }
    batches
}
