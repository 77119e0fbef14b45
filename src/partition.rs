//! Splitting a line count into contiguous per-worker ranges.

/// Half-open range of zero-based physical line indices `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineRange {
    pub start: u64,
    pub end: u64,
}

impl LineRange {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split `total` lines starting at `offset` into `workers` ranges. Every range
/// gets `total / workers` lines and the first `total % workers` ranges get one
/// extra, so the ranges tile `[offset, offset + total)` in order.
///
/// `workers` must be non-zero; the engine validates this before partitioning.
pub fn partition(offset: u64, total: u64, workers: usize) -> Vec<LineRange> {
    let workers = workers.max(1) as u64;
    let step = total / workers;
    let remaining = total % workers;
    let mut start = offset;
    (0..workers)
        .map(|i| {
            let len = step + u64::from(i < remaining);
            let range = LineRange {
                start,
                end: start + len,
            };
            start += len;
            range
        })
        .collect()
}
