//! Pure helpers for the scanner's adaptive chunking and retry ladder.
//! No I/O — the scanner binary drives these.

#[derive(Debug, Clone, Copy)]
pub struct ChunkPolicy {
    pub min_chunk_size: u64,
    pub max_chunk_size: u64,
    pub chunk_size_increase: f64,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            min_chunk_size: 10,
            max_chunk_size: 10_000,
            chunk_size_increase: 2.0,
        }
    }
}

impl ChunkPolicy {
    /// `estimate_next_chunk_size`: resets to `min_chunk_size` on any hit,
    /// otherwise grows by `chunk_size_increase`, clamped to
    /// `[min_chunk_size, max_chunk_size]`.
    pub fn next_chunk_size(&self, current: u64, events_found: u64) -> u64 {
        let next = if events_found > 0 {
            self.min_chunk_size as f64
        } else {
            current as f64 * self.chunk_size_increase
        };
        let clamped = next.clamp(self.min_chunk_size as f64, self.max_chunk_size as f64);
        clamped as u64
    }
}

/// One step of the per-chunk retry ladder: halves the range
/// end on failure. Returns `None` once the halved range collapses below
/// `start` (caller should treat this the same as exhausting retries).
pub fn halve_range_end(start: u64, end: u64) -> Option<u64> {
    if end <= start {
        return None;
    }
    let new_end = start + (end - start) / 2;
    Some(new_end)
}

#[derive(Debug, Clone, Copy)]
pub struct RetryLadder {
    pub max_request_retries: u32,
    pub request_retry_seconds: u64,
}

impl Default for RetryLadder {
    fn default() -> Self {
        Self {
            max_request_retries: 30,
            request_retry_seconds: 1,
        }
    }
}
