use indexmap::IndexMap;

/// In-memory counting map for one batch, bounded by the lossy-counting
/// policy: mid-batch cutoffs drop entries below a weight threshold, and the
/// flush-time minimum filter is scaled by how full the batch actually was.
///
/// The resulting totals for rare keys are approximations by design; the
/// thresholds downstream are tuned against exactly this behavior, so the
/// loss must not be "fixed" away.
#[derive(Debug, Default)]
pub struct Accumulator {
    counts: IndexMap<String, u64>,
    /// Weight units (words, sentences...) processed since the last flush.
    processed: u64,
    /// Weight units processed since the last cutoff or flush.
    since_cutoff: u64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment(&mut self, key: &str, weight: u64) {
        if let Some(count) = self.counts.get_mut(key) {
            *count += weight;
        } else {
            self.counts.insert(key.to_string(), weight);
        }
    }

    /// Records progress against the batch budget. The unit is whatever the
    /// stage budgets by; it is unrelated to entry weights.
    #[inline]
    pub fn add_processed(&mut self, units: u64) {
        self.processed += units;
        self.since_cutoff += units;
    }

    #[inline]
    pub fn processed(&self) -> u64 {
        self.processed
    }

    #[inline]
    pub fn since_cutoff(&self) -> u64 {
        self.since_cutoff
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<u64> {
        self.counts.get(key).copied()
    }

    /// Fraction of the batch budget consumed, capped at 1.0. Used to scale
    /// the flush-time minimum so a half-filled final batch does not admit
    /// spuriously "frequent" rare keys.
    pub fn fill_ratio(&self, budget: u64) -> f64 {
        (self.processed as f64 / budget as f64).min(1.0)
    }

    /// Mid-batch pruning pass: removes every entry whose weighted count is
    /// below `min_weight`. The weighting closure lets the co-occurrence
    /// stage apply its stop-word/numeric multipliers before the comparison.
    /// Resets the cutoff clock.
    pub fn cutoff<F>(&mut self, min_weight: u64, weighted: F) -> usize
    where
        F: Fn(&str, u64) -> f64,
    {
        let before = self.counts.len();
        self.counts
            .retain(|key, &mut count| weighted(key, count) >= min_weight as f64);
        self.since_cutoff = 0;
        before - self.counts.len()
    }

    pub fn reset_cutoff_clock(&mut self) {
        self.since_cutoff = 0;
    }

    /// Consumes the batch, yielding entries in ascending key order, ready
    /// for the run writer. The accumulator is gone afterwards; a new batch
    /// starts from a fresh one.
    pub fn into_sorted(mut self) -> Vec<(String, u64)> {
        self.counts.sort_unstable_keys();
        self.counts.into_iter().collect()
    }
}

/// The flush-time minimum count: `ceil(min_count * fill_ratio)`, with a hard
/// floor of 2 whenever the configured minimum is at least 2.
pub fn flush_min_count(min_count: u64, fill_ratio: f64) -> u64 {
    let scaled = (min_count as f64 * fill_ratio).ceil() as u64;
    if min_count >= 2 {
        scaled.max(2)
    } else {
        scaled
    }
}
