use crate::stats::StreamStats;

/// A record-number discontinuity.  Reported only; decoding is unaffected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// Numbering went backwards, usually a device reboot.
    Backward { last: u32, new: u32, offset: u64 },
    /// `missing` records between `last` and `new` never showed up.
    Gap { last: u32, new: u32, missing: u32, offset: u64 },
}

impl std::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Anomaly::Backward { last, new, offset } => write!(
                f, "*** recnum went backwards.  last: {last}, new: {new}, @{offset}"
            ),
            Anomaly::Gap { missing, offset, .. } => write!(
                f, "*** record gap: ({missing}) records, @{offset}"
            ),
        }
    }
}

/// Watches the record numbers of emitted records.
#[derive(Debug, Clone, Default)]
pub struct ContinuityTracker {
    last: u32,
}

impl ContinuityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last record number observed, 0 before the first record.
    pub fn last(&self) -> u32 {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = 0;
    }

    /// Observe one emitted record.  `last` always moves to `record_number`.
    pub fn observe(&mut self, record_number: u32, offset: u64, stats: &mut StreamStats) -> Option<Anomaly> {
        let last = self.last;
        self.last = record_number;
        stats.last_record_number = record_number;

        if record_number < last {
            stats.backward_jumps += 1;
            return Some(Anomaly::Backward { last, new: record_number, offset });
        }
        if last != 0 && record_number - last > 1 {
            let missing = record_number - last - 1;
            stats.gaps += 1;
            stats.missing_records += missing as u64;
            return Some(Anomaly::Gap { last, new: record_number, missing, offset });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_numbers_are_quiet() {
        let mut t = ContinuityTracker::new();
        let mut stats = StreamStats::new();
        for n in 1..=5 {
            assert_eq!(t.observe(n, 0, &mut stats), None);
        }
        assert_eq!(t.last(), 5);
        assert_eq!(stats.last_record_number, 5);
    }

    #[test]
    fn first_record_is_never_a_gap() {
        let mut t = ContinuityTracker::new();
        let mut stats = StreamStats::new();
        assert_eq!(t.observe(1000, 0, &mut stats), None);
    }

    #[test]
    fn gap_counts_missing_records() {
        let mut t = ContinuityTracker::new();
        let mut stats = StreamStats::new();
        t.observe(10, 0, &mut stats);
        let a = t.observe(14, 512, &mut stats);
        assert_eq!(a, Some(Anomaly::Gap { last: 10, new: 14, missing: 3, offset: 512 }));
        assert_eq!(stats.missing_records, 3);
        assert_eq!(a.unwrap().to_string(), "*** record gap: (3) records, @512");
    }

    #[test]
    fn backward_jump_updates_last() {
        let mut t = ContinuityTracker::new();
        let mut stats = StreamStats::new();
        t.observe(50, 0, &mut stats);
        let a = t.observe(10, 64, &mut stats);
        assert_eq!(a, Some(Anomaly::Backward { last: 50, new: 10, offset: 64 }));
        assert_eq!(t.last(), 10);
        assert_eq!(t.observe(11, 96, &mut stats), None);
        assert_eq!(stats.backward_jumps, 1);
    }
}
