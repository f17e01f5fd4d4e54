//! Camera clock offset estimation.
//!
//! The vendor clock has 1/100 s resolution while SimpleBlock timecodes are
//! much finer, so instead of using the vendor samples directly the demuxer
//! averages `vendor_systime - pts` over many frames and adds that average to
//! every pts read afterwards.

/// Running statistics of vendor clock samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockEstimator {
    sum: i64,
    count: i64,
    average: Option<i64>,
}

impl ClockEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate one vendor sample taken at presentation time `pts`.
    pub fn record(&mut self, vendor_systime: u64, pts: u64) {
        let delta = i128::from(vendor_systime) - i128::from(pts);
        self.sum = self.sum.saturating_add(delta.clamp(i64::MIN.into(), i64::MAX.into()) as i64);
        self.count += 1;
    }

    /// Number of samples accumulated so far.
    pub fn samples(&self) -> i64 {
        self.count
    }

    /// The active offset, once [`ClockEstimator::resolve`] found samples.
    pub fn average(&self) -> Option<i64> {
        self.average
    }

    /// Fix the active offset to the mean of the accumulated samples.
    ///
    /// With no samples the offset stays unset and 0 is returned.
    pub fn resolve(&mut self) -> i64 {
        if self.count == 0 {
            return 0;
        }
        let average = self.sum / self.count;
        self.average = Some(average);
        average
    }

    /// Install an offset computed elsewhere (e.g. loaded from an index).
    pub fn set_average(&mut self, average: Option<i64>) {
        self.average = average;
    }

    /// Estimated system time for `pts`, or 0 while no offset is active.
    pub fn systime_for(&self, pts: u64) -> u64 {
        match self.average {
            Some(offset) => (i128::from(pts) + i128::from(offset)).clamp(0, u64::MAX.into()) as u64,
            None => 0,
        }
    }
}
