/// Outcome of checking a sample timestamp against the last accepted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// New data; `time_diff` is the distance to the previously accepted sample
    /// (0 for the first one). Meter clock regressions come through negative.
    Accept { sample_time: i64, time_diff: i64 },
    /// Same timestamp as the last accepted sample
    Duplicate,
    /// The frame carried no timestamp at all
    Undated,
}

/// Suppresses republication of samples the bus has already seen.
///
/// The watermark only moves through [`DedupGate::commit`], which the poll loop
/// calls once a sample has been published. A failed publish therefore leaves the
/// gate untouched and the same sample is offered again on the next cycle.
#[derive(Debug, Default)]
pub struct DedupGate {
    last_accepted_time: Option<i64>,
}

impl DedupGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_accepted_time(&self) -> Option<i64> {
        self.last_accepted_time
    }

    pub fn check(&self, sample_time: Option<i64>) -> GateDecision {
        let Some(sample_time) = sample_time else {
            return GateDecision::Undated;
        };

        match self.last_accepted_time {
            Some(last) if last == sample_time => GateDecision::Duplicate,
            Some(last) => GateDecision::Accept {
                sample_time,
                time_diff: sample_time.wrapping_sub(last),
            },
            None => GateDecision::Accept {
                sample_time,
                time_diff: 0,
            },
        }
    }

    pub fn commit(&mut self, sample_time: i64) {
        self.last_accepted_time = Some(sample_time);
    }
}
