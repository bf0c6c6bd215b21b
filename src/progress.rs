/// Upper bound of the published progress scale.
pub const PROGRESS_MAX: u32 = 1000;

/// How many records a scan processes between progress updates.
const TICK_INTERVAL: u64 = 100_000;

/// Capability handed to the engine at open time. Every long, size-proportional
/// scan publishes a 0..=1000 value through it; the host decides what to do
/// with the updates (render, log, record, or ignore).
pub trait ProgressSink: Send + Sync {
    fn set(&self, value: u32);

    /// Called when a long operation completes: the value is driven to
    /// [`PROGRESS_MAX`] so the next operation starts from a clean slate.
    fn finish(&self) {
        self.set(PROGRESS_MAX);
    }
}

/// Default sink: discards all updates.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn set(&self, _value: u32) {}
}

/// Debug-logs every update.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn set(&self, value: u32) {
        debug!("progress {}/{}", value, PROGRESS_MAX);
    }
}

/// Wraps a sink with the per-scan update discipline: one `set` per
/// `TICK_INTERVAL` records, scaled by byte position within the scanned
/// range.
pub(crate) struct ProgressTicker<'a> {
    sink: &'a dyn ProgressSink,
    start: u64,
    end: u64,
    records: u64,
}

impl<'a> ProgressTicker<'a> {
    pub(crate) fn new(sink: &'a dyn ProgressSink, start: u64, end: u64) -> Self {
        ProgressTicker {
            sink,
            start,
            end,
            records: 0,
        }
    }

    pub(crate) fn step(&mut self, position: u64) {
        self.records += 1;
        if self.records % TICK_INTERVAL == 0 {
            let span = self.end.saturating_sub(self.start);
            if span > 0 {
                let done = position.saturating_sub(self.start).min(span);
                self.sink
                    .set((done * u64::from(PROGRESS_MAX) / span) as u32);
            }
        }
    }

    pub(crate) fn records(&self) -> u64 {
        self.records
    }

    pub(crate) fn finish(self) {
        self.sink.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    pub(crate) struct RecordingProgress {
        pub values: Mutex<Vec<u32>>,
    }

    impl RecordingProgress {
        pub(crate) fn new() -> Self {
            RecordingProgress {
                values: Mutex::new(vec![]),
            }
        }
    }

    impl ProgressSink for RecordingProgress {
        fn set(&self, value: u32) {
            self.values.lock().push(value);
        }
    }

    #[test]
    fn ticker_publishes_every_interval() {
        let sink = RecordingProgress::new();
        let mut ticker = ProgressTicker::new(&sink, 0, 1000);
        for i in 0..TICK_INTERVAL * 2 {
            ticker.step(i % 1000);
        }
        ticker.finish();
        let values = sink.values.lock();
        // two interval ticks plus the final PROGRESS_MAX
        assert_eq!(values.len(), 3);
        assert_eq!(*values.last().unwrap(), PROGRESS_MAX);
    }

    #[test]
    fn ticker_scales_position_into_range() {
        let sink = RecordingProgress::new();
        let mut ticker = ProgressTicker::new(&sink, 1000, 2000);
        for _ in 0..TICK_INTERVAL - 1 {
            ticker.step(1000);
        }
        ticker.step(1500);
        let values = sink.values.lock();
        assert_eq!(values.as_slice(), &[500]);
    }

    #[test]
    fn finish_drives_to_max() {
        let sink = RecordingProgress::new();
        let ticker = ProgressTicker::new(&sink, 0, 10);
        ticker.finish();
        assert_eq!(sink.values.lock().as_slice(), &[PROGRESS_MAX]);
    }
}
