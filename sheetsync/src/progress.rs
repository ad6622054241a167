/// Receives step labels and progress counts while a long operation runs.
///
/// Both callbacks are notifications only; nothing depends on them being
/// observed.
pub trait ProgressSink: Send + Sync {
    /// Fired before each named step.
    fn on_label(&self, _text: &str) {}

    /// Fired after each completed unit of work.
    fn on_progress(&self, _done: usize, _total: usize) {}
}

/// A sink that drops every notification.
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Counts steps against a fixed total and forwards them to a sink.
pub(crate) struct StepCounter<'a> {
    sink: &'a dyn ProgressSink,
    done: usize,
    total: usize,
}

impl<'a> StepCounter<'a> {
    pub(crate) fn new(sink: &'a dyn ProgressSink, total: usize) -> Self {
        StepCounter {
            sink,
            done: 0,
            total,
        }
    }

    pub(crate) fn label(&self, text: &str) {
        log::info!("{text}");
        self.sink.on_label(text);
    }

    pub(crate) fn advance(&mut self) {
        self.done += 1;
        self.sink.on_progress(self.done, self.total);
    }

    pub(crate) fn done(&self) -> usize {
        self.done
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records everything it is told, for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub labels: Mutex<Vec<String>>,
        pub progress: Mutex<Vec<(usize, usize)>>,
    }

    impl ProgressSink for RecordingSink {
        fn on_label(&self, text: &str) {
            self.labels.lock().unwrap().push(text.to_string());
        }

        fn on_progress(&self, done: usize, total: usize) {
            self.progress.lock().unwrap().push((done, total));
        }
    }

    #[test]
    fn test_step_counter_reports_each_step() {
        let sink = RecordingSink::default();
        let mut counter = StepCounter::new(&sink, 3);
        counter.label("first");
        counter.advance();
        counter.advance();

        assert_eq!(counter.done(), 2);
        assert_eq!(*sink.labels.lock().unwrap(), vec!["first".to_string()]);
        assert_eq!(*sink.progress.lock().unwrap(), vec![(1, 3), (2, 3)]);
    }
}
