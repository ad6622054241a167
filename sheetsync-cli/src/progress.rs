use sheetsync::ProgressSink;
use std::io::Write;

/// Prints step labels and counts to stderr.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn on_label(&self, text: &str) {
        eprintln!("{text}");
    }

    fn on_progress(&self, done: usize, total: usize) {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{done}/{total}");
        if done >= total {
            let _ = writeln!(stderr);
        }
        let _ = stderr.flush();
    }
}
