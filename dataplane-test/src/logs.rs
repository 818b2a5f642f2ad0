use parking_lot::Mutex;
use std::{io, sync::Arc};
use tracing_subscriber::fmt::MakeWriter;

/// Captures formatted log records so tests can assert on what was logged.
#[derive(Clone, Debug, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

#[derive(Debug)]
pub struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

// === impl LogCapture ===

impl LogCapture {
    /// Records INFO and above on the current thread until the guard is dropped.
    pub fn set_default(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(
            tracing_subscriber::fmt()
                .with_writer(self.clone())
                .with_ansi(false)
                .without_time()
                .with_max_level(tracing::Level::INFO)
                .finish(),
        )
    }

    pub fn records(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Returns the records that contain every one of `tokens`.
    pub fn matching(&self, tokens: &[&str]) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|record| tokens.iter().all(|t| record.contains(t)))
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter(self.0.clone())
    }
}

// === impl CaptureWriter ===

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
