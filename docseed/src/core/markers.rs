//! Incremental detection of preview success/failure markers.

use crate::core::types::PreviewVerdict;

/// Accumulates output chunks and settles on the first marker seen.
///
/// Searching the accumulated text (not each chunk alone) catches markers split
/// across chunk boundaries. Once settled, further chunks are still captured but
/// never produce a second verdict.
#[derive(Debug, Clone)]
pub struct MarkerScanner {
    success_marker: String,
    failure_marker: String,
    captured: String,
    settled: bool,
}

impl MarkerScanner {
    pub fn new(success_marker: impl Into<String>, failure_marker: impl Into<String>) -> Self {
        Self {
            success_marker: success_marker.into(),
            failure_marker: failure_marker.into(),
            captured: String::new(),
            settled: false,
        }
    }

    /// Feed one chunk. Returns `Some` exactly once: for the chunk that
    /// completes the earliest marker in the stream.
    pub fn feed(&mut self, chunk: &str) -> Option<PreviewVerdict> {
        self.captured.push_str(chunk);
        if self.settled {
            return None;
        }

        let success = self.captured.find(&self.success_marker);
        let failure = self.captured.find(&self.failure_marker);
        let failed = match (success, failure) {
            (Some(s), Some(f)) => f <= s,
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (None, None) => return None,
        };

        self.settled = true;
        if failed {
            Some(PreviewVerdict::Failed {
                output: self.captured.clone(),
            })
        } else {
            Some(PreviewVerdict::Healthy)
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn captured(&self) -> &str {
        &self.captured
    }
}
