//! Per-file progress accounting with the classic every-10-chunks line.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Counts completed chunks of one file and emits progress lines.
pub struct FileProgress {
    label: String,
    total: u32,
    completed: AtomicU32,
    started: Instant,
}

impl FileProgress {
    pub fn new(label: impl Into<String>, total: u32) -> Self {
        Self {
            label: label.into(),
            total,
            completed: AtomicU32::new(0),
            started: Instant::now(),
        }
    }

    /// Records one finished chunk. A progress line goes out every 10
    /// chunks and at completion; completion also logs the elapsed time.
    pub fn chunk_done(&self) -> u32 {
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if done == self.total {
            tracing::info!(
                file = %self.label,
                chunks = self.total,
                elapsed = ?self.started.elapsed(),
                "file sent"
            );
        } else if done % 10 == 0 {
            tracing::info!(file = %self.label, done, total = self.total, "progress");
        }
        done
    }

    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn is_complete(&self) -> bool {
        self.completed() == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counts_to_completion() {
        let progress = FileProgress::new("x.bin", 3);
        assert!(!progress.is_complete());
        assert_eq!(progress.chunk_done(), 1);
        assert_eq!(progress.chunk_done(), 2);
        assert_eq!(progress.chunk_done(), 3);
        assert!(progress.is_complete());
    }

    #[test]
    fn concurrent_increments_do_not_lose_counts() {
        let progress = Arc::new(FileProgress::new("y.bin", 800));
        let mut handles = vec![];
        for _ in 0..8 {
            let p = progress.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    p.chunk_done();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(progress.completed(), 800);
        assert!(progress.is_complete());
    }
}
