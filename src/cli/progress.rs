//! Progress bar utilities for CLI output
//!
//! Byte-level bars for single transfers, a counting bar for directory
//! uploads, console message helpers and the dual console/file log writer.

use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::{Duration, Instant};

// ============================================================================
// Styles - Consistent visual appearance
// ============================================================================

/// Get the progress bar style for byte transfers
fn transfer_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(
            "  {spinner:.green} [{bar:40.cyan/dim}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━╾─")
}

/// Get the progress bar style for counted batches
fn batch_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {spinner:.green} [{bar:40.cyan/dim}] {pos}/{len} ({percent}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━╾─")
}

/// Get the style for completed progress bars
fn completed_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  ✓ [{bar:40.green/dim}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━━")
}

// ============================================================================
// Console output helpers
// ============================================================================

/// Print a header section with a box
pub fn print_header(title: &str) {
    let width = 68;
    let title_padded = format!("{:^width$}", title, width = width - 4);
    println!();
    println!("╔{}╗", "═".repeat(width - 2));
    println!("║{}║", title_padded);
    println!("╚{}╝", "═".repeat(width - 2));
    println!();
}

/// Print a success message with checkmark
pub fn print_success(msg: &str) {
    println!("  ✓ {}", msg);
}

/// Print an info message with bullet
pub fn print_info(msg: &str) {
    println!("  • {}", msg);
}

/// Print a warning message
pub fn print_warning(msg: &str) {
    println!("  ⚠ {}", msg);
}

/// Print an error message
pub fn print_error(msg: &str) {
    println!("  ✗ {}", msg);
}

// ============================================================================
// Single transfer
// ============================================================================

/// Byte progress of one upload or download
pub struct TransferProgress {
    progress_bar: ProgressBar,
    start_time: Instant,
}

impl TransferProgress {
    /// A visible bar, or a hidden one when progress output is off
    pub fn new(label: &str, total_bytes: u64, visible: bool) -> Self {
        let progress_bar = if visible {
            ProgressBar::new(total_bytes)
        } else {
            ProgressBar::hidden()
        };
        progress_bar.set_style(transfer_style());
        progress_bar.enable_steady_tick(Duration::from_millis(100));
        progress_bar.set_message(label.to_string());

        Self {
            progress_bar,
            start_time: Instant::now(),
        }
    }

    /// Engine callback: `(bytes done, bytes total)`
    pub fn update(&self, sent: u64, total: u64) {
        if total > 0 && self.progress_bar.length() != Some(total) {
            self.progress_bar.set_length(total);
        }
        self.progress_bar.set_position(sent);
    }

    /// Finish the progress display
    pub fn finish(&self) {
        let bytes = self.progress_bar.length().unwrap_or(0);
        self.progress_bar.set_style(completed_style());
        self.progress_bar.finish_with_message(format!(
            "{} in {}",
            format_bytes(bytes),
            format_duration(self.start_time.elapsed())
        ));
    }

    /// Finish with an error
    pub fn finish_with_error(&self, msg: &str) {
        self.progress_bar.abandon_with_message(format!("✗ {}", msg));
    }
}

// ============================================================================
// Directory upload
// ============================================================================

/// File count progress of a directory upload
pub struct BatchProgress {
    progress_bar: ProgressBar,
    start_time: Instant,
    bytes: u64,
}

impl BatchProgress {
    pub fn new(total_files: u64, visible: bool) -> Self {
        let progress_bar = if visible {
            ProgressBar::new(total_files)
        } else {
            ProgressBar::hidden()
        };
        progress_bar.set_style(batch_style());
        progress_bar.enable_steady_tick(Duration::from_millis(100));
        progress_bar.set_message("Starting...");

        Self {
            progress_bar,
            start_time: Instant::now(),
            bytes: 0,
        }
    }

    /// Update progress for a completed file
    pub fn file_completed(&mut self, name: &str, bytes: u64) {
        self.bytes += bytes;
        self.progress_bar.inc(1);
        self.progress_bar.set_message(name.to_string());
    }

    /// Log a warning message while suspending the progress display
    pub fn log_warning(&self, msg: &str) {
        self.progress_bar.suspend(|| {
            println!("  ⚠ {}", msg);
        });
    }

    /// Finish the progress display
    pub fn finish(&self) {
        self.progress_bar.set_style(completed_style());
        self.progress_bar.finish_with_message(format!(
            "{} file(s), {} in {}",
            self.progress_bar.position(),
            format_bytes(self.bytes),
            format_duration(self.start_time.elapsed())
        ));
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

// ============================================================================
// Utility functions
// ============================================================================

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format duration as human-readable string
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        format!("{}h {}m", hours, mins)
    } else if secs >= 60 {
        let mins = secs / 60;
        let secs = secs % 60;
        format!("{}m {}s", mins, secs)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

// ============================================================================
// Dual writer for file + console logging
// ============================================================================

/// A writer that writes to both console and file
///
/// Used for logging to both stderr and a log file simultaneously.
pub struct DualWriter {
    pub console: std::io::Stderr,
    pub file: std::fs::File,
}

impl Write for DualWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let _ = self.console.write(buf);
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let _ = self.console.flush();
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 bytes");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30.0s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m");
    }

    #[test]
    fn test_transfer_progress_adopts_engine_total() {
        let progress = TransferProgress::new("song.mp3", 0, false);
        progress.update(512, 2048);
        assert_eq!(progress.progress_bar.length(), Some(2048));
        assert_eq!(progress.progress_bar.position(), 512);
    }

    #[test]
    fn test_batch_progress_counts_bytes() {
        let mut batch = BatchProgress::new(2, false);
        batch.file_completed("a.jpg", 100);
        batch.file_completed("b.jpg", 50);
        assert_eq!(batch.bytes(), 150);
        assert_eq!(batch.progress_bar.position(), 2);
    }
}
