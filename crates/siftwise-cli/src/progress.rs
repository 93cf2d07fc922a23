use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use siftwise_core::ProgressReporter;
use std::sync::Mutex;
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif.
///
/// - Scan and classification: spinners
/// - Execute and undo: bars (totals are known up front)
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn spinner(&self, message: &str) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars(TICKS),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn bar(&self, label: &str, total: usize) {
        let pb = ProgressBar::new(total as u64);
        let template = format!(
            "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} ({{eta}} remaining)",
            label
        );
        pb.set_style(
            ProgressStyle::with_template(&template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("━╸─")
                .tick_chars(TICKS),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.replace(pb) {
                old.finish_and_clear();
            }
        }
    }

    fn set_position(&self, done: usize) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.set_position(done as u64);
            }
        }
    }

    pub fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }
}

fn report_done(message: String) {
    eprintln!("  {} {}", "✓".green(), message);
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self) {
        self.spinner("Scanning files...");
    }

    fn on_scan_complete(&self, files: usize, failures: usize, duration_secs: f64) {
        self.finish_bar();
        report_done(format!(
            "Scan complete: {} files, {} unreadable in {:.2}s",
            files, failures, duration_secs
        ));
    }

    fn on_classify_start(&self, total_files: usize) {
        self.spinner(&format!("Classifying {} files...", total_files));
    }

    fn on_classify_complete(&self, classified: usize, duration_secs: f64) {
        self.finish_bar();
        report_done(format!("Classified {} files in {:.2}s", classified, duration_secs));
    }

    fn on_plan_complete(&self, entries: usize, residuals: usize) {
        report_done(format!("Planned {} entries, {} residual", entries, residuals));
    }

    fn on_refine_pass(&self, pass_id: u32, residual_before: usize, residual_after: usize) {
        report_done(format!(
            "Pass {}: {} -> {} residuals",
            pass_id, residual_before, residual_after
        ));
    }

    fn on_execute_start(&self, total_ops: usize) {
        self.bar("Applying", total_ops);
    }

    fn on_execute_progress(&self, done: usize, _total_ops: usize) {
        self.set_position(done);
    }

    fn on_execute_complete(&self, applied: usize, failed: usize, duration_secs: f64) {
        self.finish_bar();
        report_done(format!(
            "Execution complete: {} applied, {} failed in {:.2}s",
            applied, failed, duration_secs
        ));
    }

    fn on_undo_start(&self, total_ops: usize) {
        self.bar("Undoing", total_ops);
    }

    fn on_undo_progress(&self, done: usize, total_ops: usize) {
        self.set_position(done);
        if done == total_ops {
            self.finish_bar();
        }
    }
}
