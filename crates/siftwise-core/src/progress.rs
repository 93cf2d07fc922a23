/// Trait for reporting pipeline progress.
///
/// The CLI implements it with indicatif. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self) {}
    fn on_scan_complete(&self, _files: usize, _failures: usize, _duration_secs: f64) {}
    fn on_classify_start(&self, _total_files: usize) {}
    fn on_classify_complete(&self, _classified: usize, _duration_secs: f64) {}
    fn on_plan_complete(&self, _entries: usize, _residuals: usize) {}
    fn on_refine_pass(&self, _pass_id: u32, _residual_before: usize, _residual_after: usize) {}
    fn on_execute_start(&self, _total_ops: usize) {}
    fn on_execute_progress(&self, _done: usize, _total_ops: usize) {}
    fn on_execute_complete(&self, _applied: usize, _failed: usize, _duration_secs: f64) {}
    fn on_undo_start(&self, _total_ops: usize) {}
    fn on_undo_progress(&self, _done: usize, _total_ops: usize) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
