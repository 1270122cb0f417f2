use std::sync::Arc;

/// A single progress update from a long-running operation.
///
/// Downloads report [`Progress::Percent`] as bytes arrive; the source builder
/// and installer report [`Progress::Message`] lines suitable for display
/// below a spinner or progress bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Percent(u8),
    Message(String),
}

/// Optional observer for progress updates. When absent, nothing is emitted.
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Invokes the callback if one is present.
pub fn emit(progress: Option<&ProgressFn>, update: Progress) {
    if let Some(callback) = progress {
        callback(update);
    }
}
