/// Reports the progress of a long-running harvest.
pub trait Progress: Send + Sync {
    /// Label for the current stage, e.g. "Listing" or "Harvesting".
    fn set_phase(&self, phase: &str);

    /// Switch to a bar driven by a `(total, current, message)` callback.
    fn set_determinate(&self, callback: Box<dyn Fn() -> (u64, u64, String) + Send + Sync + 'static>);

    /// Switch to a spinner whose message comes from `callback`, for work of unknown size.
    fn set_indeterminate(&self, callback: Box<dyn Fn() -> String + Send + Sync + 'static>);

    /// Print a line without tearing the indicator.
    fn println(&self, msg: &str);

    /// Finish and clear the indicator.
    fn done(&self);
}
