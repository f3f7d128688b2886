use super::errors::MetricsErrorKind;

/// Trait for recording metrics from the [`Conductor`](super::Conductor).
///
/// Implement this trait to integrate with your metrics system (e.g., Prometheus, `StatsD`).
/// Every method receives the member name; keep it as a label only if the number of
/// anchors is small.
///
/// # Example
///
/// ```no_run
/// use disttrust::conductor::{MetricsErrorKind, MetricsRecorder};
///
/// struct MyMetrics;
///
/// impl MetricsRecorder for MyMetrics {
///     fn record_issue(&self, _member: &str) {}
///     fn record_renewal(&self, _member: &str) {}
///     fn record_retry(&self, _member: &str) {}
///     fn record_error(&self, member: &str, kind: MetricsErrorKind) {
///         println!("{member}: {}", kind.as_str());
///     }
/// }
/// ```
pub trait MetricsRecorder: Send + Sync {
    /// Records that a fresh lease was issued and applied.
    fn record_issue(&self, member: &str);

    /// Records that a lease was renewed by id and applied.
    fn record_renewal(&self, member: &str);

    /// Records that a member is about to back off and retry after a failure.
    ///
    /// Recorded exactly once per backoff sleep.
    fn record_retry(&self, member: &str);

    /// Records an error with a structured error kind.
    fn record_error(&self, member: &str, kind: MetricsErrorKind);
}
