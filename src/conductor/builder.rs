use super::metrics::MetricsRecorder;
use super::policy::RenewalPolicy;
use super::runtime::Conductor;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Retry/backoff configuration for failed members.
///
/// A member in the `Failed` state waits before its next attempt, with exponential
/// backoff between `min_backoff` and `max_backoff`. The backoff includes small jitter
/// so that members sharing a degraded provider do not retry in lockstep.
///
/// If `min_backoff > max_backoff`, they will be swapped to ensure valid configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Initial delay before retrying.
    pub min_backoff: Duration,
    /// Maximum delay between retries.
    pub max_backoff: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl BackoffConfig {
    pub(crate) fn normalize(mut self) -> Self {
        if self.min_backoff > self.max_backoff {
            std::mem::swap(&mut self.min_backoff, &mut self.max_backoff);
        }
        self
    }
}

/// Upper bounds on collaborator calls made by a member.
///
/// Every call is also abandoned as soon as the conductor shuts down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallTimeouts {
    /// Bound on one `issue` or `renew` call.
    pub provider: Duration,
    /// Bound on one `LeaseHandle::apply` call (write and action together).
    pub apply: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            provider: Duration::from_secs(30),
            apply: Duration::from_secs(120),
        }
    }
}

/// Runtime settings shared by every member loop of one conductor.
#[derive(Clone)]
pub(crate) struct Settings {
    pub(crate) policy: RenewalPolicy,
    pub(crate) backoff: BackoffConfig,
    pub(crate) timeouts: CallTimeouts,
    pub(crate) metrics: Option<Arc<dyn MetricsRecorder>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            policy: RenewalPolicy::default(),
            backoff: BackoffConfig::default(),
            timeouts: CallTimeouts::default(),
            metrics: None,
        }
    }
}

impl Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("policy", &self.policy)
            .field("backoff", &self.backoff)
            .field("timeouts", &self.timeouts)
            .field(
                "metrics",
                &self.metrics.as_ref().map(|_| "<MetricsRecorder>"),
            )
            .finish()
    }
}

/// Builder for [`Conductor`].
///
/// # Example
///
/// ```no_run
/// use disttrust::conductor::{Conductor, RenewalPolicy};
/// use std::time::Duration;
///
/// let conductor = Conductor::builder()
///     .renewal_policy(RenewalPolicy {
///         fraction: 0.5,
///         ..RenewalPolicy::default()
///     })
///     .backoff(Duration::from_secs(2), Duration::from_secs(120))
///     .shutdown_timeout(Some(Duration::from_secs(10)))
///     .build();
/// ```
pub struct ConductorBuilder {
    settings: Settings,
    shutdown_timeout: Option<Duration>,
}

impl Debug for ConductorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConductorBuilder")
            .field("settings", &self.settings)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl Default for ConductorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConductorBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            shutdown_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Sets when leases become due for renewal.
    #[must_use]
    pub const fn renewal_policy(mut self, policy: RenewalPolicy) -> Self {
        self.settings.policy = policy;
        self
    }

    /// Sets the retry backoff range for failed members.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use disttrust::conductor::ConductorBuilder;
    /// use std::time::Duration;
    ///
    /// let builder = ConductorBuilder::new()
    ///     .backoff(Duration::from_millis(500), Duration::from_secs(60));
    /// ```
    #[must_use]
    pub const fn backoff(mut self, min_backoff: Duration, max_backoff: Duration) -> Self {
        // Normalized in `build`.
        self.settings.backoff = BackoffConfig {
            min_backoff,
            max_backoff,
        };
        self
    }

    /// Sets the collaborator call timeouts.
    #[must_use]
    pub const fn call_timeouts(mut self, timeouts: CallTimeouts) -> Self {
        self.settings.timeouts = timeouts;
        self
    }

    /// Sets an optional metrics recorder.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.settings.metrics = Some(metrics);
        self
    }

    /// Sets the shutdown timeout.
    ///
    /// When set, [`Conductor::shutdown_configured`] waits at most this long for
    /// member loops to finish before aborting them. `None` waits indefinitely.
    ///
    /// Default: 30 seconds.
    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Builds the [`Conductor`]. No member loop runs until [`Conductor::play`].
    pub fn build(self) -> Conductor {
        let mut settings = self.settings;
        settings.policy = settings.policy.normalize();
        settings.backoff = settings.backoff.normalize();
        Conductor::with_settings(settings, self.shutdown_timeout)
    }
}
