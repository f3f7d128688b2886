use super::builder::{ConductorBuilder, Settings};
use super::errors::{ConductorError, MetricsErrorKind};
use super::supervisor::run_member;
use crate::health::{HealthCheck, HealthReport};
use crate::member::{Member, MemberStatus};
use crate::prelude::{debug, error, info, warn};
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns a set of members and runs one independent loop per member.
///
/// Members are registered with [`Conductor::add_member`], started with
/// [`Conductor::play`], and stopped with one of the shutdown methods (or
/// [`Conductor::watch`], which waits for a termination signal first). Dropping the
/// conductor cancels every loop.
///
/// # Example
///
/// ```no_run
/// use disttrust::conductor::Conductor;
/// # use disttrust::member::Member;
///
/// # async fn example(members: Vec<Member>) -> Result<(), Box<dyn std::error::Error>> {
/// let mut conductor = Conductor::new();
/// for member in members {
///     let status = conductor.add_member(member);
///     println!("registered {}", status.name());
/// }
/// conductor.play().watch().await?;
/// # Ok(())
/// # }
/// ```
pub struct Conductor {
    settings: Arc<Settings>,
    shutdown_timeout: Option<Duration>,
    cancel: CancellationToken,
    closed: AtomicBool,
    pending: Vec<Member>,
    statuses: Vec<MemberStatus>,
    supervisors: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Conductor {
    /// Creates a conductor with default settings.
    pub fn new() -> Self {
        ConductorBuilder::new().build()
    }

    /// Returns a [`ConductorBuilder`] for explicit configuration.
    pub fn builder() -> ConductorBuilder {
        ConductorBuilder::new()
    }

    pub(super) fn with_settings(settings: Settings, shutdown_timeout: Option<Duration>) -> Self {
        Self {
            settings: Arc::new(settings),
            shutdown_timeout,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            pending: Vec::new(),
            statuses: Vec::new(),
            supervisors: Mutex::new(Vec::new()),
        }
    }

    /// Registers `member` and returns its live status.
    ///
    /// The member's loop starts on the next [`Conductor::play`].
    pub fn add_member(&mut self, member: Member) -> MemberStatus {
        let status = member.status();
        debug!("Member registered: member={}", member.name());
        self.statuses.push(status.clone());
        self.pending.push(member);
        status
    }

    /// Spawns one loop per registered member that is not running yet.
    ///
    /// Returns immediately. Has no effect once the conductor is closed.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn play(&mut self) -> &mut Self {
        if self.is_closed() {
            warn!("Conductor is closed; not starting members");
            return self;
        }

        let supervisors = self.supervisors.get_mut();
        for member in self.pending.drain(..) {
            let name = member.name().to_string();
            let handle = tokio::spawn(run_member(
                member,
                Arc::clone(&self.settings),
                self.cancel.clone(),
            ));
            supervisors.push((name, handle));
        }
        info!("Conductor playing: members={}", supervisors.len());
        self
    }

    /// Waits for SIGINT or SIGTERM, then shuts down using the configured timeout.
    ///
    /// Also returns when the conductor is shut down from elsewhere.
    ///
    /// # Errors
    ///
    /// See [`Conductor::watch_until`].
    pub async fn watch(&self) -> Result<(), ConductorError> {
        self.watch_until(shutdown_signal()).await
    }

    /// Waits for `signal`, then shuts down using the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Closed`] if the conductor was already closed, or
    /// [`ConductorError::ShutdownTimeout`] if loops had to be aborted.
    pub async fn watch_until<F>(&self, signal: F) -> Result<(), ConductorError>
    where
        F: Future<Output = ()>,
    {
        if self.is_closed() {
            return Err(ConductorError::Closed);
        }

        tokio::select! {
            () = signal => info!("Shutdown signal received"),
            () = self.cancel.cancelled() => {}
        }
        self.shutdown_configured().await
    }

    /// Returns the status of every registered member, in registration order.
    pub fn statuses(&self) -> &[MemberStatus] {
        &self.statuses
    }

    /// Returns an aggregated health report.
    pub fn health(&self) -> HealthReport {
        HealthReport::from_snapshots(
            self.statuses
                .iter()
                .map(|s| s.snapshot().as_ref().clone())
                .collect(),
        )
    }

    /// Returns one named health check per member, for registration with a
    /// health-reporting surface.
    pub fn health_checks(&self) -> Vec<(String, HealthCheck)> {
        self.statuses
            .iter()
            .map(|s| (s.name(), s.health_check()))
            .collect()
    }

    /// Returns the token that stops every member loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns `true` once shutdown has begun.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Cancels every member loop and waits for them to finish.
    ///
    /// This method is idempotent. It may wait indefinitely for a loop stuck outside
    /// a cancellable call; prefer [`Conductor::shutdown_with_timeout`] or
    /// [`Conductor::shutdown_configured`].
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        let handles = std::mem::take(&mut *self.supervisors.lock().await);
        for (name, handle) in handles {
            if let Err(e) = handle.await {
                self.join_failed(&name, &e);
            }
        }
        info!("Conductor stopped");
    }

    /// Cancels every member loop and waits at most `timeout` for them to finish.
    ///
    /// This method is idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::ShutdownTimeout`] if some loops did not finish in
    /// time and had to be aborted.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<(), ConductorError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();

        let mut handles = std::mem::take(&mut *self.supervisors.lock().await);
        let joined =
            tokio::time::timeout(timeout, join_all(handles.iter_mut().map(|(_, h)| h))).await;

        match joined {
            Ok(results) => {
                for ((name, _), result) in handles.iter().zip(results) {
                    if let Err(e) = result {
                        self.join_failed(name, &e);
                    }
                }
                info!("Conductor stopped");
                Ok(())
            }
            Err(_) => {
                let mut aborted = 0;
                for (name, handle) in &handles {
                    if !handle.is_finished() {
                        warn!("Shutdown timeout exceeded; aborting member loop: member={}", name);
                        handle.abort();
                        aborted += 1;
                    }
                }
                for (_, handle) in handles {
                    let _ = handle.await;
                }
                Err(ConductorError::ShutdownTimeout { aborted })
            }
        }
    }

    /// Shuts down using the timeout configured in the builder.
    ///
    /// Without a configured timeout this behaves like [`Conductor::shutdown`].
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::ShutdownTimeout`] if the configured timeout is exceeded.
    pub async fn shutdown_configured(&self) -> Result<(), ConductorError> {
        if let Some(timeout) = self.shutdown_timeout {
            self.shutdown_with_timeout(timeout).await
        } else {
            self.shutdown().await;
            Ok(())
        }
    }

    fn join_failed(&self, name: &str, error: &tokio::task::JoinError) {
        error!(
            "Error joining member loop during shutdown: member={}, error={}",
            name, error
        );
        if let Some(m) = self.settings.metrics.as_deref() {
            m.record_error(name, MetricsErrorKind::SupervisorJoinFailed);
        }
    }
}

impl Default for Conductor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Conductor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for Conductor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conductor")
            .field("settings", &self.settings)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("closed", &self.is_closed())
            .field("pending", &self.pending.len())
            .field("statuses", &self.statuses)
            .finish_non_exhaustive()
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    () = listen_or_pend("SIGINT", tokio::signal::ctrl_c()) => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: error={}", e);
                listen_or_pend("SIGINT", tokio::signal::ctrl_c()).await;
            }
        }
    }

    #[cfg(not(unix))]
    listen_or_pend("SIGINT", tokio::signal::ctrl_c()).await;
}

/// Waits for `listener`; a listener that cannot be installed never fires.
async fn listen_or_pend<F>(signal: &str, listener: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = listener.await {
        warn!("Failed to listen for {}: error={}", signal, e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn failed_listener_never_fires() {
        let listener = async { Err(std::io::Error::other("no signal driver")) };
        let fired = tokio::time::timeout(
            Duration::from_secs(60),
            listen_or_pend("SIGINT", listener),
        )
        .await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn delivered_signal_fires() {
        listen_or_pend("SIGINT", async { Ok(()) }).await;
    }
}
