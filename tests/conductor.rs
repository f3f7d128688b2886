use disttrust::conductor::{
    CallTimeouts, Conductor, ConductorError, MetricsErrorKind, MetricsRecorder, RenewalPolicy,
};
use disttrust::handle::{
    Action, ActionFuture, DefaultLeaseHandle, Destination, NoopAction, WriteError, WriteFuture,
};
use disttrust::member::{Member, MemberState, MemberStatus};
use disttrust::provider::{
    Issued, Provider, ProviderError, ProviderFuture, Request, Response,
};
use disttrust::Lease;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

static SERIALS: AtomicUsize = AtomicUsize::new(0);

struct TestProvider {
    renewable: bool,
    lease_duration: Duration,
    fail_first: usize,
    always_fail: bool,
    issue_calls: AtomicUsize,
    renew_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl TestProvider {
    fn new(renewable: bool, lease_duration: Duration) -> Self {
        Self {
            renewable,
            lease_duration,
            fail_first: 0,
            always_fail: false,
            issue_calls: AtomicUsize::new(0),
            renew_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    fn issues(&self) -> usize {
        self.issue_calls.load(Ordering::SeqCst)
    }

    fn renewals(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    async fn respond(&self, attempt: usize) -> Result<Issued, ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.always_fail || attempt < self.fail_first {
            return Err(ProviderError::Unavailable("backend down".into()));
        }

        let serial = SERIALS.fetch_add(1, Ordering::SeqCst).to_string();
        Ok(Issued {
            lease_id: format!("lease-{serial}"),
            request_id: format!("req-{serial}"),
            renewable: self.renewable,
            lease_duration: self.lease_duration,
            response: Some(Response::new("CERT", "KEY", serial)),
        })
    }
}

impl Provider for TestProvider {
    fn issue<'a>(&'a self, _request: &'a Request) -> ProviderFuture<'a> {
        let attempt = self.issue_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(self.respond(attempt))
    }

    fn renew<'a>(&'a self, _lease: &'a Lease) -> ProviderFuture<'a> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(self.respond(usize::MAX))
    }
}

#[derive(Default)]
struct TestDestination {
    fail_first: usize,
    attempts: AtomicUsize,
    writes: AtomicUsize,
}

impl Destination for TestDestination {
    fn write<'a>(&'a self, _response: &'a Response) -> WriteFuture<'a> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if attempt < self.fail_first {
                return Err(WriteError::Other("read-only file system".into()));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[derive(Default)]
struct CountingAction {
    runs: AtomicUsize,
}

impl Action for CountingAction {
    fn run(&self) -> ActionFuture<'_> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

#[derive(Default)]
struct TestMetrics {
    retries: AtomicUsize,
    errors: Mutex<Vec<(String, MetricsErrorKind)>>,
}

impl MetricsRecorder for TestMetrics {
    fn record_issue(&self, _member: &str) {}
    fn record_renewal(&self, _member: &str) {}
    fn record_retry(&self, _member: &str) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }
    fn record_error(&self, member: &str, kind: MetricsErrorKind) {
        self.errors.lock().unwrap().push((member.to_string(), kind));
    }
}

fn fast_conductor() -> Conductor {
    Conductor::builder()
        .renewal_policy(RenewalPolicy {
            fraction: 0.5,
            min_wait: Duration::from_millis(10),
            max_wait: Duration::from_secs(1),
        })
        .backoff(Duration::from_millis(10), Duration::from_millis(50))
        .call_timeouts(CallTimeouts {
            provider: Duration::from_secs(1),
            apply: Duration::from_secs(1),
        })
        .shutdown_timeout(Some(Duration::from_secs(2)))
        .build()
}

fn member(name: &str, provider: &Arc<TestProvider>) -> Member {
    Member::new(
        name,
        Arc::clone(provider) as Arc<dyn Provider>,
        Request::new("web.example.org", ["www.example.org"]),
        DefaultLeaseHandle::new(Arc::new(TestDestination::default()), Arc::new(NoopAction)),
    )
}

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn renewable_leases_are_renewed_before_expiry() {
    let provider = Arc::new(TestProvider::new(true, Duration::from_millis(400)));
    let mut conductor = fast_conductor();
    let status = conductor.add_member(member("web", &provider));
    assert_eq!(status.snapshot().state, MemberState::Uninitialized);

    conductor.play();
    wait_for("two renewals", || provider.renewals() >= 2).await;

    assert_eq!(provider.issues(), 1);
    let snapshot = status.snapshot();
    assert!(snapshot.healthy);
    assert!(snapshot.lease_expires.is_some());

    conductor.shutdown_configured().await.unwrap();
}

#[tokio::test]
async fn non_renewable_leases_are_reissued() {
    let provider = Arc::new(TestProvider::new(false, Duration::from_millis(300)));
    let mut conductor = fast_conductor();
    let status = conductor.add_member(member("web", &provider));

    conductor.play();
    wait_for("three issuances", || provider.issues() >= 3).await;

    assert_eq!(provider.renewals(), 0);
    assert!(status.is_healthy());

    conductor.shutdown_configured().await.unwrap();
}

#[tokio::test]
async fn transient_failures_recover_with_one_attempt_in_flight() {
    let provider = Arc::new(TestProvider::new(true, Duration::from_secs(3600)).failing_first(3));
    let metrics = Arc::new(TestMetrics::default());
    let mut conductor = Conductor::builder()
        .backoff(Duration::from_millis(10), Duration::from_millis(40))
        .metrics(Arc::clone(&metrics) as Arc<dyn MetricsRecorder>)
        .build();
    let status = conductor.add_member(member("web", &provider));

    conductor.play();
    wait_for("recovery", || status.is_healthy()).await;

    assert_eq!(status.last_error(), None);
    assert_eq!(status.snapshot().state, MemberState::Active);
    assert_eq!(provider.issues(), 4);
    assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.retries.load(Ordering::SeqCst), 3);
    let errors = metrics.errors.lock().unwrap().clone();
    assert_eq!(errors.len(), 3);
    assert!(errors
        .iter()
        .all(|(m, k)| m == "web" && *k == MetricsErrorKind::Provider));

    conductor.shutdown_configured().await.unwrap();
}

#[tokio::test]
async fn failed_write_never_runs_action_and_is_retried_once() {
    let provider = Arc::new(TestProvider::new(true, Duration::from_secs(3600)));
    let destination = Arc::new(TestDestination {
        fail_first: 1,
        ..TestDestination::default()
    });
    let action = Arc::new(CountingAction::default());
    let mut conductor = Conductor::builder()
        .backoff(Duration::from_millis(300), Duration::from_secs(1))
        .build();
    let status = conductor.add_member(Member::new(
        "web",
        Arc::clone(&provider) as Arc<dyn Provider>,
        Request::new("web.example.org", Vec::<String>::new()),
        DefaultLeaseHandle::new(
            Arc::clone(&destination) as Arc<dyn Destination>,
            Arc::clone(&action) as Arc<dyn Action>,
        ),
    ));

    conductor.play();
    wait_for("write failure", || status.last_error().is_some()).await;

    assert!(!status.is_healthy());
    assert!(status.last_error().unwrap().contains("write"));
    assert_eq!(status.snapshot().state, MemberState::Failed);
    assert_eq!(action.runs.load(Ordering::SeqCst), 0);

    wait_for("recovery", || status.is_healthy()).await;

    assert_eq!(destination.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(destination.writes.load(Ordering::SeqCst), 1);
    assert_eq!(action.runs.load(Ordering::SeqCst), 1);
    // The pending lease is re-applied instead of fetching a new one.
    assert_eq!(provider.issues(), 1);

    conductor.shutdown_configured().await.unwrap();
}

#[tokio::test]
async fn failing_member_does_not_affect_others() {
    let good_a = Arc::new(TestProvider::new(true, Duration::from_millis(300)));
    let good_b = Arc::new(TestProvider::new(false, Duration::from_millis(300)));
    let bad = Arc::new(TestProvider::new(true, Duration::from_millis(300)).always_failing());

    let mut conductor = fast_conductor();
    let a = conductor.add_member(member("a", &good_a));
    let b = conductor.add_member(member("b", &good_b));
    let c = conductor.add_member(member("bad", &bad));

    conductor.play();
    wait_for("healthy members to keep renewing", || {
        good_a.renewals() >= 2 && good_b.issues() >= 3
    })
    .await;

    assert!(a.is_healthy());
    assert!(b.is_healthy());
    assert!(!c.is_healthy());
    assert!(bad.issues() >= 2);
    assert!(c.last_error().unwrap().contains("backend down"));

    let report = conductor.health();
    assert!(!report.healthy);
    assert_eq!(report.failing().collect::<Vec<_>>(), vec!["bad"]);

    let checks = conductor.health_checks();
    assert_eq!(checks.len(), 3);
    assert!((checks[0].1)().is_ok());
    assert!((checks[2].1)().is_err());

    conductor.shutdown_configured().await.unwrap();
}

#[tokio::test]
async fn identical_requests_get_independent_leases() {
    let provider = Arc::new(TestProvider::new(true, Duration::from_secs(3600)));
    let mut conductor = fast_conductor();
    let first = conductor.add_member(member("first", &provider));
    let second = conductor.add_member(member("second", &provider));

    conductor.play();
    wait_for("both healthy", || first.is_healthy() && second.is_healthy()).await;

    assert_eq!(provider.issues(), 2);
    assert_ne!(first.snapshot().serial, second.snapshot().serial);

    conductor.shutdown_configured().await.unwrap();
}

#[tokio::test]
async fn shutdown_abandons_stuck_provider_calls() {
    struct Stuck;
    impl Provider for Stuck {
        fn issue<'a>(&'a self, _request: &'a Request) -> ProviderFuture<'a> {
            Box::pin(futures::future::pending())
        }
    }

    let mut conductor = Conductor::builder()
        .call_timeouts(CallTimeouts {
            provider: Duration::from_secs(3600),
            apply: Duration::from_secs(3600),
        })
        .build();
    let status = conductor.add_member(Member::new(
        "stuck",
        Arc::new(Stuck),
        Request::new("web.example.org", Vec::<String>::new()),
        DefaultLeaseHandle::new(Arc::new(TestDestination::default()), Arc::new(NoopAction)),
    ));

    conductor.play();
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(
        Duration::from_secs(2),
        conductor.shutdown_with_timeout(Duration::from_secs(1)),
    )
    .await
    .expect("shutdown did not complete")
    .unwrap();

    assert!(conductor.is_closed());
    assert_eq!(status.last_error(), None);
}

#[tokio::test]
async fn watch_until_stops_on_signal() {
    let provider = Arc::new(TestProvider::new(true, Duration::from_secs(3600)));
    let mut conductor = fast_conductor();
    let status: MemberStatus = conductor.add_member(member("web", &provider));

    conductor
        .play()
        .watch_until(tokio::time::sleep(Duration::from_millis(100)))
        .await
        .unwrap();

    assert!(conductor.is_closed());
    assert!(status.is_healthy());
    assert_eq!(
        conductor.watch_until(async {}).await,
        Err(ConductorError::Closed)
    );

    // Shutdown is idempotent.
    conductor.shutdown().await;
    conductor.shutdown_configured().await.unwrap();
}

#[tokio::test]
async fn watch_returns_when_cancelled_elsewhere() {
    let mut conductor = fast_conductor();
    conductor.play();
    let token = conductor.cancellation_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    conductor.watch().await.unwrap();
    assert!(conductor.is_closed());
}
