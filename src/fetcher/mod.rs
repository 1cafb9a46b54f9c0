//! Polls the selected bot's metrics endpoint and publishes [`FetchState`].
//!
//! One poll session runs per `(url, key)` pair. Each session is a spawned
//! task with its own cancellation token; starting a session for a different
//! pair cancels the previous one first. Every request gets a sequence number
//! when it is issued, and only the most recently issued request may write
//! its outcome, so a slow response can never overwrite a newer one.

mod endpoint;

pub use endpoint::{fetch_snapshot, Endpoint, FetchError};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::metrics::Snapshot;
use crate::storage::Settings;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchStatus {
    /// No bot selected, nothing polled.
    #[default]
    Idle,
    /// First request of the session has not settled yet.
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchState {
    pub status: FetchStatus,
    /// Last good snapshot for the current bot; kept across failed refreshes.
    pub data: Option<Snapshot>,
    /// Set only while `status == Error`.
    pub error: Option<FetchError>,
    /// A request for the current bot is in flight.
    pub fetching: bool,
    pub last_success: Option<DateTime<Local>>,
}

struct Shared {
    client: reqwest::Client,
    state: watch::Sender<FetchState>,
    latest: AtomicU64,
}

impl Shared {
    /// Claims the next sequence number, unless the session is already gone.
    fn issue(&self, cancel: &CancellationToken) -> Option<u64> {
        let mut issued = None;
        self.state.send_if_modified(|state| {
            if cancel.is_cancelled() {
                return false;
            }
            issued = Some(self.latest.fetch_add(1, Ordering::SeqCst) + 1);
            let changed = !state.fetching;
            state.fetching = true;
            changed
        });
        issued
    }

    fn settle(&self, seq: u64, cancel: &CancellationToken, result: Result<Snapshot, FetchError>) {
        self.state.send_if_modified(|state| {
            if cancel.is_cancelled() || self.latest.load(Ordering::SeqCst) != seq {
                tracing::debug!(seq, "discarding superseded response");
                return false;
            }

            state.fetching = false;
            match result {
                Ok(snapshot) => {
                    state.status = FetchStatus::Success;
                    state.data = Some(snapshot);
                    state.error = None;
                    state.last_success = Some(Local::now());
                }
                Err(e) => {
                    tracing::warn!(seq, kind = %e.kind(), error = %e, "metrics fetch failed");
                    state.status = FetchStatus::Error;
                    state.error = Some(e);
                }
            }
            true
        });
    }
}

struct PollSession {
    endpoint: Endpoint,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct MetricsFetcher {
    shared: Arc<Shared>,
    interval: Duration,
    session: Option<PollSession>,
}

impl MetricsFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if settings.request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(settings.request_timeout_secs));
        }
        let client = builder.build().context("Could not build HTTP client")?;

        Ok(Self::with_client(
            client,
            Duration::from_secs(settings.poll_interval_secs.max(1)),
        ))
    }

    /// `interval` is clamped to at least one millisecond.
    pub fn with_client(client: reqwest::Client, interval: Duration) -> Self {
        let (state, _) = watch::channel(FetchState::default());
        Self {
            shared: Arc::new(Shared {
                client,
                state,
                latest: AtomicU64::new(0),
            }),
            interval: interval.max(MIN_INTERVAL),
            session: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> FetchState {
        self.shared.state.borrow().clone()
    }

    /// Begins polling `url` with `key`: one request now, then one per
    /// interval. An empty `url` parks the fetcher in `Idle`. Calling again
    /// with the pair already being polled does nothing; any other pair
    /// replaces the running session and clears the previous bot's data.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, url: &str, key: &str) {
        let endpoint = Endpoint::new(url, key);
        if let Some(session) = &self.session {
            if session.endpoint == endpoint && !session.task.is_finished() {
                return;
            }
        }

        self.stop();

        if endpoint.is_empty() {
            self.shared.state.send_replace(FetchState::default());
            return;
        }

        self.shared.state.send_replace(FetchState {
            status: FetchStatus::Loading,
            ..FetchState::default()
        });

        tracing::info!(url = %endpoint.base_url(), interval = ?self.interval, "polling started");
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            self.shared.clone(),
            endpoint.clone(),
            self.interval,
            cancel.clone(),
        ));
        self.session = Some(PollSession {
            endpoint,
            cancel,
            task,
        });
    }

    /// Cancels the recurring timer and any in-flight request. Responses that
    /// arrive afterwards are dropped.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        session.cancel.cancel();
        session.task.abort();
        self.shared.state.send_if_modified(|state| {
            let changed = state.fetching;
            state.fetching = false;
            changed
        });
        tracing::info!(url = %session.endpoint.base_url(), "polling stopped");
    }

    /// One immediate fetch outside the schedule. No-op while idle.
    pub fn refetch(&self) {
        let Some(session) = &self.session else {
            return;
        };

        tokio::spawn(fetch_once(
            self.shared.clone(),
            session.endpoint.clone(),
            session.cancel.clone(),
        ));
    }
}

impl Drop for MetricsFetcher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(
    shared: Arc<Shared>,
    endpoint: Endpoint,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        fetch_once(shared.clone(), endpoint.clone(), cancel.clone()).await;
    }
}

async fn fetch_once(shared: Arc<Shared>, endpoint: Endpoint, cancel: CancellationToken) {
    let Some(seq) = shared.issue(&cancel) else {
        return;
    };
    tracing::debug!(seq, url = %endpoint.base_url(), "fetching metrics");

    let result = tokio::select! {
        _ = cancel.cancelled() => return,
        result = fetch_snapshot(&shared.client, &endpoint) => result,
    };

    shared.settle(seq, &cancel, result);
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use tokio::time::{sleep, timeout};

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    /// What the stand-in bot answers for the n-th request (0-based).
    type Script = dyn Fn(usize, &str) -> (u16, String, Duration) + Send + Sync;

    struct FakeBot {
        base_url: String,
        hits: Arc<AtomicUsize>,
        urls: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl FakeBot {
        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    fn fake_bot(
        script: impl Fn(usize, &str) -> (u16, String, Duration) + Send + Sync + 'static,
    ) -> FakeBot {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let urls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let script: Arc<Script> = Arc::new(script);

        let (thread_hits, thread_urls) = (hits.clone(), urls.clone());
        thread::spawn(move || {
            for request in server.incoming_requests() {
                let n = thread_hits.fetch_add(1, Ordering::SeqCst);
                let url = request.url().to_string();
                thread_urls.lock().unwrap().push(url.clone());
                let script = script.clone();
                thread::spawn(move || {
                    let (code, body, delay) = script(n, &url);
                    thread::sleep(delay);
                    let response = tiny_http::Response::from_string(body).with_status_code(code);
                    let _ = request.respond(response);
                });
            }
        });

        FakeBot {
            base_url: format!("http://127.0.0.1:{}", port),
            hits,
            urls,
        }
    }

    fn fetcher(interval: Duration) -> MetricsFetcher {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        MetricsFetcher::with_client(client, interval)
    }

    async fn wait_until(
        fetcher: &MetricsFetcher,
        f: impl FnMut(&FetchState) -> bool,
    ) -> FetchState {
        let mut rx = fetcher.subscribe();
        let ready = timeout(WAIT, rx.wait_for(f))
            .await
            .expect("timed out waiting for fetch state")
            .expect("fetcher dropped");
        FetchState::clone(&ready)
    }

    async fn wait_for_hits(bot: &FakeBot, n: usize) {
        timeout(WAIT, async {
            while bot.hits() < n {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("bot never received the request");
    }

    fn data_field(state: &FetchState, field: &str) -> Option<String> {
        state
            .data
            .as_ref()
            .and_then(|s| s.raw().get(field))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    #[tokio::test]
    async fn empty_url_stays_idle_without_requests() {
        let mut fetcher = fetcher(Duration::from_secs(60));
        fetcher.start("", "k");

        assert_eq!(fetcher.state(), FetchState::default());
        fetcher.refetch();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(fetcher.state().status, FetchStatus::Idle);
    }

    #[tokio::test]
    async fn start_enters_loading_then_success() {
        let bot = fake_bot(|_, _| (200, r#"{"users": {"total": 12}}"#.into(), Duration::ZERO));
        let mut fetcher = fetcher(Duration::from_secs(60));

        fetcher.start(&format!("{}/", bot.base_url), "s3 cret");
        assert_eq!(fetcher.state().status, FetchStatus::Loading);

        let state = wait_until(&fetcher, |s| s.status == FetchStatus::Success).await;
        assert_eq!(state.data.unwrap().users().total, 12);
        assert!(state.error.is_none());
        assert!(!state.fetching);
        assert!(state.last_success.is_some());
        assert_eq!(
            bot.urls.lock().unwrap()[0],
            "/api/admin/metrics?key=s3%20cret"
        );
    }

    #[tokio::test]
    async fn non_2xx_is_http_status_error() {
        let bot = fake_bot(|_, _| (401, "unauthorized".into(), Duration::ZERO));
        let mut fetcher = fetcher(Duration::from_secs(60));
        fetcher.start(&bot.base_url, "wrong");

        let state = wait_until(&fetcher, |s| s.status == FetchStatus::Error).await;
        assert_eq!(state.error.unwrap().kind(), "http_status:401");
        assert!(state.data.is_none());
    }

    #[tokio::test]
    async fn non_json_body_is_parse_error() {
        let bot = fake_bot(|_, _| (200, "<html>maintenance</html>".into(), Duration::ZERO));
        let mut fetcher = fetcher(Duration::from_secs(60));
        fetcher.start(&bot.base_url, "k");

        let state = wait_until(&fetcher, |s| s.status == FetchStatus::Error).await;
        assert_eq!(state.error.unwrap().kind(), "parse");
    }

    #[tokio::test]
    async fn refused_connection_is_network_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut fetcher = fetcher(Duration::from_secs(60));
        fetcher.start(&format!("http://127.0.0.1:{}", port), "k");

        let state = wait_until(&fetcher, |s| s.status == FetchStatus::Error).await;
        assert_eq!(state.error.unwrap().kind(), "network");
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_data() {
        let bot = fake_bot(|n, _| match n {
            0 => (200, r#"{"tag": "first"}"#.into(), Duration::ZERO),
            1 => (500, "boom".into(), Duration::ZERO),
            _ => (200, r#"{"tag": "third"}"#.into(), Duration::ZERO),
        });
        let mut fetcher = fetcher(Duration::from_secs(60));
        fetcher.start(&bot.base_url, "k");
        wait_until(&fetcher, |s| s.status == FetchStatus::Success).await;

        fetcher.refetch();
        let state = wait_until(&fetcher, |s| s.status == FetchStatus::Error).await;
        assert_eq!(data_field(&state, "tag").as_deref(), Some("first"));
        assert_eq!(state.error.unwrap().kind(), "http_status:500");

        fetcher.refetch();
        let state = wait_until(&fetcher, |s| s.status == FetchStatus::Success).await;
        assert_eq!(data_field(&state, "tag").as_deref(), Some("third"));
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn last_issued_request_wins_over_late_response() {
        let bot = fake_bot(|n, _| match n {
            0 => (200, r#"{"tag": "r1"}"#.into(), Duration::from_millis(500)),
            _ => (200, r#"{"tag": "r2"}"#.into(), Duration::ZERO),
        });
        let mut fetcher = fetcher(Duration::from_secs(60));
        fetcher.start(&bot.base_url, "k");
        wait_for_hits(&bot, 1).await;

        fetcher.refetch();
        let state = wait_until(&fetcher, |s| s.status == FetchStatus::Success).await;
        assert_eq!(data_field(&state, "tag").as_deref(), Some("r2"));

        // r1 lands well after r2 and must be ignored.
        sleep(Duration::from_millis(900)).await;
        assert_eq!(data_field(&fetcher.state(), "tag").as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn switching_bots_drops_late_response_from_old_bot() {
        let slow = fake_bot(|_, _| (200, r#"{"tag": "a"}"#.into(), Duration::from_millis(400)));
        let fast = fake_bot(|_, _| (200, r#"{"tag": "b"}"#.into(), Duration::ZERO));
        let mut fetcher = fetcher(Duration::from_secs(60));

        fetcher.start(&slow.base_url, "ka");
        wait_for_hits(&slow, 1).await;
        fetcher.start(&fast.base_url, "kb");

        let state = wait_until(&fetcher, |s| s.status == FetchStatus::Success).await;
        assert_eq!(data_field(&state, "tag").as_deref(), Some("b"));

        sleep(Duration::from_millis(800)).await;
        assert_eq!(data_field(&fetcher.state(), "tag").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn switching_bots_clears_previous_data() {
        let a = fake_bot(|_, _| (200, r#"{"tag": "a"}"#.into(), Duration::ZERO));
        let b = fake_bot(|_, _| (503, "down".into(), Duration::ZERO));
        let mut fetcher = fetcher(Duration::from_secs(60));

        fetcher.start(&a.base_url, "k");
        wait_until(&fetcher, |s| s.status == FetchStatus::Success).await;

        fetcher.start(&b.base_url, "k");
        let state = wait_until(&fetcher, |s| s.status == FetchStatus::Error).await;
        assert!(state.data.is_none());
    }

    #[tokio::test]
    async fn polls_on_interval_until_stopped() {
        let bot = fake_bot(|_, _| (200, "{}".into(), Duration::ZERO));
        let mut fetcher = fetcher(Duration::from_millis(50));
        fetcher.start(&bot.base_url, "k");

        wait_for_hits(&bot, 3).await;
        fetcher.stop();
        sleep(Duration::from_millis(100)).await;
        let after_stop = bot.hits();

        sleep(Duration::from_millis(300)).await;
        assert_eq!(bot.hits(), after_stop);
        assert!(!fetcher.state().fetching);
    }

    #[tokio::test]
    async fn zero_interval_is_clamped_and_still_polls() {
        let bot = fake_bot(|_, _| (200, "{}".into(), Duration::ZERO));
        let mut fetcher = fetcher(Duration::ZERO);
        fetcher.start(&bot.base_url, "k");

        wait_for_hits(&bot, 3).await;
        let state = wait_until(&fetcher, |s| s.status == FetchStatus::Success).await;
        assert!(state.error.is_none());
        fetcher.stop();
    }

    #[tokio::test]
    async fn restarting_same_pair_keeps_session() {
        let bot = fake_bot(|_, _| (200, r#"{"tag": "x"}"#.into(), Duration::ZERO));
        let mut fetcher = fetcher(Duration::from_secs(60));

        fetcher.start(&bot.base_url, "k");
        wait_until(&fetcher, |s| s.status == FetchStatus::Success).await;
        fetcher.start(&bot.base_url, "k");

        sleep(Duration::from_millis(100)).await;
        assert_eq!(bot.hits(), 1);
        assert_eq!(fetcher.state().status, FetchStatus::Success);
    }

    #[tokio::test]
    async fn dropping_fetcher_stops_polling() {
        let bot = fake_bot(|_, _| (200, "{}".into(), Duration::ZERO));
        let mut fetcher = fetcher(Duration::from_millis(50));
        fetcher.start(&bot.base_url, "k");
        wait_for_hits(&bot, 1).await;

        drop(fetcher);
        sleep(Duration::from_millis(100)).await;
        let after_drop = bot.hits();
        sleep(Duration::from_millis(300)).await;
        assert_eq!(bot.hits(), after_drop);
    }
}
