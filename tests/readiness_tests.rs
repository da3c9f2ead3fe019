use async_trait::async_trait;
use mockall::mock;
use server_setup::client::QueryParam;
use server_setup::config::ReadinessSettings;
use server_setup::error::{Error, Result};
use server_setup::readiness::ReadinessProber;
use server_setup::state::{InstanceState, ReadinessPhase};
use server_setup::{HttpClient, HttpResponse};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

mock! {
    pub Http {}

    #[async_trait]
    impl HttpClient for Http {
        async fn get(
            &self,
            path: &str,
            params: &[QueryParam],
            expected_status: u16,
        ) -> Result<HttpResponse>;
        fn url(&self, path: &str) -> String;
    }
}

fn settings(timeout_secs: u64, initial_delay_secs: u64, delay_secs: u64) -> ReadinessSettings {
    ReadinessSettings {
        timeout_secs,
        initial_delay_secs,
        delay_secs,
    }
}

fn prober(state: &Arc<InstanceState>, mock: MockHttp, settings: ReadinessSettings) -> ReadinessProber {
    ReadinessProber::new(Arc::clone(state), Arc::new(mock), settings, "admin")
}

fn paths(specs: &[&str]) -> Vec<String> {
    specs.iter().map(|s| s.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_ready_on_first_round() -> Result<()> {
    let state = Arc::new(InstanceState::new("test"));
    let mut mock = MockHttp::new();
    mock.expect_get()
        .withf(|path, params, status| path == "/a" && params.is_empty() && *status == 200)
        .times(1)
        .returning(|_, _, _| Ok(HttpResponse::new(200, "all OK here")));
    mock.expect_get()
        .withf(|path, _, _| path == "/b")
        .times(1)
        .returning(|_, _, _| Ok(HttpResponse::new(200, "3 FAILURES")));
    mock.expect_url().returning(|path| format!("http://localhost:4502{}", path));

    let start = Instant::now();
    prober(&state, mock, settings(60, 0, 1))
        .wait_for_ready(&paths(&["/a:OK", "/b:FAIL:regexp"]))
        .await?;

    assert_eq!(state.readiness(), ReadinessPhase::Ready);
    assert!(start.elapsed() < Duration::from_secs(1));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_query_parameters_are_forwarded() -> Result<()> {
    let state = Arc::new(InstanceState::new("test"));
    let mut mock = MockHttp::new();
    mock.expect_get()
        .withf(|path, params, _| {
            path == "/x"
                && params.len() == 1
                && params[0] == ("k".to_string(), Some("v w".to_string()))
        })
        .times(1)
        .returning(|_, _, _| Ok(HttpResponse::new(200, "OK")));
    mock.expect_url().returning(|path| path.to_string());

    prober(&state, mock, settings(60, 0, 1))
        .wait_for_ready(&paths(&["/x?k=v%20w:OK"]))
        .await?;

    assert!(state.is_ready());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_retries_until_content_matches() -> Result<()> {
    let state = Arc::new(InstanceState::new("test"));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut mock = MockHttp::new();
    mock.expect_get().times(3).returning(move |_, _, _| {
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Err(Error::Transport("connection refused".to_string())),
            1 => Ok(HttpResponse::new(200, "Starting...")),
            _ => Ok(HttpResponse::new(200, "Welcome")),
        }
    });
    mock.expect_url().returning(|path| path.to_string());

    let start = Instant::now();
    prober(&state, mock, settings(60, 0, 2))
        .wait_for_ready(&paths(&["/index.html:Welcome"]))
        .await?;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(start.elapsed() >= Duration::from_secs(4));
    assert!(state.is_ready());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_sticky() {
    let state = Arc::new(InstanceState::new("test"));
    let mut mock = MockHttp::new();
    // One request per second for three seconds
    mock.expect_get()
        .times(3)
        .returning(|_, _, _| Err(Error::Transport("connection refused".to_string())));
    mock.expect_url().returning(|path| path.to_string());

    let result = prober(&state, mock, settings(3, 0, 1))
        .wait_for_ready(&paths(&["/a:OK"]))
        .await;
    assert!(matches!(result, Err(Error::ReadinessTimeout { timeout_secs: 3 })));
    assert_eq!(state.readiness(), ReadinessPhase::Failed { timeout_secs: 3 });

    // No expectations: any request would panic
    let result = prober(&state, MockHttp::new(), settings(3, 0, 1))
        .wait_for_ready(&paths(&["/a:OK"]))
        .await;
    assert!(matches!(
        result,
        Err(Error::ReadinessFailedPreviously { timeout_secs: 3 })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_pattern_never_matching_times_out() {
    let state = Arc::new(InstanceState::new("test"));
    let mut mock = MockHttp::new();
    mock.expect_get()
        .withf(|path, _, _| path == "/a")
        .times(3)
        .returning(|_, _, _| Ok(HttpResponse::new(200, "OK")));
    mock.expect_get()
        .withf(|path, _, _| path == "/b")
        .times(3)
        .returning(|_, _, _| Ok(HttpResponse::new(200, "all passed")));
    mock.expect_url().returning(|path| path.to_string());

    let result = prober(&state, mock, settings(3, 0, 1))
        .wait_for_ready(&paths(&["/a:OK", "/b:FAIL:regexp"]))
        .await;
    assert!(matches!(result, Err(Error::ReadinessTimeout { timeout_secs: 3 })));

    let result = prober(&state, MockHttp::new(), settings(3, 0, 1))
        .wait_for_ready(&paths(&["/a:OK", "/b:FAIL:regexp"]))
        .await;
    assert!(matches!(
        result,
        Err(Error::ReadinessFailedPreviously { timeout_secs: 3 })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_non_ok_status_times_out() {
    let state = Arc::new(InstanceState::new("test"));
    let mut mock = MockHttp::new();
    // Matching body, wrong status
    mock.expect_get()
        .times(2)
        .returning(|_, _, _| Ok(HttpResponse::new(503, "OK")));
    mock.expect_url().returning(|path| path.to_string());

    let result = prober(&state, mock, settings(2, 0, 1))
        .wait_for_ready(&paths(&["/a:OK"]))
        .await;

    assert!(matches!(result, Err(Error::ReadinessTimeout { timeout_secs: 2 })));
    assert_eq!(state.readiness(), ReadinessPhase::Failed { timeout_secs: 2 });
}

#[tokio::test(start_paused = true)]
async fn test_initial_delay_counts_against_timeout() {
    let state = Arc::new(InstanceState::new("test"));

    let start = Instant::now();
    let result = prober(&state, MockHttp::new(), settings(2, 5, 1))
        .wait_for_ready(&paths(&["/a:OK"]))
        .await;

    assert!(matches!(result, Err(Error::ReadinessTimeout { timeout_secs: 2 })));
    assert!(start.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_paths_are_skipped() -> Result<()> {
    let state = Arc::new(InstanceState::new("test"));
    let mut mock = MockHttp::new();
    mock.expect_get()
        .withf(|path, _, _| path == "/ok")
        .times(1)
        .returning(|_, _, _| Ok(HttpResponse::new(200, "fine")));
    mock.expect_url().returning(|path| path.to_string());

    prober(&state, mock, settings(10, 0, 1))
        .wait_for_ready(&paths(&[":nothing", "/ok", "/bad:(:regexp"]))
        .await?;

    assert!(state.is_ready());
    Ok(())
}
