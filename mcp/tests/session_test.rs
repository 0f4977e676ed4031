//! Session lifecycle tests against fake servers.

mod common;

use std::{collections::HashMap, sync::Arc, time::Duration};

use common::{init_test_logging, manager, stdio_spec, FakeConnector, FakeServer};
use futures::future::join_all;
use launchpad_mcp::{core::GatewayConfig, ErrorKind, SessionState};
use serde_json::{json, Map};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_concurrent_acquire_shares_one_handshake() {
    init_test_logging();
    let connector = Arc::new(FakeConnector::new().server(
        "github",
        FakeServer {
            tools: common::github_tools(),
            handshake_delay: Duration::from_secs(5),
            ..Default::default()
        },
    ));
    let manager = manager(
        vec![stdio_spec("github", "1.0")],
        connector.clone(),
        GatewayConfig::default(),
    );

    let sessions = join_all((0..8).map(|_| manager.acquire("github"))).await;
    let sessions: Vec<_> = sessions.into_iter().map(Result::unwrap).collect();

    assert_eq!(connector.connects("github"), 1);
    assert_eq!(manager.connect_attempts("github"), 1);
    assert!(sessions.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(manager.state("github"), Some(SessionState::Ready));
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout_degrades_and_next_acquire_reconnects() {
    init_test_logging();
    let connector = Arc::new(FakeConnector::new().server(
        "slow",
        FakeServer {
            tools: common::slack_tools(),
            handshake_delay: Duration::from_secs(60),
            ..Default::default()
        },
    ));
    let manager = manager(
        vec![stdio_spec("slow", "1.0")],
        connector.clone(),
        GatewayConfig::default(),
    );

    let err = manager.acquire("slow").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandshakeTimeout);
    assert!(err.to_string().contains("30s"));
    assert!(err.help().contains("npx"));
    assert_eq!(manager.state("slow"), Some(SessionState::Degraded));

    let _ = manager.acquire("slow").await;
    assert_eq!(connector.connects("slow"), 2);
    assert_eq!(manager.connect_attempts("slow"), 2);
}

#[tokio::test]
async fn test_unreachable_server_is_connection_error() {
    init_test_logging();
    let connector = Arc::new(FakeConnector::new());
    let manager = manager(
        vec![stdio_spec("ghost", "1.0")],
        connector.clone(),
        GatewayConfig::default(),
    );

    let err = manager.acquire("ghost").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    assert_eq!(manager.state("ghost"), Some(SessionState::Closed));
    assert_eq!(manager.state("unknown"), None);
}

#[tokio::test(start_paused = true)]
async fn test_idle_reaper_closes_idle_sessions() {
    init_test_logging();
    let connector = Arc::new(common::standard_connector());
    let config = GatewayConfig {
        idle_timeout: Duration::from_secs(300),
        ..GatewayConfig::default()
    };
    let manager = manager(
        vec![stdio_spec("github", "1.0"), stdio_spec("slack", "1.0")],
        connector.clone(),
        config,
    );

    let github = manager.acquire("github").await.unwrap();
    manager.release(&github);
    let reaper = manager.clone().spawn_idle_reaper(Duration::from_secs(60));

    tokio::time::sleep(Duration::from_secs(200)).await;
    let slack = manager.acquire("slack").await.unwrap();
    manager.release(&slack);

    // github idle for 360s, slack for 160s.
    tokio::time::sleep(Duration::from_secs(160)).await;
    assert_eq!(github.state(), SessionState::Closed);
    assert_eq!(manager.state("github"), Some(SessionState::Unconnected));
    assert_eq!(manager.state("slack"), Some(SessionState::Ready));

    manager.close_all().await;
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(reaper.is_finished());
    assert_eq!(slack.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_tool_listing_failure_closes_connection() {
    init_test_logging();
    let connector = Arc::new(FakeConnector::new().server(
        "github",
        FakeServer {
            tools: common::github_tools(),
            list_error: Some("tools/list returned malformed JSON".to_string()),
            ..Default::default()
        },
    ));
    let manager = manager(
        vec![stdio_spec("github", "1.0")],
        connector.clone(),
        GatewayConfig::default(),
    );

    let err = manager.acquire("github").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolError);
    assert!(err.to_string().contains("malformed JSON"));
    assert_eq!(connector.closes(), 1);
    assert_eq!(manager.state("github"), Some(SessionState::Degraded));

    manager.acquire("github").await.unwrap_err();
    assert_eq!(connector.connects("github"), 2);
    assert_eq!(connector.closes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_calls_on_one_session_run_one_at_a_time() {
    init_test_logging();
    let delay = Duration::from_secs(20);
    let connector = Arc::new(FakeConnector::new().server(
        "github",
        FakeServer {
            tools: common::github_tools(),
            call_delays: HashMap::from([
                ("list_pull_requests".to_string(), delay),
                ("merge_pull_request".to_string(), delay),
            ]),
            ..Default::default()
        },
    ));
    let manager = manager(
        vec![stdio_spec("github", "1.0")],
        connector.clone(),
        GatewayConfig::default(),
    );
    let session = manager.acquire("github").await.unwrap();
    let timeout = manager.config().call_timeout;
    let arguments = || -> Map<String, serde_json::Value> {
        json!({"owner": "acme", "repo": "api"}).as_object().cloned().unwrap()
    };

    let started = Instant::now();
    let (first, second) = tokio::join!(
        session.call_tool("list_pull_requests", arguments(), timeout),
        session.call_tool("merge_pull_request", arguments(), timeout),
    );

    // 40s in total against a 30s call timeout: the second call's clock starts
    // once it holds the session.
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert!(started.elapsed() >= delay * 2);
    assert_eq!(connector.calls(), 2);
    assert_eq!(session.state(), SessionState::Ready);
}
