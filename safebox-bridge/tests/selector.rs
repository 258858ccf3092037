mod common;

use std::time::Duration;

use common::*;
use safebox_bridge::selector::{race, select, SelectError};
use safebox_bridge::Config;
use safebox_core::ConnectionMode;

const PER_CANDIDATE: Duration = Duration::from_secs(4);

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn single_winner_and_losers_closed() {
    let (connector, mut servers) = fake();
    connector.set("wss://a.example.com", Behavior::Hang);
    connector.set("wss://b.example.com", Behavior::Open);
    connector.set("wss://c.example.com", Behavior::Refuse);
    let candidates = urls(&["wss://a.example.com", "wss://b.example.com", "wss://c.example.com"]);

    let (url, link) = race(&candidates, PER_CANDIDATE, as_connector(&connector))
        .await
        .unwrap();
    assert_eq!(url, "wss://b.example.com");

    let mut seen = Vec::new();
    while let Ok(mut server) = servers.try_recv() {
        if server.url == url {
            assert!(!server.is_closed());
        } else {
            assert!(server.is_closed(), "{} left open", server.url);
        }
        seen.push(server.url.clone());
    }
    seen.sort();
    assert_eq!(seen, candidates);
    drop(link);
}

#[tokio::test(start_paused = true)]
async fn latency_beats_list_order() {
    let (connector, mut servers) = fake();
    connector.set("wss://slow.example.com", Behavior::OpenAfter(Duration::from_millis(500)));
    connector.set("wss://fast.example.com", Behavior::OpenAfter(Duration::from_millis(20)));
    let candidates = urls(&["wss://slow.example.com", "wss://fast.example.com"]);

    let (url, _link) = race(&candidates, PER_CANDIDATE, as_connector(&connector))
        .await
        .unwrap();
    assert_eq!(url, "wss://fast.example.com");
    while let Ok(mut server) = servers.try_recv() {
        if server.url == "wss://slow.example.com" {
            assert!(server.is_closed());
        }
    }
}

#[tokio::test(start_paused = true)]
async fn nothing_opens_within_timeout() {
    let (connector, _servers) = fake();
    connector.set("wss://a.example.com", Behavior::Hang);
    connector.set("wss://b.example.com", Behavior::Refuse);
    let candidates = urls(&["wss://a.example.com", "wss://b.example.com"]);

    let err = race(&candidates, PER_CANDIDATE, as_connector(&connector))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SelectError::NoneReachable(2)));
}

#[tokio::test(start_paused = true)]
async fn empty_list_is_an_error() {
    let (connector, _servers) = fake();
    let config = Config {
        mode: ConnectionMode::Endpoints,
        ..Config::default()
    };
    let err = select(ConnectionMode::Endpoints, &config, as_connector(&connector))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SelectError::NoEndpoints));
    assert!(connector.attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn local_mode_uses_configured_port() {
    let (connector, _servers) = fake();
    let config = Config {
        local_port: 9090,
        endpoints: urls(&["wss://ignored.example.com"]),
        ..Config::default()
    };
    let (url, _link) = select(ConnectionMode::Local, &config, as_connector(&connector))
        .await
        .unwrap();
    assert_eq!(url, "ws://localhost:9090");
    assert_eq!(connector.attempts(), vec![url]);
}
