mod common;

use common::*;
use safebox_bridge::{host, Config, ConfigStore, ConnectionManager, HostEvent, HostEvents, Router};
use safebox_core::{encode_file_frame, ConnectionMode, FileMetadata, LinkState};
use tokio::io::AsyncWriteExt;
use serde_json::{json, Value};

fn router_with(config: Config) -> (Router, std::sync::Arc<FakeConnector>, tokio::sync::mpsc::UnboundedReceiver<FakeServer>, tokio::sync::mpsc::UnboundedReceiver<HostEvent>) {
    let (connector, servers) = fake();
    let (events, event_rx) = HostEvents::channel();
    let manager = ConnectionManager::spawn(ConfigStore::new(config), as_connector(&connector), events.clone());
    let router = Router::new(manager, as_connector(&connector), events).unwrap();
    (router, connector, servers, event_rx)
}

#[tokio::test(start_paused = true)]
async fn get_local_port() {
    let (router, _, _, _) = router_with(Config::default());
    let reply = router.handle_value(json!({"action": "getLocalPort"})).await;
    assert_eq!(reply, Some(json!({"port": 8081})));
}

#[tokio::test(start_paused = true)]
async fn unknown_action() {
    let (router, _, _, _) = router_with(Config::default());
    let reply = router.handle_value(json!({"action": "makeCoffee"})).await;
    assert_eq!(reply, Some(json!({"success": false, "error": "unknown request"})));
    let reply = router.handle_value(json!({"nothing": 1})).await;
    assert_eq!(reply, Some(json!({"success": false, "error": "unknown request"})));
}

#[tokio::test(start_paused = true)]
async fn download_reply_shape() {
    let (router, _, mut servers, _) = router_with(Config::default());
    let r = router.clone();
    let task = tokio::spawn(async move { r.handle_value(json!({"action": "download", "xorname": HEX})).await });

    let mut server = servers.recv().await.unwrap();
    server.recv_json().await;
    let frame = encode_file_frame(
        &FileMetadata {
            xorname: HEX.into(),
            mime_type: Some("image/png".into()),
        },
        &[1, 2, 3],
    )
    .unwrap();
    server.send_binary(frame);

    let reply = task.await.unwrap().unwrap();
    assert_eq!(
        reply,
        json!({"success": true, "payload": "AQID", "mimeType": "image/png"})
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_download_fails_without_connecting() {
    let (router, connector, _, _) = router_with(Config::default());
    let reply = router
        .handle_value(json!({"action": "downloadAsDataUrl", "address": "zz"}))
        .await
        .unwrap();
    assert_eq!(reply["success"], false);
    assert!(reply["error"].as_str().unwrap().contains("invalid address"));
    assert!(connector.attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn upload_chunk_replies() {
    let (router, _, mut servers, _) = router_with(Config::default());

    let r = router.clone();
    let first = tokio::spawn(async move {
        r.handle_value(json!({
            "action": "uploadChunk",
            "fileChunk": {"name": "a.txt", "mimeType": "text/plain", "chunkIndex": 0, "totalChunks": 2, "data": [104, 105], "uploadId": "u-7"}
        }))
        .await
    });
    let mut server = servers.recv().await.unwrap();
    let frame = server.recv_json().await;
    assert_eq!(frame["payload"], "aGk=");

    let second = router
        .handle_value(json!({
            "action": "uploadChunk",
            "fileChunk": {"name": "a.txt", "chunkIndex": 1, "totalChunks": 2, "data": "IQ=="}
        }))
        .await
        .unwrap();
    assert_eq!(second["success"], true);
    assert_eq!(second["uploadId"], "u-7");
    assert!(second["queued"].is_boolean());
    let frame = server.recv_json().await;
    assert_eq!(frame["metadata"]["uploadId"], "u-7");
    assert_eq!(frame["metadata"]["mimeType"], "application/octet-stream");

    server.send_text(json!({"type": "upload_complete", "uploadId": "u-7", "xorname": HEX}));
    let reply = first.await.unwrap().unwrap();
    assert_eq!(reply, json!({"success": true, "xorname": HEX, "uploadId": "u-7"}));
}

#[tokio::test(start_paused = true)]
async fn bad_chunk_is_rejected() {
    let (router, connector, _, _) = router_with(Config::default());
    let reply = router
        .handle_value(json!({
            "action": "uploadChunk",
            "fileChunk": {"name": "a.txt", "chunkIndex": 2, "totalChunks": 2, "data": []}
        }))
        .await
        .unwrap();
    assert_eq!(reply["success"], false);
    let reply = router
        .handle_value(json!({"action": "uploadChunk", "fileChunk": {"name": "a.txt"}}))
        .await
        .unwrap();
    assert_eq!(reply["success"], false);
    assert!(reply["error"].as_str().unwrap().starts_with("invalid request"));
    assert!(connector.attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn open_and_close_emits_event() {
    let (router, _, _, mut events) = router_with(Config::default());
    let reply = router
        .handle_value(json!({"action": "openAndClose", "url": "https://example.com/page"}))
        .await;
    assert_eq!(reply, None);
    assert_eq!(
        events.recv().await.unwrap(),
        HostEvent::OpenTab {
            url: "https://example.com/page".into(),
            close_caller: true
        }
    );
}

#[tokio::test(start_paused = true)]
async fn resolve_address_in_endpoints_mode() {
    let config = Config {
        mode: ConnectionMode::Endpoints,
        endpoints: vec!["wss://relay.example.com/ws".into()],
        ..Config::default()
    };
    let (router, _, _servers, _) = router_with(config);
    let reply = router
        .handle_value(json!({"action": "resolveAddress", "address": format!("{HEX}/index.html")}))
        .await
        .unwrap();
    assert_eq!(
        reply,
        json!({"success": true, "url": format!("https://relay.example.com/{HEX}/index.html")})
    );
}

#[tokio::test(start_paused = true)]
async fn resolve_invalid_address_notifies() {
    let (router, _, _, mut events) = router_with(Config::default());
    let reply = router
        .handle_value(json!({"action": "resolveAddress", "address": "hello world"}))
        .await
        .unwrap();
    assert_eq!(reply["success"], false);
    match events.recv().await.unwrap() {
        HostEvent::Notify { title, .. } => assert_eq!(title, "Invalid Address"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn stdio_host_echoes_ids() {
    let (router, _, _, _) = router_with(Config::default());
    let (event_tx, event_rx) = HostEvents::channel();
    let (mut client, host_side) = tokio::io::duplex(64 * 1024);
    let (host_read, host_write) = tokio::io::split(host_side);
    tokio::spawn(host::run(host_read, host_write, router, event_rx));

    host::write_message(&mut client, &json!({"id": 1, "action": "getLocalPort"}))
        .await
        .unwrap();
    let reply = host::read_message(&mut client).await.unwrap().unwrap();
    assert_eq!(reply, json!({"id": 1, "response": {"port": 8081}}));

    host::write_message(&mut client, &json!({"id": "x", "action": "nope"}))
        .await
        .unwrap();
    let reply = host::read_message(&mut client).await.unwrap().unwrap();
    assert_eq!(reply["id"], "x");
    assert_eq!(reply["response"]["error"], "unknown request");

    event_tx.notify("Connection Error", "refused");
    let event: Value = host::read_message(&mut client).await.unwrap().unwrap();
    assert_eq!(
        event,
        json!({"event": "notify", "title": "Connection Error", "message": "refused"})
    );
}

#[tokio::test(start_paused = true)]
async fn stdio_host_survives_unparseable_frame() {
    let (router, _, _, _) = router_with(Config::default());
    let (_event_tx, event_rx) = HostEvents::channel();
    let (mut client, host_side) = tokio::io::duplex(64 * 1024);
    let (host_read, host_write) = tokio::io::split(host_side);
    let host_task = tokio::spawn(host::run(host_read, host_write, router, event_rx));

    let garbage = b"{not json";
    client.write_all(&(garbage.len() as u32).to_le_bytes()).await.unwrap();
    client.write_all(garbage).await.unwrap();
    let reply = host::read_message(&mut client).await.unwrap().unwrap();
    assert_eq!(reply["response"]["success"], false);
    assert!(reply["response"]["error"]
        .as_str()
        .unwrap()
        .starts_with("invalid request"));

    host::write_message(&mut client, &json!({"id": 1, "action": "getLocalPort"}))
        .await
        .unwrap();
    let reply = host::read_message(&mut client).await.unwrap().unwrap();
    assert_eq!(reply, json!({"id": 1, "response": {"port": 8081}}));
    assert!(!host_task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn stdio_host_flushes_in_flight_replies_on_eof() {
    let (router, _, mut servers, _) = router_with(Config::default());
    let (_event_tx, event_rx) = HostEvents::channel();
    let (mut input, host_read) = tokio::io::duplex(64 * 1024);
    let (host_write, mut output) = tokio::io::duplex(64 * 1024);
    let host_task = tokio::spawn(host::run(host_read, host_write, router, event_rx));

    host::write_message(&mut input, &json!({"id": 2, "action": "download", "address": HEX}))
        .await
        .unwrap();
    let mut server = servers.recv().await.unwrap();
    server.recv_json().await;
    drop(input);
    let frame = encode_file_frame(
        &FileMetadata {
            xorname: HEX.into(),
            mime_type: Some("text/plain".into()),
        },
        b"hi",
    )
    .unwrap();
    server.send_binary(frame);

    host_task.await.unwrap().unwrap();
    let reply = host::read_message(&mut output).await.unwrap().unwrap();
    assert_eq!(
        reply,
        json!({"id": 2, "response": {"success": true, "payload": "aGk=", "mimeType": "text/plain"}})
    );
}

#[tokio::test(start_paused = true)]
async fn set_config_switches_mode_and_moves_link() {
    let (router, _, mut servers, _) = router_with(Config::default());
    router.manager().connect().unwrap();
    let mut local = servers.recv().await.unwrap();
    assert_eq!(local.url, LOCAL);
    wait_for_state(router.manager(), LinkState::Open).await;

    let reply = router
        .handle_value(json!({
            "action": "setConfig",
            "mode": "endpoints",
            "endpoints": ["wss://relay.example.com", "http://bad.example.com", "wss://relay.example.com"]
        }))
        .await
        .unwrap();
    assert_eq!(
        reply,
        json!({"success": true, "config": {"mode": "endpoints", "endpoints": ["wss://relay.example.com"], "localPort": 8081}})
    );

    let relay = servers.recv().await.unwrap();
    assert_eq!(relay.url, "wss://relay.example.com");
    let status = wait_for_state(router.manager(), LinkState::Open).await;
    assert_eq!(status.target.as_deref(), Some("wss://relay.example.com"));
    assert!(local.is_closed());

    let current = router.handle_value(json!({"action": "getConfig"})).await.unwrap();
    assert_eq!(current["mode"], "endpoints");
    assert_eq!(current["localPort"], 8081);
}

#[tokio::test(start_paused = true)]
async fn set_config_rejects_bad_values() {
    let (router, _, _, _) = router_with(Config::default());
    let reply = router
        .handle_value(json!({"action": "setConfig", "localPort": 0}))
        .await
        .unwrap();
    assert_eq!(reply["success"], false);
    let reply = router
        .handle_value(json!({"action": "setConfig", "mode": "carrier-pigeon"}))
        .await
        .unwrap();
    assert_eq!(reply["success"], false);
    let current = router.handle_value(json!({"action": "getConfig"})).await.unwrap();
    assert_eq!(current, json!({"mode": "local", "endpoints": [], "localPort": 8081}));
}
