
use peerlink_relay::protocol::SignalEnvelope;
use peerlink_relay::server::ServerConfig;
use serde_json::json;
use test_helpers::{
    authenticate, connect, connect_as, connect_with_token, expect_close, expect_silence,
    mint_token, mint_token_with_ttl, next_json, next_text, send_json, send_text,
    start_test_server, start_test_server_with_config, test_server_config, wait_for_stats,
};
use tokio::time::Duration;

#[tokio::test]
async fn test_health_check() {
    let (_server, addr) = start_test_server().await;

    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_welcome_carries_connection_id() {
    let (_server, addr) = start_test_server().await;

    let (_ws, welcome) = connect(addr).await;
    assert!(welcome["clientId"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(welcome["timestamp"].is_i64());
}

#[tokio::test]
async fn test_offer_is_forwarded_verbatim_and_counted() {
    let (_server, addr) = start_test_server().await;
    let mut alice = connect_as(addr, "alice").await;
    let mut bob = connect_as(addr, "bob").await;

    let offer = SignalEnvelope::new(
        "offer",
        Some("alice"),
        "bob",
        json!({ "sdp": "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1" }),
    );
    send_text(&mut alice, offer.raw()).await;

    let received = next_text(&mut bob).await;
    assert_eq!(received, offer.raw().to_string());

    let stats = wait_for_stats(addr, |s| s["routing"]["totalMessages"] == 1).await;
    assert_eq!(stats["routing"]["successfulRoutes"], 1);
    assert_eq!(stats["routing"]["failedRoutes"], 0);
    assert_eq!(stats["routing"]["messagesByType"]["offer"], 1);
    assert_eq!(stats["routing"]["messagesByType"]["answer"], 0);
    assert_eq!(stats["authenticatedUsers"], 2);
    assert_eq!(stats["recentRoutingRecords"][0]["from"], "alice");
    assert_eq!(stats["recentRoutingRecords"][0]["to"], "bob");
    assert_eq!(stats["recentRoutingRecords"][0]["success"], true);
}

#[tokio::test]
async fn test_answer_and_candidates_flow_back() {
    let (_server, addr) = start_test_server().await;
    let mut alice = connect_as(addr, "alice").await;
    let mut bob = connect_as(addr, "bob").await;

    let offer = SignalEnvelope::new("offer", Some("alice"), "bob", json!({ "sdp": "offer" }));
    send_text(&mut alice, offer.raw()).await;
    assert_eq!(next_text(&mut bob).await, offer.raw().to_string());

    let answer = SignalEnvelope::new("answer", Some("bob"), "alice", json!({ "sdp": "answer" }));
    send_text(&mut bob, answer.raw()).await;
    assert_eq!(next_text(&mut alice).await, answer.raw().to_string());

    let candidate = SignalEnvelope::new(
        "ice-candidate",
        Some("bob"),
        "alice",
        json!({ "candidate": "candidate:1 1 UDP 2122252543 10.0.0.2 54400 typ host" }),
    );
    send_text(&mut bob, candidate.raw()).await;
    assert_eq!(next_text(&mut alice).await, candidate.raw().to_string());

    let stats = wait_for_stats(addr, |s| s["routing"]["totalMessages"] == 3).await;
    assert_eq!(stats["routing"]["messagesByType"]["ice-candidate"], 1);
    assert_eq!(stats["routing"]["successRate"], 1.0);
}

#[tokio::test]
async fn test_offline_target_answers_every_attempt() {
    let (_server, addr) = start_test_server().await;
    let mut alice = connect_as(addr, "alice").await;

    for _ in 0..2 {
        send_json(
            &mut alice,
            &json!({ "type": "call-request", "from": "alice", "to": "carol", "data": {} }),
        )
        .await;
        let notice = next_json(&mut alice).await;
        assert_eq!(notice["type"], "target-offline");
        assert_eq!(notice["userId"], "carol");
    }

    let stats = wait_for_stats(addr, |s| s["routing"]["totalMessages"] == 2).await;
    assert_eq!(stats["routing"]["failedRoutes"], 2);
    assert_eq!(stats["routing"]["offlineTargets"], 2);
    assert_eq!(stats["routing"]["successRate"], 0.0);
    assert_eq!(stats["recentRoutingRecords"][0]["failureReason"], "target_offline");
}

#[tokio::test]
async fn test_signal_fans_out_to_every_connection_of_identity() {
    let (_server, addr) = start_test_server().await;
    let mut alice = connect_as(addr, "alice").await;
    let mut bob_phone = connect_as(addr, "bob").await;
    let mut bob_laptop = connect_as(addr, "bob").await;

    let request = SignalEnvelope::new("call-request", Some("alice"), "bob", json!({}));
    send_text(&mut alice, request.raw()).await;

    assert_eq!(next_text(&mut bob_phone).await, request.raw().to_string());
    assert_eq!(next_text(&mut bob_laptop).await, request.raw().to_string());

    let stats = wait_for_stats(addr, |s| s["routing"]["totalMessages"] == 1).await;
    assert_eq!(stats["authenticatedUsers"], 3);
    assert_eq!(stats["onlineIdentities"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_spoofed_sender_is_rejected() {
    let (_server, addr) = start_test_server().await;
    let mut alice = connect_as(addr, "alice").await;
    let mut bob = connect_as(addr, "bob").await;

    send_json(
        &mut alice,
        &json!({ "type": "offer", "from": "mallory", "to": "bob", "data": {} }),
    )
    .await;

    let reply = next_json(&mut alice).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "IDENTITY_MISMATCH");
    expect_silence(&mut bob, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_non_string_sender_is_an_identity_mismatch() {
    let (_server, addr) = start_test_server().await;
    let mut alice = connect_as(addr, "alice").await;
    let mut bob = connect_as(addr, "bob").await;

    send_json(
        &mut alice,
        &json!({ "type": "offer", "from": 42, "to": "bob", "data": {} }),
    )
    .await;

    let reply = next_json(&mut alice).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "IDENTITY_MISMATCH");
    expect_silence(&mut bob, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_string_timestamp_is_forwarded_verbatim() {
    let (_server, addr) = start_test_server().await;
    let mut alice = connect_as(addr, "alice").await;
    let mut bob = connect_as(addr, "bob").await;

    let frame = json!({
        "type": "offer",
        "from": "alice",
        "to": "bob",
        "data": { "sdp": "v=0" },
        "timestamp": "2024-05-01T12:00:00.000Z"
    })
    .to_string();
    send_text(&mut alice, &frame).await;

    assert_eq!(next_text(&mut bob).await, frame);
    expect_silence(&mut alice, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_unknown_kind_is_rejected_and_connection_stays_open() {
    let (_server, addr) = start_test_server().await;
    let mut alice = connect_as(addr, "alice").await;
    let _bob = connect_as(addr, "bob").await;

    send_json(
        &mut alice,
        &json!({ "type": "renegotiate", "from": "alice", "to": "bob", "data": {} }),
    )
    .await;
    let reply = next_json(&mut alice).await;
    assert_eq!(reply["code"], "UNKNOWN_KIND");

    send_json(&mut alice, &json!({ "type": "ping" })).await;
    assert_eq!(next_json(&mut alice).await["type"], "pong");

    let stats = wait_for_stats(addr, |s| s["routing"]["totalMessages"] == 1).await;
    assert_eq!(stats["routing"]["failedRoutes"], 1);
    assert_eq!(stats["routing"]["messagesByType"]["offer"], 0);
}

#[tokio::test]
async fn test_signal_before_auth_is_refused() {
    let (_server, addr) = start_test_server().await;
    let (mut ws, _) = connect(addr).await;

    send_json(
        &mut ws,
        &json!({ "type": "offer", "from": "alice", "to": "bob", "data": {} }),
    )
    .await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "UNAUTHENTICATED");

    let stats: serde_json::Value = reqwest::get(format!("http://{addr}/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["routing"]["totalMessages"], 0);
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let (_server, addr) = start_test_server().await;
    let mut alice = connect_as(addr, "alice").await;

    send_text(&mut alice, "{not json").await;
    let reply = next_json(&mut alice).await;
    assert_eq!(reply["code"], "MALFORMED_FRAME");

    send_json(&mut alice, &json!({ "type": "ping" })).await;
    assert_eq!(next_json(&mut alice).await["type"], "pong");
}

#[tokio::test]
async fn test_oversized_frame_is_answered_and_connection_stays_open() {
    let (_server, addr) = start_test_server().await;
    let mut alice = connect_as(addr, "alice").await;

    let padding = "x".repeat(200 * 1024);
    send_json(
        &mut alice,
        &json!({ "type": "offer", "from": "alice", "to": "bob", "data": { "sdp": padding } }),
    )
    .await;
    let reply = next_json(&mut alice).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "MESSAGE_TOO_LARGE");

    send_json(&mut alice, &json!({ "type": "ping" })).await;
    assert_eq!(next_json(&mut alice).await["type"], "pong");
}

#[tokio::test]
async fn test_invalid_token_closes_with_4001() {
    let (_server, addr) = start_test_server().await;
    let (mut ws, _) = connect(addr).await;

    send_json(&mut ws, &json!({ "type": "auth", "token": "not-a-jwt" })).await;

    let (code, frames) = expect_close(&mut ws).await;
    assert_eq!(code, Some(4001));
    assert_eq!(frames[0]["type"], "auth-error");
    assert_eq!(frames[0]["code"], "MALFORMED");
}

#[tokio::test]
async fn test_expired_token_closes_with_4001() {
    let (_server, addr) = start_test_server().await;
    let (mut ws, _) = connect(addr).await;

    let expired = mint_token_with_ttl("alice", -3600);
    send_json(&mut ws, &json!({ "type": "auth", "token": expired })).await;

    let (code, frames) = expect_close(&mut ws).await;
    assert_eq!(code, Some(4001));
    assert_eq!(frames[0]["code"], "EXPIRED");
}

#[tokio::test]
async fn test_claimed_identity_must_match_token() {
    let (_server, addr) = start_test_server().await;
    let (mut ws, _) = connect(addr).await;

    send_json(
        &mut ws,
        &json!({ "type": "auth", "token": mint_token("alice"), "userId": "bob" }),
    )
    .await;

    let (code, frames) = expect_close(&mut ws).await;
    assert_eq!(code, Some(4001));
    assert_eq!(frames[0]["type"], "auth-error");
}

#[tokio::test]
async fn test_handshake_token_authenticates_on_upgrade() {
    let (_server, addr) = start_test_server().await;
    let (mut ws, _) = connect_with_token(addr, &mint_token("alice")).await;

    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "auth-success");
    assert_eq!(reply["userId"], "alice");
}

#[tokio::test]
async fn test_auth_refresh_keeps_identity() {
    let (_server, addr) = start_test_server().await;
    let mut alice = connect_as(addr, "alice").await;

    send_json(
        &mut alice,
        &json!({ "type": "auth-refresh", "token": mint_token("alice") }),
    )
    .await;
    let reply = next_json(&mut alice).await;
    assert_eq!(reply["type"], "auth-success");
    assert_eq!(reply["userId"], "alice");

    // A token for somebody else is refused and the connection closes.
    send_json(
        &mut alice,
        &json!({ "type": "auth-refresh", "token": mint_token("bob") }),
    )
    .await;
    let (code, frames) = expect_close(&mut alice).await;
    assert_eq!(code, Some(4001));
    assert_eq!(frames[0]["code"], "UNTRUSTED");
}

#[tokio::test]
async fn test_auth_timeout_closes_with_4002() {
    let (_server, addr) = start_test_server_with_config(ServerConfig {
        auth_timeout: Duration::from_millis(300),
        ..test_server_config()
    })
    .await;
    let (mut ws, _) = connect(addr).await;

    let (code, frames) = expect_close(&mut ws).await;
    assert_eq!(code, Some(4002));
    assert_eq!(frames[0]["code"], "AUTHENTICATION_TIMEOUT");
}

#[tokio::test]
async fn test_authenticated_connection_survives_auth_deadline() {
    let (_server, addr) = start_test_server_with_config(ServerConfig {
        auth_timeout: Duration::from_millis(300),
        ..test_server_config()
    })
    .await;
    let (mut ws, _) = connect(addr).await;
    assert_eq!(authenticate(&mut ws, "alice").await["type"], "auth-success");

    tokio::time::sleep(Duration::from_millis(600)).await;
    send_json(&mut ws, &json!({ "type": "ping" })).await;
    assert_eq!(next_json(&mut ws).await["type"], "pong");
}

#[tokio::test]
async fn test_silent_connection_is_evicted_with_4008() {
    let (_server, addr) = start_test_server_with_config(ServerConfig {
        heartbeat_interval: Duration::from_millis(200),
        ..test_server_config()
    })
    .await;
    let mut alice = connect_as(addr, "alice").await;

    // Never answer the probes.
    let (code, frames) = expect_close(&mut alice).await;
    assert_eq!(code, Some(4008));
    assert!(frames.iter().any(|f| f["type"] == "ping"));
}

#[tokio::test]
async fn test_connection_limit_per_ip() {
    let (_server, addr) = start_test_server_with_config(ServerConfig {
        max_connections_per_ip: 1,
        ..test_server_config()
    })
    .await;
    let (_first, _) = connect(addr).await;

    let (mut second, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("upgrade should succeed before the limit is applied");
    let (code, frames) = expect_close(&mut second).await;
    assert_eq!(code, Some(4029));
    assert_eq!(frames[0]["code"], "TOO_MANY_CONNECTIONS");
}

#[tokio::test]
async fn test_presence_endpoint_tracks_last_seen() {
    let (_server, addr) = start_test_server().await;
    let bob = connect_as(addr, "bob").await;
    let url = format!("http://{addr}/presence/bob");

    let online: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(online["online"], true);
    assert_eq!(online["connections"].as_array().map(Vec::len), Some(1));
    assert!(online.get("lastSeen").is_none());

    drop(bob);

    let mut offline = serde_json::Value::Null;
    for _ in 0..50 {
        offline = reqwest::get(&url).await.unwrap().json().await.unwrap();
        if offline["online"] == false && offline.get("lastSeen").is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(offline["online"], false);
    assert!(offline["lastSeen"].is_string());
}

#[tokio::test]
async fn test_stats_reset_clears_routing_counters() {
    let (_server, addr) = start_test_server().await;
    let mut alice = connect_as(addr, "alice").await;

    send_json(
        &mut alice,
        &json!({ "type": "hangup", "from": "alice", "to": "nobody", "data": {} }),
    )
    .await;
    assert_eq!(next_json(&mut alice).await["type"], "target-offline");
    wait_for_stats(addr, |s| s["routing"]["totalMessages"] == 1).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/stats/reset"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let stats = wait_for_stats(addr, |s| s["routing"]["totalMessages"] == 0).await;
    assert_eq!(stats["recentRoutingRecords"].as_array().map(Vec::len), Some(0));
    // Connection gauges are not statistics and survive a reset.
    assert_eq!(stats["authenticatedUsers"], 1);
}

#[tokio::test]
async fn test_metrics_endpoints_require_bearer_token() {
    let (_server, addr) = start_test_server_with_config(ServerConfig {
        require_metrics_auth: true,
        metrics_auth_token: Some("metrics-secret".into()),
        ..test_server_config()
    })
    .await;
    let client = reqwest::Client::new();

    let denied = client
        .get(format!("http://{addr}/stats"))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);

    let allowed = client
        .get(format!("http://{addr}/stats"))
        .bearer_auth("metrics-secret")
        .send()
        .await
        .unwrap();
    assert!(allowed.status().is_success());

    let prom = client
        .get(format!("http://{addr}/metrics/prom"))
        .bearer_auth("metrics-secret")
        .send()
        .await
        .unwrap();
    assert!(prom.status().is_success());
    let body = prom.text().await.unwrap();
    assert!(body.contains("peerlink_connections_active"));
    assert!(body.contains("peerlink_routing_messages_total"));
}

#[tokio::test]
async fn test_shutdown_closes_clients_with_going_away() {
    let (server, addr) = start_test_server().await;
    let mut alice = connect_as(addr, "alice").await;

    server.shutdown().await;

    let (code, _) = expect_close(&mut alice).await;
    assert_eq!(code, Some(1001));
    assert!(!server.health_check());
}

#[tokio::test]
async fn test_connections_after_shutdown_are_refused_with_going_away() {
    let (server, addr) = start_test_server().await;
    server.shutdown().await;

    let (mut late, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("upgrade is still served while draining");
    let (code, frames) = expect_close(&mut late).await;
    assert_eq!(code, Some(1001));
    assert!(frames.is_empty(), "no welcome expected: {frames:?}");
    assert_eq!(server.registry().connection_count(), 0);
}
