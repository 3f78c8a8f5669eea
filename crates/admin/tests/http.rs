// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the admin HTTP API.
//!
//! Uses `axum_test::TestServer` with a shell script standing in for the
//! VPN agent and a recording fake for the device service.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::{TestResponse, TestServer};

use gwadmin::session::cookies::{DEVICE_COOKIE, SESSION_COOKIE};
use gwadmin::test_support::{fake_token, AdminBuilder, AnyhowExt, TestAdmin};
use gwadmin::token::TokenClaims;
use gwadmin::transport::build_router;

const AGENT_WITH_URL: &str = "echo \"Please visit https://sso.example/abc123\"\nsleep 30\n";

fn test_server(admin: &TestAdmin) -> anyhow::Result<TestServer> {
    TestServer::new(build_router(Arc::clone(&admin.state))).anyhow()
}

fn error_code(resp: &TestResponse) -> String {
    let body: serde_json::Value = resp.json();
    body["error"]["code"].as_str().unwrap_or_default().to_owned()
}

async fn password_login(server: &TestServer) -> TestResponse {
    server
        .post("/auth/login")
        .json(&serde_json::json!({ "username": "admin", "password": "hunter2" }))
        .await
}

/// Poll the status endpoint until it reports something other than pending.
async fn poll_until_settled(server: &TestServer, flow_id: &str) -> anyhow::Result<serde_json::Value> {
    for _ in 0..200 {
        let body: serde_json::Value =
            server.get("/auth/sso/status").add_query_param("flow_id", flow_id).await.json();
        if body["authenticated"] == true || !body["error"].is_null() {
            return Ok(body);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    anyhow::bail!("flow {flow_id} never settled")
}

#[tokio::test]
async fn health_reports_flows_and_token() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?.build()?;
    let server = test_server(&admin)?;

    let resp = server.get("/api/v1/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "running");
    assert_eq!(body["login_flows"], 0);
    assert_eq!(body["token_present"], false);
    Ok(())
}

#[tokio::test]
async fn guarded_routes_require_a_session() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?.build()?;
    let server = test_server(&admin)?;

    let resp = server.get("/api/v1/me").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&resp), "UNAUTHORIZED");
    Ok(())
}

#[tokio::test]
async fn password_login_opens_a_session() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?.build()?;
    let server = test_server(&admin)?;

    let bad = server
        .post("/auth/login")
        .json(&serde_json::json!({ "username": "admin", "password": "wrong" }))
        .await;
    bad.assert_status(StatusCode::UNAUTHORIZED);

    let resp = password_login(&server).await;
    resp.assert_status_ok();
    let session = resp.cookie(SESSION_COOKIE);

    let me = server.get("/api/v1/me").add_cookie(session.clone()).await;
    me.assert_status_ok();
    let body: serde_json::Value = me.json();
    assert_eq!(body["session"]["user"], "admin");
    assert_eq!(body["session"]["sso_complete"], false);

    // Logout drops the session.
    server.post("/auth/logout").add_cookie(session.clone()).await.assert_status_ok();
    server.get("/api/v1/me").add_cookie(session).await.assert_status(StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn sso_login_binds_device_and_detects_refresh_elsewhere() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?.agent_script(AGENT_WITH_URL)?.org("acme").build()?;
    let server = test_server(&admin)?;

    let start = server.post("/auth/sso/start").json(&serde_json::json!({})).await;
    start.assert_status_ok();
    let started: serde_json::Value = start.json();
    assert_eq!(started["login_url"], "https://sso.example/abc123");
    assert_eq!(started["org"], "acme");
    let flow_id = started["flow_id"].as_str().unwrap_or_default().to_owned();

    let pending: serde_json::Value =
        server.get("/auth/sso/status").add_query_param("flow_id", &flow_id).await.json();
    assert_eq!(pending, serde_json::json!({ "authenticated": false, "error": null }));

    admin.write_token(&serde_json::json!({ "sub": "a@b.com", "iat": 100 }))?;
    let settled = poll_until_settled(&server, &flow_id).await?;
    assert_eq!(settled, serde_json::json!({ "authenticated": true, "error": null }));

    let callback =
        server.post("/auth/sso/callback").json(&serde_json::json!({ "flow_id": flow_id })).await;
    callback.assert_status_ok();
    let session = callback.cookie(SESSION_COOKIE);
    let device = callback.cookie(DEVICE_COOKIE);
    let body: serde_json::Value = callback.json();
    assert_eq!(body["user"], "a@b.com");
    assert_eq!(body["claims"]["iat"], 100);
    assert_eq!(body["claims"]["device_id"], device.value());

    let me = server.get("/api/v1/me").add_cookie(session.clone()).add_cookie(device.clone()).await;
    me.assert_status_ok();
    let me: serde_json::Value = me.json();
    assert_eq!(me["session"]["remembered_issued_at"], 100);

    // Without its device cookie the same session is refused.
    let wrong = server.get("/api/v1/me").add_cookie(session.clone()).await;
    wrong.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&wrong), "WRONG_DEVICE");

    // The flow can only be completed once.
    server
        .post("/auth/sso/callback")
        .json(&serde_json::json!({ "flow_id": flow_id }))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    admin.state.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn token_already_on_disk_does_not_complete_a_new_login() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?.agent_script(AGENT_WITH_URL)?.org("acme").build()?;
    let server = test_server(&admin)?;

    let owner = password_login(&server).await.cookie(SESSION_COOKIE);
    let token = fake_token(&serde_json::json!({ "sub": "owner@corp", "iat": 100 }));
    server
        .post("/api/v1/token")
        .add_cookie(owner)
        .json(&serde_json::json!({ "token": token }))
        .await
        .assert_status_ok();

    let started: serde_json::Value =
        server.post("/auth/sso/start").json(&serde_json::json!({})).await.json();
    let flow_id = started["flow_id"].as_str().unwrap_or_default().to_owned();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status: serde_json::Value =
        server.get("/auth/sso/status").add_query_param("flow_id", &flow_id).await.json();
    assert_eq!(status, serde_json::json!({ "authenticated": false, "error": null }));

    let callback =
        server.post("/auth/sso/callback").json(&serde_json::json!({ "flow_id": flow_id })).await;
    callback.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(error_code(&callback), "LOGIN_FAILED");
    assert!(callback.maybe_cookie(SESSION_COOKIE).is_none());
    assert_eq!(admin.state.sessions.len().await, 1);
    assert!(admin.service.calls().is_empty());

    admin.state.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn refreshed_token_logs_session_out() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?.agent_script(AGENT_WITH_URL)?.org("acme").build()?;
    let server = test_server(&admin)?;

    let started: serde_json::Value =
        server.post("/auth/sso/start").json(&serde_json::json!({})).await.json();
    let flow_id = started["flow_id"].as_str().unwrap_or_default().to_owned();
    admin.write_token(&serde_json::json!({ "sub": "a@b.com", "iat": 100 }))?;
    poll_until_settled(&server, &flow_id).await?;
    let callback =
        server.post("/auth/sso/callback").json(&serde_json::json!({ "flow_id": flow_id })).await;
    let session = callback.cookie(SESSION_COOKIE);
    let device = callback.cookie(DEVICE_COOKIE);

    // A login from another browser rewrites the claims with a new iat.
    let elsewhere = TokenClaims {
        iat: Some(200),
        device_id: Some("other-browser".to_owned()),
        ..TokenClaims::default()
    };
    admin.state.tokens.persist_claims(&elsewhere)?;

    let resp = server.get("/api/v1/me").add_cookie(session.clone()).add_cookie(device.clone()).await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&resp), "LOGGED_IN_ELSEWHERE");
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["message"], "You were logged in elsewhere");

    // The session is gone for good.
    let again = server.get("/api/v1/me").add_cookie(session).add_cookie(device).await;
    assert_eq!(error_code(&again), "UNAUTHORIZED");

    admin.state.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn start_without_org_is_rejected() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?.agent_script(AGENT_WITH_URL)?.build()?;
    let server = test_server(&admin)?;

    let resp = server.post("/auth/sso/start").json(&serde_json::json!({})).await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["message"], "Please set the organization name first.");
    Ok(())
}

#[tokio::test]
async fn failed_start_hides_output_from_anonymous_callers() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?
        .agent_script("echo 'error: secret-org does not exist' >&2\nexit 1\n")?
        .org("secret-org")
        .build()?;
    let server = test_server(&admin)?;

    let anonymous = server.post("/auth/sso/start").json(&serde_json::json!({})).await;
    anonymous.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(error_code(&anonymous), "LOGIN_FAILED");
    let body: serde_json::Value = anonymous.json();
    let message = body["error"]["message"].as_str().unwrap_or_default();
    assert!(message.contains("exit code 1"), "{message}");
    assert!(!message.contains("does not exist"), "{message}");

    let session = password_login(&server).await.cookie(SESSION_COOKIE);
    let admin_resp =
        server.post("/auth/sso/start").add_cookie(session).json(&serde_json::json!({})).await;
    let body: serde_json::Value = admin_resp.json();
    let message = body["error"]["message"].as_str().unwrap_or_default();
    assert!(message.contains("does not exist"), "{message}");
    Ok(())
}

#[tokio::test]
async fn only_an_admin_may_choose_the_org_at_start() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?.agent_script(AGENT_WITH_URL)?.build()?;
    let server = test_server(&admin)?;

    let anonymous =
        server.post("/auth/sso/start").json(&serde_json::json!({ "org": "intruder" })).await;
    anonymous.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&anonymous), "UNAUTHORIZED");
    assert_eq!(admin.state.org.get(), "");
    assert!(admin.state.login.registry().is_empty());

    let session = password_login(&server).await.cookie(SESSION_COOKIE);
    let resp = server
        .post("/auth/sso/start")
        .add_cookie(session.clone())
        .json(&serde_json::json!({ "org": "acme" }))
        .await;
    resp.assert_status_ok();
    assert_eq!(admin.state.org.get(), "acme");

    let locked = server
        .post("/auth/sso/start")
        .add_cookie(session)
        .json(&serde_json::json!({ "org": "globex" }))
        .await;
    locked.assert_status(StatusCode::CONFLICT);
    assert_eq!(error_code(&locked), "ORG_LOCKED");

    // Naming the org that is already bound needs no session.
    let bound = server.post("/auth/sso/start").json(&serde_json::json!({ "org": "acme" })).await;
    bound.assert_status_ok();

    admin.state.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn status_of_unknown_or_malformed_flow_is_pending() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?.build()?;
    admin.write_token(&serde_json::json!({ "iat": 1 }))?;
    let server = test_server(&admin)?;

    for flow_id in ["never-registered-flow-000001", "short"] {
        let body: serde_json::Value =
            server.get("/auth/sso/status").add_query_param("flow_id", flow_id).await.json();
        assert_eq!(body, serde_json::json!({ "authenticated": false, "error": null }));
    }
    Ok(())
}

#[tokio::test]
async fn org_lock_and_reset() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?.build()?;
    let server = test_server(&admin)?;
    let session = password_login(&server).await.cookie(SESSION_COOKIE);

    let set = server
        .put("/api/v1/org")
        .add_cookie(session.clone())
        .json(&serde_json::json!({ "org": "acme" }))
        .await;
    set.assert_status_ok();
    let body: serde_json::Value = set.json();
    assert_eq!(body, serde_json::json!({ "org": "acme", "locked": true }));

    let conflict = server
        .put("/api/v1/org")
        .add_cookie(session.clone())
        .json(&serde_json::json!({ "org": "globex" }))
        .await;
    conflict.assert_status(StatusCode::CONFLICT);

    admin.write_token(&serde_json::json!({ "iat": 5 }))?;
    let reset = server.delete("/api/v1/org").add_cookie(session.clone()).await;
    reset.assert_status_ok();
    let body: serde_json::Value = reset.json();
    assert_eq!(body["org_removed"], true);
    assert_eq!(body["service_stopped"], true);
    assert_eq!(body["token_removed"], true);
    assert_eq!(admin.service.calls(), vec!["stop"]);

    let get: serde_json::Value = server.get("/api/v1/org").add_cookie(session).await.json();
    assert_eq!(get, serde_json::json!({ "org": "", "locked": false }));
    Ok(())
}

#[tokio::test]
async fn uploaded_token_is_stored_and_decoded() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?.build()?;
    let server = test_server(&admin)?;
    let session = password_login(&server).await.cookie(SESSION_COOKIE);

    let empty = server
        .post("/api/v1/token")
        .add_cookie(session.clone())
        .json(&serde_json::json!({ "token": "  " }))
        .await;
    empty.assert_status(StatusCode::BAD_REQUEST);

    let token = fake_token(&serde_json::json!({ "user_email": "ops@acme.io", "iat": 42 }));
    let resp = server
        .post("/api/v1/token")
        .add_cookie(session.clone())
        .json(&serde_json::json!({ "token": token }))
        .await;
    resp.assert_status_ok();
    let device = resp.cookie(DEVICE_COOKIE);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["saved"], true);
    assert_eq!(body["token_erase_in_secs"], 3600);
    assert_eq!(body["claims"]["user_email"], "ops@acme.io");
    assert_eq!(body["claims"]["device_id"], device.value());

    assert_eq!(admin.state.tokens.read_token().as_deref(), Some(token.as_str()));
    let me: serde_json::Value =
        server.get("/api/v1/me").add_cookie(session).add_cookie(device).await.json();
    assert_eq!(me["claims"]["iat"], 42);
    assert_eq!(me["token_present"], true);
    Ok(())
}

#[tokio::test]
async fn vpn_status_and_restart_use_the_service() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?.build()?;
    let server = test_server(&admin)?;
    let session = password_login(&server).await.cookie(SESSION_COOKIE);

    let status: serde_json::Value =
        server.get("/api/v1/vpn/status").add_cookie(session.clone()).await.json();
    assert_eq!(status["active"], true);

    server.post("/api/v1/vpn/restart").add_cookie(session).await.assert_status_ok();
    assert_eq!(admin.service.calls(), vec!["status", "restart"]);
    Ok(())
}

#[tokio::test]
async fn exit_nodes_come_from_agent_state() -> anyhow::Result<()> {
    let state_json = r#"{"exit_node":"eu-1","peers":[{"name":"edge","services":[{"name":"eu-1","type":"exit_node","dns_name":"eu-1.example"},{"name":"ssh","type":"ssh"}]}]}"#;
    let script = format!(
        "if [ \"$1 $2\" = \"node state\" ]; then echo '{state_json}'; exit 0; fi\n\
         if [ \"$1 $2 $3\" = \"node exitnode unset\" ]; then echo '{{\"message\":\"exit node cleared\"}}'; exit 0; fi\n\
         exit 1\n"
    );
    let admin = AdminBuilder::new()?.agent_script(&script)?.build()?;
    let server = test_server(&admin)?;
    let session = password_login(&server).await.cookie(SESSION_COOKIE);

    let nodes: serde_json::Value =
        server.get("/api/v1/vpn/exit-nodes").add_cookie(session.clone()).await.json();
    assert_eq!(nodes["service_active"], true);
    assert_eq!(nodes["current"], "eu-1");
    assert_eq!(nodes["exit_nodes"].as_array().map(Vec::len), Some(1));
    assert_eq!(nodes["exit_nodes"][0]["peer_name"], "edge");

    let cleared: serde_json::Value = server
        .put("/api/v1/vpn/exit-node")
        .add_cookie(session.clone())
        .json(&serde_json::json!({ "exit_node": "none" }))
        .await
        .json();
    assert_eq!(cleared["message"], "exit node cleared");
    assert!(cleared["exit_node"].is_null());

    let flag = server
        .put("/api/v1/vpn/exit-node")
        .add_cookie(session.clone())
        .json(&serde_json::json!({ "exit_node": "--json" }))
        .await;
    flag.assert_status(StatusCode::BAD_REQUEST);

    admin.service.set_active(false);
    let idle: serde_json::Value =
        server.get("/api/v1/vpn/exit-nodes").add_cookie(session).await.json();
    assert_eq!(idle["service_active"], false);
    assert_eq!(idle["exit_nodes"], serde_json::json!([]));
    Ok(())
}

#[tokio::test]
async fn agent_version_reports_and_caches_current() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?.agent_script("echo 'border0 version: v1.4.0'\n")?.build()?;
    let server = test_server(&admin)?;
    let session = password_login(&server).await.cookie(SESSION_COOKIE);

    let resp = server.get("/api/v1/agent/version").add_cookie(session).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["current_version"], "v1.4.0");
    assert_eq!(body["update_available"], false);
    assert!(admin.path("version_cache.json").exists());
    Ok(())
}

#[tokio::test]
async fn agent_version_fails_without_agent() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?.build()?;
    let server = test_server(&admin)?;
    let session = password_login(&server).await.cookie(SESSION_COOKIE);

    let resp = server.get("/api/v1/agent/version").add_cookie(session).await;
    resp.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(error_code(&resp), "AGENT_ERROR");
    Ok(())
}

#[tokio::test]
async fn upgrade_streams_events_until_done() -> anyhow::Result<()> {
    let script = "if [ \"$1\" = \"--version\" ]; then echo 'version: v2.0.0'; exit 0; fi\n\
                  echo '[==>       ] 10%'\n";
    let admin = AdminBuilder::new()?.agent_script(script)?.build()?;
    let server = test_server(&admin)?;
    let session = password_login(&server).await.cookie(SESSION_COOKIE);

    let resp = server.post("/api/v1/agent/upgrade").add_cookie(session).await;
    resp.assert_status_ok();
    let body = resp.text();
    assert!(body.contains("event: start"), "{body}");
    assert!(body.contains("event: progress\ndata: {\"percent\":10.0}"), "{body}");
    assert!(
        body.contains("event: done\ndata: {\"status\":\"success\",\"version\":\"v2.0.0\"}"),
        "{body}"
    );
    let cache: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(admin.path("version_cache.json"))?)?;
    assert_eq!(cache["current_version"], "v2.0.0");
    Ok(())
}

#[tokio::test]
async fn second_upgrade_is_refused_while_one_runs() -> anyhow::Result<()> {
    let admin = AdminBuilder::new()?.agent_script("exit 0\n")?.build()?;
    let server = test_server(&admin)?;
    let session = password_login(&server).await.cookie(SESSION_COOKIE);

    let running = admin.state.version.try_begin_upgrade();
    assert!(running.is_some());
    let resp = server.post("/api/v1/agent/upgrade").add_cookie(session).await;
    resp.assert_status(StatusCode::CONFLICT);
    assert_eq!(error_code(&resp), "UPGRADE_IN_PROGRESS");
    Ok(())
}
