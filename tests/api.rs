//! HTTP-level tests: envelope shape and status-code mapping.

mod common;

use std::time::Duration;

use common::*;
use mailwarm::routes::{build_router, AppState};
use serde_json::json;

async fn start_server(env: &TestEnv) -> String {
    let state = AppState {
        pool: env.pool.clone(),
        manager: env.manager.clone(),
        cipher: env.cipher.clone(),
    };
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn domain_account_payload(email: &str) -> serde_json::Value {
    json!({
        "name": "Warm Corp",
        "email": email,
        "smtp_host": "smtp.warm.test",
        "smtp_port": 587,
        "smtp_secure": false,
        "smtp_password": "domain-pw",
        "imap_host": "imap.warm.test",
        "imap_port": 993,
        "imap_password": "domain-pw",
    })
}

fn lead_account_payload(email: &str) -> serde_json::Value {
    json!({
        "name": "Lead One",
        "email": email,
        "smtp_host": "smtp.leads.test",
        "smtp_port": 587,
        "smtp_secure": false,
        "smtp_password": "lead-pw",
        "imap_host": "imap.leads.test",
        "imap_port": 993,
        "imap_password": "lead-pw",
    })
}

#[tokio::test]
async fn account_crud_and_duplicate_email() {
    let env = test_env(instant_timing()).await;
    let base = start_server(&env).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/accounts/domain"))
        .json(&domain_account_payload("warm@corp.test"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    let id = body["data"]["id"].as_str().unwrap().to_string();
    // secrets never serialise back out
    assert!(body["data"].get("smtp_password_encrypted").is_none());

    // duplicate email -> 409
    let res = client
        .post(format!("{base}/accounts/domain"))
        .json(&domain_account_payload("warm@corp.test"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 409);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("already exists"));

    // fetch and list
    let res = client
        .get(format!("{base}/accounts/domain/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let res = client
        .get(format!("{base}/accounts/domain"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    // delete, then 404 on refetch
    let res = client
        .delete(format!("{base}/accounts/domain/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let res = client
        .get(format!("{base}/accounts/domain/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn start_without_leads_is_a_client_error() {
    let env = test_env(instant_timing()).await;
    let base = start_server(&env).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/accounts/domain"))
        .json(&domain_account_payload("warm@corp.test"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let res = client
        .post(format!("{base}/warmup/start"))
        .json(&json!({ "domain_account_id": id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn status_of_unknown_domain_is_404() {
    let env = test_env(instant_timing()).await;
    let base = start_server(&env).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{base}/warmup/status/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn stop_with_nothing_running_is_a_no_op() {
    let env = test_env(instant_timing()).await;
    let base = start_server(&env).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/warmup/stop"))
        .json(&json!({ "domain_account_id": "whatever" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert!(body["message"].as_str().unwrap().contains("nothing"));
}

#[tokio::test]
async fn full_run_over_http() {
    let env = test_env(instant_timing()).await;
    let base = start_server(&env).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/accounts/domain"))
        .json(&domain_account_payload("warm@corp.test"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    let domain_id = body["data"]["id"].as_str().unwrap().to_string();

    let res = client
        .post(format!("{base}/accounts/lead"))
        .json(&lead_account_payload("one@leads.test"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let res = client
        .post(format!("{base}/warmup/start"))
        .json(&json!({ "domain_account_id": domain_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    let session_id = body["data"]["id"].as_str().unwrap().to_string();

    // poll the status endpoint until the session completes
    let done = eventually(Duration::from_secs(10), || {
        let client = client.clone();
        let url = format!("{base}/warmup/status/{domain_id}");
        async move {
            let body: serde_json::Value = client
                .get(url)
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            body["data"]["completedToday"] == true
        }
    })
    .await;
    assert!(done, "session never completed over http");

    let res = client
        .get(format!("{base}/warmup/sessions/{session_id}/logs"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    let logs = body["data"].as_array().unwrap();
    assert_eq!(logs.len(), 4);
    assert_eq!(logs[0]["direction"], "sent");
    assert_eq!(logs[3]["direction"], "received");

    let res = client
        .get(format!("{base}/warmup/logs?limit=2"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let res = client
        .get(format!("{base}/warmup/sessions?domain_account_id={domain_id}"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn healthz_responds() {
    let env = test_env(instant_timing()).await;
    let base = start_server(&env).await;
    let res = reqwest::get(format!("{base}/healthz")).await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "ok");
}
