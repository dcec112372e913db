use std::time::Duration;

use crate::helpers::{send_email_body, spawn_app_with, TestApp};

async fn spawn_busy_app(max_concurrent: usize, block_for: Duration) -> TestApp {
    let test_app = spawn_app_with(|settings| {
        settings.security.max_concurrent = max_concurrent;
        settings.security.request_timeout_ms = 5_000;
        // Plenty of rate-limit headroom so only admission is exercised.
        settings.security.rate_limit_max = 100;
    })
    .await;
    test_app.transport.block_for(block_for);
    test_app
}

#[tokio::test]
async fn requests_beyond_the_concurrency_cap_are_rejected_immediately() {
    let test_app = spawn_busy_app(1, Duration::from_millis(500)).await;

    let first = {
        let test_app = test_app.clone();
        tokio::spawn(
            async move { test_app.post_send_email(&send_email_body("a@example.com")).await },
        )
    };
    // Let the first request claim its slot before firing the second.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let second = test_app.post_send_email(&send_email_body("b@example.com")).await;
    assert_eq!(second.status().as_u16(), 429);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["retryAfter"], 5);
    assert_eq!(body["message"], "The server is busy, please retry shortly");

    let first = first.await.unwrap();
    assert_eq!(first.status().as_u16(), 200);

    // The slot is free again once the in-flight request completes.
    let third = test_app.post_send_email(&send_email_body("c@example.com")).await;
    assert_eq!(third.status().as_u16(), 200);
}

#[tokio::test]
async fn slow_deliveries_time_out_with_408() {
    let test_app = spawn_app_with(|settings| {
        settings.security.request_timeout_ms = 200;
        settings.security.rate_limit_max = 100;
    })
    .await;
    test_app.transport.block_for(Duration::from_secs(30));

    let response = test_app.post_send_email(&send_email_body("user@example.com")).await;

    assert_eq!(response.status().as_u16(), 408);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Request timeout");
}

#[tokio::test]
async fn the_in_flight_counter_returns_to_zero_on_every_path() {
    let test_app = spawn_app_with(|settings| {
        settings.security.request_timeout_ms = 200;
        settings.security.rate_limit_max = 100;
    })
    .await;

    // Success path.
    let response = test_app.post_send_email(&send_email_body("a@example.com")).await;
    assert_eq!(response.status().as_u16(), 200);

    // Failure path.
    test_app.transport.fail_always();
    let response = test_app.post_send_email(&send_email_body("b@example.com")).await;
    assert_eq!(response.status().as_u16(), 500);

    // Timeout path.
    test_app.transport.block_for(Duration::from_secs(30));
    let response = test_app.post_send_email(&send_email_body("c@example.com")).await;
    assert_eq!(response.status().as_u16(), 408);

    let health: serde_json::Value = test_app.get_health().await.json().await.unwrap();
    assert_eq!(health["security"]["inFlight"], 0);
}

#[tokio::test]
async fn throttled_requests_still_complete_within_the_deadline() {
    let test_app = spawn_app_with(|settings| {
        settings.security.throttle_enabled = true;
        settings.security.throttle_delay_ms = 50;
        settings.security.request_timeout_ms = 2_000;
    })
    .await;

    let started = std::time::Instant::now();
    let response = test_app.post_send_email(&send_email_body("user@example.com")).await;

    assert_eq!(response.status().as_u16(), 200);
    assert!(started.elapsed() >= Duration::from_millis(50));
}
