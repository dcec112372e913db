use crate::helpers::{send_email_body, spawn_app, spawn_app_with};

#[tokio::test]
async fn valid_request_relays_the_verification_email() {
    let test_app = spawn_app().await;

    let response = test_app.post_send_email(&send_email_body("user@example.com")).await;

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);

    let delivered = test_app.transport.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].contains("user@example.com"));
    assert!(delivered[0].contains("482913"));
    assert!(delivered[0].contains("Your verification code"));
}

#[tokio::test]
async fn caller_supplied_display_name_is_used_for_the_sender() {
    let test_app = spawn_app().await;

    let mut body = send_email_body("user@example.com");
    body["from"] = serde_json::json!("Acme Support");
    let response = test_app.post_send_email(&body).await;

    assert_eq!(response.status().as_u16(), 200);
    let delivered = test_app.transport.delivered();
    assert!(delivered[0].contains("Acme Support"));
    // The mailbox itself is always the configured relay identity.
    assert!(delivered[0].contains("relay@example.com"));
}

#[tokio::test]
async fn requests_with_missing_fields_are_rejected_without_a_delivery_attempt() {
    let test_app = spawn_app().await;

    let cases = vec![
        (serde_json::json!({ "subject": "s", "code": "1" }), "missing to"),
        (serde_json::json!({ "to": "a@example.com", "code": "1" }), "missing subject"),
        (serde_json::json!({ "to": "a@example.com", "subject": "s" }), "missing code"),
        (
            serde_json::json!({ "to": "b@example.com", "subject": "", "code": "1" }),
            "empty subject",
        ),
        (serde_json::json!({}), "empty body"),
    ];

    for (body, description) in cases {
        let response = test_app.post_send_email(&body).await;
        assert_eq!(
            response.status().as_u16(),
            400,
            "The API did not return 400 Bad Request when the payload was {}",
            description
        );
    }

    assert_eq!(test_app.transport.calls(), 0);
}

#[tokio::test]
async fn malformed_json_bodies_get_a_structured_400() {
    let test_app = spawn_app().await;

    let response = test_app
        .client
        .post(test_app.url("/send-email"))
        .header("X-API-Key", &test_app.api_key)
        .header("Content-Type", "application/json")
        .body("{ this is not json")
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.expect("Error body was not JSON");
    assert!(body["error"].is_string());
    assert_eq!(test_app.transport.calls(), 0);
}

#[tokio::test]
async fn syntactically_invalid_recipient_is_rejected() {
    let test_app = spawn_app().await;

    let response = test_app.post_send_email(&send_email_body("not-an-address")).await;

    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(test_app.transport.calls(), 0);
}

#[tokio::test]
async fn requests_without_an_api_key_are_rejected() {
    let test_app = spawn_app().await;

    let response =
        test_app.post_send_email_without_key(&send_email_body("user@example.com")).await;

    assert_eq!(response.status().as_u16(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Unauthorized");
    assert_eq!(test_app.transport.calls(), 0);
}

#[tokio::test]
async fn requests_with_a_wrong_api_key_are_rejected() {
    let test_app = spawn_app().await;

    let response = test_app
        .client
        .post(test_app.url("/send-email"))
        .header("X-API-Key", "not-the-key")
        .json(&send_email_body("user@example.com"))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(test_app.transport.calls(), 0);
}

#[tokio::test]
async fn unauthorized_requests_do_not_consume_the_rate_limit_budget() {
    let test_app = spawn_app().await;

    for _ in 0..5 {
        let response =
            test_app.post_send_email_without_key(&send_email_body("user@example.com")).await;
        assert_eq!(response.status().as_u16(), 401);
    }

    // The full budget of 3 is still available to the authorized caller.
    for _ in 0..3 {
        let response = test_app.post_send_email(&send_email_body("user@example.com")).await;
        assert_eq!(response.status().as_u16(), 200);
    }
}

#[tokio::test]
async fn transient_upstream_failures_are_retried_transparently() {
    let test_app = spawn_app_with(|settings| {
        settings.security.retry_attempts = 2;
        settings.security.retry_delay_ms = 10;
    })
    .await;
    test_app.transport.fail_next(2);

    let response = test_app.post_send_email(&send_email_body("user@example.com")).await;

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(test_app.transport.calls(), 3);
    assert_eq!(test_app.transport.delivered().len(), 1);
}

#[tokio::test]
async fn exhausted_retries_surface_as_a_delivery_failure() {
    let test_app = spawn_app_with(|settings| {
        settings.security.retry_attempts = 2;
        settings.security.retry_delay_ms = 10;
    })
    .await;
    test_app.transport.fail_always();

    let response = test_app.post_send_email(&send_email_body("user@example.com")).await;

    assert_eq!(response.status().as_u16(), 500);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Failed to send email");
    assert!(body["details"].is_string());
    // One initial attempt plus two retries.
    assert_eq!(test_app.transport.calls(), 3);
}
