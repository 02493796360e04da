mod common;

use actix_web::http::StatusCode;
use actix_web::{test, App, HttpServer};
use chrono::Utc;
use serde_json::json;

use common::{
    bearer, claims_for_subject, login, register_and_login_user, send, sign, test_config,
    TestContext, PASSWORD,
};
use task_manager::store::Store;

#[actix_web::test]
async fn test_health_is_public() {
    let ctx = TestContext::new();
    let app = test::init_service(ctx.app()).await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let reply = send(&app, req).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "ok");
    assert_eq!(ctx.store.calls(), 0, "health check must not touch the store");

    let req = test::TestRequest::get().uri("/health/ready").to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["store"], "up");
    assert_eq!(ctx.store.calls(), 1);
}

#[actix_web::test]
async fn test_register_login_and_use_token() {
    let ctx = TestContext::new();
    let app = test::init_service(ctx.app()).await;

    let user = register_and_login_user(&app, "alice@example.com").await;
    assert!(user.id > 0);

    let req = test::TestRequest::get()
        .uri("/api/tasks")
        .append_header(bearer(&user.token))
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::OK, "Body: {}", reply.body);
    assert_eq!(reply.body, json!([]));
}

#[actix_web::test]
async fn test_login_failures() {
    let ctx = TestContext::new();
    let app = test::init_service(ctx.app()).await;
    register_and_login_user(&app, "login@example.com").await;

    let test_cases = vec![
        (
            json!({ "password": PASSWORD }),
            StatusCode::UNPROCESSABLE_ENTITY,
            "missing email",
        ),
        (
            json!({ "email": "not-an-email", "password": PASSWORD }),
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid email format",
        ),
        (
            json!({ "email": "login@example.com", "password": "wrong-password" }),
            StatusCode::UNAUTHORIZED,
            "incorrect password",
        ),
        (
            json!({ "email": "nobody@example.com", "password": PASSWORD }),
            StatusCode::UNAUTHORIZED,
            "non-existent user",
        ),
    ];

    for (payload, expected_status, description) in test_cases {
        let req = test::TestRequest::post()
            .uri("/api/login")
            .set_json(&payload)
            .to_request();
        let reply = send(&app, req).await;
        assert_eq!(
            reply.status, expected_status,
            "Test case failed: {}. Body: {}",
            description, reply.body
        );
    }
}

#[actix_web::test]
async fn test_missing_token_is_rejected() {
    let ctx = TestContext::new();
    let app = test::init_service(ctx.app()).await;

    let req = test::TestRequest::get().uri("/api/tasks").to_request();
    let reply = send(&app, req).await;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.code(), "unauthorized");
    assert_eq!(reply.header("www-authenticate"), Some("Bearer"));
}

#[actix_web::test]
async fn test_expired_token_is_rejected_without_store_access() {
    let ctx = TestContext::new();
    let app = test::init_service(ctx.app()).await;
    let user = register_and_login_user(&app, "expired@example.com").await;
    let stored = ctx
        .store
        .find_user(user.id)
        .await
        .unwrap()
        .expect("registered user is stored");

    let mut claims = claims_for_subject(&stored.subject);
    let now = Utc::now().timestamp() as u64;
    claims.iat = now - 7200;
    claims.exp = now - 3600;
    let token = sign(&claims);

    let calls_before = ctx.store.calls();
    let req = test::TestRequest::get()
        .uri("/api/tasks")
        .append_header(bearer(&token))
        .to_request();
    let reply = send(&app, req).await;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.code(), "expired_token");
    assert_eq!(reply.header("www-authenticate"), Some("Bearer"));
    assert_eq!(
        ctx.store.calls(),
        calls_before,
        "an expired token must be rejected before any store access"
    );
}

#[actix_web::test]
async fn test_expired_token_within_leeway_is_accepted() {
    let ctx = TestContext::with_config(test_config(&[("JWT_LEEWAY_SECS", "120")]));
    let app = test::init_service(ctx.app()).await;
    let user = register_and_login_user(&app, "leeway@example.com").await;
    let stored = ctx.store.find_user(user.id).await.unwrap().unwrap();

    let mut claims = claims_for_subject(&stored.subject);
    claims.exp = Utc::now().timestamp() as u64 - 30;
    let req = test::TestRequest::get()
        .uri("/api/tasks")
        .append_header(bearer(&sign(&claims)))
        .to_request();
    let reply = send(&app, req).await;

    assert_eq!(reply.status, StatusCode::OK, "Body: {}", reply.body);
}

#[actix_web::test]
async fn test_invalid_tokens_are_rejected() {
    let ctx = TestContext::new();
    let app = test::init_service(ctx.app()).await;
    let user = register_and_login_user(&app, "tamper@example.com").await;

    let (signed, signature) = user.token.rsplit_once('.').expect("token has a signature");
    let mut forged: Vec<char> = signature.chars().collect();
    forged[0] = if forged[0] == 'A' { 'B' } else { 'A' };
    let tampered = format!("{}.{}", signed, forged.into_iter().collect::<String>());

    let foreign = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims_for_subject("someone"),
        &jsonwebtoken::EncodingKey::from_secret(b"another-secret"),
    )
    .unwrap();

    let test_cases = vec![
        ("Bearer not.a.jwt".to_string(), "invalid_token", "malformed token"),
        (format!("Bearer {}", tampered), "invalid_token", "tampered signature"),
        (format!("Bearer {}", foreign), "invalid_token", "signed with another key"),
        (format!("Basic {}", user.token), "invalid_token", "wrong scheme"),
    ];

    let calls_before = ctx.store.calls();
    for (header_value, expected_code, description) in test_cases {
        let req = test::TestRequest::get()
            .uri("/api/tasks")
            .append_header(("Authorization", header_value))
            .to_request();
        let reply = send(&app, req).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED, "{}", description);
        assert_eq!(reply.code(), expected_code, "{}", description);
    }
    assert_eq!(ctx.store.calls(), calls_before);
}

#[actix_web::test]
async fn test_token_issuer_must_be_trusted() {
    let ctx = TestContext::new();
    let app = test::init_service(ctx.app()).await;
    let user = register_and_login_user(&app, "issuer@example.com").await;
    let stored = ctx.store.find_user(user.id).await.unwrap().unwrap();

    let mut untrusted = claims_for_subject(&stored.subject);
    untrusted.iss = Some("https://evil.example.com".into());
    let req = test::TestRequest::get()
        .uri("/api/tasks")
        .append_header(bearer(&sign(&untrusted)))
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.code(), "untrusted_issuer");

    let mut missing = claims_for_subject(&stored.subject);
    missing.iss = None;
    let req = test::TestRequest::get()
        .uri("/api/tasks")
        .append_header(bearer(&sign(&missing)))
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.code(), "untrusted_issuer");

    let mut partner = claims_for_subject(&stored.subject);
    partner.iss = Some("partner-idp".into());
    let req = test::TestRequest::get()
        .uri("/api/tasks")
        .append_header(bearer(&sign(&partner)))
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::OK, "Body: {}", reply.body);
}

#[actix_web::test]
async fn test_unknown_subject_is_rejected_and_not_created() {
    let ctx = TestContext::new();
    let app = test::init_service(ctx.app()).await;

    let mut claims = claims_for_subject("ghost-subject");
    claims.email = Some("ghost@example.com".into());
    let req = test::TestRequest::get()
        .uri("/api/tasks")
        .append_header(bearer(&sign(&claims)))
        .to_request();
    let reply = send(&app, req).await;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.code(), "unknown_principal");
    assert!(ctx
        .store
        .find_user_by_subject("ghost-subject")
        .await
        .unwrap()
        .is_none());
}

#[actix_web::test]
async fn test_unknown_subject_is_provisioned_when_enabled() {
    let ctx = TestContext::with_config(test_config(&[("PRINCIPAL_PROVISIONING", "auto")]));
    let app = test::init_service(ctx.app()).await;

    let mut claims = claims_for_subject("federated-subject");
    claims.email = Some("federated@example.com".into());
    claims.given_name = Some("Fed".into());
    claims.family_name = Some("Erated".into());
    let token = sign(&claims);

    for _ in 0..2 {
        let req = test::TestRequest::get()
            .uri("/api/tasks")
            .append_header(bearer(&token))
            .to_request();
        let reply = send(&app, req).await;
        assert_eq!(reply.status, StatusCode::OK, "Body: {}", reply.body);
    }

    let user = ctx
        .store
        .find_user_by_subject("federated-subject")
        .await
        .unwrap()
        .expect("user was provisioned");
    assert_eq!(user.email, "federated@example.com");
    assert_eq!(user.first_name, "Fed");
    assert!(user.password_digest.is_none());

    // Without an email there is nothing to provision from.
    let req = test::TestRequest::get()
        .uri("/api/tasks")
        .append_header(bearer(&sign(&claims_for_subject("anonymous"))))
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.code(), "unknown_principal");
}

#[actix_web::test]
async fn test_deleted_user_loses_access() {
    let ctx = TestContext::new();
    let app = test::init_service(ctx.app()).await;
    let user = register_and_login_user(&app, "leaving@example.com").await;

    let req = test::TestRequest::delete()
        .uri(&format!("/api/users/{}", user.id))
        .append_header(bearer(&user.token))
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let req = test::TestRequest::get()
        .uri("/api/tasks")
        .append_header(bearer(&user.token))
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.code(), "unknown_principal");

    let req = test::TestRequest::post()
        .uri("/api/login")
        .set_json(json!({"email": user.email, "password": PASSWORD}))
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_login_token_carries_subject_and_issuer() {
    let ctx = TestContext::new();
    let app = test::init_service(ctx.app()).await;
    let user = register_and_login_user(&app, "claims@example.com").await;
    let token = login(&app, &user.email, PASSWORD).await;

    let claims = ctx.state.validator.validate(&token).expect("issued token validates");
    let stored = ctx.store.find_user(user.id).await.unwrap().unwrap();
    assert_eq!(claims.sub, stored.subject);
    assert_eq!(claims.iss.as_deref(), Some(common::ISSUER));
    assert_eq!(claims.email.as_deref(), Some("claims@example.com"));
    assert!(claims.exp > claims.iat);
}

#[actix_web::test]
async fn test_protected_route_over_http() {
    let ctx = TestContext::new();
    let state = ctx.state.clone();
    let cors_origins = ctx.config.cors_origins.clone();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(task_manager::cors(&cors_origins))
            .wrap(actix_web::middleware::Logger::default())
            .configure(task_manager::configure(state.clone()))
    })
    .bind(("127.0.0.1", port))
    .expect("Failed to bind server")
    .run();
    let server_handle = actix_web::rt::spawn(server);
    actix_web::rt::time::sleep(std::time::Duration::from_millis(200)).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/tasks", port))
        .json(&json!({"title": "Unauthorized task"}))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(
        resp.status(),
        reqwest::StatusCode::UNAUTHORIZED,
        "Creating a task without a token must be rejected"
    );

    let resp = client
        .get(format!("http://127.0.0.1:{}/api/tasks", port))
        .bearer_auth("garbage")
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = resp.json().await.expect("error body is JSON");
    assert_eq!(body["code"], "invalid_token");

    server_handle.abort();
}
