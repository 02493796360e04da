#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::http::header::{self, HeaderMap};
use actix_web::http::StatusCode;
use actix_web::middleware::Logger;
use actix_web::web::Bytes;
use actix_web::{test, App};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use task_manager::auth::{Claims, TokenIssuer};
use task_manager::config::Config;
use task_manager::models::{
    Actor, NewTask, NewUser, Task, TaskChanges, TaskFilter, User, UserChanges, UserPage,
};
use task_manager::store::{MemoryStore, Store, StoreResult};
use task_manager::{configure, cors, AppState};

pub const SECRET: &str = "integration-test-secret";
pub const ISSUER: &str = "task-manager";
pub const PASSWORD: &str = "s3cret";

pub fn test_config(extra: &[(&str, &str)]) -> Config {
    let mut vars = vec![
        ("JWT_SECRET", SECRET),
        ("JWT_ISSUER", ISSUER),
        ("JWT_TRUSTED_ISSUERS", "partner-idp"),
        ("BCRYPT_COST", "4"),
        ("STORE_TIMEOUT_MS", "250"),
    ];
    vars.extend_from_slice(extra);
    Config::from_lookup(|name| {
        vars.iter()
            .rev()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    })
    .expect("test configuration is valid")
}

/// A `MemoryStore` that counts every call and can be made to stall.
#[derive(Default)]
pub struct InstrumentedStore {
    inner: MemoryStore,
    calls: AtomicUsize,
    stall_task_reads: AtomicBool,
    stall_task_writes: AtomicBool,
}

impl InstrumentedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stall_task_reads(&self, stall: bool) {
        self.stall_task_reads.store(stall, Ordering::SeqCst);
    }

    pub fn stall_task_writes(&self, stall: bool) {
        self.stall_task_writes.store(stall, Ordering::SeqCst);
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn maybe_stall(&self, flag: &AtomicBool) {
        if flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
}

#[async_trait]
impl Store for InstrumentedStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        self.record();
        self.inner.create_user(user).await
    }

    async fn find_user(&self, id: i64) -> StoreResult<Option<User>> {
        self.record();
        self.inner.find_user(id).await
    }

    async fn find_user_by_subject(&self, subject: &str) -> StoreResult<Option<User>> {
        self.record();
        self.inner.find_user_by_subject(subject).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.record();
        self.inner.find_user_by_email(email).await
    }

    async fn list_users(&self, page: UserPage) -> StoreResult<(Vec<User>, i64)> {
        self.record();
        self.inner.list_users(page).await
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> StoreResult<User> {
        self.record();
        self.inner.update_user(id, changes).await
    }

    async fn soft_delete_user(&self, id: i64) -> StoreResult<()> {
        self.record();
        self.inner.soft_delete_user(id).await
    }

    async fn create_task(
        &self,
        owner_id: i64,
        task: NewTask,
        idempotency_key: Option<String>,
    ) -> StoreResult<Task> {
        self.record();
        self.maybe_stall(&self.stall_task_writes).await;
        self.inner.create_task(owner_id, task, idempotency_key).await
    }

    async fn find_task(&self, id: i64) -> StoreResult<Option<Task>> {
        self.record();
        self.maybe_stall(&self.stall_task_reads).await;
        self.inner.find_task(id).await
    }

    async fn list_tasks(&self, viewer: Actor, filter: TaskFilter) -> StoreResult<Vec<Task>> {
        self.record();
        self.maybe_stall(&self.stall_task_reads).await;
        self.inner.list_tasks(viewer, filter).await
    }

    async fn update_task(&self, actor: Actor, id: i64, changes: TaskChanges) -> StoreResult<Task> {
        self.record();
        self.maybe_stall(&self.stall_task_writes).await;
        self.inner.update_task(actor, id, changes).await
    }

    async fn delete_task(&self, actor: Actor, id: i64) -> StoreResult<()> {
        self.record();
        self.maybe_stall(&self.stall_task_writes).await;
        self.inner.delete_task(actor, id).await
    }
}

pub struct TestContext {
    pub store: Arc<InstrumentedStore>,
    pub state: AppState,
    pub config: Config,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(test_config(&[]))
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(InstrumentedStore::new());
        let state = AppState::build(&config, store.clone());
        Self {
            store,
            state,
            config,
        }
    }

    pub fn app(
        &self,
    ) -> App<
        impl ServiceFactory<
            ServiceRequest,
            Config = (),
            Response = ServiceResponse<impl MessageBody>,
            Error = actix_web::Error,
            InitError = (),
        >,
    > {
        App::new()
            .wrap(cors(&self.config.cors_origins))
            .wrap(Logger::default())
            .configure(configure(self.state.clone()))
    }
}

pub fn bearer(token: &str) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {}", token))
}

/// Signs `claims` as given with the test key.
pub fn sign(claims: &Claims) -> String {
    TokenIssuer::new(SECRET, ISSUER, 3600)
        .sign(claims)
        .expect("claims sign")
}

pub fn claims_for_subject(sub: &str) -> Claims {
    let now = Utc::now().timestamp() as u64;
    Claims {
        sub: sub.to_string(),
        iss: Some(ISSUER.to_string()),
        exp: now + 3600,
        iat: now,
        jti: Some(uuid::Uuid::new_v4().to_string()),
        email: None,
        given_name: None,
        family_name: None,
        roles: vec![],
        scope: None,
    }
}

/// Status, headers and body of a completed request.
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
    /// The body exactly as sent.
    pub raw: Bytes,
}

impl Reply {
    pub fn code(&self) -> &str {
        self.body["code"].as_str().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Runs a request to completion. Errors raised by middleware are rendered
/// the way the server would render them.
pub async fn send(
    app: &impl Service<
        actix_http::Request,
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
    >,
    req: actix_http::Request,
) -> Reply {
    let (status, headers, bytes) = match test::try_call_service(app, req).await {
        Ok(resp) => {
            let status = resp.status();
            let headers = resp.headers().clone();
            (status, headers, test::read_body(resp).await)
        }
        Err(err) => {
            let resp = err.error_response();
            let status = resp.status();
            let headers = resp.headers().clone();
            let bytes = actix_web::body::to_bytes(resp.into_body())
                .await
                .expect("error body is readable");
            (status, headers, bytes)
        }
    };
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Reply {
        status,
        headers,
        body,
        raw: bytes,
    }
}

pub struct TestUser {
    pub id: i64,
    pub token: String,
    pub email: String,
}

pub async fn register_and_login_user(
    app: &impl Service<
        actix_http::Request,
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
    >,
    email: &str,
) -> TestUser {
    let req = test::TestRequest::post()
        .uri("/api/users")
        .set_json(json!({
            "email": email,
            "first_name": "Test",
            "last_name": "User",
            "password": PASSWORD
        }))
        .to_request();
    let reply = send(app, req).await;
    assert_eq!(
        reply.status,
        StatusCode::CREATED,
        "Failed to register {}. Body: {}",
        email,
        reply.body
    );

    let token = login(app, email, PASSWORD).await;
    TestUser {
        id: reply.body["id"].as_i64().expect("user id"),
        token,
        email: email.to_string(),
    }
}

pub async fn login(
    app: &impl Service<
        actix_http::Request,
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
    >,
    email: &str,
    password: &str,
) -> String {
    let req = test::TestRequest::post()
        .uri("/api/login")
        .set_json(json!({"email": email, "password": password}))
        .to_request();
    let reply = send(app, req).await;
    assert_eq!(reply.status, StatusCode::OK, "Login failed for {}", email);
    reply.body["token"].as_str().expect("token").to_string()
}

/// Creates a task as `user`, asserting success, and returns its JSON.
pub async fn create_task(
    app: &impl Service<
        actix_http::Request,
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
    >,
    user: &TestUser,
    body: Value,
) -> Value {
    let req = test::TestRequest::post()
        .uri("/api/tasks")
        .append_header(bearer(&user.token))
        .set_json(body)
        .to_request();
    let reply = send(app, req).await;
    assert_eq!(
        reply.status,
        StatusCode::CREATED,
        "Task creation failed. Body: {}",
        reply.body
    );
    reply.body
}
