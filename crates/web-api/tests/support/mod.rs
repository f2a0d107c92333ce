#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use config::{AppConfig, StorageBackend};
use domain::{Identity, Role, UserId};
use infrastructure::Infrastructure;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;
use web_api::{router, AppState};

pub const SECRET: &str = "web-api-test-secret-with-32-characters!";

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::from_env_with_defaults();
    config.storage.backend = StorageBackend::Memory;
    config.storage.database_url = None;
    config.auth.jwt_secret = SECRET.to_string();
    config
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        let config = test_config();
        let infrastructure = Infrastructure::in_memory(&config);
        let state = AppState::build(&config, &infrastructure);
        Self {
            router: router(state.clone()),
            state,
        }
    }

    pub fn token_for(&self, identity: &Identity) -> String {
        self.state
            .jwt
            .issue_token(identity, &format!("{}@example.com", identity.display_name))
            .expect("issue token")
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .expect("request");

        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, json)
    }
}

pub fn identity(name: &str) -> Identity {
    Identity::new(UserId::from(Uuid::new_v4()), name, Role::User)
}

pub fn admin(name: &str) -> Identity {
    Identity::new(UserId::from(Uuid::new_v4()), name, Role::Admin)
}
