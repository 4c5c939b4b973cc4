use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// Session id handed out by `/session/login`.
pub const SESSION_ID: &str = "1111";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateUser {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct SlowParams {
    #[serde(default)]
    pub ms: u64,
}

pub type Db = Arc<RwLock<HashMap<Uuid, User>>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", get(get_user).put(update_user).delete(delete_user))
        .route("/users/{id}/{id2}", get(user_pair))
        .route("/q", any(echo_query))
        .route("/form", post(echo_form))
        .route("/headers", any(echo_headers))
        .route("/session/login", post(login))
        .route("/session/whoami", get(whoami))
        .route("/status/{code}", any(status))
        .route("/slow", get(slow))
        .route("/text", get(text))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn list_users(State(db): State<Db>) -> Json<Vec<User>> {
    let users = db.read().await;
    Json(users.values().cloned().collect())
}

async fn create_user(
    State(db): State<Db>,
    Json(input): Json<CreateUser>,
) -> (StatusCode, Json<User>) {
    let user = User {
        id: Uuid::new_v4(),
        name: input.name,
        email: input.email,
    };
    db.write().await.insert(user.id, user.clone());
    (StatusCode::CREATED, Json(user))
}

async fn get_user(
    State(db): State<Db>,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, StatusCode> {
    let users = db.read().await;
    users.get(&id).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn update_user(
    State(db): State<Db>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateUser>,
) -> Result<Json<User>, StatusCode> {
    let mut users = db.write().await;
    let user = users.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    if let Some(name) = input.name {
        user.name = name;
    }
    if let Some(email) = input.email {
        user.email = Some(email);
    }
    Ok(Json(user.clone()))
}

async fn delete_user(
    State(db): State<Db>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    let mut users = db.write().await;
    users.remove(&id).map(|_| StatusCode::NO_CONTENT).ok_or(StatusCode::NOT_FOUND)
}

async fn user_pair(Path((id, id2)): Path<(String, String)>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "id": id, "id2": id2 }))
}

/// The raw query string, exactly as received.
async fn echo_query(RawQuery(query): RawQuery) -> String {
    query.unwrap_or_default()
}

async fn echo_form(headers: HeaderMap, body: String) -> Json<serde_json::Value> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    Json(serde_json::json!({ "content_type": content_type, "body": body }))
}

/// Request headers as a JSON object. An `X-Token` is echoed back as a
/// response header with `-echo` appended; every response carries `X-Trace`.
async fn echo_headers(headers: HeaderMap) -> Response {
    let mut seen = serde_json::Map::new();
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            seen.insert(name.as_str().to_string(), value.into());
        }
    }
    let mut response = Json(serde_json::Value::Object(seen)).into_response();
    let out = response.headers_mut();
    out.insert("x-trace", HeaderValue::from_static("trace-1"));
    if let Some(token) = headers.get("x-token").and_then(|v| v.to_str().ok()) {
        if let Ok(value) = format!("{token}-echo").parse() {
            out.insert("x-token", value);
        }
    }
    response
}

async fn login() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, format!("SESSIONID={SESSION_ID}; Path=/; HttpOnly"))],
        "logged in",
    )
}

/// 200 with the received `Cookie` header if it carries the session id,
/// 401 otherwise.
async fn whoami(headers: HeaderMap) -> Response {
    let cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let expected = format!("SESSIONID={SESSION_ID}");
    if cookie.split(';').any(|c| c.trim() == expected) {
        (StatusCode::OK, cookie).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "no session").into_response()
    }
}

async fn status(Path(code): Path<u16>) -> Response {
    match StatusCode::from_u16(code) {
        Ok(status) => (status, format!("status {code}")).into_response(),
        Err(_) => (StatusCode::BAD_REQUEST, "invalid status").into_response(),
    }
}

async fn slow(Query(params): Query<SlowParams>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(params.ms)).await;
    "slow"
}

async fn text() -> &'static str {
    "hello, world"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_serializes_to_json() {
        let user = User {
            id: Uuid::nil(),
            name: "Amy".to_string(),
            email: None,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["name"], "Amy");
        assert!(json["email"].is_null());
    }

    #[test]
    fn create_user_email_is_optional() {
        let input: CreateUser = serde_json::from_str(r#"{"name":"Rory"}"#).unwrap();
        assert_eq!(input.name, "Rory");
        assert!(input.email.is_none());
    }

    #[test]
    fn create_user_rejects_missing_name() {
        let result: Result<CreateUser, _> = serde_json::from_str(r#"{"email":"a@b"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn update_user_all_fields_optional() {
        let input: UpdateUser = serde_json::from_str(r#"{}"#).unwrap();
        assert!(input.name.is_none());
        assert!(input.email.is_none());
    }

    #[test]
    fn slow_defaults_to_no_delay() {
        let params: SlowParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.ms, 0);
    }
}
