/// HTTP API serving the account dashboard
/// Provides REST endpoints for users, strategies, dashboard series and the data loader
///
/// Every endpoint except /health requires HTTP Basic auth against AUTH_USERS.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::auth::{can_view, Role};
use crate::config::users::UserProfile;
use crate::models::{LoadOutcome, TOTAL_ACCOUNT};
use crate::persistence::SnapshotStore;
use crate::processing::{build_dashboard, parse_start_month, strategy_options};
use crate::reconcile::{run_all, select_exchanges};
use crate::settings::Config;

/// Shared state for API handlers
struct AppState {
    config: Config,
    start_time: Instant,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
}

/// One data user the caller may view
#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct UserResponse {
    user: String,
    user_id: String,
}

/// Loader response: every exchange outcome plus an overall flag
#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct LoadResponse {
    success: bool,
    outcomes: Vec<LoadOutcome>,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user: String,
}

#[derive(Debug, Deserialize)]
struct DashboardQuery {
    user: String,
    #[serde(default = "default_strategy")]
    strategy: String,
    /// YYYY-MM
    start: Option<String>,
}

fn default_strategy() -> String {
    TOTAL_ACCOUNT.to_string()
}

#[derive(Debug, Deserialize)]
struct LoadQuery {
    user: String,
    #[serde(default = "default_exchange")]
    exchange: String,
}

fn default_exchange() -> String {
    "All".to_string()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({"error": message.into()}))).into_response()
}

/// Resolve the caller from the Authorization header
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<(String, Role), Response> {
    let unauthorized = || {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"dashboard\"")],
            Json(serde_json::json!({"error": "Invalid username or password"})),
        )
            .into_response()
    };

    let raw = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(unauthorized)?;

    state.config.auth.check_basic_header(raw).ok_or_else(unauthorized)
}

/// Resolve a data user the caller is allowed to view
fn viewable_profile<'a>(
    state: &'a AppState,
    login: &str,
    role: Role,
    user: &str,
) -> Result<&'a UserProfile, Response> {
    let profile = state
        .config
        .user(user)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, format!("Unknown user: {}", user)))?;

    if !can_view(role, login, profile) {
        return Err(error_response(
            StatusCode::FORBIDDEN,
            format!("{} may not view {}", login, profile.key),
        ));
    }
    Ok(profile)
}

fn open_store(state: &AppState) -> Result<SnapshotStore, Response> {
    SnapshotStore::new(&state.config.db_path).map_err(|e| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to connect to database: {}", e),
        )
    })
}

/// Health check endpoint
/// Returns server status and uptime
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Users endpoint
/// Returns the data users the caller may view
async fn users_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let (login, role) = match authenticate(&state, &headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };

    let users: Vec<UserResponse> = state
        .config
        .users
        .iter()
        .filter(|p| can_view(role, &login, p))
        .map(|p| UserResponse {
            user: p.key.clone(),
            user_id: p.user_id.clone(),
        })
        .collect();

    Json(users).into_response()
}

/// Strategies endpoint
/// Returns Total_Account followed by the user's stored strategies
async fn strategies_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<UserQuery>,
) -> Response {
    let (login, role) = match authenticate(&state, &headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };
    let profile = match viewable_profile(&state, &login, role, &params.user) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let store = match open_store(&state) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match store.fetch_all(&profile.table_name) {
        Ok(rows) => Json(strategy_options(&rows)).into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to load data: {}", e),
        ),
    }
}

/// Dashboard endpoint
/// Returns summary, series, heatmap and breakdown for one selection
async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<DashboardQuery>,
) -> Response {
    let (login, role) = match authenticate(&state, &headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };
    let profile = match viewable_profile(&state, &login, role, &params.user) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let start = match params.start.as_deref().map(parse_start_month).transpose() {
        Ok(s) => s,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let store = match open_store(&state) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let rows = match store.fetch_all(&profile.table_name) {
        Ok(rows) => rows,
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to load data: {}", e),
            )
        }
    };

    if rows.is_empty() {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("No data found for {}. Please check your database.", profile.key),
        );
    }

    match build_dashboard(&rows, &params.strategy, start) {
        Some(dashboard) => Json(dashboard).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "No data for the selected start date."),
    }
}

/// Loader endpoint (admin only)
/// Fetches balances for the selected exchanges and stores today's snapshots
async fn load_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<LoadQuery>,
) -> Response {
    let (login, role) = match authenticate(&state, &headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };
    if role != Role::Admin {
        return error_response(StatusCode::FORBIDDEN, "Only admins can load data");
    }
    let profile = match viewable_profile(&state, &login, role, &params.user) {
        Ok(p) => p.clone(),
        Err(resp) => return resp,
    };
    let exchanges = match select_exchanges(&params.exchange, &profile) {
        Ok(e) => e,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    info!(user = %profile.key, exchange = %params.exchange, by = %login, "Data load requested");

    // Exchange clients block, so the whole load runs off the async workers
    let task_state = Arc::clone(&state);
    let result = tokio::task::spawn_blocking(move || {
        let store = SnapshotStore::new(&task_state.config.db_path)?;
        let today = Local::now().date_naive();
        run_all(&task_state.config, &profile, &store, &exchanges, today)
    })
    .await;

    match result {
        Ok(Ok(outcomes)) => Json(LoadResponse {
            success: outcomes.iter().all(|o| o.success),
            outcomes,
        })
        .into_response(),
        Ok(Err(e)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
        Err(e) => {
            error!(error = %e, "Loader task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Loader task failed")
        }
    }
}

/// Creates the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/users", get(users_handler))
        .route("/strategies", get(strategies_handler))
        .route("/dashboard", get(dashboard_handler))
        .route("/load", post(load_handler))
        .with_state(state)
}

/// Starts the HTTP API server on `api_bind:api_port`
/// Returns a JoinHandle that can be awaited for graceful shutdown
pub async fn start_api_server(config: Config) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let addr = format!("{}:{}", config.api_bind, config.api_port);
    let state = Arc::new(AppState {
        config,
        start_time: Instant::now(),
    });

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Dashboard API listening");

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server stopped");
        }
    });

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountSnapshot;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn temp_db_path(port: u16) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("test_api_{}_{}.db", std::process::id(), port));
        path
    }

    fn cleanup_db(path: &PathBuf) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(path.with_extension("db-shm"));
        let _ = std::fs::remove_file(path.with_extension("db-wal"));
    }

    fn test_config(port: u16, db_path: &PathBuf) -> Config {
        let vars: HashMap<String, String> = [
            ("DB_PATH", db_path.to_string_lossy().to_string()),
            ("API_PORT", port.to_string()),
            ("VALID_USERS", "user1,user2".to_string()),
            ("USER2_USER_ID", "user2_jf".to_string()),
            ("USER2_TABLE_NAME", "account_data".to_string()),
            ("USER2_DERIBIT_COPY", "true".to_string()),
            ("AUTH_USERS", "admin:secret:admin,user2_jf:pw:user".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Config::from_map(&vars).unwrap()
    }

    fn seed(db_path: &PathBuf) {
        let store = SnapshotStore::new(db_path).unwrap();
        let day = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap();
        for (d, strategy, collateral, pnl) in [
            (10, "HL", 1000.0, 0.0),
            (10, "Deribit Options", 500.0, 0.0),
            (11, "HL", 1050.0, 50.0),
        ] {
            let snap = AccountSnapshot {
                collateral,
                total_pnl: pnl,
                ..AccountSnapshot::new(day(d), strategy, "user2_jf")
            };
            store.insert_snapshot("account_data", &snap).unwrap();
        }
    }

    async fn start(port: u16) -> (tokio::task::JoinHandle<()>, PathBuf) {
        let db_path = temp_db_path(port);
        cleanup_db(&db_path);
        seed(&db_path);
        let handle = start_api_server(test_config(port, &db_path)).await.unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        (handle, db_path)
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok".to_string(),
            uptime_seconds: 123,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"uptime_seconds\":123"));
    }

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let port = 18180;
        let (handle, db_path) = start(port).await;

        let response = reqwest::get(format!("http://127.0.0.1:{}/health", port)).await.unwrap();
        assert_eq!(response.status(), 200);
        let health: HealthResponse = response.json().await.unwrap();
        assert_eq!(health.status, "ok");

        handle.abort();
        cleanup_db(&db_path);
    }

    #[tokio::test]
    async fn test_requests_without_valid_credentials_are_rejected() {
        let port = 18181;
        let (handle, db_path) = start(port).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("http://127.0.0.1:{}/users", port))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
        assert!(response.headers().contains_key("www-authenticate"));

        let response = client
            .get(format!("http://127.0.0.1:{}/users", port))
            .basic_auth("admin", Some("wrong"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);

        handle.abort();
        cleanup_db(&db_path);
    }

    #[tokio::test]
    async fn test_users_filtered_by_role() {
        let port = 18182;
        let (handle, db_path) = start(port).await;
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{}/users", port);

        let admin: Vec<UserResponse> = client
            .get(&url)
            .basic_auth("admin", Some("secret"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(admin.len(), 2);

        let user: Vec<UserResponse> = client
            .get(&url)
            .basic_auth("user2_jf", Some("pw"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(user, vec![UserResponse { user: "user2".to_string(), user_id: "user2_jf".to_string() }]);

        handle.abort();
        cleanup_db(&db_path);
    }

    #[tokio::test]
    async fn test_strategies_and_access_control() {
        let port = 18183;
        let (handle, db_path) = start(port).await;
        let client = reqwest::Client::new();

        let strategies: Vec<String> = client
            .get(format!("http://127.0.0.1:{}/strategies?user=user2", port))
            .basic_auth("user2_jf", Some("pw"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(strategies, vec!["Total_Account", "Deribit Options", "HL"]);

        let forbidden = client
            .get(format!("http://127.0.0.1:{}/strategies?user=user1", port))
            .basic_auth("user2_jf", Some("pw"))
            .send()
            .await
            .unwrap();
        assert_eq!(forbidden.status(), 403);

        let unknown = client
            .get(format!("http://127.0.0.1:{}/strategies?user=nobody", port))
            .basic_auth("admin", Some("secret"))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), 404);

        handle.abort();
        cleanup_db(&db_path);
    }

    #[tokio::test]
    async fn test_dashboard_endpoint() {
        let port = 18184;
        let (handle, db_path) = start(port).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("http://127.0.0.1:{}/dashboard?user=user2&start=2024-01", port))
            .basic_auth("admin", Some("secret"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["strategy"], "Total_Account");
        assert_eq!(body["summary"]["current_balance"], 1050.0);
        assert_eq!(body["summary"]["pnl_since_start"], 50.0);
        assert_eq!(body["daily"].as_array().unwrap().len(), 2);
        assert_eq!(body["monthly"][0]["label"], "Jan 2024");
        assert_eq!(body["breakdown"].as_array().unwrap().len(), 3);

        let bad_start = client
            .get(format!("http://127.0.0.1:{}/dashboard?user=user2&start=January", port))
            .basic_auth("admin", Some("secret"))
            .send()
            .await
            .unwrap();
        assert_eq!(bad_start.status(), 400);

        let empty_range = client
            .get(format!("http://127.0.0.1:{}/dashboard?user=user2&start=2030-01", port))
            .basic_auth("admin", Some("secret"))
            .send()
            .await
            .unwrap();
        assert_eq!(empty_range.status(), 404);

        let no_data = client
            .get(format!("http://127.0.0.1:{}/dashboard?user=user1", port))
            .basic_auth("admin", Some("secret"))
            .send()
            .await
            .unwrap();
        assert_eq!(no_data.status(), 404);

        handle.abort();
        cleanup_db(&db_path);
    }

    #[tokio::test]
    async fn test_load_is_admin_only_and_copies_deribit() {
        let port = 18185;
        let (handle, db_path) = start(port).await;
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{}/load?user=user2&exchange=All", port);

        let forbidden = client
            .post(&url)
            .basic_auth("user2_jf", Some("pw"))
            .send()
            .await
            .unwrap();
        assert_eq!(forbidden.status(), 403);

        let response = client
            .post(&url)
            .basic_auth("admin", Some("secret"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let load: LoadResponse = response.json().await.unwrap();
        assert!(load.success);
        assert_eq!(load.outcomes.len(), 1);
        assert!(load.outcomes[0].message.starts_with("Deribit: Copied data for"));

        let bad = client
            .post(format!("http://127.0.0.1:{}/load?user=user2&exchange=Kraken", port))
            .basic_auth("admin", Some("secret"))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), 400);

        handle.abort();
        cleanup_db(&db_path);
    }
}
