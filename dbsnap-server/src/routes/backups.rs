use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use dbsnap::{ArchiveInfo, ExportResult, VerificationReport};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups).post(create_backup))
        .route("/latest/verify", get(verify_latest))
        .route("/{name}/verify", get(verify_backup))
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ArchiveInfo>>, AppError> {
    Ok(Json(state.backups.list_archives().await?))
}

async fn create_backup(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ExportResult>, AppError> {
    match state.backups.try_run_export().await {
        Some(result) => Ok(Json(result)),
        None => Err(AppError::Conflict(
            "A backup or restore is already running for this database".into(),
        )),
    }
}

async fn verify_latest(
    State(state): State<Arc<AppState>>,
) -> Result<Json<VerificationReport>, AppError> {
    Ok(Json(state.backups.verify_archive(None, &[]).await?))
}

async fn verify_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<VerificationReport>, AppError> {
    // Only bare archive names; no path traversal out of the backup directory.
    if !dbsnap::archive::naming::is_archive_name(&name) {
        return Err(AppError::NotFound(format!("Archive not found: {name}")));
    }
    Ok(Json(state.backups.verify_archive(Some(&name), &[]).await?))
}

#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::routes::create_router;
    use crate::state::AppState;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use dbsnap::{bson, BackupConfig, BackupService, MemoryStore};
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> Router {
        let store = Arc::new(MemoryStore::new("marketplace"));
        store.seed("users", vec![user_doc()]);
        let backup = BackupConfig::new(dir);
        let config = AppConfig {
            port: 0,
            mongodb_uri: "mongodb://localhost:27017/marketplace".into(),
            backup: backup.clone(),
            backup_cron: "0 0 2 * * *".into(),
            log_level: "info".into(),
        };
        let service = BackupService::new(store, backup);
        create_router(Arc::new(AppState::new(service, config)))
    }

    fn user_doc() -> bson::Document {
        bson::doc! { "_id": bson::oid::ObjectId::new(), "name": "Alice" }
    }

    async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_create_list_and_verify() {
        let dir = TempDir::new().unwrap();
        let app = app(dir.path());

        let (status, body) = send(&app, "POST", "/api/backups").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let name = body["fileName"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "GET", "/api/backups").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], name.as_str());

        let (status, body) = send(&app, "GET", "/api/backups/latest/verify").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verdict"], "pass");

        let (status, body) = send(&app, "GET", &format!("/api/backups/{name}/verify")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["regressionCount"], 0);
    }

    #[tokio::test]
    async fn test_verify_missing_archives() {
        let dir = TempDir::new().unwrap();
        let app = app(dir.path());

        let (status, _) = send(&app, "GET", "/api/backups/latest/verify").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            "GET",
            "/api/backups/backup_marketplace_2025-01-01_00-00-00.json.gz/verify",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "GET", "/api/backups/..%2F..%2Fetc%2Fpasswd/verify").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let app = app(dir.path());

        let (status, body) = send(&app, "GET", "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"], "marketplace");
        assert_eq!(body["busy"], false);
    }
}
