mod cycles;
mod ponds;

use std::sync::Arc;

use axum::Router;

use aquafarm_core::Authenticator;

use crate::manager::SeedingCycleManager;

/// Read ponds, cycles, balances and ledger entries.
pub const PERM_LEDGER_READ: &str = "stock:ledger:read";
/// Record ledger events and drive cycle lifecycle.
pub const PERM_LEDGER_WRITE: &str = "stock:ledger:write";
/// Create and edit ponds.
pub const PERM_POND_WRITE: &str = "stock:pond:write";

#[derive(Clone)]
struct ApiState {
    manager: Arc<SeedingCycleManager>,
    auth: Arc<dyn Authenticator>,
}

/// Build the stock module router.
///
/// Routes:
/// - `POST   /ponds`: create pond
/// - `GET    /ponds`: list ponds
/// - `GET    /ponds/{id}`: get pond
/// - `PATCH  /ponds/{id}`: edit pond
/// - `GET    /ponds/{id}/cycles`: cycles of a pond
/// - `GET    /ponds/{id}/movements`: all ledger entries of a pond
/// - `GET    /ponds/{id}/balance`: pond balance
/// - `POST   /ponds/{id}/@adjust`: pond-level adjustment
/// - `POST   /cycles`: open cycle
/// - `GET    /cycles/{id}`: get cycle
/// - `GET    /cycles/{id}/balance?asOf=`: current or point-in-time balance
/// - `GET    /cycles/{id}/summary`: per-type totals
/// - `GET    /cycles/{id}/movements`: ledger entries
/// - `GET    /cycles/{id}/estimate?asOf=`: harvest estimate
/// - `GET    /cycles/{id}/@reconcile`: ledger consistency report
/// - `POST   /cycles/{id}/@mortality|@harvest|@adjust|@transfer`
/// - `POST   /cycles/{id}/@begin-harvest|@close`
/// - `GET|POST /cycles/{id}/@samplings|@realizations`
pub fn router(manager: Arc<SeedingCycleManager>, auth: Arc<dyn Authenticator>) -> Router {
    let state = ApiState { manager, auth };
    Router::new()
        .merge(ponds::router(state.clone()))
        .merge(cycles::router(state))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use aquafarm_core::{AllowAll, DenyAll, TokenAuthenticator};
    use aquafarm_sql::{SQLStore, SqliteStore};

    use super::*;
    use crate::config::LedgerConfig;

    fn test_router(auth: Arc<dyn Authenticator>) -> Router {
        let db: Arc<dyn SQLStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let manager = Arc::new(SeedingCycleManager::new(db, LedgerConfig::default()).unwrap());
        router(manager, auth)
    }

    async fn api(
        router: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            builder = builder.header("authorization", format!("Bearer {t}"));
        }
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let body = match body {
            Some(v) => Body::from(serde_json::to_string(&v).unwrap()),
            None => Body::empty(),
        };
        let resp = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn seeded(router: &Router) -> (String, String) {
        let (status, pond) = api(
            router,
            "POST",
            "/ponds",
            None,
            Some(json!({"name": "A1", "lengthM": 20.0, "widthM": 10.0, "depthM": 1.5})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{pond}");
        assert_eq!(pond["volumeM3"], 300.0);
        let pond_id = pond["id"].as_str().unwrap().to_string();

        let (status, cycle) = api(
            router,
            "POST",
            "/cycles",
            None,
            Some(json!({"pondId": pond_id, "initialQuantity": 1000, "dateSeeded": "2025-01-01"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{cycle}");
        assert_eq!(cycle["status"], "growing");
        (pond_id, cycle["id"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn ledger_flow_over_http() {
        let r = test_router(Arc::new(AllowAll));
        let (pond_id, cycle_id) = seeded(&r).await;

        let (status, m) = api(
            &r,
            "POST",
            &format!("/cycles/{cycle_id}/@mortality"),
            None,
            Some(json!({"count": 50, "date": "2025-01-10"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(m["eventType"], "mortality");
        assert_eq!(m["balanceAfter"], 950);

        let (status, _) = api(
            &r,
            "POST",
            &format!("/cycles/{cycle_id}/@harvest"),
            None,
            Some(json!({"count": 900, "date": "2025-02-01", "refId": "hr-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, err) = api(
            &r,
            "POST",
            &format!("/cycles/{cycle_id}/@harvest"),
            None,
            Some(json!({"count": 100, "date": "2025-02-02"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err["code"], "INSUFFICIENT_STOCK");

        let (_, bal) = api(&r, "GET", &format!("/cycles/{cycle_id}/balance"), None, None).await;
        assert_eq!(bal["balance"], 50);
        let (_, bal) = api(
            &r,
            "GET",
            &format!("/cycles/{cycle_id}/balance?asOf=2025-01-05"),
            None,
            None,
        )
        .await;
        assert_eq!(bal["balance"], 1000);

        let (_, summary) = api(&r, "GET", &format!("/cycles/{cycle_id}/summary"), None, None).await;
        assert_eq!(summary["totalMortality"], 50);
        assert_eq!(summary["totalHarvest"], 900);
        assert_eq!(summary["status"], "harvest");

        let (_, list) = api(
            &r,
            "GET",
            &format!("/cycles/{cycle_id}/movements?eventType=harvest"),
            None,
            None,
        )
        .await;
        assert_eq!(list["total"], 1);

        let (_, pond_list) = api(&r, "GET", &format!("/ponds/{pond_id}/movements"), None, None).await;
        assert_eq!(pond_list["total"], 3);
        assert_eq!(pond_list["hasMore"], false);

        let (_, first) = api(
            &r,
            "GET",
            &format!("/ponds/{pond_id}/movements?limit=1"),
            None,
            None,
        )
        .await;
        assert_eq!(first["items"].as_array().unwrap().len(), 1);
        assert_eq!(first["hasMore"], true);

        let (_, report) = api(&r, "GET", &format!("/cycles/{cycle_id}/@reconcile"), None, None).await;
        assert_eq!(report["ledgerSum"], 50);
        assert_eq!(report["discrepancies"], json!([]));
    }

    #[tokio::test]
    async fn second_open_and_unknown_ids() {
        let r = test_router(Arc::new(AllowAll));
        let (pond_id, _) = seeded(&r).await;

        let (status, err) = api(
            &r,
            "POST",
            "/cycles",
            None,
            Some(json!({"pondId": pond_id, "initialQuantity": 10, "dateSeeded": "2025-03-01"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["code"], "VALIDATION_FAILED");

        let (status, err) = api(&r, "GET", "/cycles/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["code"], "NOT_FOUND");

        let (status, _) = api(&r, "GET", "/ponds/nope/balance", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn close_then_write_is_invalid_state() {
        let r = test_router(Arc::new(AllowAll));
        let (pond_id, cycle_id) = seeded(&r).await;

        let (status, cycle) = api(
            &r,
            "POST",
            &format!("/cycles/{cycle_id}/@close"),
            None,
            Some(json!({"closedBy": "manager"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cycle["status"], "closed");

        let (_, pond) = api(&r, "GET", &format!("/ponds/{pond_id}"), None, None).await;
        assert_eq!(pond["productionStatus"], "idle");

        let (status, err) = api(
            &r,
            "POST",
            &format!("/cycles/{cycle_id}/@adjust"),
            None,
            Some(json!({"delta": 5, "date": "2025-01-02"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["code"], "INVALID_STATE");
    }

    #[tokio::test]
    async fn deny_all_is_forbidden() {
        let r = test_router(Arc::new(DenyAll));
        let (status, err) = api(&r, "GET", "/ponds", None, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(err["code"], "PERMISSION_DENIED");
    }

    #[tokio::test]
    async fn read_only_token_cannot_write() {
        let grants = HashMap::from([
            ("reader".to_string(), vec![PERM_LEDGER_READ.to_string()]),
            ("admin".to_string(), vec!["stock:*".to_string()]),
        ]);
        let r = test_router(Arc::new(TokenAuthenticator::new(grants)));

        let body = json!({"name": "A1", "lengthM": 1.0, "widthM": 1.0, "depthM": 1.0});
        let (status, _) = api(&r, "POST", "/ponds", Some("reader"), Some(body.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = api(&r, "POST", "/ponds", None, Some(body.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = api(&r, "POST", "/ponds", Some("admin"), Some(body)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, list) = api(&r, "GET", "/ponds", Some("reader"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["total"], 1);
    }
}
