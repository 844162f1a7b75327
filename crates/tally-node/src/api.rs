//! HTTP API over an [`Indexer`].
//!
//! Every handler runs its ledger call on the blocking pool, since stores do
//! synchronous I/O and take locks. Errors are reported as `{"error": reason}`
//! with 400 for anything the caller can fix, 404 for absent lookups and 500
//! for storage faults.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use tally_core::error::LedgerError;
use tally_core::schema;
use tally_core::store::{LedgerStore, RollbackResult};
use tally_core::types::{OutputRef, StoredOutput};

use crate::indexer::{BlockReceipt, Indexer};

// ── Error helper ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError::Ledger(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Ledger(e) if e.is_client_error() => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Ledger(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        if status.is_server_error() {
            warn!(%status, error = %message, "request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run a ledger call on the blocking pool.
async fn blocking<S, T, F>(indexer: Arc<Indexer<S>>, f: F) -> Result<T, ApiError>
where
    S: LedgerStore + 'static,
    T: Send + 'static,
    F: FnOnce(&Indexer<S>) -> Result<T, LedgerError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&indexer))
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {e}")))?
        .map_err(ApiError::from)
}

// ── Response bodies ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub height: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputView {
    pub tx_id: String,
    pub index: u64,
    #[serde(flatten)]
    pub output: StoredOutput,
}

impl OutputView {
    fn new(output_ref: OutputRef, output: StoredOutput) -> Self {
        Self {
            tx_id: output_ref.tx_id,
            index: output_ref.index,
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AddressOutputsResponse {
    pub address: String,
    pub outputs: Vec<OutputView>,
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn router<S: LedgerStore + 'static>(indexer: Arc<Indexer<S>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/blocks", post(submit_block::<S>))
        .route("/blocks/:height", get(block_at::<S>))
        .route("/balance/:address", get(balance::<S>))
        .route("/rollback/:height", post(rollback::<S>))
        .route("/outputs/:tx_id/:index", get(output::<S>))
        .route("/addresses/:address/outputs", get(address_outputs::<S>))
        .route("/health", get(health::<S>))
        .layer(cors)
        .with_state(indexer)
}

// ── POST /blocks ──────────────────────────────────────────────────────────────

async fn submit_block<S: LedgerStore + 'static>(
    State(indexer): State<Arc<Indexer<S>>>,
    body: Bytes,
) -> ApiResult<BlockReceipt> {
    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {e}")))?;
    let receipt = blocking(indexer, move |idx| idx.process_block(&raw)).await?;
    Ok(Json(receipt))
}

// ── GET /blocks/:height ───────────────────────────────────────────────────────

async fn block_at<S: LedgerStore + 'static>(
    State(indexer): State<Arc<Indexer<S>>>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let height = schema::parse_height(&raw).map_err(LedgerError::from)?;
    match blocking(indexer, move |idx| idx.get_block(height)).await? {
        Some(block) => Ok(Json(block).into_response()),
        None => Err(ApiError::NotFound(format!("block not found at height {height}"))),
    }
}

// ── GET /balance/:address ─────────────────────────────────────────────────────

async fn balance<S: LedgerStore + 'static>(
    State(indexer): State<Arc<Indexer<S>>>,
    Path(address): Path<String>,
) -> ApiResult<BalanceResponse> {
    let lookup = address.clone();
    let balance = blocking(indexer, move |idx| idx.get_balance(&lookup)).await?;
    Ok(Json(BalanceResponse { address, balance }))
}

// ── POST /rollback/:height ────────────────────────────────────────────────────

async fn rollback<S: LedgerStore + 'static>(
    State(indexer): State<Arc<Indexer<S>>>,
    Path(raw): Path<String>,
) -> ApiResult<RollbackResult> {
    let target = schema::parse_height(&raw).map_err(LedgerError::from)?;
    let result = blocking(indexer, move |idx| idx.rollback_to_height(target)).await?;
    Ok(Json(result))
}

// ── GET /outputs/:tx_id/:index ────────────────────────────────────────────────

async fn output<S: LedgerStore + 'static>(
    State(indexer): State<Arc<Indexer<S>>>,
    Path((tx_id, raw_index)): Path<(String, String)>,
) -> ApiResult<OutputView> {
    let index = schema::parse_index(&raw_index).map_err(LedgerError::from)?;
    let output_ref = OutputRef::new(tx_id, index);
    let lookup = output_ref.clone();
    match blocking(indexer, move |idx| idx.get_output(&lookup)).await? {
        Some(stored) => Ok(Json(OutputView::new(output_ref, stored))),
        None => Err(ApiError::NotFound(format!("output not found: {output_ref}"))),
    }
}

// ── GET /addresses/:address/outputs ───────────────────────────────────────────

async fn address_outputs<S: LedgerStore + 'static>(
    State(indexer): State<Arc<Indexer<S>>>,
    Path(address): Path<String>,
) -> ApiResult<AddressOutputsResponse> {
    let lookup = address.clone();
    let outputs = blocking(indexer, move |idx| idx.unspent_outputs(&lookup)).await?;
    Ok(Json(AddressOutputsResponse {
        address,
        outputs: outputs
            .into_iter()
            .map(|(output_ref, stored)| OutputView::new(output_ref, stored))
            .collect(),
    }))
}

// ── GET /health ───────────────────────────────────────────────────────────────

async fn health<S: LedgerStore + 'static>(
    State(indexer): State<Arc<Indexer<S>>>,
) -> ApiResult<HealthResponse> {
    let height = blocking(indexer, |idx| idx.current_height()).await?;
    Ok(Json(HealthResponse { status: "ok", height }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tally_core::store::MemoryStore;
    use tally_core::types::{Block, Output, Transaction};
    use tower::ServiceExt;

    fn indexer() -> Arc<Indexer<MemoryStore>> {
        Arc::new(Indexer::new(Arc::new(MemoryStore::new())))
    }

    fn genesis() -> Block {
        Block::new(1, vec![Transaction {
            id: "g".into(),
            inputs: vec![],
            outputs: vec![Output {
                address: "addr1".into(),
                value: 100,
            }],
        }])
    }

    async fn call(
        idx: &Arc<Indexer<MemoryStore>>,
        method: &str,
        uri: &str,
        body: Option<String>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .unwrap();
        let response = router(Arc::clone(idx)).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn post_block_then_query_balance() {
        let idx = indexer();
        let block = genesis();
        let (status, body) = call(
            &idx,
            "POST",
            "/blocks",
            Some(serde_json::to_string(&block).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["height"], 1);
        assert_eq!(body["blockId"], block.id);
        assert_eq!(body["outputsCreated"], 1);
        assert_eq!(body["minted"], 100);

        let (status, body) = call(&idx, "GET", "/balance/addr1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"address": "addr1", "balance": 100}));

        let (_, body) = call(&idx, "GET", "/balance/unknown", None).await;
        assert_eq!(body["balance"], 0);
    }

    #[tokio::test]
    async fn schema_rejection_is_400_with_reason() {
        let idx = indexer();
        let (status, body) = call(
            &idx,
            "POST",
            "/blocks",
            Some(r#"{"id":"x","height":1,"transactions":"nope"}"#.into()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Block transactions must be an array");
    }

    #[tokio::test]
    async fn unparsable_body_is_400() {
        let idx = indexer();
        let (status, body) = call(&idx, "POST", "/blocks", Some("{not json".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON"));
    }

    #[tokio::test]
    async fn validation_rejection_is_400() {
        let idx = indexer();
        let mut block = genesis();
        block.height = 2;
        block.id = block.expected_id();
        let (status, body) = call(
            &idx,
            "POST",
            "/blocks",
            Some(serde_json::to_string(&block).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid block height: expected 1, got 2");
    }

    #[tokio::test]
    async fn rollback_endpoint() {
        let idx = indexer();
        idx.submit_block(&genesis()).unwrap();
        idx.submit_block(&Block::new(2, vec![])).unwrap();

        let (status, body) = call(&idx, "POST", "/rollback/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({
            "height": 1,
            "blocksRemoved": 1,
            "outputsRemoved": 0,
            "outputsRestored": 0,
        }));

        let (status, body) = call(&idx, "POST", "/rollback/7", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("future height"));

        for bad in ["-1", "1.5", "abc"] {
            let (status, _) = call(&idx, "POST", &format!("/rollback/{bad}"), None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "accepted {bad}");
        }
    }

    #[tokio::test]
    async fn health_reports_height() {
        let idx = indexer();
        let (status, body) = call(&idx, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "height": 0}));
    }

    #[tokio::test]
    async fn lookups_and_404s() {
        let idx = indexer();
        idx.submit_block(&genesis()).unwrap();

        let (status, body) = call(&idx, "GET", "/blocks/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transactions"][0]["id"], "g");

        let (status, _) = call(&idx, "GET", "/blocks/2", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&idx, "GET", "/outputs/g/0", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["txId"], "g");
        assert_eq!(body["value"], 100);
        assert_eq!(body["spent"], false);
        assert_eq!(body["producedAtHeight"], 1);

        let (status, _) = call(&idx, "GET", "/outputs/g/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        for bad in ["x", "+0", "0.0", "-0"] {
            let (status, body) = call(&idx, "GET", &format!("/outputs/g/{bad}"), None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "accepted {bad}");
            assert!(body["error"].as_str().unwrap().starts_with("index must be"));
        }

        let (status, body) = call(&idx, "GET", "/addresses/addr1/outputs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outputs"].as_array().unwrap().len(), 1);
        assert_eq!(body["outputs"][0]["index"], 0);
    }
}
