//! Search handlers

use axum::{extract::State, Json};
use serde::Deserialize;
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use evidentia_common::{
    cache::keys,
    context::{ConversationContext, CotConfig},
    errors::{AppError, Result},
    metrics,
    pipeline::{SearchRequest, SearchResponse},
};

/// Search request body
#[derive(Debug, Deserialize, Validate)]
pub struct SearchBody {
    #[validate(length(min = 3, max = 1000))]
    pub question: String,

    #[validate(length(min = 1, max = 128))]
    pub collection_id: String,

    #[validate(length(min = 1, max = 128))]
    pub user_id: String,

    #[serde(default)]
    pub cot_config: Option<CotConfig>,

    #[serde(default)]
    pub conversation: Option<ConversationContext>,
}

/// Execute a search through the pipeline
pub async fn search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();
    let request_id = Uuid::new_v4();
    let request_metrics = metrics::RequestMetrics::start("POST", "/v1/search");

    body.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let request = SearchRequest {
        question: body.question,
        collection_id: body.collection_id,
        user_id: body.user_id,
        cot_config: body.cot_config,
        conversation: body.conversation,
    };

    // Responses are cacheable only when they depend on nothing but the
    // collection and the question itself.
    let cacheable = request.conversation.is_none() && request.cot_config.is_none();

    let cached: Option<SearchResponse> = match (&state.cache, cacheable) {
        (Some(cache), true) => {
            let key = keys::answer(&request.collection_id, &request.question);
            let hit = Box::pin(cache.get(&key)).await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Cache read failed, continuing without cache");
                None
            });
            metrics::record_cache(hit.is_some(), "answer");
            hit
        }
        _ => None,
    };

    let response = match cached {
        Some(response) => response,
        None => {
            let cache_key = cacheable
                .then(|| keys::answer(&request.collection_id, &request.question));
            let response = match Box::pin(state.orchestrator.execute_search(request)).await {
                Ok(response) => response,
                Err(e) => {
                    request_metrics.finish(e.status_code().as_u16());
                    return Err(e);
                }
            };
            if let (Some(cache), Some(key)) = (&state.cache, cache_key) {
                if let Err(e) = Box::pin(cache.set(&key, &response)).await {
                    tracing::warn!(error = %e, "Cache write failed, continuing");
                }
            }
            response
        }
    };

    let latency_ms = start.elapsed().as_millis() as u64;
    tracing::info!(
        request_id = %request_id,
        strategy = %response.strategy_used,
        evidence = response.evidence.len(),
        latency_ms,
        "Search request served"
    );
    request_metrics.finish(200);

    Ok(Json(response))
}
