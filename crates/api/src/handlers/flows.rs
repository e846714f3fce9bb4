use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};

use nodes::NodeStatus;
use queue::FlowSummary;

use super::{status_of, AppState, NameParam};

pub async fn list(State(state): State<AppState>) -> Json<Vec<FlowSummary>> {
    Json(state.queue.list().await)
}

pub async fn describe(
    Query(param): Query<NameParam>,
    State(state): State<AppState>,
) -> Result<Json<NodeStatus>, (StatusCode, String)> {
    match state.queue.describe(&param.name).await {
        Ok(status) => Ok(Json(status)),
        Err(e) => Err((status_of(&e), e.to_string())),
    }
}
