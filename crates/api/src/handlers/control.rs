use axum::{
    extract::{Query, State},
    http::StatusCode,
};
use tracing::info;

use super::{reply, AppState, NameParam};

type Reply = Result<&'static str, (StatusCode, String)>;

pub async fn stop(Query(param): Query<NameParam>, State(state): State<AppState>) -> Reply {
    reply(state.queue.stop(&param.name).await)
}

pub async fn restart(Query(param): Query<NameParam>, State(state): State<AppState>) -> Reply {
    reply(state.queue.restart(&param.name).await)
}

pub async fn reload(Query(param): Query<NameParam>, State(state): State<AppState>) -> Reply {
    reply(state.queue.reload(&param.name).await)
}

pub async fn trigger(Query(param): Query<NameParam>, State(state): State<AppState>) -> Reply {
    let result = state.queue.trigger(&param.name).await.map(|outcome| {
        info!(name = %param.name, %outcome, "triggered over http");
    });
    reply(result)
}

pub async fn remove(Query(param): Query<NameParam>, State(state): State<AppState>) -> Reply {
    reply(state.queue.remove(&param.name).await)
}

pub async fn stop_all(State(state): State<AppState>) -> &'static str {
    state.queue.stop_all().await;
    "Done"
}
