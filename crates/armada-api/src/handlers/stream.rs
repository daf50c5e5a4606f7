//! /results/stream: live results as server-sent events.
//!
//! Each connection holds its own fan-out subscription, taken before the
//! response starts, so it sees every result consumed from then on. One
//! event per result, `data:` carrying the JSON object.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::header::{HeaderName, CACHE_CONTROL};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::StreamExt;
use serde::Deserialize;

use super::ApiState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    /// Only results from this agent.
    pub agent_id: Option<String>,
}

pub async fn handle_result_stream(
    State(state): State<ApiState>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let subscription = state.fanout.subscribe();
    tracing::debug!(
        subscribers = state.fanout.subscriber_count(),
        agent = ?query.agent_id,
        "result stream opened"
    );

    let filter = query.agent_id;
    let events = subscription
        .into_stream()
        .filter(move |event| {
            let keep = filter.as_deref().is_none_or(|a| a == event.agent_id());
            std::future::ready(keep)
        })
        .filter_map(|event| async move {
            match Event::default().json_data(&*event) {
                Ok(ev) => Some(Ok::<_, Infallible>(ev)),
                Err(e) => {
                    tracing::warn!(error = %e, "result not encodable for stream");
                    None
                }
            }
        });

    (
        [
            (HeaderName::from_static("x-accel-buffering"), "no"),
            (CACHE_CONTROL, "no-cache"),
        ],
        Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))),
    )
}
