use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use bytes::Bytes;
use futures::stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::config::SSE_KEEPALIVE_SECS;
use crate::state::{AppState, PreSerializedEvent};

pub async fn view_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        // Subscribe first so a view published between the snapshot read and
        // the subscription is not lost.
        let rx = state.event_tx.subscribe();
        let mut last_seq = None;

        if let Some(event) = latest_view_event(&state).await {
            last_seq = Some(event.0);
            yield Ok(event.1);
        }

        let mut stream = BroadcastStream::new(rx);
        while let Some(result) = stream.next().await {
            match result {
                Ok(PreSerializedEvent::View { seq, json }) => {
                    if last_seq.is_some_and(|last| seq <= last) {
                        continue;
                    }
                    let Some(payload) = event_payload(json.as_ref()) else {
                        warn!(seq, "view payload is not valid utf-8; dropping SSE event");
                        continue;
                    };
                    last_seq = Some(seq);
                    yield Ok(Event::default().id(seq.to_string()).event("view").data(payload));
                }
                Ok(PreSerializedEvent::Notice { json }) => {
                    let Some(payload) = event_payload(json.as_ref()) else {
                        warn!("notice payload is not valid utf-8; dropping SSE event");
                        continue;
                    };
                    yield Ok(Event::default().event("notice").data(payload));
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    state.observability.record_lagged_stream_events(skipped);
                    warn!(
                        skipped_events = skipped,
                        "SSE client lagged behind broadcast buffer; replaying latest view"
                    );
                    if let Some(event) = latest_view_event(&state).await {
                        last_seq = Some(event.0);
                        yield Ok(event.1);
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEPALIVE_SECS))
            .text("keep-alive"),
    )
}

async fn latest_view_event(state: &AppState) -> Option<(u64, Event)> {
    // Arc clone, not a copy of the payload.
    let (seq, data) = {
        let live = state.live_view.read().await;
        (live.seq, live.event_json.clone())
    };
    if data.is_empty() {
        return None;
    }
    let Some(payload) = event_payload(data.as_ref()) else {
        warn!("view payload is not valid utf-8; skipping SSE view event");
        return None;
    };
    Some((
        seq,
        Event::default().id(seq.to_string()).event("view").data(payload),
    ))
}

fn event_payload(bytes: &Bytes) -> Option<&str> {
    std::str::from_utf8(bytes.as_ref()).ok()
}
