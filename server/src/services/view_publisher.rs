use std::sync::Arc;

use bytes::Bytes;
use spotwalk_shared::{Notice, ViewEvent, ViewState};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::{AppState, LiveView, PreSerializedEvent};

/// Serializes every engine snapshot and notice once and fans it out to
/// stream clients.
pub async fn run(state: AppState) {
    let mut view = state.engine.watch();
    let mut notices = state.engine.notices();

    let initial = view.borrow_and_update().clone();
    publish_view(&state, &initial).await;
    info!(seq = initial.seq, "view publisher started");

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = view.borrow_and_update().clone();
                publish_view(&state, &snapshot).await;
            }
            notice = notices.recv() => match notice {
                Ok(notice) => publish_notice(&state, &notice),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "view publisher lagged behind notices");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    info!("view publisher stopped: engine is gone");
}

async fn publish_view(state: &AppState, snapshot: &Arc<ViewState>) {
    let live = match LiveView::from_state(snapshot) {
        Ok(live) => live,
        Err(e) => {
            warn!(seq = snapshot.seq, error = %e, "failed to serialize view state");
            return;
        }
    };
    let event = PreSerializedEvent::View {
        seq: live.seq,
        json: Arc::clone(&live.event_json),
    };
    *state.live_view.write().await = live;
    // No receivers just means no stream clients are connected.
    let receivers = state.event_tx.send(event).unwrap_or(0);
    debug!(seq = snapshot.seq, receivers, "published view");
}

fn publish_notice(state: &AppState, notice: &Notice) {
    let event = ViewEvent::Notice {
        notice: notice.clone(),
    };
    match serde_json::to_vec(&event) {
        Ok(json) => {
            let _ = state.event_tx.send(PreSerializedEvent::Notice {
                json: Arc::new(Bytes::from(json)),
            });
        }
        Err(e) => warn!(error = %e, "failed to serialize notice"),
    }
}
