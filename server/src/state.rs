use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use spotwalk_shared::{ViewEvent, ViewState};
use tokio::sync::{RwLock, broadcast};
use tracing::warn;

use crate::config::{broadcast_buffer, upstream_connect_timeout, upstream_http_timeout};
use crate::engine::EngineHandle;
use crate::services::position_tracker::DeviceFeed;

/// Pre-serialized SSE event, serialized once by the view publisher and shared
/// by all clients via Arc.
#[derive(Debug, Clone)]
pub enum PreSerializedEvent {
    View { seq: u64, json: Arc<Bytes> },
    Notice { json: Arc<Bytes> },
}

/// Latest published view in both wire forms.
#[derive(Debug, Clone)]
pub struct LiveView {
    pub seq: u64,
    /// Bare `ViewState` JSON for `GET /api/view`.
    pub state_json: Arc<Bytes>,
    /// Tagged `ViewEvent::View` JSON for the event stream.
    pub event_json: Arc<Bytes>,
}

impl LiveView {
    pub fn from_state(state: &ViewState) -> Result<Self, serde_json::Error> {
        let state_json = serde_json::to_vec(state)?;
        let event_json = serde_json::to_vec(&ViewEvent::View {
            state: state.clone(),
        })?;
        Ok(Self {
            seq: state.seq,
            state_json: Arc::new(Bytes::from(state_json)),
            event_json: Arc::new(Bytes::from(event_json)),
        })
    }
}

impl Default for LiveView {
    fn default() -> Self {
        Self::from_state(&ViewState::default()).unwrap_or_else(|_| Self {
            seq: 0,
            state_json: Arc::new(Bytes::from_static(b"{}")),
            event_json: Arc::new(Bytes::new()),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    /// Browser-reported sensor readings feed the engine's position tracker.
    pub device: DeviceFeed,
    pub live_view: Arc<RwLock<LiveView>>,
    pub event_tx: broadcast::Sender<PreSerializedEvent>,
    pub observability: Arc<ObservabilityCounters>,
}

#[derive(Debug, Default)]
pub struct ObservabilityCounters {
    view_requests_total: AtomicU64,
    navigation_requests_total: AtomicU64,
    position_reports_total: AtomicU64,
    lagged_stream_events_total: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct ObservabilitySnapshot {
    pub view_requests_total: u64,
    pub navigation_requests_total: u64,
    pub position_reports_total: u64,
    pub lagged_stream_events_total: u64,
}

impl ObservabilityCounters {
    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            view_requests_total: self.view_requests_total.load(Ordering::Relaxed),
            navigation_requests_total: self.navigation_requests_total.load(Ordering::Relaxed),
            position_reports_total: self.position_reports_total.load(Ordering::Relaxed),
            lagged_stream_events_total: self.lagged_stream_events_total.load(Ordering::Relaxed),
        }
    }

    pub fn record_view_request(&self) {
        self.view_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_navigation_request(&self) {
        self.navigation_requests_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_position_report(&self) {
        self.position_reports_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lagged_stream_events(&self, count: u64) {
        self.lagged_stream_events_total
            .fetch_add(count, Ordering::Relaxed);
    }
}

impl AppState {
    pub fn new(engine: EngineHandle, device: DeviceFeed) -> Self {
        let (event_tx, _) = broadcast::channel(broadcast_buffer());
        Self {
            engine,
            device,
            live_view: Arc::new(RwLock::new(LiveView::default())),
            event_tx,
            observability: Arc::new(ObservabilityCounters::default()),
        }
    }
}

/// Shared client for the spot source and the directions backend.
pub fn build_http_client() -> Result<reqwest::Client, reqwest::Error> {
    let request_timeout = upstream_http_timeout();
    let connect_timeout = upstream_connect_timeout();
    reqwest::Client::builder()
        .user_agent("spotwalk/0.1")
        .timeout(request_timeout)
        .connect_timeout(connect_timeout)
        .build()
        .or_else(|e| {
            warn!(
                error = %e,
                "failed to build configured HTTP client, retrying without custom user-agent"
            );
            reqwest::Client::builder()
                .timeout(request_timeout)
                .connect_timeout(connect_timeout)
                .build()
        })
}
