pub mod navigation;

use std::collections::HashMap;
use std::sync::Arc;

use spotwalk_shared::{
    ActiveRoute, Coordinate, NavigationTarget, Notice, NoticeKind, Spot, UserPosition, ViewState,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CommandError, NavigationError, RouteError};
use crate::services::ledger::{AchievementDraft, AchievementLedger, LedgerKind, LedgerSnapshot};
use crate::services::photo_store::PhotoStore;
use crate::services::position_tracker::{DeviceSensors, PositionFix, PositionTracker, TrackerEvent};
use crate::services::route_service::RouteService;

use navigation::{Navigator, Resolution, RouteTicket};

pub const ANONYMOUS_NICKNAME: &str = "Anonymous";

type NavigationReply = oneshot::Sender<Result<NavigationOutcome, NavigationError>>;

/// Where to navigate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NavigationRequest {
    Spot(usize),
    Point(Coordinate),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavigationOutcome {
    Active(ActiveRoute),
    /// A later request or a clear replaced this one before it settled.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Recorded,
    AlreadyAchieved,
}

/// Who is capturing a photo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Achiever {
    pub user_id: String,
    pub nickname: String,
}

/// Everything the engine's queue carries. Events are handled one at a time.
#[derive(Debug)]
pub enum EngineEvent {
    Tracker(TrackerEvent),
    Achievements(LedgerSnapshot),
    RouteResolved {
        generation: u64,
        result: Result<Vec<Coordinate>, RouteError>,
    },
    PhotosChanged,
    StartNavigation {
        request: NavigationRequest,
        reply: NavigationReply,
    },
    ClearNavigation,
}

impl From<TrackerEvent> for EngineEvent {
    fn from(event: TrackerEvent) -> Self {
        Self::Tracker(event)
    }
}

pub struct EngineParts {
    pub spots: Vec<Spot>,
    pub sensors: Arc<dyn DeviceSensors>,
    pub ledger: Arc<dyn AchievementLedger>,
    pub routes: Arc<dyn RouteService>,
    pub photos: Arc<PhotoStore>,
    pub queue_capacity: usize,
    pub notice_buffer: usize,
}

/// Cloneable front door to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    events: mpsc::Sender<EngineEvent>,
    view: watch::Receiver<Arc<ViewState>>,
    notices: broadcast::Sender<Notice>,
    ledger: Arc<dyn AchievementLedger>,
    photos: Arc<PhotoStore>,
}

impl EngineHandle {
    pub fn snapshot(&self) -> Arc<ViewState> {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<ViewState>> {
        self.view.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn ledger_kind(&self) -> LedgerKind {
        self.ledger.kind()
    }

    pub fn photo(&self, spot_index: usize) -> Option<String> {
        self.photos.get(spot_index)
    }

    /// Resolves once the route request settles or is superseded.
    pub async fn start_navigation(
        &self,
        request: NavigationRequest,
    ) -> Result<NavigationOutcome, NavigationError> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(EngineEvent::StartNavigation { request, reply })
            .await
            .map_err(|_| NavigationError::EngineStopped)?;
        rx.await.map_err(|_| NavigationError::EngineStopped)?
    }

    pub async fn clear_navigation(&self) -> Result<(), NavigationError> {
        self.events
            .send(EngineEvent::ClearNavigation)
            .await
            .map_err(|_| NavigationError::EngineStopped)
    }

    /// Store a photo for the spot and record the achievement unless the spot
    /// is already achieved.
    pub async fn capture_photo(
        &self,
        spot_index: usize,
        achiever: Achiever,
        photo: String,
    ) -> Result<CaptureOutcome, CommandError> {
        if achiever.user_id.trim().is_empty() {
            self.notify(Notice::new(
                NoticeKind::SignInRequired,
                "Sign in to record an achievement",
            ));
            return Err(CommandError::NotSignedIn);
        }
        let view = self.snapshot();
        let spot = view
            .spot(spot_index)
            .ok_or(CommandError::UnknownSpot(spot_index))?;

        self.photos
            .put(spot_index, photo)
            .await
            .map_err(|e| CommandError::Storage(e.to_string()))?;
        self.events
            .send(EngineEvent::PhotosChanged)
            .await
            .map_err(|_| CommandError::EngineStopped)?;

        if spot.achieved {
            debug!(spot_index, "photo stored for already achieved spot");
            return Ok(CaptureOutcome::AlreadyAchieved);
        }

        let nickname = match achiever.nickname.trim() {
            "" => ANONYMOUS_NICKNAME.to_string(),
            nickname => nickname.to_string(),
        };
        let draft = AchievementDraft {
            spot_index,
            user_id: achiever.user_id,
            nickname,
            address: spot.spot.label.clone(),
        };
        if let Err(e) = self.ledger.record(draft).await {
            warn!(spot_index, error = %e, "failed to record achievement");
            self.notify(Notice::new(
                NoticeKind::WriteFailed,
                format!("Could not save achievement: {e}"),
            ));
            return Err(e.into());
        }
        info!(spot_index, "achievement recorded");
        Ok(CaptureOutcome::Recorded)
    }

    pub async fn revoke_achievement(&self, spot_index: usize) -> Result<(), CommandError> {
        if self.snapshot().spot(spot_index).is_none() {
            return Err(CommandError::UnknownSpot(spot_index));
        }
        if let Err(e) = self.ledger.revoke(spot_index).await {
            warn!(spot_index, error = %e, "failed to revoke achievement");
            self.notify(Notice::new(
                NoticeKind::WriteFailed,
                format!("Could not remove achievement: {e}"),
            ));
            return Err(e.into());
        }
        Ok(())
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }
}

/// Owns the view state and the adapters feeding it.
pub struct ReconciliationEngine {
    handle: EngineHandle,
    tracker: PositionTracker,
    ledger_pump: JoinHandle<()>,
    task: JoinHandle<()>,
    ledger: Arc<dyn AchievementLedger>,
}

impl ReconciliationEngine {
    pub fn start(parts: EngineParts) -> Self {
        let EngineParts {
            spots,
            sensors,
            ledger,
            routes,
            photos,
            queue_capacity,
            notice_buffer,
        } = parts;

        let (events_tx, events_rx) = mpsc::channel(queue_capacity.max(1));
        let (notices, _) = broadcast::channel(notice_buffer.max(1));

        let spot_count = spots.len();
        let mut view = ViewState::from_catalog(spots);
        view.apply_photo_presence(&photos.indices());
        let (view_tx, view_rx) = watch::channel(Arc::new(view.clone()));

        let tracker = PositionTracker::start(sensors.as_ref(), events_tx.clone());
        let ledger_pump = tokio::spawn(pump_ledger(ledger.subscribe(), events_tx.clone()));

        let state = EngineState {
            view,
            navigator: Navigator::default(),
            pending_heading: None,
            replies: HashMap::new(),
            outbox: Vec::new(),
            routes,
            photos: Arc::clone(&photos),
            view_tx,
            notices: notices.clone(),
            events: events_tx.downgrade(),
        };
        let task = tokio::spawn(state.run(events_rx));

        info!(spots = spot_count, ledger = %ledger.kind(), "reconciliation engine started");
        Self {
            handle: EngineHandle {
                events: events_tx,
                view: view_rx,
                notices,
                ledger: Arc::clone(&ledger),
                photos,
            },
            tracker,
            ledger_pump,
            task,
            ledger,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Release device and ledger subscriptions, then stop the event loop.
    pub async fn shutdown(mut self) {
        self.tracker.stop().await;
        self.ledger_pump.abort();
        let _ = (&mut self.ledger_pump).await;
        self.ledger.close();
        self.task.abort();
        let _ = (&mut self.task).await;
        info!("reconciliation engine stopped");
    }
}

async fn pump_ledger(
    mut subscription: crate::services::ledger::LedgerSubscription,
    sink: mpsc::Sender<EngineEvent>,
) {
    while let Some(snapshot) = subscription.next().await {
        if sink.send(EngineEvent::Achievements(snapshot)).await.is_err() {
            break;
        }
    }
    subscription.unsubscribe();
    debug!("ledger subscription ended");
}

struct EngineState {
    view: ViewState,
    navigator: Navigator,
    /// Compass reading that arrived before the first position fix.
    pending_heading: Option<f64>,
    replies: HashMap<u64, NavigationReply>,
    /// Replies held back until the view they refer to is published.
    outbox: Vec<(NavigationReply, Result<NavigationOutcome, NavigationError>)>,
    routes: Arc<dyn RouteService>,
    photos: Arc<PhotoStore>,
    view_tx: watch::Sender<Arc<ViewState>>,
    notices: broadcast::Sender<Notice>,
    events: mpsc::WeakSender<EngineEvent>,
}

impl EngineState {
    async fn run(mut self, mut events: mpsc::Receiver<EngineEvent>) {
        while let Some(event) = events.recv().await {
            if self.apply(event) {
                self.publish();
            }
            for (reply, outcome) in self.outbox.drain(..) {
                let _ = reply.send(outcome);
            }
        }
        debug!("engine queue closed");
    }

    /// Apply one event. Returns whether the view changed.
    fn apply(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::Tracker(TrackerEvent::Position(fix)) => self.on_position(fix),
            EngineEvent::Tracker(TrackerEvent::Heading(heading)) => self.on_heading(heading),
            EngineEvent::Achievements(snapshot) => {
                self.view.apply_achieved_set(&snapshot.achieved());
                debug!(
                    seq = snapshot.seq,
                    achieved = self.view.progress.achieved,
                    "applied ledger snapshot"
                );
                true
            }
            EngineEvent::PhotosChanged => {
                self.view.apply_photo_presence(&self.photos.indices());
                true
            }
            EngineEvent::StartNavigation { request, reply } => self.start_navigation(request, reply),
            EngineEvent::ClearNavigation => {
                if let Some(ticket) = self.navigator.clear() {
                    self.reply(ticket.generation, Ok(NavigationOutcome::Superseded));
                }
                self.sync_navigation();
                true
            }
            EngineEvent::RouteResolved { generation, result } => {
                self.on_route_resolved(generation, result)
            }
        }
    }

    fn on_position(&mut self, fix: PositionFix) -> bool {
        let heading_degrees = self
            .view
            .user_position
            .and_then(|position| position.heading_degrees)
            .or(self.pending_heading.take());
        self.view.user_position = Some(UserPosition {
            coordinate: fix.coordinate,
            heading_degrees,
            accuracy: fix.accuracy,
        });
        true
    }

    fn on_heading(&mut self, heading: f64) -> bool {
        match self.view.user_position.as_mut() {
            Some(position) => {
                position.heading_degrees = Some(heading);
                true
            }
            None => {
                self.pending_heading = Some(heading);
                false
            }
        }
    }

    fn start_navigation(&mut self, request: NavigationRequest, reply: NavigationReply) -> bool {
        let target = match request {
            NavigationRequest::Spot(index) => match self.view.spot(index) {
                Some(view) => NavigationTarget {
                    destination: view.spot.coordinate,
                    spot_index: Some(index),
                },
                None => {
                    let _ = reply.send(Err(NavigationError::UnknownSpot(index)));
                    return false;
                }
            },
            NavigationRequest::Point(destination) => NavigationTarget {
                destination,
                spot_index: None,
            },
        };

        let Some(origin) = self.view.user_position.map(|position| position.coordinate) else {
            self.notify(Notice::new(
                NoticeKind::LocationUnavailable,
                "Current location is not available yet",
            ));
            let _ = reply.send(Err(NavigationError::LocationUnavailable));
            return false;
        };

        let (ticket, superseded) = self.navigator.request(target, origin);
        if let Some(old) = superseded {
            debug!(generation = old.generation, "route request superseded");
            self.reply(old.generation, Ok(NavigationOutcome::Superseded));
        }
        self.replies.insert(ticket.generation, reply);
        self.spawn_fetch(ticket);
        self.sync_navigation();
        true
    }

    fn spawn_fetch(&self, ticket: RouteTicket) {
        let routes = Arc::clone(&self.routes);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = routes
                .fetch_walking_route(ticket.origin, ticket.target.destination)
                .await;
            if let Some(events) = events.upgrade() {
                let _ = events
                    .send(EngineEvent::RouteResolved {
                        generation: ticket.generation,
                        result,
                    })
                    .await;
            }
        });
    }

    fn on_route_resolved(
        &mut self,
        generation: u64,
        result: Result<Vec<Coordinate>, RouteError>,
    ) -> bool {
        match self.navigator.resolve(generation, result) {
            Resolution::Stale => {
                debug!(generation, "discarding stale route response");
                false
            }
            Resolution::Activated(route) => {
                info!(
                    generation,
                    points = route.geometry.len(),
                    spot_index = ?route.spot_index,
                    "route active"
                );
                self.reply(generation, Ok(NavigationOutcome::Active(route)));
                self.sync_navigation();
                true
            }
            Resolution::Failed(e) => {
                warn!(generation, error = %e, "route request failed");
                let kind = match e {
                    RouteError::NoRouteFound => NoticeKind::RouteNotFound,
                    RouteError::Network(_) => NoticeKind::RouteFailed,
                };
                self.notify(Notice::new(kind, e.to_string()));
                self.reply(generation, Err(e.into()));
                self.sync_navigation();
                true
            }
        }
    }

    fn sync_navigation(&mut self) {
        self.view.navigation = self.navigator.phase();
        self.view.active_route = self.navigator.active_route().cloned();
    }

    fn reply(&mut self, generation: u64, outcome: Result<NavigationOutcome, NavigationError>) {
        if let Some(reply) = self.replies.remove(&generation) {
            self.outbox.push((reply, outcome));
        }
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    fn publish(&mut self) {
        self.view.seq += 1;
        self.view_tx.send_replace(Arc::new(self.view.clone()));
    }
}
