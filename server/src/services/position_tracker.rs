use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::ready;
use futures::stream::{BoxStream, Stream, StreamExt};
use spotwalk_shared::Coordinate;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, warn};

use crate::error::PositionError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub coordinate: Coordinate,
    /// Device accuracy hint in meters.
    pub accuracy: Option<f64>,
}

pub type PositionReading = Result<PositionFix, PositionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub high_accuracy: bool,
}

impl WatchOptions {
    pub const HIGH_ACCURACY: Self = Self {
        high_accuracy: true,
    };
}

/// Platform position and orientation signals. Each watch is an independent
/// subscription; dropping the returned stream releases it.
pub trait DeviceSensors: Send + Sync {
    fn watch_position(&self, options: WatchOptions) -> BoxStream<'static, PositionReading>;

    /// Raw device angle (`alpha`) in degrees, `None` when the sensor has no reading.
    fn watch_orientation(&self) -> BoxStream<'static, Option<f64>>;
}

/// Normalized tracker output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackerEvent {
    Position(PositionFix),
    Heading(f64),
}

/// Convert a device-relative angle into a map bearing in `[0, 360)`.
pub fn normalize_heading(raw: Option<f64>) -> Option<f64> {
    let raw = raw.filter(|value| value.is_finite())?;
    let heading = (360.0 - raw).rem_euclid(360.0);
    Some(if heading >= 360.0 { 0.0 } else { heading })
}

/// Successful fixes only. Failed reads are logged and the stream keeps going.
pub fn position_updates<S>(raw: S) -> impl Stream<Item = PositionFix>
where
    S: Stream<Item = PositionReading>,
{
    raw.filter_map(|reading| {
        ready(match reading {
            Ok(fix) if fix.coordinate.is_finite() => Some(fix),
            Ok(fix) => {
                warn!(?fix, "discarding non-finite position fix");
                None
            }
            Err(e) => {
                warn!(error = %e, "position read failed; still listening");
                None
            }
        })
    })
}

pub fn heading_updates<S>(raw: S) -> impl Stream<Item = f64>
where
    S: Stream<Item = Option<f64>>,
{
    raw.filter_map(|alpha| ready(normalize_heading(alpha)))
}

/// Owns both device subscriptions and forwards normalized events into a sink.
pub struct PositionTracker {
    position_task: Option<JoinHandle<()>>,
    heading_task: Option<JoinHandle<()>>,
}

impl PositionTracker {
    pub fn start<E>(sensors: &dyn DeviceSensors, sink: mpsc::Sender<E>) -> Self
    where
        E: From<TrackerEvent> + Send + 'static,
    {
        let positions = position_updates(sensors.watch_position(WatchOptions::HIGH_ACCURACY));
        let headings = heading_updates(sensors.watch_orientation());

        let position_sink = sink.clone();
        let position_task = tokio::spawn(async move {
            let mut positions = std::pin::pin!(positions);
            while let Some(fix) = positions.next().await {
                if position_sink
                    .send(TrackerEvent::Position(fix).into())
                    .await
                    .is_err()
                {
                    break;
                }
            }
            debug!("position subscription ended");
        });

        let heading_task = tokio::spawn(async move {
            let mut headings = std::pin::pin!(headings);
            while let Some(heading) = headings.next().await {
                if sink.send(TrackerEvent::Heading(heading).into()).await.is_err() {
                    break;
                }
            }
            debug!("heading subscription ended");
        });

        info!("position tracker started");
        Self {
            position_task: Some(position_task),
            heading_task: Some(heading_task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.position_task.is_some() || self.heading_task.is_some()
    }

    /// Release both device subscriptions and wait until they are dropped.
    pub async fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        for task in [self.position_task.take(), self.heading_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
            let _ = task.await;
        }
        info!("position tracker stopped");
    }
}

impl Drop for PositionTracker {
    fn drop(&mut self) {
        for task in [self.position_task.take(), self.heading_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

/// Sensors fed by the browser over HTTP. Every watch is a fresh broadcast
/// receiver, so the listener counts show whether subscriptions leak.
#[derive(Clone)]
pub struct DeviceFeed {
    positions: broadcast::Sender<PositionReading>,
    orientation: broadcast::Sender<Option<f64>>,
    high_accuracy: Arc<AtomicBool>,
}

impl DeviceFeed {
    pub fn new(buffer: usize) -> Self {
        let (positions, _) = broadcast::channel(buffer.max(1));
        let (orientation, _) = broadcast::channel(buffer.max(1));
        Self {
            positions,
            orientation,
            high_accuracy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the number of active position subscriptions that saw the reading.
    pub fn report_position(&self, reading: PositionReading) -> usize {
        self.positions.send(reading).unwrap_or(0)
    }

    pub fn report_orientation(&self, alpha: Option<f64>) -> usize {
        self.orientation.send(alpha).unwrap_or(0)
    }

    pub fn position_listeners(&self) -> usize {
        self.positions.receiver_count()
    }

    pub fn orientation_listeners(&self) -> usize {
        self.orientation.receiver_count()
    }

    /// Whether a subscriber asked the device for high-accuracy fixes.
    pub fn high_accuracy_requested(&self) -> bool {
        self.high_accuracy.load(Ordering::Relaxed)
    }
}

impl DeviceSensors for DeviceFeed {
    fn watch_position(&self, options: WatchOptions) -> BoxStream<'static, PositionReading> {
        if options.high_accuracy {
            self.high_accuracy.store(true, Ordering::Relaxed);
        }
        BroadcastStream::new(self.positions.subscribe())
            .filter_map(|item| {
                ready(match item {
                    Ok(reading) => Some(reading),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "position subscriber lagged; dropping stale fixes");
                        None
                    }
                })
            })
            .boxed()
    }

    fn watch_orientation(&self) -> BoxStream<'static, Option<f64>> {
        BroadcastStream::new(self.orientation.subscribe())
            .filter_map(|item| {
                ready(match item {
                    Ok(alpha) => Some(alpha),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        debug!(skipped, "orientation subscriber lagged");
                        None
                    }
                })
            })
            .boxed()
    }
}
