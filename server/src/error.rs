use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error("spot source {location} is unreachable: {reason}")]
    Unreachable { location: String, reason: String },
    #[error("spot source {location} is malformed: {reason}")]
    Malformed { location: String, reason: String },
}

/// A failed device position read. Transient; the tracker keeps listening.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable: {0}")]
    Unavailable(String),
    #[error("position request timed out")]
    Timeout,
}

impl PositionError {
    /// Map a W3C `GeolocationPositionError.code` onto the taxonomy.
    pub fn from_code(code: Option<u16>, message: Option<String>) -> Self {
        match code {
            Some(1) => Self::PermissionDenied,
            Some(3) => Self::Timeout,
            _ => Self::Unavailable(message.unwrap_or_else(|| "signal lost".to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("achievement store unreachable: {0}")]
    Unreachable(String),
    #[error("failed to persist achievement store: {0}")]
    Persist(String),
    #[error("spot index {0} cannot be stored")]
    IndexOutOfRange(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("directions request failed: {0}")]
    Network(String),
    #[error("no walking route found")]
    NoRouteFound,
}

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("current location is not known yet")]
    LocationUnavailable,
    #[error("spot {0} is not in the catalog")]
    UnknownSpot(usize),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("engine is not running")]
    EngineStopped,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("spot {0} is not in the catalog")]
    UnknownSpot(usize),
    #[error("sign in to record an achievement")]
    NotSignedIn,
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("failed to store photo: {0}")]
    Storage(String),
    #[error("engine is not running")]
    EngineStopped,
}
