use serde::{Deserialize, Serialize};

use crate::view::ViewState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    LocationUnavailable,
    RouteNotFound,
    RouteFailed,
    WriteFailed,
    SignInRequired,
}

/// Transient, user-facing message. Never part of `ViewState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Payload of the live event stream consumed by renderers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ViewEvent {
    View { state: ViewState },
    Notice { notice: Notice },
}
