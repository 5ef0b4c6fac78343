use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::colors::{Rgb, marker_color};
use crate::geo::{Bounds, Coordinate};
use crate::spot::{AchievedSet, Spot};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPosition {
    pub coordinate: Coordinate,
    /// Map bearing in `[0, 360)`; `None` until the compass reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_degrees: Option<f64>,
    /// Accuracy hint of the last fix in meters, when the device reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// Where a navigation request is headed. `spot_index` is absent when
/// navigating to an arbitrary point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationTarget {
    pub destination: Coordinate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRoute {
    pub origin: Coordinate,
    pub destination: Coordinate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_index: Option<usize>,
    pub geometry: Vec<Coordinate>,
}

impl ActiveRoute {
    /// Box to fit the viewport to. Falls back to origin/destination when the
    /// geometry is empty.
    pub fn bounds(&self) -> Bounds {
        Bounds::from_points(&self.geometry).unwrap_or_else(|| {
            let mut bounds = Bounds {
                south_west: self.origin,
                north_east: self.origin,
            };
            bounds.extend(&self.destination);
            bounds
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "phase")]
pub enum NavigationPhase {
    #[default]
    Idle,
    RouteRequested {
        target: NavigationTarget,
    },
    RouteActive,
}

impl NavigationPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::RouteRequested { .. } => "route_requested",
            Self::RouteActive => "route_active",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotView {
    #[serde(flatten)]
    pub spot: Spot,
    pub achieved: bool,
    #[serde(default)]
    pub has_photo: bool,
}

impl SpotView {
    pub fn marker_color(&self) -> Rgb {
        marker_color(self.achieved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub achieved: usize,
    pub total: usize,
}

impl Progress {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.achieved as f64 / self.total as f64
        }
    }
}

/// Everything the renderer draws. Snapshots are immutable once published.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    /// Bumped once per applied input event.
    pub seq: u64,
    pub spots: Vec<SpotView>,
    #[serde(default)]
    pub user_position: Option<UserPosition>,
    #[serde(default)]
    pub navigation: NavigationPhase,
    #[serde(default)]
    pub active_route: Option<ActiveRoute>,
    #[serde(default)]
    pub progress: Progress,
}

impl ViewState {
    pub fn from_catalog(spots: Vec<Spot>) -> Self {
        let total = spots.len();
        Self {
            spots: spots
                .into_iter()
                .map(|spot| SpotView {
                    spot,
                    achieved: false,
                    has_photo: false,
                })
                .collect(),
            progress: Progress { achieved: 0, total },
            ..Self::default()
        }
    }

    /// Recompute every spot's flag from scratch. Indices outside the catalog
    /// are ignored.
    pub fn apply_achieved_set(&mut self, achieved: &AchievedSet) {
        let mut count = 0;
        for view in &mut self.spots {
            view.achieved = achieved.contains(&view.spot.index);
            if view.achieved {
                count += 1;
            }
        }
        self.progress = Progress {
            achieved: count,
            total: self.spots.len(),
        };
    }

    pub fn apply_photo_presence(&mut self, with_photo: &BTreeSet<usize>) {
        for view in &mut self.spots {
            view.has_photo = with_photo.contains(&view.spot.index);
        }
    }

    pub fn spot(&self, index: usize) -> Option<&SpotView> {
        self.spots.get(index)
    }

    pub fn is_achieved(&self, index: usize) -> bool {
        self.spot(index).is_some_and(|view| view.achieved)
    }
}
