use spotwalk_shared::{ActiveRoute, Coordinate, NavigationPhase, NavigationTarget};

use crate::error::RouteError;

/// An issued route request. Only the ticket with the current generation may
/// settle navigation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteTicket {
    pub generation: u64,
    pub target: NavigationTarget,
    pub origin: Coordinate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Activated(ActiveRoute),
    Failed(RouteError),
    /// The response belongs to a superseded or cleared request.
    Stale,
}

/// `Idle -> RouteRequested -> RouteActive -> Idle`.
#[derive(Debug, Default)]
pub struct Navigator {
    generation: u64,
    pending: Option<RouteTicket>,
    active: Option<ActiveRoute>,
}

impl Navigator {
    /// Issue a new request, superseding any pending one and dropping the
    /// current route. Returns the superseded ticket alongside the new one.
    pub fn request(
        &mut self,
        target: NavigationTarget,
        origin: Coordinate,
    ) -> (RouteTicket, Option<RouteTicket>) {
        self.generation += 1;
        let ticket = RouteTicket {
            generation: self.generation,
            target,
            origin,
        };
        self.active = None;
        let superseded = self.pending.replace(ticket);
        (ticket, superseded)
    }

    pub fn resolve(
        &mut self,
        generation: u64,
        result: Result<Vec<Coordinate>, RouteError>,
    ) -> Resolution {
        let Some(ticket) = self.pending.filter(|t| t.generation == generation) else {
            return Resolution::Stale;
        };
        self.pending = None;
        match result {
            Ok(geometry) => {
                let route = ActiveRoute {
                    origin: ticket.origin,
                    destination: ticket.target.destination,
                    spot_index: ticket.target.spot_index,
                    geometry,
                };
                self.active = Some(route.clone());
                Resolution::Activated(route)
            }
            Err(e) => Resolution::Failed(e),
        }
    }

    /// Back to idle. Returns the pending ticket, if any, which is now stale.
    pub fn clear(&mut self) -> Option<RouteTicket> {
        self.active = None;
        self.pending.take()
    }

    pub fn phase(&self) -> NavigationPhase {
        match (&self.pending, &self.active) {
            (Some(ticket), _) => NavigationPhase::RouteRequested {
                target: ticket.target,
            },
            (None, Some(_)) => NavigationPhase::RouteActive,
            (None, None) => NavigationPhase::Idle,
        }
    }

    pub fn active_route(&self) -> Option<&ActiveRoute> {
        self.active.as_ref()
    }
}
