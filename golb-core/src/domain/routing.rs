//! Function routing table.
//!
//! Maps each function to its schedulers: one over every target and one over
//! the targets left after removing the gateway.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::domain::assignment::{FunctionState, WeightAssignment};
use crate::error::Result;
use crate::load_balancer::gateway::GatewaySet;
use crate::load_balancer::wrr::WeightedRoundRobin;

/// Both schedulers of one function together with the assignment they were built from.
#[derive(Debug)]
pub struct FunctionRoute {
    weights: WeightAssignment,
    all: WeightedRoundRobin,
    direct: Option<WeightedRoundRobin>,
}

impl FunctionRoute {
    /// Builds the schedulers for `weights`, continuing the cursors of `previous`.
    ///
    /// `direct` is `None` when every target is a gateway, or when more than
    /// one target is a gateway and no filtered set can be derived. Only an
    /// unusable assignment fails the whole route.
    pub fn build(
        weights: WeightAssignment,
        gateways: &GatewaySet,
        previous: Option<&FunctionRoute>,
    ) -> Result<Self> {
        let all = WeightedRoundRobin::resume(&weights, previous.map(|p| &p.all))?;

        let direct = match gateways.filter(&weights) {
            Ok(filtered) if filtered.is_empty() => None,
            Ok(filtered) => {
                let prev = previous.and_then(|p| p.direct.as_ref());
                Some(WeightedRoundRobin::resume(&filtered, prev)?)
            }
            Err(e) => {
                tracing::warn!(error = %e, "no direct targets, forwarded requests are refused");
                None
            }
        };

        Ok(Self {
            weights,
            all,
            direct,
        })
    }

    /// The assignment this route was built from.
    pub fn weights(&self) -> &WeightAssignment {
        &self.weights
    }

    /// Scheduler over every target, gateways included.
    pub fn all(&self) -> &WeightedRoundRobin {
        &self.all
    }

    /// Scheduler over non-gateway targets.
    pub fn direct(&self) -> Option<&WeightedRoundRobin> {
        self.direct.as_ref()
    }
}

/// A lock-free routing table mapping function names to their schedulers.
///
/// Uses `ArcSwap` over an immutable map so request tasks never wait on an
/// update, and a replaced function becomes visible in a single pointer swap.
/// Writes are expected from one task (bootstrap, then the update pipeline).
#[derive(Debug)]
pub struct RoutingTable {
    zone: String,
    gateways: GatewaySet,
    routes: ArcSwap<HashMap<String, Arc<FunctionRoute>>>,
}

impl RoutingTable {
    /// Create an empty routing table for `zone`.
    pub fn new(zone: impl Into<String>, gateways: GatewaySet) -> Self {
        Self {
            zone: zone.into(),
            gateways,
            routes: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Zone served by this table.
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Configured gateways.
    pub fn gateways(&self) -> &GatewaySet {
        &self.gateways
    }

    /// Current route of `function`.
    pub fn get(&self, function: &str) -> Option<Arc<FunctionRoute>> {
        self.routes.load().get(function).cloned()
    }

    /// Replaces the route of `function` with one built from `weights`.
    ///
    /// The cursors are taken from the route being replaced right before the
    /// swap. A request holding the old route may still advance it after
    /// that, so a target can repeat once across an update. On error the
    /// previous route stays in place.
    pub fn apply(&self, function: &str, weights: WeightAssignment) -> Result<()> {
        weights.validate()?;

        let mut outcome = Ok(());
        self.routes.rcu(|routes| {
            let mut next = HashMap::clone(routes);
            let previous = routes.get(function).map(Arc::as_ref);
            match FunctionRoute::build(weights.clone(), &self.gateways, previous) {
                Ok(route) => {
                    next.insert(function.to_string(), Arc::new(route));
                    outcome = Ok(());
                }
                Err(e) => outcome = Err(e),
            }
            next
        });
        outcome
    }

    /// Drops the route of `function`, returning whether it existed.
    pub fn remove(&self, function: &str) -> bool {
        if self.get(function).is_none() {
            return false;
        }
        self.routes.rcu(|routes| {
            let mut routes = HashMap::clone(routes);
            routes.remove(function);
            routes
        });
        true
    }

    /// Applies every assignment of `state`, skipping invalid ones.
    ///
    /// Returns the number of functions that were applied.
    pub fn seed(&self, state: &FunctionState) -> usize {
        let mut applied = 0;
        for (function, weights) in &state.functions {
            match self.apply(function, weights.clone()) {
                Ok(()) => applied += 1,
                Err(e) => tracing::warn!(function = %function, error = %e, "skipping function"),
            }
        }
        applied
    }

    /// Snapshot of the stored assignments.
    pub fn function_state(&self) -> FunctionState {
        let mut state = FunctionState::new(self.zone.clone());
        for (function, route) in self.routes.load().iter() {
            state
                .functions
                .insert(function.clone(), route.weights().clone());
        }
        state
    }

    /// Number of routed functions.
    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    /// Whether no function is routed.
    pub fn is_empty(&self) -> bool {
        self.routes.load().is_empty()
    }
}

/// A shared reference to the lock-free routing table.
pub type SharedRoutingTable = Arc<RoutingTable>;
