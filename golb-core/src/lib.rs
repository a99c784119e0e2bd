//! golb core functionality.
//!
//! This crate contains the domain models, the weighted round-robin scheduler
//! and the routing table that power the golb function load balancer.

pub mod error;

/// Weight assignments, request paths and the routing table.
pub mod domain {
    pub mod assignment;
    pub mod path;
    pub mod routing;
}

/// Scheduling, gateway filtering and scheduler selection.
pub mod load_balancer {
    pub mod gateway;
    pub mod selector;
    pub mod wrr;
}

pub use domain::assignment::{ChangeEvent, FunctionState, WeightAssignment};
pub use domain::path::FunctionPath;
pub use domain::routing::{FunctionRoute, RoutingTable, SharedRoutingTable};
pub use error::{Error, Result};
pub use load_balancer::gateway::GatewaySet;
pub use load_balancer::wrr::WeightedRoundRobin;
