//! Gateway detection and filtering.
//!
//! A request that already passed through a gateway must go straight to a
//! function instance, so each function also gets an assignment with its
//! gateway entry removed.

use crate::domain::assignment::WeightAssignment;
use crate::error::{Error, Result};

/// Address fragments identifying internal gateway nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewaySet {
    fragments: Vec<String>,
}

impl GatewaySet {
    /// Builds the set, ignoring blank fragments.
    pub fn new<S: AsRef<str>>(fragments: impl IntoIterator<Item = S>) -> Self {
        let fragments = fragments
            .into_iter()
            .map(|f| f.as_ref().trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        Self { fragments }
    }

    /// Whether `address` belongs to a gateway.
    ///
    /// An entry with a port (`host:port`) must equal the address; any other
    /// entry is an address fragment matched as a substring.
    pub fn is_gateway(&self, address: &str) -> bool {
        self.fragments.iter().any(|f| {
            if f.contains(':') {
                address == f
            } else {
                address.contains(f.as_str())
            }
        })
    }

    /// Configured fragments.
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    /// Removes the first gateway entry from `assignment`.
    ///
    /// At most one gateway fronts a function, so an assignment listing more
    /// than one is rejected instead of being partially filtered.
    pub fn filter(&self, assignment: &WeightAssignment) -> Result<WeightAssignment> {
        let mut gateways = assignment
            .ips
            .iter()
            .enumerate()
            .filter(|(_, ip)| self.is_gateway(ip))
            .map(|(i, _)| i);

        let Some(first) = gateways.next() else {
            return Ok(assignment.clone());
        };

        if let Some(second) = gateways.next() {
            return Err(Error::InvalidWeights(format!(
                "more than one gateway target: {} and {}",
                assignment.ips[first], assignment.ips[second]
            )));
        }

        Ok(assignment.without(first))
    }
}
