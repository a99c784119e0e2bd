//! Scheduler selection for incoming requests.

use crate::domain::routing::RoutingTable;
use crate::error::{Error, Result};

/// Picks the next target for `function`.
///
/// Requests that were already `forwarded` by another node skip gateways and
/// use the filtered scheduler; all others use the full target set.
pub fn select_target(table: &RoutingTable, function: &str, forwarded: bool) -> Result<String> {
    let route = table.get(function).ok_or_else(|| Error::UnknownFunction {
        function: function.to_string(),
    })?;

    let scheduler = if forwarded {
        route.direct().ok_or_else(|| Error::NoDirectTarget {
            function: function.to_string(),
        })?
    } else {
        route.all()
    };

    Ok(scheduler.next().to_string())
}
