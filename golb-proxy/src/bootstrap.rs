//! One-time load of the stored weights at startup.

use golb_core::domain::assignment::zone_prefix;
use golb_core::FunctionState;
use golb_store::{StoreError, WeightStore};

use crate::updater::decode;

/// Reads every function of `zone`, returning the state and the store
/// revision it was read at. Undecodable entries are logged and skipped.
pub async fn load_function_state(
    store: &dyn WeightStore,
    zone: &str,
) -> Result<(FunctionState, i64), StoreError> {
    let snapshot = store.get_prefix(&zone_prefix(zone)).await?;
    tracing::debug!(revision = snapshot.revision, entries = snapshot.entries.len(), "read function state");

    let mut state = FunctionState::new(zone);
    for kv in &snapshot.entries {
        match decode(kv) {
            Ok(event) if event.zone == zone => {
                state.functions.insert(event.function, event.weights);
            }
            Ok(event) => tracing::debug!(zone = %event.zone, "skipping entry of other zone"),
            Err(e) => tracing::error!(error = %e, "skipping stored weights"),
        }
    }

    if state.functions.is_empty() {
        tracing::debug!(zone, "no state found for zone");
    }
    Ok((state, snapshot.revision))
}
