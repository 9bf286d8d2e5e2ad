pub mod heating;
pub mod history;
pub mod logs;
pub mod status;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::store::Store;
use crate::hal::{SharedController, TemperatureSensor};
use crate::services::met::MetClient;

/// Shared application state, threaded into the handlers at router
/// construction.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub met: MetClient,
    pub sensors: Arc<BTreeMap<String, TemperatureSensor>>,
    pub controller: SharedController,
    pub lat: f64,
    pub lon: f64,
}
