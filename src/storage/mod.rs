//! On-disk state: persisted documents and the temperature history log.

pub mod history;
pub mod store;

pub use history::{HistoryLogger, HistoryRange, HistoryRecord};
pub use store::{
    PersistentStore, CONTROL_ENABLE_KEY, LIGHT_STATE_KEY, SENSOR_OFFSETS_KEY, SETTINGS_KEY,
};
