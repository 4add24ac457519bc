//! Heating Oil Level Library
//!
//! Estimates the oil left in a heating tank from a manual dip reading and the
//! energy a boiler has reported to Home Assistant since that reading.

pub mod config;
pub mod coordinator;
pub mod entity_watcher;
pub mod estimator;
pub mod home_assistant;
pub mod monitor;
pub mod sensor_publisher;
pub mod sensors;
pub mod storage;

// Re-export commonly used types for easier access
pub use config::{ConfigOptions, Settings, TankConfig};
pub use coordinator::{Coordinator, MonitorInput};
pub use estimator::Reading;
pub use monitor::{MonitorEvent, TankMonitor, TankSnapshot};
