pub mod capture_driver;
pub mod device_catalog;
pub mod recording_store;
pub mod session_observer;
