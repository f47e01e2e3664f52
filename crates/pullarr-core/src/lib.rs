pub mod config;
pub mod logging;

pub mod checksum;
pub mod control;
pub mod engine;
pub mod layout;
pub mod model;
pub mod notify;
pub mod reconcile;
pub mod registry;
pub mod relocate;
pub mod remote;
pub mod sync;
pub mod transfer;
