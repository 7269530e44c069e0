//! order-workflow: order workflow engine with its inbound HTTP and outbound
//! product directory adapters.

pub mod config;
pub mod errors;

pub mod application;

pub use order_types::{domain, ports};

pub mod inbound; // HTTP adapter (server + handlers)
pub mod outbound; // product directory adapters
