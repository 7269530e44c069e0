//! order-types: domain model and ports shared by the order service crates.

pub mod domain;
pub mod ports;
