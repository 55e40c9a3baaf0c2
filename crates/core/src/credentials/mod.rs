//! Credential lifecycle: types, ports, and the manager service.

pub mod manager;
pub mod ports;
pub mod types;
