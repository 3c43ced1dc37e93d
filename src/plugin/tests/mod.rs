//! Plugin Runtime Tests
//!
//! Lifecycle and routing tests driven by mock plugins.


#[cfg(test)]
pub mod manager_tests;

#[cfg(test)]
pub mod router_tests;
