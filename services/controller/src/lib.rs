//! pac controller
//!
//! Turns declared catalog services into running VMs reachable through a
//! shared load balancer:
//!
//! - [`reconciler::CatalogReconciler`] keeps catalog readiness current
//! - [`reconciler::ServiceReconciler`] provisions, exposes and tears down services
//! - [`expiry::ExpiryMonitor`] retires services past their expiry
//!
//! Reconcilers run under a [`worker::ControllerWorker`] and reach the
//! infrastructure only through the [`gateway`] traits.

pub mod capacity;
pub mod config;
pub mod error;
pub mod expiry;
pub mod gateway;
pub mod health;
pub mod model;
pub mod reconciler;
pub mod store;
pub mod worker;

#[cfg(test)]
mod testing;
