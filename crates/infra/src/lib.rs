//! Storage, orchestration and configuration for the fulfillment engine.
//!
//! The domain crates decide; this crate persists their events, keeps the
//! package tables, and wires everything into [`fulfillment::FulfillmentService`].

pub mod catalog_store;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod fulfillment;
pub mod ledger;
pub mod package_store;
pub mod projections;

pub use config::{ConfigError, FulfillmentConfig};
pub use fulfillment::{
    DivideRequest, DivideResponse, FulfillmentError, FulfillmentService, ManualPackageRequest,
    ManualPackageResponse, ReturnEvent, ReturnOutcome, ShipRequest,
};

#[cfg(test)]
mod integration_tests;
