//! `orderflow-core`: shared building blocks for the fulfillment engine.
//!
//! Pure domain primitives only: identifiers, the error model, aggregate
//! traits and physical units. Nothing here touches storage.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod units;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    AggregateId, AliasId, BoxId, ItemPackageId, OrderItemId, OrderPackageId, RetailerId, SeriesId,
    ShipmentId, TenantId,
};
pub use units::{
    DimensionUnit, Dimensions, KG_TO_LB, WEIGHT_PRECISION, Weight, WeightUnit, round_half_up,
};
pub use value_object::ValueObject;
