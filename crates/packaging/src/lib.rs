//! Packaging rules and the box divider.
//!
//! [`PackagingCatalog`] answers "which boxes may this product series ship
//! in"; [`divide`] turns ordered quantities into a box plan. Both are pure:
//! callers fetch the data and persist the result.

pub mod catalog;
pub mod divider;

pub use catalog::{BoxDefinition, PackageRule, PackagingCatalog, ProductSeries};
pub use divider::{BoxAssignment, DivideError, DivideItem, DividerSettings, PlacedItem, divide};
