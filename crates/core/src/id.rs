//! Strongly-typed identifiers.
//!
//! Aggregates (orders, products) are addressed by [`AggregateId`] wrapped in a
//! crate-local newtype; plain rows (packages, boxes, order items) get their own
//! id types here so they cannot be mixed up at call sites.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Uuid);

        impl $t {
            /// Fresh time-ordered (v7) identifier. Tests pass ids explicitly
            /// when ordering matters.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_newtype!(
    /// Tenant (the organization operating the platform account).
    TenantId,
    "TenantId"
);
uuid_newtype!(
    /// Retailer sending purchase orders; scopes merchant SKUs.
    RetailerId,
    "RetailerId"
);
uuid_newtype!(
    /// Identifier of an event-sourced aggregate stream.
    AggregateId,
    "AggregateId"
);
uuid_newtype!(OrderItemId, "OrderItemId");
uuid_newtype!(OrderPackageId, "OrderPackageId");
uuid_newtype!(ItemPackageId, "ItemPackageId");
uuid_newtype!(BoxId, "BoxId");
uuid_newtype!(SeriesId, "SeriesId");
uuid_newtype!(AliasId, "AliasId");
uuid_newtype!(ShipmentId, "ShipmentId");
