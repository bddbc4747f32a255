//! Value objects: compared by value, never by identity.

/// Marker for immutable values such as [`crate::Weight`] or [`crate::Dimensions`].
///
/// Two weights of `10 kg` are the same weight; to change one, build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
