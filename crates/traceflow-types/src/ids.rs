//! Type-safe identifier wrappers.
//!
//! Actor and region identifiers are human-readable strings derived from the
//! country code (`BR_M000042`, `BR_G003_F000017`). Wrapping them in distinct
//! newtypes prevents a farmer id from being passed where a middleman id is
//! expected. Ids are unique within a country and tier.
//!
//! [`RunId`] is the only UUID-backed id; it tags one batch run in logs and
//! reports.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`String`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing identifier string.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Return the inner [`String`] value.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// ISO-style country code, e.g. `BR`.
    CountryId
}

define_id! {
    /// Sub-national production region.
    GeographyId
}

define_id! {
    /// Unique identifier for a farmer (lowest tier).
    FarmerId
}

define_id! {
    /// Unique identifier for a middleman (intermediate tier).
    MiddlemanId
}

define_id! {
    /// Unique identifier for an exporter (top tier).
    ExporterId
}

impl GeographyId {
    /// Sequential geography id within a country, e.g. `BR_G003`.
    pub fn sequential(country: &CountryId, index: usize) -> Self {
        Self(format!("{country}_G{index:03}"))
    }
}

impl FarmerId {
    /// Sequential farmer id within a geography, e.g. `BR_G003_F000017`.
    pub fn sequential(geography: &GeographyId, index: usize) -> Self {
        Self(format!("{geography}_F{index:06}"))
    }
}

impl MiddlemanId {
    /// Sequential middleman id within a country, e.g. `BR_M000042`.
    pub fn sequential(country: &CountryId, index: usize) -> Self {
        Self(format!("{country}_M{index:06}"))
    }
}

impl ExporterId {
    /// Sequential exporter id within a country, e.g. `BR_E000007`.
    pub fn sequential(country: &CountryId, index: usize) -> Self {
        Self(format!("{country}_E{index:06}"))
    }
}

/// Identifier for one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new run id using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_ids_are_zero_padded() {
        let country = CountryId::new("BR");
        let geo = GeographyId::sequential(&country, 3);
        assert_eq!(geo.as_str(), "BR_G003");
        assert_eq!(FarmerId::sequential(&geo, 17).as_str(), "BR_G003_F000017");
        assert_eq!(MiddlemanId::sequential(&country, 42).as_str(), "BR_M000042");
        assert_eq!(ExporterId::sequential(&country, 7).as_str(), "BR_E000007");
    }

    #[test]
    fn sequential_ids_sort_in_creation_order() {
        let country = CountryId::new("CO");
        let a = MiddlemanId::sequential(&country, 9);
        let b = MiddlemanId::sequential(&country, 10);
        assert!(a < b);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ExporterId::new("PE_E000001");
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, "\"PE_E000001\"");
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}
