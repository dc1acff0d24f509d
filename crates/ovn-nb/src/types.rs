//! Type-safe names for OVN Northbound entities.
//!
//! OVN addresses everything by name strings. Mixing up a port group name and
//! a logical switch name compiles fine when both are `String`, so each entity
//! gets its own newtype here, much like type-safe object IDs prevent OID
//! mix-ups on other southbound APIs.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_name_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new name from any string-like value.
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            /// Returns the name as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the name is empty.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_name_type!(
    /// Name of an OVN port group.
    ///
    /// OVN only matches port groups named `[a-zA-Z_.][a-zA-Z_.0-9]*`, so
    /// names must not contain hyphens.
    PortGroupName
);

define_name_type!(
    /// Name of an OVN logical switch.
    SwitchName
);

define_name_type!(
    /// Name of an OVN logical switch port.
    SwitchPortName
);

define_name_type!(
    /// Name of an OVN address set, referenced in matches as `$name_ip4` /
    /// `$name_ip6`.
    AddressSetName
);

define_name_type!(
    /// UUID of a port group row. An empty UUID means the group is absent.
    PortGroupUuid
);

define_name_type!(
    /// UUID of a logical switch port row.
    SwitchPortUuid
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        let pg = PortGroupName::new("incus_acl7");
        assert_eq!(pg.as_str(), "incus_acl7");
        assert_eq!(pg.to_string(), "incus_acl7");
        assert_eq!(PortGroupName::from("incus_acl7"), pg);
    }

    #[test]
    fn test_empty_uuid_means_absent() {
        let uuid = PortGroupUuid::default();
        assert!(uuid.is_empty());
        assert!(!PortGroupUuid::new("9f1c...").is_empty());
    }

    #[test]
    fn test_names_are_distinct_types() {
        // Compile-time property: a SwitchName cannot be passed where a
        // PortGroupName is expected. Runtime just checks Display parity.
        let sw = SwitchName::new("incus-net3-ls-int");
        assert_eq!(sw.as_ref(), "incus-net3-ls-int");
    }
}
