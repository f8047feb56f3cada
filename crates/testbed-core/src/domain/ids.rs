//! Typed arena indices for every declared entity.
//!
//! Entities live in flat `Vec`s inside the [`DeclarationGraph`]; an id is the
//! position of the entity in its arena.  Ids are handed out in declaration
//! order, so an entity's parent always has a smaller id than the entity itself.
//!
//! [`DeclarationGraph`]: crate::domain::graph::DeclarationGraph

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn from_index(index: usize) -> Self {
                Self(index as u32)
            }

            /// Position of the entity in its arena.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $tag, self.0)
            }
        }
    };
}

entity_id!(
    /// Identifies a scenario or a setup.
    ContainerId,
    "container"
);
entity_id!(
    /// Identifies a physical device owned by a scenario or setup.
    DeviceId,
    "device"
);
entity_id!(
    /// Identifies a capability type.
    CapabilityId,
    "capability"
);
entity_id!(
    /// Identifies a logical device declared inside a capability type.
    LogicalDeviceId,
    "logical-device"
);
entity_id!(
    /// Identifies a capability instance attached to a device or logical device.
    InstanceId,
    "instance"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_order_by_declaration_index() {
        assert!(DeviceId::from_index(1) < DeviceId::from_index(2));
    }

    #[test]
    fn test_id_display_includes_family_tag() {
        assert_eq!(CapabilityId::from_index(3).to_string(), "capability#3");
    }
}
