//! Identifiers
//!
//! Two families of handles are used by the render pipeline:
//!
//! - **Generational keys** ([`RenderObjectKey`], [`StaticObjectNode`]) live as
//!   long as the object they point to is registered. A stale key is rejected by
//!   the owning `SlotMap` instead of aliasing a newer object.
//! - **Per-frame node references**, declared with [`node_reference!`], are plain
//!   indices into arrays rebuilt every frame. They carry an explicit `INVALID`
//!   sentinel and are meaningless after the next reset.

use slotmap::new_key_type;

new_key_type! {
    /// Handle to a render object registered in a render system.
    pub struct RenderObjectKey;

    /// Stable per-feature node of a registered render object.
    ///
    /// Indexes long-lived per-object data such as compiled render effects.
    pub struct StaticObjectNode;
}

/// Declares a per-frame node reference type.
///
/// ```rust
/// vesta_core::node_reference! {
///     /// Index into a per-frame array.
///     pub struct MyNodeReference;
/// }
///
/// let node = MyNodeReference::new(3);
/// assert_eq!(node.index(), 3);
/// assert!(!MyNodeReference::INVALID.is_valid());
/// ```
#[macro_export]
macro_rules! node_reference {
    ($(#[$meta:meta])* $vis:vis struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis struct $name(u32);

        impl $name {
            /// Sentinel for "no node allocated this frame".
            pub const INVALID: Self = Self(u32::MAX);

            #[inline]
            #[must_use]
            pub const fn new(index: usize) -> Self {
                Self(index as u32)
            }

            #[inline]
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    node_reference! {
        struct TestNode;
    }

    #[test]
    fn node_reference_defaults_to_invalid() {
        assert_eq!(TestNode::default(), TestNode::INVALID);
        assert!(TestNode::new(0).is_valid());
    }

    #[test]
    fn stale_static_node_is_rejected() {
        let mut nodes: SlotMap<StaticObjectNode, &str> = SlotMap::with_key();
        let first = nodes.insert("a");
        nodes.remove(first);
        let second = nodes.insert("b");

        assert!(nodes.get(first).is_none());
        assert_eq!(nodes.get(second), Some(&"b"));
    }
}
