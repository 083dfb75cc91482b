//! Inherited per-object attribute snapshots
//!
//! Attributes flow strictly parent to child during traversal. Each node
//! receives a copy of its parent's snapshot, folds in its own state and hands
//! the result to its children, so there is never shared mutable state between
//! levels of the hierarchy.

use crate::foundation::math::{Color, Mat4};

use super::object::ObjectHandle;

/// Attribute snapshot inherited down the hierarchy during a walk.
///
/// The snapshot answers two questions for every translated object: which
/// assembly does it belong to (`assembly_anchor`), and where does it sit
/// inside that assembly (`accumulated_local`).
#[derive(Debug, Clone)]
pub struct ObjectAttributes {
    /// True if this object owns its own assembly boundary
    pub needs_own_assembly: bool,
    /// Nearest ancestor-or-self that owns an assembly
    pub assembly_anchor: Option<ObjectHandle>,
    /// Composition of local transforms since the last assembly boundary.
    ///
    /// Identity for boundary objects themselves; only transform nodes
    /// contribute to the composition.
    pub accumulated_local: Mat4,
    /// True if this object or an ancestor feeds a particle instancer
    pub has_instancer_connection: bool,
    /// Per-particle color override, stamped onto instancer proxies
    pub color_override: Option<Color>,
    /// Per-particle opacity override, stamped onto instancer proxies
    pub opacity_override: Option<f64>,
}

impl ObjectAttributes {
    /// Snapshot handed to the world root, before any node contributes
    pub fn root() -> Self {
        Self {
            needs_own_assembly: false,
            assembly_anchor: None,
            accumulated_local: Mat4::identity(),
            has_instancer_connection: false,
            color_override: None,
            opacity_override: None,
        }
    }

    /// Child snapshot derived from a parent's.
    ///
    /// The anchor, accumulated matrix and instancer flag carry over;
    /// `needs_own_assembly` does not, it is re-decided per node. Overrides
    /// are per-object and never inherited.
    pub fn inherited(parent: &ObjectAttributes) -> Self {
        Self {
            needs_own_assembly: false,
            assembly_anchor: parent.assembly_anchor,
            accumulated_local: parent.accumulated_local,
            has_instancer_connection: parent.has_instancer_connection,
            color_override: None,
            opacity_override: None,
        }
    }

    /// Turn this snapshot into an assembly boundary anchored at `owner`.
    ///
    /// Resets the accumulated matrix: objects below the boundary measure
    /// their placement from it, the boundary's own placement lives on its
    /// assembly instance.
    pub fn promote_to_boundary(&mut self, owner: ObjectHandle) {
        self.needs_own_assembly = true;
        self.assembly_anchor = Some(owner);
        self.accumulated_local = Mat4::identity();
    }
}

impl Default for ObjectAttributes {
    fn default() -> Self {
        Self::root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::collections::TypedHandle;
    use crate::foundation::math::Vec3;
    use slotmap::SlotMap;

    fn handle() -> ObjectHandle {
        let mut arena: SlotMap<slotmap::DefaultKey, ()> = SlotMap::new();
        TypedHandle::new(arena.insert(()))
    }

    #[test]
    fn test_inherited_drops_boundary_flag_but_keeps_anchor() {
        let mut parent = ObjectAttributes::root();
        parent.promote_to_boundary(handle());
        parent.has_instancer_connection = true;

        let child = ObjectAttributes::inherited(&parent);
        assert!(!child.needs_own_assembly);
        assert_eq!(child.assembly_anchor, parent.assembly_anchor);
        assert!(child.has_instancer_connection);
    }

    #[test]
    fn test_inherited_does_not_carry_overrides() {
        let mut parent = ObjectAttributes::root();
        parent.color_override = Some(crate::foundation::math::Color::new(1.0, 0.0, 0.0));
        parent.opacity_override = Some(0.5);

        let child = ObjectAttributes::inherited(&parent);
        assert!(child.color_override.is_none());
        assert!(child.opacity_override.is_none());
    }

    #[test]
    fn test_promote_resets_accumulated_matrix() {
        let mut attrs = ObjectAttributes::root();
        attrs.accumulated_local = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        attrs.promote_to_boundary(handle());
        assert_eq!(attrs.accumulated_local, Mat4::identity());
        assert!(attrs.needs_own_assembly);
    }
}
