//! Translated scene objects
//!
//! A [`TranslatedObject`] is the engine-side record of one host node (or one
//! transient instancer proxy). Records live in a generational arena owned by
//! the scene; all cross-references between them are typed handles, never
//! direct references, so a full rebuild invalidates stale back-references
//! instead of dangling.

use crate::foundation::collections::TypedHandle;
use crate::host::{NodeId, NodeKind, NodePath};

use super::attributes::ObjectAttributes;
use super::motion::TransformSamples;

/// Stable arena handle to a [`TranslatedObject`]
pub type ObjectHandle = TypedHandle<TranslatedObject>;

/// Identity of a transient instancer proxy
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyInfo {
    /// Path of the instancer node that produced this proxy
    pub instancer: NodePath,
    /// Particle index driving this proxy
    pub particle_id: u32,
}

/// Engine-side record of one host node.
///
/// Rebuilt wholesale by a full scene parse, or patched in place by the
/// interactive update tracker.
#[derive(Debug, Clone)]
pub struct TranslatedObject {
    /// Full host path of the node (synthetic for instancer proxies)
    pub path: NodePath,
    /// Stable identity of the underlying host node
    pub node_id: NodeId,
    /// Host-side node kind established at classification time
    pub node_kind: NodeKind,
    /// Parent record, used only for attribute and boundary lookups
    pub parent: Option<ObjectHandle>,
    /// Canonical record this one is an instance of, if any
    pub original_object: Option<ObjectHandle>,
    /// 0 for the canonical record, the path or particle index otherwise
    pub instance_index: u32,
    /// Attribute snapshot computed during the walk
    pub attributes: ObjectAttributes,
    /// World-matrix samples for the frame being prepared
    pub transform_samples: TransformSamples,
    /// Geometry samples recorded for the frame being prepared
    pub deform_samples: u32,
    /// Host visibility at parse time
    pub visible: bool,
    /// Whether the node's transform or geometry is animated
    pub animated: bool,
    /// Per-node motion-blur switch; when false the object keeps a single
    /// rest sample even while blur is enabled globally
    pub motion_blurred: bool,
    /// Whether the node itself feeds a particle instancer
    pub instancer_connection: bool,
    /// Whether the underlying node is reachable via more than one path
    pub instanced: bool,
    /// Set when the host reported the node removed; the record survives one
    /// update cycle so backend entities can be torn down
    pub removed: bool,
    /// Present only on transient instancer proxies
    pub proxy: Option<ProxyInfo>,
}

impl TranslatedObject {
    /// New record with default flags and empty samples
    pub fn new(path: NodePath, node_id: NodeId, node_kind: NodeKind) -> Self {
        Self {
            path,
            node_id,
            node_kind,
            parent: None,
            original_object: None,
            instance_index: 0,
            attributes: ObjectAttributes::root(),
            transform_samples: TransformSamples::new(),
            deform_samples: 0,
            visible: true,
            animated: false,
            motion_blurred: true,
            instancer_connection: false,
            instanced: false,
            removed: false,
            proxy: None,
        }
    }

    /// Whether this record reuses another record's assembly
    pub fn is_instance(&self) -> bool {
        self.instance_index > 0 || self.proxy.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_record_is_not_an_instance() {
        let shape = TranslatedObject::new(NodePath::new("/world/a/aShape"), NodeId(1), NodeKind::Shape);
        assert!(!shape.is_instance());
    }

    #[test]
    fn test_instance_paths_and_proxies_are_instances() {
        let mut copy = TranslatedObject::new(NodePath::new("/world/b/aShape"), NodeId(1), NodeKind::Shape);
        copy.instance_index = 1;
        assert!(copy.is_instance());

        let mut proxy = TranslatedObject::new(NodePath::new("/world/a/aShape_i_3"), NodeId(1), NodeKind::Shape);
        proxy.proxy = Some(ProxyInfo {
            instancer: NodePath::new("/world/inst"),
            particle_id: 3,
        });
        assert!(proxy.is_instance());
    }
}
