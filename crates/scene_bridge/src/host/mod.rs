//! Host scene-graph interface
//!
//! The engine never talks to an authoring application directly; it sees the
//! host DAG through the read-oriented [`HostScene`] trait. Node identity is
//! two-level, matching how DAGs with instancing work: a [`NodePath`] names
//! one location in the hierarchy, while a [`NodeId`] names the underlying
//! node, so an instanced node has one id and several paths.
//!
//! [`memory::MemoryScene`] is the in-process implementation used by the test
//! suite and headless sessions.

pub mod memory;

use crate::foundation::math::{Color, Mat4};

/// Frame-based time value; sub-frame offsets are fractions of a frame
pub type FrameTime = f64;

/// Stable identity of an underlying host node, shared by all paths of an
/// instanced node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Host node classification, established once when a node is first visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The DAG root
    World,
    /// Grouping/positioning node
    Transform,
    /// Renderable geometry
    Shape,
    /// Light source
    Light,
    /// Camera
    Camera,
    /// Particle instancer node
    Instancer,
}

/// One location in the host DAG, e.g. `/world/group1/mesh0`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath(String);

impl NodePath {
    /// Path of the DAG root
    pub fn world() -> Self {
        Self("/world".to_string())
    }

    /// Build a path from its string form; a leading `/` is expected
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Full path string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path component
    pub fn leaf(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Path of the parent location, `None` at the root
    pub fn parent(&self) -> Option<NodePath> {
        let idx = self.0.rfind('/')?;
        if idx == 0 {
            return None;
        }
        Some(NodePath(self.0[..idx].to_string()))
    }

    /// Append a child component
    pub fn join(&self, name: &str) -> NodePath {
        NodePath(format!("{}/{}", self.0, name))
    }

    /// Whether the path contains the given fragment anywhere
    pub fn contains(&self, fragment: &str) -> bool {
        !fragment.is_empty() && self.0.contains(fragment)
    }

    /// Whether this path lies strictly below `ancestor`
    pub fn is_below(&self, ancestor: &NodePath) -> bool {
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(&ancestor.0)
            && self.0.as_bytes()[ancestor.0.len()] == b'/'
    }

    /// Path string with separators and namespace characters replaced so the
    /// result is a legal backend entity name
    pub fn sanitized(&self) -> String {
        self.0
            .trim_start_matches('/')
            .replace(['/', ':', '|'], "_")
    }
}

impl std::fmt::Display for NodePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One particle of an instancer snapshot: its world matrix and the paths
/// instanced under it
#[derive(Debug, Clone)]
pub struct ParticleInstance {
    /// Particle world matrix
    pub matrix: Mat4,
    /// Source paths instanced under this particle
    pub paths: Vec<NodePath>,
}

/// Snapshot of an instancer's live particle set at the current host time
#[derive(Debug, Clone, Default)]
pub struct ParticleSnapshot {
    /// Per-particle entries, indexed by particle id
    pub particles: Vec<ParticleInstance>,
    /// Optional per-particle RGB data, same length as `particles`
    pub colors: Option<Vec<Color>>,
}

impl ParticleSnapshot {
    /// Color of one particle, when the driving system carries color data
    pub fn color(&self, particle_id: usize) -> Option<Color> {
        self.colors.as_ref().and_then(|c| c.get(particle_id).copied())
    }
}

/// Read access to the host application's scene graph.
///
/// All transform queries answer at the current time cursor; the engine moves
/// the cursor once per motion step via [`HostScene::set_time`], mirroring how
/// authoring applications evaluate their DAG at a single global time.
pub trait HostScene {
    /// Path of the DAG root (kind [`NodeKind::World`])
    fn root(&self) -> NodePath;

    /// Child paths of a location, in declaration order
    fn children(&self, path: &NodePath) -> Vec<NodePath>;

    /// Node classification, `None` for a path that no longer exists
    fn kind(&self, path: &NodePath) -> Option<NodeKind>;

    /// Underlying-node identity of a path
    fn node_id(&self, path: &NodePath) -> Option<NodeId>;

    /// Zero-based instance index of this path among the paths of its
    /// underlying node; 0 is the canonical path
    fn instance_index(&self, path: &NodePath) -> u32;

    /// Number of paths that reach this path's underlying node
    fn path_count(&self, path: &NodePath) -> u32;

    /// Move the evaluation time cursor
    fn set_time(&mut self, time: FrameTime);

    /// Current evaluation time
    fn current_time(&self) -> FrameTime;

    /// Local transform of the node at the current time
    fn local_transform(&self, path: &NodePath) -> Mat4;

    /// World (root-to-node) transform of the node at the current time
    fn world_transform(&self, path: &NodePath) -> Mat4;

    /// Whether the node is visible
    fn is_visible(&self, path: &NodePath) -> bool;

    /// Whether the node's transform or shape is animated
    fn is_animated(&self, path: &NodePath) -> bool;

    /// Whether motion blur is enabled for this node. Hosts expose this as a
    /// per-node override; the default is enabled.
    fn motion_blur_enabled(&self, path: &NodePath) -> bool {
        let _ = path;
        true
    }

    /// Whether the node feeds a particle instancer
    fn has_instancer_connection(&self, path: &NodePath) -> bool;

    /// Live particle snapshot of an instancer node at the current time
    fn particles(&self, instancer: &NodePath) -> ParticleSnapshot;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_parent_and_leaf() {
        let path = NodePath::world().join("group1").join("mesh0");
        assert_eq!(path.as_str(), "/world/group1/mesh0");
        assert_eq!(path.leaf(), "mesh0");
        assert_eq!(path.parent().unwrap().as_str(), "/world/group1");
        assert_eq!(NodePath::world().parent(), None);
    }

    #[test]
    fn test_path_sanitized() {
        let path = NodePath::new("/world/ns:group|odd/shape");
        assert_eq!(path.sanitized(), "world_ns_group_odd_shape");
    }

    #[test]
    fn test_snapshot_color_lookup() {
        let snapshot = ParticleSnapshot {
            particles: vec![ParticleInstance {
                matrix: Mat4::identity(),
                paths: vec![],
            }],
            colors: Some(vec![Color::new(1.0, 0.5, 0.0)]),
        };
        assert_eq!(snapshot.color(0), Some(Color::new(1.0, 0.5, 0.0)));
        assert_eq!(snapshot.color(1), None);
    }
}
