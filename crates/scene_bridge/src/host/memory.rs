//! In-memory host scene
//!
//! A self-contained [`HostScene`] implementation backed by hash maps. It
//! exists for the test suite and for headless sessions that assemble a scene
//! procedurally; it supports everything the translation engine consumes:
//! hierarchy edits, path-level instancing, keyable motion tracks and live
//! particle sets.

use std::collections::HashMap;

use crate::foundation::math::{Color, Mat4, Mat4Ext, Vec3};
use crate::host::{
    FrameTime, HostScene, NodeId, NodeKind, NodePath, ParticleInstance, ParticleSnapshot,
};

/// Procedural motion applied on top of a node's rest transform
#[derive(Debug, Clone)]
pub enum MotionTrack {
    /// Translation offset per frame, applied in parent space
    Slide(Vec3),
    /// Rotation about the local Y axis, radians per frame
    Spin(f64),
}

#[derive(Debug)]
struct MemoryNode {
    kind: NodeKind,
    id: NodeId,
    instance_index: u32,
    children: Vec<NodePath>,
    rest: Mat4,
    track: Option<MotionTrack>,
    visible: bool,
    animated: bool,
    motion_blurred: bool,
    instancer_connection: bool,
}

impl MemoryNode {
    fn new(kind: NodeKind, id: NodeId, instance_index: u32) -> Self {
        Self {
            kind,
            id,
            instance_index,
            children: Vec::new(),
            rest: Mat4::identity(),
            track: None,
            visible: true,
            animated: false,
            motion_blurred: true,
            instancer_connection: false,
        }
    }

    fn local_at(&self, time: FrameTime) -> Mat4 {
        match self.track {
            None => self.rest,
            Some(MotionTrack::Slide(velocity)) => {
                Mat4::new_translation(&(velocity * time)) * self.rest
            }
            Some(MotionTrack::Spin(rate)) => self.rest * Mat4::rotation_y(rate * time),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ParticleSet {
    entries: Vec<(Mat4, Vec<NodePath>)>,
    colors: Option<Vec<Color>>,
    drift: Vec3,
}

/// In-memory scene graph implementing [`HostScene`]
#[derive(Debug)]
pub struct MemoryScene {
    nodes: HashMap<NodePath, MemoryNode>,
    paths_by_id: HashMap<NodeId, Vec<NodePath>>,
    particles: HashMap<NodePath, ParticleSet>,
    next_id: u64,
    time: FrameTime,
}

impl Default for MemoryScene {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryScene {
    /// Create a scene holding only the world root
    pub fn new() -> Self {
        let mut scene = Self {
            nodes: HashMap::new(),
            paths_by_id: HashMap::new(),
            particles: HashMap::new(),
            next_id: 1,
            time: 0.0,
        };
        let root = NodePath::world();
        let id = scene.fresh_id();
        scene.register(root, MemoryNode::new(NodeKind::World, id, 0));
        scene
    }

    fn fresh_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn register(&mut self, path: NodePath, node: MemoryNode) {
        self.paths_by_id.entry(node.id).or_default().push(path.clone());
        self.nodes.insert(path, node);
    }

    fn add_node(&mut self, parent: &NodePath, name: &str, kind: NodeKind) -> NodePath {
        let path = parent.join(name);
        assert!(
            !self.nodes.contains_key(&path),
            "node already exists: {path}"
        );
        let id = self.fresh_id();
        self.register(path.clone(), MemoryNode::new(kind, id, 0));
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(path.clone());
        }
        path
    }

    /// Add a transform node under `parent`
    pub fn add_transform(&mut self, parent: &NodePath, name: &str) -> NodePath {
        self.add_node(parent, name, NodeKind::Transform)
    }

    /// Add a shape node under `parent`
    pub fn add_shape(&mut self, parent: &NodePath, name: &str) -> NodePath {
        self.add_node(parent, name, NodeKind::Shape)
    }

    /// Add a light node under `parent`
    pub fn add_light(&mut self, parent: &NodePath, name: &str) -> NodePath {
        self.add_node(parent, name, NodeKind::Light)
    }

    /// Add a camera node under `parent`
    pub fn add_camera(&mut self, parent: &NodePath, name: &str) -> NodePath {
        self.add_node(parent, name, NodeKind::Camera)
    }

    /// Add a particle instancer node under `parent`
    pub fn add_instancer(&mut self, parent: &NodePath, name: &str) -> NodePath {
        let path = self.add_node(parent, name, NodeKind::Instancer);
        self.particles.insert(path.clone(), ParticleSet::default());
        path
    }

    /// Instance the subtree rooted at `source` under a new parent.
    ///
    /// Every mirrored path shares its source's underlying [`NodeId`] and is
    /// assigned the next instance index for that node. Returns the new root
    /// path of the mirrored subtree.
    pub fn add_instance(&mut self, source: &NodePath, new_parent: &NodePath) -> NodePath {
        let path = new_parent.join(source.leaf());
        assert!(
            !self.nodes.contains_key(&path),
            "instance path already exists: {path}"
        );
        self.mirror(source, &path);
        if let Some(p) = self.nodes.get_mut(new_parent) {
            p.children.push(path.clone());
        }
        path
    }

    fn mirror(&mut self, source: &NodePath, target: &NodePath) {
        let (id, kind, rest, track, visible, animated, blurred, connection, children) = {
            let node = &self.nodes[source];
            (
                node.id,
                node.kind,
                node.rest,
                node.track.clone(),
                node.visible,
                node.animated,
                node.motion_blurred,
                node.instancer_connection,
                node.children.clone(),
            )
        };
        let index = self.paths_by_id[&id].len() as u32;
        let mut mirrored = MemoryNode::new(kind, id, index);
        mirrored.rest = rest;
        mirrored.track = track;
        mirrored.visible = visible;
        mirrored.animated = animated;
        mirrored.motion_blurred = blurred;
        mirrored.instancer_connection = connection;
        mirrored.children = children
            .iter()
            .map(|child| target.join(child.leaf()))
            .collect();
        self.register(target.clone(), mirrored);
        for child in children {
            let mirrored_child = target.join(child.leaf());
            self.mirror(&child, &mirrored_child);
        }
    }

    /// Set a node's rest-pose local transform
    pub fn set_local(&mut self, path: &NodePath, local: Mat4) {
        if let Some(node) = self.nodes.get_mut(path) {
            node.rest = local;
        }
    }

    /// Attach a motion track; the node becomes animated
    pub fn set_track(&mut self, path: &NodePath, track: MotionTrack) {
        if let Some(node) = self.nodes.get_mut(path) {
            node.track = Some(track);
            node.animated = true;
        }
    }

    /// Force the animated flag without attaching a track
    pub fn set_animated(&mut self, path: &NodePath, animated: bool) {
        if let Some(node) = self.nodes.get_mut(path) {
            node.animated = animated;
        }
    }

    /// Enable or disable motion blur for a node
    pub fn set_motion_blurred(&mut self, path: &NodePath, blurred: bool) {
        if let Some(node) = self.nodes.get_mut(path) {
            node.motion_blurred = blurred;
        }
    }

    /// Show or hide a node
    pub fn set_visible(&mut self, path: &NodePath, visible: bool) {
        if let Some(node) = self.nodes.get_mut(path) {
            node.visible = visible;
        }
    }

    /// Mark a node as feeding a particle instancer
    pub fn set_instancer_connection(&mut self, path: &NodePath, connected: bool) {
        if let Some(node) = self.nodes.get_mut(path) {
            node.instancer_connection = connected;
        }
    }

    /// Replace an instancer's particle set. Source nodes gain the instancer
    /// connection, as wiring them up in a host application would.
    pub fn set_particles(
        &mut self,
        instancer: &NodePath,
        entries: Vec<(Mat4, Vec<NodePath>)>,
        colors: Option<Vec<Color>>,
    ) {
        for (_, paths) in &entries {
            for path in paths {
                if let Some(node) = self.nodes.get_mut(path) {
                    node.instancer_connection = true;
                }
            }
        }
        let set = self.particles.entry(instancer.clone()).or_default();
        set.entries = entries;
        set.colors = colors;
    }

    /// Give an instancer's particles a shared translation per frame, so
    /// particle matrices vary across sub-frame times
    pub fn set_particle_drift(&mut self, instancer: &NodePath, drift: Vec3) {
        if let Some(set) = self.particles.get_mut(instancer) {
            set.drift = drift;
        }
    }

    /// Remove a node and its subtree
    pub fn remove_node(&mut self, path: &NodePath) {
        if let Some(parent) = path.parent() {
            if let Some(node) = self.nodes.get_mut(&parent) {
                node.children.retain(|c| c != path);
            }
        }
        self.drop_subtree(path);
    }

    fn drop_subtree(&mut self, path: &NodePath) {
        let Some(node) = self.nodes.remove(path) else {
            return;
        };
        if let Some(paths) = self.paths_by_id.get_mut(&node.id) {
            paths.retain(|p| p != path);
        }
        self.particles.remove(path);
        for child in node.children {
            self.drop_subtree(&child);
        }
    }

    /// Rename a node in place, re-keying its subtree. Returns the new path.
    pub fn rename_node(&mut self, path: &NodePath, new_name: &str) -> NodePath {
        let new_path = match path.parent() {
            Some(parent) => parent.join(new_name),
            None => NodePath::new(format!("/{new_name}")),
        };
        if let Some(parent) = path.parent() {
            if let Some(node) = self.nodes.get_mut(&parent) {
                for child in &mut node.children {
                    if child == path {
                        *child = new_path.clone();
                    }
                }
            }
        }
        self.rekey_subtree(path, &new_path);
        new_path
    }

    fn rekey_subtree(&mut self, old: &NodePath, new: &NodePath) {
        let Some(mut node) = self.nodes.remove(old) else {
            return;
        };
        if let Some(paths) = self.paths_by_id.get_mut(&node.id) {
            for p in paths.iter_mut() {
                if p == old {
                    *p = new.clone();
                }
            }
        }
        if let Some(set) = self.particles.remove(old) {
            self.particles.insert(new.clone(), set);
        }
        let children = std::mem::take(&mut node.children);
        node.children = children
            .iter()
            .map(|child| new.join(child.leaf()))
            .collect();
        self.nodes.insert(new.clone(), node);
        for child in children {
            let rekeyed = new.join(child.leaf());
            self.rekey_subtree(&child, &rekeyed);
        }
    }

    /// Whether a path currently exists
    pub fn contains(&self, path: &NodePath) -> bool {
        self.nodes.contains_key(path)
    }
}

impl HostScene for MemoryScene {
    fn root(&self) -> NodePath {
        NodePath::world()
    }

    fn children(&self, path: &NodePath) -> Vec<NodePath> {
        self.nodes
            .get(path)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn kind(&self, path: &NodePath) -> Option<NodeKind> {
        self.nodes.get(path).map(|n| n.kind)
    }

    fn node_id(&self, path: &NodePath) -> Option<NodeId> {
        self.nodes.get(path).map(|n| n.id)
    }

    fn instance_index(&self, path: &NodePath) -> u32 {
        self.nodes.get(path).map_or(0, |n| n.instance_index)
    }

    fn path_count(&self, path: &NodePath) -> u32 {
        self.nodes
            .get(path)
            .and_then(|n| self.paths_by_id.get(&n.id))
            .map_or(0, |paths| paths.len() as u32)
    }

    fn set_time(&mut self, time: FrameTime) {
        self.time = time;
    }

    fn current_time(&self) -> FrameTime {
        self.time
    }

    fn local_transform(&self, path: &NodePath) -> Mat4 {
        self.nodes
            .get(path)
            .map_or_else(Mat4::identity, |n| n.local_at(self.time))
    }

    fn world_transform(&self, path: &NodePath) -> Mat4 {
        let local = self.local_transform(path);
        match path.parent() {
            Some(parent) => self.world_transform(&parent) * local,
            None => local,
        }
    }

    fn is_visible(&self, path: &NodePath) -> bool {
        self.nodes.get(path).is_some_and(|n| n.visible)
    }

    fn is_animated(&self, path: &NodePath) -> bool {
        self.nodes.get(path).is_some_and(|n| n.animated)
    }

    fn motion_blur_enabled(&self, path: &NodePath) -> bool {
        self.nodes.get(path).is_none_or(|n| n.motion_blurred)
    }

    fn has_instancer_connection(&self, path: &NodePath) -> bool {
        self.nodes.get(path).is_some_and(|n| n.instancer_connection)
    }

    fn particles(&self, instancer: &NodePath) -> ParticleSnapshot {
        let Some(set) = self.particles.get(instancer) else {
            return ParticleSnapshot::default();
        };
        let offset = set.drift * self.time;
        ParticleSnapshot {
            particles: set
                .entries
                .iter()
                .map(|(matrix, paths)| ParticleInstance {
                    matrix: Mat4::new_translation(&offset) * matrix,
                    paths: paths.clone(),
                })
                .collect(),
            colors: set.colors.clone(),
        }
    }
}
