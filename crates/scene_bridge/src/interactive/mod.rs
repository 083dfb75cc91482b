//! Interactive update tracking
//!
//! Host edit notifications land here as idempotent dirty marks keyed by node
//! identity. A periodic drain aborts the in-flight render, waits for the
//! backend to report idle, re-samples the scene at the current frame and
//! pushes only the affected entries back into the backend. Notification entry
//! points never touch the backend themselves; all mutation happens inside
//! [`UpdateTracker::drain_and_apply`], which the session worker runs from its
//! own thread.

use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::backend::{BackendError, BackendRenderState, RenderBackend};
use crate::foundation::logging::{debug, warn};
use crate::host::{FrameTime, HostScene, NodeId, NodeKind, NodePath};
use crate::scene::assembly;
use crate::scene::motion::plan_steps;
use crate::scene::object::ObjectHandle;
use crate::scene::{walker, TranslateError, TranslatedScene};
use crate::session::settings::RenderSettings;

/// Most render-state polls one drain waits for an abort to land
const MAX_ABORT_POLLS: u32 = 1000;
const ABORT_POLL_INTERVAL: Duration = Duration::from_millis(1);

bitflags::bitflags! {
    /// Pending-update markers for one tracked node
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DirtyFlags: u8 {
        /// The node changed and its backend entities need refreshing
        const DIRTY = 1;
        /// The dirt arrived by propagation from an ancestor transform
        const FROM_TRANSFORM = 1 << 1;
        /// The node was deleted from the host scene
        const REMOVED = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackedNode {
    handle: ObjectHandle,
    flags: DirtyFlags,
}

/// Backend entity retired under its pre-edit name, removed at drain time
#[derive(Debug, Clone)]
enum RetiredEntity {
    Object { assembly: String, name: String },
    Light { assembly: String, name: String },
    Camera { name: String },
    Instance { name: String },
    Assembly { name: String },
}

/// What one drain cycle did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Whether an in-flight render had to be aborted first
    pub aborted: bool,
    /// Entities refreshed in the backend
    pub updated: usize,
    /// Records retired from scene and backend
    pub removed: usize,
}

impl DrainOutcome {
    /// Whether the drain changed anything the renderer can see
    pub fn changed(&self) -> bool {
        self.updated > 0 || self.removed > 0
    }
}

/// Interactive update failures
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Re-translation of an edited subtree failed
    #[error(transparent)]
    Translate(#[from] TranslateError),
    /// The backend never reported idle after an abort request
    #[error("render abort timed out after {0} state polls")]
    AbortTimeout(u32),
}

/// Dirty-set keyed by host node identity.
///
/// Multiple notifications for one node collapse into a single pending
/// update; a notification for a node the tracker has never seen is stale by
/// definition and is dropped with a debug log.
#[derive(Debug, Default)]
pub struct UpdateTracker {
    tracked: HashMap<NodeId, TrackedNode>,
    retired: Vec<RetiredEntity>,
}

impl UpdateTracker {
    /// Empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked nodes
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    /// Whether the tracker has seen no nodes yet
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Whether any node has a pending update
    pub fn has_pending(&self) -> bool {
        !self.retired.is_empty() || self.tracked.values().any(|n| !n.flags.is_empty())
    }

    /// Associate a node id with its translated record. The hierarchy walker
    /// calls this for every visited node; re-walks overwrite the handle but
    /// keep any flags already pending.
    pub fn register(&mut self, id: NodeId, handle: ObjectHandle) {
        let entry = self.tracked.entry(id).or_insert(TrackedNode {
            handle,
            flags: DirtyFlags::empty(),
        });
        entry.handle = handle;
    }

    /// Idempotently mark one node changed
    pub fn on_node_dirty(&mut self, id: NodeId) {
        match self.tracked.get_mut(&id) {
            Some(node) => node.flags |= DirtyFlags::DIRTY,
            None => debug!("dirty notification for untracked node {id:?}; dropped"),
        }
    }

    /// Translate a freshly added subtree and queue it for definition
    pub fn on_node_added(
        &mut self,
        scene: &mut TranslatedScene,
        host: &dyn HostScene,
        settings: &RenderSettings,
        path: &NodePath,
    ) -> Result<(), TranslateError> {
        if let Some(handle) = scene.handle_at(path) {
            // the path is already translated; treat the notification as an edit
            if let Some(record) = scene.object(handle) {
                let id = record.node_id;
                self.on_node_dirty(id);
            }
            return Ok(());
        }
        walker::walk_subtree(scene, host, settings, path, Some(self))?;
        for handle in scene.handles_below(path) {
            if let Some(record) = scene.object(handle) {
                let id = record.node_id;
                self.on_node_dirty(id);
            }
        }
        Ok(())
    }

    /// Mark a node and the records below it deleted. Their backend entities
    /// are retired under their current names on the next drain.
    pub fn on_node_removed(&mut self, scene: &mut TranslatedScene, id: NodeId) {
        if !self.tracked.contains_key(&id) {
            debug!("removal notification for untracked node {id:?}; dropped");
            return;
        }
        let mut affected = HashSet::new();
        for handle in records_for_id(scene, id) {
            if let Some(record) = scene.object(handle) {
                let path = record.path.clone();
                affected.extend(scene.handles_below(&path));
            }
        }
        for handle in affected {
            self.retire_record(scene, handle);
            if let Some(record) = scene.object_mut(handle) {
                record.removed = true;
                let record_id = record.node_id;
                if let Some(node) = self.tracked.get_mut(&record_id) {
                    node.flags |= DirtyFlags::DIRTY | DirtyFlags::REMOVED;
                }
            }
        }
    }

    /// Re-key a renamed node's records (and everything below them) to their
    /// new paths, retiring the old backend names
    pub fn on_node_renamed(
        &mut self,
        scene: &mut TranslatedScene,
        id: NodeId,
        new_path: &NodePath,
    ) {
        if !self.tracked.contains_key(&id) {
            debug!("rename notification for untracked node {id:?}; dropped");
            return;
        }
        let roots = records_for_id(scene, id);
        let mut rekeyed = HashSet::new();
        for root in roots {
            let Some(old_path) = scene.object(root).map(|r| r.path.clone()) else {
                continue;
            };
            // paths of sibling instances change too, but only the canonical
            // path is told to us; splice the new leaf onto each
            let renamed_root = match old_path.parent() {
                Some(parent) => parent.join(new_path.leaf()),
                None => new_path.clone(),
            };
            let below = scene.handles_below(&old_path);
            // retire everything under its pre-rename names before any re-key
            for &handle in &below {
                self.retire_record(scene, handle);
            }
            for handle in below {
                let Some(record) = scene.object(handle) else {
                    continue;
                };
                let suffix = record.path.as_str()[old_path.as_str().len()..].to_string();
                let record_id = record.node_id;
                let fresh = NodePath::new(format!("{}{suffix}", renamed_root.as_str()));
                scene.rekey_path(handle, fresh);
                rekeyed.insert(handle);
                if let Some(node) = self.tracked.get_mut(&record_id) {
                    node.flags |= DirtyFlags::DIRTY;
                }
            }
        }
        // instances referencing a renamed assembly carry its name in theirs
        for &handle in scene.objects() {
            let Some(record) = scene.object(handle) else {
                continue;
            };
            if rekeyed.contains(&handle) || record.proxy.is_some() {
                continue;
            }
            if let Some(original) = record.original_object {
                if rekeyed.contains(&original) {
                    self.retire_record(scene, handle);
                    let record_id = record.node_id;
                    if let Some(node) = self.tracked.get_mut(&record_id) {
                        node.flags |= DirtyFlags::DIRTY;
                    }
                }
            }
        }
    }

    /// Apply every pending update to the scene and backend.
    ///
    /// No-op while nothing is pending. Otherwise the in-flight render is
    /// aborted and polled to a stop, retired entities are removed, removed
    /// records are dropped, dirty transforms propagate to their dependent
    /// shapes, the scene is re-sampled at `frame` and each dirty record is
    /// re-pushed. Per-record failures are logged and skipped; only a hung
    /// abort fails the whole drain.
    pub fn drain_and_apply(
        &mut self,
        scene: &mut TranslatedScene,
        host: &mut dyn HostScene,
        backend: &mut dyn RenderBackend,
        settings: &RenderSettings,
        frame: FrameTime,
    ) -> Result<DrainOutcome, TrackerError> {
        let mut outcome = DrainOutcome::default();
        if !self.has_pending() {
            return Ok(outcome);
        }

        if backend.render_state() != BackendRenderState::Idle {
            backend.abort_render();
            outcome.aborted = true;
            let mut polls = 0;
            while backend.render_state() != BackendRenderState::Idle {
                polls += 1;
                if polls >= MAX_ABORT_POLLS {
                    return Err(TrackerError::AbortTimeout(polls));
                }
                thread::sleep(ABORT_POLL_INTERVAL);
            }
        }

        for entity in std::mem::take(&mut self.retired) {
            let gone = match &entity {
                RetiredEntity::Object { assembly, name } => {
                    backend.remove_object(assembly, name).is_err()
                }
                RetiredEntity::Light { assembly, name } => {
                    backend.remove_light(assembly, name).is_err()
                }
                RetiredEntity::Camera { name } => backend.remove_camera(name).is_err(),
                RetiredEntity::Instance { name } => {
                    backend.remove_assembly_instance(name).is_err()
                }
                RetiredEntity::Assembly { name } => backend.remove_assembly(name).is_err(),
            };
            if gone {
                debug!("retired entity {entity:?} was already gone");
            }
        }

        let removed_ids: Vec<NodeId> = self
            .tracked
            .iter()
            .filter(|(_, n)| n.flags.contains(DirtyFlags::REMOVED))
            .map(|(&id, _)| id)
            .collect();
        for id in removed_ids {
            for handle in records_for_id(scene, id) {
                scene.remove(handle);
                outcome.removed += 1;
            }
            self.tracked.remove(&id);
        }

        self.propagate_transform_dirt(scene);

        let steps = plan_steps(settings);
        scene.prepare_frame(host, &steps, frame);

        let dirty_ids: Vec<NodeId> = self
            .tracked
            .iter()
            .filter(|(_, n)| n.flags.contains(DirtyFlags::DIRTY))
            .map(|(&id, _)| id)
            .collect();
        let mut instancers_dirty = false;
        for id in dirty_ids {
            for handle in records_for_id(scene, id) {
                if scene
                    .object(handle)
                    .is_some_and(|r| r.node_kind == NodeKind::Instancer)
                {
                    instancers_dirty = true;
                    continue;
                }
                match apply_record(scene, backend, handle) {
                    Ok(true) => outcome.updated += 1,
                    Ok(false) => {}
                    Err(err) => warn!("interactive update failed for {handle:?}: {err}"),
                }
            }
        }

        if !scene.instancer_elements().is_empty() && (instancers_dirty || outcome.changed()) {
            let (defined, _) = assembly::refresh_proxy_instances(scene, backend);
            outcome.updated += defined;
        }

        for node in self.tracked.values_mut() {
            node.flags = DirtyFlags::empty();
        }
        Ok(outcome)
    }

    /// A dirty transform re-dirties the shapes below it; a dirty shape never
    /// climbs back up.
    fn propagate_transform_dirt(&mut self, scene: &TranslatedScene) {
        let dirty_ids: Vec<NodeId> = self
            .tracked
            .iter()
            .filter(|(_, n)| {
                n.flags.contains(DirtyFlags::DIRTY) && !n.flags.contains(DirtyFlags::REMOVED)
            })
            .map(|(&id, _)| id)
            .collect();
        let mut dirty_transform_paths = Vec::new();
        for id in dirty_ids {
            for handle in records_for_id(scene, id) {
                if let Some(record) = scene.object(handle) {
                    if record.node_kind == NodeKind::Transform {
                        dirty_transform_paths.push(record.path.clone());
                    }
                }
            }
        }
        for path in dirty_transform_paths {
            for handle in scene.handles_below(&path) {
                let Some(record) = scene.object(handle) else {
                    continue;
                };
                if record.node_kind == NodeKind::Shape && record.proxy.is_none() {
                    if let Some(node) = self.tracked.get_mut(&record.node_id) {
                        node.flags |= DirtyFlags::DIRTY | DirtyFlags::FROM_TRANSFORM;
                    }
                }
            }
        }
    }

    /// Remember the backend names a record currently answers to, so the next
    /// drain can remove them even after the record's path changes
    fn retire_record(&mut self, scene: &TranslatedScene, handle: ObjectHandle) {
        let Some(record) = scene.object(handle) else {
            return;
        };
        if record.is_instance() {
            if let Ok(name) = assembly::assembly_instance_name(scene, handle) {
                self.retired.push(RetiredEntity::Instance { name });
            }
            return;
        }
        let Ok(assembly) = assembly::assembly_name(scene, handle) else {
            return;
        };
        match record.node_kind {
            NodeKind::Shape => self.retired.push(RetiredEntity::Object {
                assembly: assembly.clone(),
                name: record.path.sanitized(),
            }),
            NodeKind::Light => self.retired.push(RetiredEntity::Light {
                assembly: assembly.clone(),
                name: record.path.sanitized(),
            }),
            NodeKind::Camera => self.retired.push(RetiredEntity::Camera {
                name: record.path.sanitized(),
            }),
            _ => {}
        }
        let owns_assembly = record.attributes.assembly_anchor == Some(handle)
            && assembly != assembly::MASTER_ASSEMBLY_NAME;
        if owns_assembly {
            if let Ok(name) = assembly::assembly_instance_name(scene, handle) {
                self.retired.push(RetiredEntity::Instance { name });
            }
            self.retired.push(RetiredEntity::Assembly { name: assembly });
        }
    }
}

/// Every record belonging to one underlying host node, instances included
fn records_for_id(scene: &TranslatedScene, id: NodeId) -> Vec<ObjectHandle> {
    let mut found = Vec::new();
    let lists = scene
        .objects()
        .iter()
        .chain(scene.cameras())
        .chain(scene.lights())
        .chain(scene.instancers());
    for &handle in lists {
        if scene.object(handle).is_some_and(|r| r.node_id == id) {
            found.push(handle);
        }
    }
    found
}

/// Push one dirty record's current state into the backend
fn apply_record(
    scene: &TranslatedScene,
    backend: &mut dyn RenderBackend,
    handle: ObjectHandle,
) -> Result<bool, TranslateError> {
    let Some(record) = scene.object(handle) else {
        return Ok(false);
    };
    match record.node_kind {
        NodeKind::Transform => {
            let owns_anchor = record.attributes.assembly_anchor == Some(handle);
            if !owns_anchor && !record.is_instance() {
                return Ok(false);
            }
            let name = assembly::assembly_instance_name(scene, handle)?;
            let transforms = assembly::sequence_or_identity(record);
            match backend.replace_assembly_instance_transforms(&name, &transforms) {
                Ok(()) => Ok(true),
                Err(BackendError::EntityNotFound(_)) => {
                    assembly::resolve_assembly(scene, backend, handle)?;
                    if record.is_instance() {
                        assembly::define_instance_record(scene, backend, handle)?;
                    }
                    Ok(true)
                }
                Err(err) => Err(err.into()),
            }
        }
        NodeKind::Shape => {
            if record.proxy.is_some() {
                Ok(false)
            } else if record.is_instance() {
                assembly::define_instance_record(scene, backend, handle)
            } else {
                assembly::define_canonical_geometry(scene, backend, handle)
            }
        }
        NodeKind::Light => assembly::define_light_record(scene, backend, handle),
        NodeKind::Camera => assembly::define_camera_record(scene, backend, handle),
        NodeKind::World | NodeKind::Instancer => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::foundation::math::{Mat4, Mat4Ext, Vec3};
    use crate::host::memory::MemoryScene;
    use crate::scene::motion::plan_steps;

    struct Fixture {
        host: MemoryScene,
        backend: MemoryBackend,
        scene: TranslatedScene,
        tracker: UpdateTracker,
        settings: RenderSettings,
        group: NodePath,
        mesh: NodePath,
    }

    fn interactive_fixture() -> Fixture {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let group = host.add_transform(&world, "group");
        let mesh = host.add_shape(&group, "mesh");
        let settings = RenderSettings::default();

        let mut tracker = UpdateTracker::new();
        let mut scene =
            TranslatedScene::parse(&host, &settings, true, Some(&mut tracker)).unwrap();
        let steps = plan_steps(&settings);
        scene.prepare_frame(&mut host, &steps, 1.0);
        let mut backend = MemoryBackend::new();
        assembly::define_scene(&mut scene, &mut backend).unwrap();

        Fixture {
            host,
            backend,
            scene,
            tracker,
            settings,
            group,
            mesh,
        }
    }

    fn drain(fx: &mut Fixture) -> DrainOutcome {
        fx.tracker
            .drain_and_apply(
                &mut fx.scene,
                &mut fx.host,
                &mut fx.backend,
                &fx.settings,
                1.0,
            )
            .unwrap()
    }

    #[test]
    fn test_repeated_dirt_collapses_to_one_update() {
        let mut fx = interactive_fixture();
        let baseline = fx.backend.stats().objects_defined;
        let id = fx.host.node_id(&fx.mesh).unwrap();

        fx.tracker.on_node_dirty(id);
        fx.tracker.on_node_dirty(id);
        fx.tracker.on_node_dirty(id);
        let outcome = drain(&mut fx);

        assert!(outcome.changed());
        assert_eq!(fx.backend.stats().objects_defined, baseline + 1);
    }

    #[test]
    fn test_clean_tracker_drain_is_a_no_op() {
        let mut fx = interactive_fixture();
        fx.backend.set_manual_completion(true);
        let (tx, _rx) = std::sync::mpsc::channel();
        fx.backend.start_render(tx).unwrap();

        let outcome = drain(&mut fx);
        assert!(!outcome.aborted);
        assert!(!outcome.changed());
        assert_eq!(fx.backend.stats().renders_aborted, 0);
        assert_eq!(fx.backend.render_state(), BackendRenderState::Rendering);
    }

    #[test]
    fn test_stale_notification_is_dropped() {
        let mut fx = interactive_fixture();
        fx.tracker.on_node_dirty(NodeId(987_654));
        let outcome = drain(&mut fx);
        assert!(!outcome.changed());
    }

    #[test]
    fn test_transform_dirt_reaches_dependent_shapes() {
        let mut fx = interactive_fixture();
        let baseline = fx.backend.stats().objects_defined;
        fx.host
            .set_local(&fx.group, Mat4::new_translation(&Vec3::new(4.0, 0.0, 0.0)));
        let id = fx.host.node_id(&fx.group).unwrap();

        fx.tracker.on_node_dirty(id);
        let outcome = drain(&mut fx);

        assert!(outcome.updated >= 2);
        // the shape was re-exported because its ancestor moved
        assert_eq!(fx.backend.stats().objects_defined, baseline + 1);
        let instance = fx.backend.instance("world_group_ass_assInst").unwrap();
        let moved = instance.transforms.first_matrix();
        assert!((moved.translation_part().x - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_shape_dirt_does_not_touch_the_transform_instance() {
        let mut fx = interactive_fixture();
        let baseline = fx.backend.stats().instance_transform_updates;
        let id = fx.host.node_id(&fx.mesh).unwrap();

        fx.tracker.on_node_dirty(id);
        drain(&mut fx);

        assert_eq!(fx.backend.stats().instance_transform_updates, baseline);
    }

    #[test]
    fn test_removed_node_leaves_scene_and_backend() {
        let mut fx = interactive_fixture();
        let id = fx.host.node_id(&fx.mesh).unwrap();
        fx.host.remove_node(&fx.mesh);

        fx.tracker.on_node_removed(&mut fx.scene, id);
        let outcome = drain(&mut fx);

        assert_eq!(outcome.removed, 1);
        assert!(fx.scene.handle_at(&fx.mesh).is_none());
        let assembly = fx.backend.assembly("world_group_ass").unwrap();
        assert!(assembly.objects.is_empty());
    }

    #[test]
    fn test_rename_rekeys_backend_entities() {
        let mut fx = interactive_fixture();
        let id = fx.host.node_id(&fx.group).unwrap();
        let new_path = fx.host.rename_node(&fx.group, "rig");

        fx.tracker.on_node_renamed(&mut fx.scene, id, &new_path);
        let outcome = drain(&mut fx);

        assert!(outcome.changed());
        assert!(fx.backend.assembly("world_group_ass").is_none());
        assert!(fx.backend.assembly("world_rig_ass").is_some());
        assert!(fx.backend.assembly_instance_exists("world_rig_ass_assInst"));
        assert!(fx.scene.handle_at(&new_path.join("mesh")).is_some());
    }

    #[test]
    fn test_drain_aborts_and_waits_for_the_renderer() {
        let mut fx = interactive_fixture();
        fx.backend.set_manual_completion(true);
        fx.backend.set_abort_latency(3);
        let (tx, _rx) = std::sync::mpsc::channel();
        fx.backend.start_render(tx).unwrap();

        let id = fx.host.node_id(&fx.mesh).unwrap();
        fx.tracker.on_node_dirty(id);
        let outcome = drain(&mut fx);

        assert!(outcome.aborted);
        assert_eq!(fx.backend.stats().renders_aborted, 1);
        assert_eq!(fx.backend.render_state(), BackendRenderState::Idle);
    }

    #[test]
    fn test_added_subtree_is_translated_and_defined() {
        let mut fx = interactive_fixture();
        let rig = fx.host.add_transform(&NodePath::world(), "rig");
        let prop = fx.host.add_shape(&rig, "prop");

        fx.tracker
            .on_node_added(&mut fx.scene, &fx.host, &fx.settings, &rig)
            .unwrap();
        let outcome = drain(&mut fx);

        assert!(outcome.changed());
        assert!(fx.scene.handle_at(&prop).is_some());
        let assembly = fx.backend.assembly("world_rig_ass").unwrap();
        assert_eq!(assembly.objects.len(), 1);
    }
}
