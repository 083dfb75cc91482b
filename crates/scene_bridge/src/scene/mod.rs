//! Translated scene model
//!
//! The scene module owns the engine-side mirror of the host DAG: a flat,
//! classified list of [`TranslatedObject`] records in a generational arena,
//! the attribute inheritance computed while walking the hierarchy, the
//! per-frame motion sampling and the assembly definition pass against the
//! render backend.

pub mod assembly;
pub mod attributes;
pub mod instancer;
pub mod motion;
pub mod object;
pub mod walker;

use std::collections::HashMap;

use thiserror::Error;

use crate::backend::BackendError;
use crate::foundation::collections::HandleMap;
use crate::foundation::logging::warn;
use crate::foundation::math::Mat4;
use crate::host::{FrameTime, HostScene, NodeId, NodeKind, NodePath};
use crate::interactive::UpdateTracker;
use crate::session::settings::RenderSettings;

use self::motion::{MotionStep, StepKind};
use self::object::{ObjectHandle, TranslatedObject};

/// Errors raised while translating the host scene.
///
/// Translation failures stay local to one object: callers log them, skip the
/// object and keep processing siblings. Nothing here aborts a frame.
#[derive(Debug, Error)]
pub enum TranslateError {
    /// An assembly anchor or canonical object could not be resolved
    #[error("resolution failed for `{path}`: {reason}")]
    Resolution {
        /// Path of the object that failed to resolve
        path: String,
        /// What was missing
        reason: String,
    },
    /// A handle no longer points at a live record
    #[error("object handle is stale")]
    StaleHandle,
    /// The configured view camera was not found while parsing interactively
    #[error("view camera `{0}` was not found in the scene")]
    ViewCameraMissing(String),
    /// The backend rejected a call even after the stale-entity retry
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Engine-side model of the host scene for one render session.
///
/// Built wholesale by [`TranslatedScene::parse`]; batch sessions rebuild the
/// samples every frame via [`TranslatedScene::prepare_frame`], interactive
/// sessions patch records in place through the update tracker.
#[derive(Debug)]
pub struct TranslatedScene {
    arena: HandleMap<TranslatedObject>,
    world: Option<ObjectHandle>,
    objects: Vec<ObjectHandle>,
    cameras: Vec<ObjectHandle>,
    lights: Vec<ObjectHandle>,
    instancers: Vec<ObjectHandle>,
    instancer_elements: Vec<ObjectHandle>,
    canonical_by_id: HashMap<NodeId, ObjectHandle>,
    by_path: HashMap<NodePath, ObjectHandle>,
    defined_proxy_instances: Vec<String>,
    motion_blur: bool,
    scale_factor: f64,
    interactive: bool,
}

impl TranslatedScene {
    /// Translate the host scene from scratch.
    ///
    /// Walks the DAG into classified object lists, computes inherited
    /// attributes and expands instancer proxies for the current particle
    /// state. Interactive sessions pass a tracker so every visited node is
    /// registered for dirty notifications; they also require the configured
    /// view camera to be present.
    pub fn parse(
        host: &dyn HostScene,
        settings: &RenderSettings,
        interactive: bool,
        mut tracker: Option<&mut UpdateTracker>,
    ) -> Result<Self, TranslateError> {
        let mut scene = Self {
            arena: HandleMap::new(),
            world: None,
            objects: Vec::new(),
            cameras: Vec::new(),
            lights: Vec::new(),
            instancers: Vec::new(),
            instancer_elements: Vec::new(),
            canonical_by_id: HashMap::new(),
            by_path: HashMap::new(),
            defined_proxy_instances: Vec::new(),
            motion_blur: settings.motion_blur,
            scale_factor: settings.scene_scale,
            interactive,
        };
        walker::walk(&mut scene, host, settings, tracker.as_deref_mut())?;
        if interactive {
            if let Some(view) = &settings.view_camera {
                if scene.cameras.is_empty() {
                    return Err(TranslateError::ViewCameraMissing(view.clone()));
                }
            }
        }
        instancer::expand(&mut scene, host);
        Ok(scene)
    }

    /// World root record
    pub fn world(&self) -> Option<ObjectHandle> {
        self.world
    }

    /// Transform and shape records, parents before children
    pub fn objects(&self) -> &[ObjectHandle] {
        &self.objects
    }

    /// Camera records
    pub fn cameras(&self) -> &[ObjectHandle] {
        &self.cameras
    }

    /// Light records
    pub fn lights(&self) -> &[ObjectHandle] {
        &self.lights
    }

    /// Instancer node records
    pub fn instancers(&self) -> &[ObjectHandle] {
        &self.instancers
    }

    /// Transient per-particle proxy records, rebuilt every frame
    pub fn instancer_elements(&self) -> &[ObjectHandle] {
        &self.instancer_elements
    }

    /// Record behind a handle, `None` if it was removed
    pub fn object(&self, handle: ObjectHandle) -> Option<&TranslatedObject> {
        self.arena.get(handle.key())
    }

    /// Mutable record behind a handle
    pub fn object_mut(&mut self, handle: ObjectHandle) -> Option<&mut TranslatedObject> {
        self.arena.get_mut(handle.key())
    }

    /// Canonical (index 0) record of a host node
    pub fn canonical_for(&self, id: NodeId) -> Option<ObjectHandle> {
        self.canonical_by_id.get(&id).copied()
    }

    /// Record registered at a host path
    pub fn handle_at(&self, path: &NodePath) -> Option<ObjectHandle> {
        self.by_path.get(path).copied()
    }

    /// Uniform scale matrix carried by the master assembly instance
    pub fn global_scale(&self) -> Mat4 {
        Mat4::new_scaling(self.scale_factor)
    }

    /// Prepare one frame: step the host time cursor through `steps` and
    /// record world-matrix and geometry samples for every record.
    ///
    /// The cursor only moves when a step's time differs from the previous
    /// step's, so coincident transform/deform samples evaluate the DAG once.
    pub fn prepare_frame(&mut self, host: &mut dyn HostScene, steps: &[MotionStep], frame: FrameTime) {
        let mut previous: Option<FrameTime> = None;
        for (index, step) in steps.iter().enumerate() {
            let time = frame + step.offset;
            if previous.is_none_or(|p| (time - p).abs() > f64::EPSILON) {
                host.set_time(time);
                previous = Some(time);
            }
            self.update_step(host, *step, index == 0);
        }
    }

    /// Record samples for a single preparation step. `first` marks the first
    /// step of a frame and resets previously collected samples.
    pub fn update_step(&mut self, host: &dyn HostScene, step: MotionStep, first: bool) {
        if first {
            for &handle in &self.objects {
                if let Some(obj) = self.arena.get_mut(handle.key()) {
                    obj.deform_samples = 0;
                }
            }
        }
        self.sample_objects(host, step, first);
        self.sample_viewers(host, step, first);
        if step.samples_transforms() {
            instancer::refresh(self, host, first);
        }
    }

    /// Transform and shape records. With blur disabled everything is sampled
    /// once on the single combined step; with it enabled, blurred records
    /// collect one sample per transform step and unblurred ones receive their
    /// single rest sample on the trailing static step.
    fn sample_objects(&mut self, host: &dyn HostScene, step: MotionStep, first: bool) {
        let blur = self.motion_blur;
        for &handle in &self.objects {
            let Some(obj) = self.arena.get_mut(handle.key()) else {
                continue;
            };
            if step.samples_transforms() {
                let world = host.world_transform(&obj.path);
                if !blur {
                    record_single(obj, world);
                } else if obj.motion_blurred {
                    if first {
                        obj.transform_samples.clear();
                    }
                    record_push(obj, world);
                }
            }
            if step.samples_geometry() && obj.node_kind == NodeKind::Shape {
                if !blur {
                    obj.deform_samples = 1;
                } else if obj.motion_blurred {
                    obj.deform_samples += 1;
                }
            }
            if step.kind == StepKind::Static && !obj.motion_blurred {
                let world = host.world_transform(&obj.path);
                record_single(obj, world);
                if obj.node_kind == NodeKind::Shape {
                    obj.deform_samples = 1;
                }
            }
        }
    }

    /// Cameras and lights sample on transform steps only; unblurred ones get
    /// their single sample at the first step of the frame.
    fn sample_viewers(&mut self, host: &dyn HostScene, step: MotionStep, first: bool) {
        if !step.samples_transforms() {
            return;
        }
        let blur = self.motion_blur;
        for &handle in self.cameras.iter().chain(self.lights.iter()) {
            let Some(obj) = self.arena.get_mut(handle.key()) else {
                continue;
            };
            let world = host.world_transform(&obj.path);
            if !blur {
                record_single(obj, world);
            } else if obj.motion_blurred {
                if first {
                    obj.transform_samples.clear();
                }
                record_push(obj, world);
            } else if first {
                record_single(obj, world);
            }
        }
    }

    fn insert(&mut self, record: TranslatedObject) -> ObjectHandle {
        ObjectHandle::new(self.arena.insert(record))
    }

    /// Drop a record and every index entry pointing at it
    pub(crate) fn remove(&mut self, handle: ObjectHandle) {
        let Some(record) = self.arena.remove(handle.key()) else {
            return;
        };
        self.objects.retain(|&h| h != handle);
        self.cameras.retain(|&h| h != handle);
        self.lights.retain(|&h| h != handle);
        self.instancers.retain(|&h| h != handle);
        self.instancer_elements.retain(|&h| h != handle);
        if self.canonical_by_id.get(&record.node_id) == Some(&handle) {
            self.canonical_by_id.remove(&record.node_id);
        }
        if self.by_path.get(&record.path) == Some(&handle) {
            self.by_path.remove(&record.path);
        }
    }

    /// Move a record to a new host path, re-keying the path index
    pub(crate) fn rekey_path(&mut self, handle: ObjectHandle, new_path: NodePath) {
        let Some(record) = self.arena.get_mut(handle.key()) else {
            return;
        };
        let old = std::mem::replace(&mut record.path, new_path.clone());
        if self.by_path.get(&old) == Some(&handle) {
            self.by_path.remove(&old);
        }
        self.by_path.insert(new_path, handle);
    }

    /// Handles of every classified record at or below a path, proxies aside
    pub(crate) fn handles_below(&self, ancestor: &NodePath) -> Vec<ObjectHandle> {
        let mut found = Vec::new();
        let lists = self
            .objects
            .iter()
            .chain(&self.cameras)
            .chain(&self.lights)
            .chain(&self.instancers);
        for &handle in lists {
            if let Some(record) = self.arena.get(handle.key()) {
                if record.path == *ancestor || record.path.is_below(ancestor) {
                    found.push(handle);
                }
            }
        }
        found
    }
}

fn is_finite(matrix: &Mat4) -> bool {
    matrix.iter().all(|v| v.is_finite())
}

fn record_single(obj: &mut TranslatedObject, world: Mat4) {
    if is_finite(&world) {
        obj.transform_samples.set_single(world);
    } else {
        degrade_with_warning(obj);
    }
}

fn record_push(obj: &mut TranslatedObject, world: Mat4) {
    if is_finite(&world) {
        obj.transform_samples.push(world);
    } else {
        degrade_with_warning(obj);
    }
}

/// A failed time evaluation costs the object its blur for this frame, never
/// the frame itself
fn degrade_with_warning(obj: &mut TranslatedObject) {
    if !obj.transform_samples.is_degraded() {
        warn!(
            "non-finite transform sample for `{}`; falling back to a static identity",
            obj.path
        );
        obj.transform_samples.degrade();
    }
}
