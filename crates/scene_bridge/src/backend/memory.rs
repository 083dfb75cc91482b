//! In-memory recording backend
//!
//! Implements [`RenderBackend`] with plain hash maps and call counters.
//! Rendering is simulated: by default a started render completes
//! immediately; tests can switch to manual completion and give the abort
//! handshake a configurable latency to exercise the polling path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::mpsc::Sender;

use crate::backend::{
    BackendError, BackendRenderState, BackendResult, CameraDef, LightDef, ObjectDef,
    RenderBackend, RenderNotice, TransformSequence,
};
use crate::foundation::math::Mat4;

const STATE_IDLE: u8 = 0;
const STATE_RENDERING: u8 = 1;
const STATE_STOPPING: u8 = 2;

/// Recorded contents of one assembly
#[derive(Debug, Default)]
pub struct AssemblyRecord {
    /// Geometry objects by name
    pub objects: HashMap<String, ObjectDef>,
    /// Lights by name
    pub lights: HashMap<String, LightDef>,
    /// Bumped whenever stale content is removed
    pub version: u64,
}

/// Recorded assembly instance
#[derive(Debug)]
pub struct InstanceRecord {
    /// Name of the instantiated assembly
    pub assembly: String,
    /// Time-sampled placement
    pub transforms: TransformSequence,
    /// Bumped on in-place transform replacement
    pub version: u64,
}

/// Call counters accumulated over a session
#[derive(Debug, Default, Clone)]
pub struct BackendStats {
    /// Assemblies created
    pub assemblies_defined: usize,
    /// Geometry objects defined into assemblies
    pub objects_defined: usize,
    /// Lights defined into assemblies
    pub lights_defined: usize,
    /// Assembly instances created
    pub instances_defined: usize,
    /// In-place instance transform replacements
    pub instance_transform_updates: usize,
    /// Cameras defined
    pub cameras_defined: usize,
    /// Renders started
    pub renders_started: usize,
    /// Aborts requested
    pub renders_aborted: usize,
}

/// Recording [`RenderBackend`] implementation
pub struct MemoryBackend {
    master_scale: Option<Mat4>,
    assemblies: HashMap<String, AssemblyRecord>,
    instances: HashMap<String, InstanceRecord>,
    cameras: HashMap<String, CameraDef>,
    stats: BackendStats,
    state: AtomicU8,
    abort_polls_left: AtomicU32,
    abort_latency: u32,
    manual_completion: bool,
    notices: Option<Sender<RenderNotice>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend that completes renders immediately
    pub fn new() -> Self {
        Self {
            master_scale: None,
            assemblies: HashMap::new(),
            instances: HashMap::new(),
            cameras: HashMap::new(),
            stats: BackendStats::default(),
            state: AtomicU8::new(STATE_IDLE),
            abort_polls_left: AtomicU32::new(0),
            abort_latency: 0,
            manual_completion: false,
            notices: None,
        }
    }

    /// Keep started renders in flight until [`MemoryBackend::complete_frame`]
    /// or an abort
    pub fn set_manual_completion(&mut self, manual: bool) {
        self.manual_completion = manual;
    }

    /// Number of [`RenderBackend::render_state`] polls an abort takes before
    /// the backend reports idle
    pub fn set_abort_latency(&mut self, polls: u32) {
        self.abort_latency = polls;
    }

    /// Finish the in-flight render of a manual-completion backend
    pub fn complete_frame(&mut self) {
        if self.state.load(Ordering::SeqCst) == STATE_RENDERING {
            self.state.store(STATE_IDLE, Ordering::SeqCst);
            self.notify(RenderNotice::FrameDone);
        }
    }

    /// Accumulated call counters
    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    /// Scene-scale matrix of the master assembly instance, when defined
    pub fn master_scale(&self) -> Option<&Mat4> {
        self.master_scale.as_ref()
    }

    /// Recorded assembly by name
    pub fn assembly(&self, name: &str) -> Option<&AssemblyRecord> {
        self.assemblies.get(name)
    }

    /// Recorded assembly instance by name
    pub fn instance(&self, name: &str) -> Option<&InstanceRecord> {
        self.instances.get(name)
    }

    /// Recorded camera by name
    pub fn camera(&self, name: &str) -> Option<&CameraDef> {
        self.cameras.get(name)
    }

    /// Number of assemblies defined, the master included
    pub fn assembly_count(&self) -> usize {
        self.assemblies.len()
    }

    /// Number of assembly instances defined, the master's included
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Sorted assembly names
    pub fn assembly_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.assemblies.keys().cloned().collect();
        names.sort();
        names
    }

    /// Sorted assembly-instance names
    pub fn instance_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.keys().cloned().collect();
        names.sort();
        names
    }

    fn notify(&self, notice: RenderNotice) {
        if let Some(sink) = &self.notices {
            let _ = sink.send(notice);
        }
    }

    fn require_master(&self) -> BackendResult<()> {
        if self.master_scale.is_some() {
            Ok(())
        } else {
            Err(BackendError::MasterAssemblyMissing)
        }
    }
}

impl RenderBackend for MemoryBackend {
    fn define_master_assembly(&mut self, scene_scale: &Mat4) -> BackendResult<()> {
        if self.master_scale.is_some() {
            return Err(BackendError::NameCollision("world".to_string()));
        }
        log::debug!("memory backend: defining master assembly");
        self.master_scale = Some(*scene_scale);
        self.assemblies
            .insert("world".to_string(), AssemblyRecord::default());
        self.instances.insert(
            "world_Inst".to_string(),
            InstanceRecord {
                assembly: "world".to_string(),
                transforms: TransformSequence::single(*scene_scale),
                version: 0,
            },
        );
        Ok(())
    }

    fn has_master_assembly(&self) -> bool {
        self.master_scale.is_some()
    }

    fn define_assembly(&mut self, name: &str) -> BackendResult<()> {
        self.require_master()?;
        if self.assemblies.contains_key(name) {
            return Err(BackendError::NameCollision(name.to_string()));
        }
        log::debug!("memory backend: defining assembly `{name}`");
        self.assemblies.insert(name.to_string(), AssemblyRecord::default());
        self.stats.assemblies_defined += 1;
        Ok(())
    }

    fn assembly_exists(&self, name: &str) -> bool {
        self.assemblies.contains_key(name)
    }

    fn remove_assembly(&mut self, name: &str) -> BackendResult<()> {
        self.assemblies
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BackendError::EntityNotFound(name.to_string()))
    }

    fn define_assembly_instance(
        &mut self,
        name: &str,
        assembly: &str,
        transforms: &TransformSequence,
    ) -> BackendResult<()> {
        self.require_master()?;
        if !self.assemblies.contains_key(assembly) {
            return Err(BackendError::AssemblyNotFound(assembly.to_string()));
        }
        if self.instances.contains_key(name) {
            return Err(BackendError::NameCollision(name.to_string()));
        }
        if transforms.is_empty() {
            return Err(BackendError::InvalidDefinition {
                name: name.to_string(),
                reason: "empty transform sequence".to_string(),
            });
        }
        log::debug!("memory backend: defining assembly instance `{name}` of `{assembly}`");
        self.instances.insert(
            name.to_string(),
            InstanceRecord {
                assembly: assembly.to_string(),
                transforms: transforms.clone(),
                version: 0,
            },
        );
        self.stats.instances_defined += 1;
        Ok(())
    }

    fn assembly_instance_exists(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    fn replace_assembly_instance_transforms(
        &mut self,
        name: &str,
        transforms: &TransformSequence,
    ) -> BackendResult<()> {
        let record = self
            .instances
            .get_mut(name)
            .ok_or_else(|| BackendError::EntityNotFound(name.to_string()))?;
        if transforms.is_empty() {
            return Err(BackendError::InvalidDefinition {
                name: name.to_string(),
                reason: "empty transform sequence".to_string(),
            });
        }
        record.transforms = transforms.clone();
        record.version += 1;
        self.stats.instance_transform_updates += 1;
        Ok(())
    }

    fn remove_assembly_instance(&mut self, name: &str) -> BackendResult<()> {
        self.instances
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BackendError::EntityNotFound(name.to_string()))
    }

    fn define_object(&mut self, assembly: &str, object: &ObjectDef) -> BackendResult<()> {
        let record = self
            .assemblies
            .get_mut(assembly)
            .ok_or_else(|| BackendError::AssemblyNotFound(assembly.to_string()))?;
        if record.objects.contains_key(&object.name) {
            return Err(BackendError::NameCollision(object.name.clone()));
        }
        record.objects.insert(object.name.clone(), object.clone());
        self.stats.objects_defined += 1;
        Ok(())
    }

    fn remove_object(&mut self, assembly: &str, name: &str) -> BackendResult<()> {
        let record = self
            .assemblies
            .get_mut(assembly)
            .ok_or_else(|| BackendError::AssemblyNotFound(assembly.to_string()))?;
        record
            .objects
            .remove(name)
            .ok_or_else(|| BackendError::EntityNotFound(name.to_string()))?;
        record.version += 1;
        Ok(())
    }

    fn define_light(&mut self, assembly: &str, light: &LightDef) -> BackendResult<()> {
        let record = self
            .assemblies
            .get_mut(assembly)
            .ok_or_else(|| BackendError::AssemblyNotFound(assembly.to_string()))?;
        if record.lights.contains_key(&light.name) {
            return Err(BackendError::NameCollision(light.name.clone()));
        }
        record.lights.insert(light.name.clone(), light.clone());
        self.stats.lights_defined += 1;
        Ok(())
    }

    fn remove_light(&mut self, assembly: &str, name: &str) -> BackendResult<()> {
        let record = self
            .assemblies
            .get_mut(assembly)
            .ok_or_else(|| BackendError::AssemblyNotFound(assembly.to_string()))?;
        record
            .lights
            .remove(name)
            .ok_or_else(|| BackendError::EntityNotFound(name.to_string()))?;
        record.version += 1;
        Ok(())
    }

    fn define_camera(&mut self, camera: &CameraDef) -> BackendResult<()> {
        if self.cameras.contains_key(&camera.name) {
            return Err(BackendError::NameCollision(camera.name.clone()));
        }
        self.cameras.insert(camera.name.clone(), camera.clone());
        self.stats.cameras_defined += 1;
        Ok(())
    }

    fn remove_camera(&mut self, name: &str) -> BackendResult<()> {
        self.cameras
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BackendError::EntityNotFound(name.to_string()))
    }

    fn start_render(&mut self, notices: Sender<RenderNotice>) -> BackendResult<()> {
        if self.state.load(Ordering::SeqCst) != STATE_IDLE {
            return Err(BackendError::RenderBusy);
        }
        self.stats.renders_started += 1;
        self.notices = Some(notices);
        self.state.store(STATE_RENDERING, Ordering::SeqCst);
        if !self.manual_completion {
            self.notify(RenderNotice::Progress(1.0));
            self.state.store(STATE_IDLE, Ordering::SeqCst);
            self.notify(RenderNotice::FrameDone);
        }
        Ok(())
    }

    fn abort_render(&mut self) {
        if self.state.load(Ordering::SeqCst) != STATE_RENDERING {
            return;
        }
        self.stats.renders_aborted += 1;
        if self.abort_latency == 0 {
            self.state.store(STATE_IDLE, Ordering::SeqCst);
            self.notify(RenderNotice::Stopped);
        } else {
            self.abort_polls_left
                .store(self.abort_latency, Ordering::SeqCst);
            self.state.store(STATE_STOPPING, Ordering::SeqCst);
        }
    }

    fn render_state(&self) -> BackendRenderState {
        match self.state.load(Ordering::SeqCst) {
            STATE_STOPPING => {
                // each poll brings the simulated wind-down closer to idle
                let left = self.abort_polls_left.load(Ordering::SeqCst);
                if left <= 1 {
                    self.state.store(STATE_IDLE, Ordering::SeqCst);
                    self.notify(RenderNotice::Stopped);
                    BackendRenderState::Idle
                } else {
                    self.abort_polls_left.store(left - 1, Ordering::SeqCst);
                    BackendRenderState::Stopping
                }
            }
            STATE_RENDERING => BackendRenderState::Rendering,
            _ => BackendRenderState::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn seq() -> TransformSequence {
        TransformSequence::single(Mat4::identity())
    }

    fn backend_with_master() -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        backend.define_master_assembly(&Mat4::identity()).unwrap();
        backend
    }

    #[test]
    fn test_definitions_require_master_assembly() {
        let mut backend = MemoryBackend::new();
        assert!(matches!(
            backend.define_assembly("a"),
            Err(BackendError::MasterAssemblyMissing)
        ));
    }

    #[test]
    fn test_instance_requires_existing_assembly() {
        let mut backend = backend_with_master();
        assert!(matches!(
            backend.define_assembly_instance("i", "missing", &seq()),
            Err(BackendError::AssemblyNotFound(_))
        ));
    }

    #[test]
    fn test_object_name_collision_reported() {
        let mut backend = backend_with_master();
        backend.define_assembly("a").unwrap();
        let object = ObjectDef {
            name: "mesh".to_string(),
            placement: Mat4::identity(),
            color_override: None,
            opacity_override: None,
        };
        backend.define_object("a", &object).unwrap();
        assert!(matches!(
            backend.define_object("a", &object),
            Err(BackendError::NameCollision(_))
        ));
        assert_eq!(backend.stats().objects_defined, 1);
    }

    #[test]
    fn test_remove_object_bumps_assembly_version() {
        let mut backend = backend_with_master();
        backend.define_assembly("a").unwrap();
        let object = ObjectDef {
            name: "mesh".to_string(),
            placement: Mat4::identity(),
            color_override: None,
            opacity_override: None,
        };
        backend.define_object("a", &object).unwrap();
        backend.remove_object("a", "mesh").unwrap();
        assert_eq!(backend.assembly("a").unwrap().version, 1);
    }

    #[test]
    fn test_immediate_render_sends_frame_done() {
        let mut backend = backend_with_master();
        let (tx, rx) = mpsc::channel();
        backend.start_render(tx).unwrap();
        let notices: Vec<RenderNotice> = rx.try_iter().collect();
        assert!(notices.contains(&RenderNotice::FrameDone));
        assert_eq!(backend.render_state(), BackendRenderState::Idle);
    }

    #[test]
    fn test_abort_latency_counts_down_over_polls() {
        let mut backend = backend_with_master();
        backend.set_manual_completion(true);
        backend.set_abort_latency(3);
        let (tx, _rx) = mpsc::channel();
        backend.start_render(tx).unwrap();
        assert_eq!(backend.render_state(), BackendRenderState::Rendering);

        backend.abort_render();
        assert_eq!(backend.render_state(), BackendRenderState::Stopping);
        assert_eq!(backend.render_state(), BackendRenderState::Stopping);
        assert_eq!(backend.render_state(), BackendRenderState::Idle);
        assert_eq!(backend.stats().renders_aborted, 1);
    }
}
