//! Render backend interface
//!
//! The engine describes scenes to a renderer through [`RenderBackend`]:
//! named assemblies holding geometry and lights, named assembly instances
//! placing them with time-sampled transforms, and world-space cameras. The
//! engine never keeps backend pointers; every entity is addressed by name
//! and re-resolved when needed, so a backend may tear its project down and
//! rebuild between frames.
//!
//! [`memory::MemoryBackend`] is the recording implementation used by the
//! test suite and headless sessions.

pub mod memory;

use std::sync::mpsc::Sender;

use thiserror::Error;

use crate::foundation::math::{Color, Mat4};

/// Result alias for backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors a backend may report for scene-description calls
#[derive(Debug, Error)]
pub enum BackendError {
    /// An entity with this name already exists in the target container
    #[error("entity `{0}` is already defined")]
    NameCollision(String),

    /// The named assembly does not exist
    #[error("assembly `{0}` not found")]
    AssemblyNotFound(String),

    /// The named entity does not exist
    #[error("entity `{0}` not found")]
    EntityNotFound(String),

    /// The definition was rejected
    #[error("invalid definition for `{name}`: {reason}")]
    InvalidDefinition {
        /// Entity name the definition was for
        name: String,
        /// Backend-supplied reason
        reason: String,
    },

    /// Scene description requires the master assembly first
    #[error("master assembly has not been defined")]
    MasterAssemblyMissing,

    /// A render is already in progress
    #[error("render already in progress")]
    RenderBusy,
}

/// Time-sampled transform of an assembly instance or camera.
///
/// Sample times are normalized: index `i` of `n` samples plays at
/// `i / (n - 1)`, and a single sample plays at 0. The sampling resolution is
/// thereby decoupled from the shutter parametrization that produced the
/// matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSequence {
    samples: Vec<(f64, Mat4)>,
}

impl TransformSequence {
    /// Build a sequence from matrices in sampling order
    pub fn from_matrices(matrices: &[Mat4]) -> Self {
        let n = matrices.len();
        let samples = matrices
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let t = if n > 1 {
                    i as f64 / (n - 1) as f64
                } else {
                    0.0
                };
                (t, *m)
            })
            .collect();
        Self { samples }
    }

    /// Sequence holding one static sample
    pub fn single(matrix: Mat4) -> Self {
        Self {
            samples: vec![(0.0, matrix)],
        }
    }

    /// Sample count
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the sequence holds no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The (time, matrix) samples in playback order
    pub fn samples(&self) -> &[(f64, Mat4)] {
        &self.samples
    }

    /// Sample times in playback order
    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|(t, _)| *t)
    }

    /// Matrix of the first sample, identity when empty
    pub fn first_matrix(&self) -> Mat4 {
        self.samples
            .first()
            .map_or_else(Mat4::identity, |(_, m)| *m)
    }
}

/// Geometry definition placed into an assembly
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDef {
    /// Entity name, unique within the assembly
    pub name: String,
    /// Placement relative to the assembly origin
    pub placement: Mat4,
    /// Optional per-object color override
    pub color_override: Option<Color>,
    /// Optional per-object opacity override
    pub opacity_override: Option<f64>,
}

/// Light definition placed into an assembly
#[derive(Debug, Clone, PartialEq)]
pub struct LightDef {
    /// Entity name, unique within the assembly
    pub name: String,
    /// Placement relative to the assembly origin
    pub placement: Mat4,
}

/// Camera definition, placed directly in world space
#[derive(Debug, Clone, PartialEq)]
pub struct CameraDef {
    /// Entity name
    pub name: String,
    /// Time-sampled world placement
    pub transforms: TransformSequence,
}

/// Observable render activity of the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRenderState {
    /// No render in flight
    Idle,
    /// A render is in progress
    Rendering,
    /// An abort was requested and the backend is winding down
    Stopping,
}

/// Notifications a backend sends from its render workers.
///
/// These must never mutate engine state directly; the engine forwards them
/// into its event queue (single-consumer rule).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderNotice {
    /// Fraction of the current frame completed, in [0, 1]
    Progress(f32),
    /// The current frame finished
    FrameDone,
    /// The backend acknowledged an abort and stopped
    Stopped,
}

/// Scene-description and render-control surface of a renderer.
///
/// All methods are called from the engine's worker thread only; the backend
/// is free to run its actual rendering on threads of its own as long as
/// notifications go through the [`RenderNotice`] channel.
pub trait RenderBackend {
    /// Define the root assembly (`world`) and its single instance
    /// (`world_Inst`) carrying the global scene-scale matrix. Called once
    /// per session before any other definition.
    fn define_master_assembly(&mut self, scene_scale: &Mat4) -> BackendResult<()>;

    /// Whether the master assembly exists
    fn has_master_assembly(&self) -> bool;

    /// Create an empty assembly under the master assembly
    fn define_assembly(&mut self, name: &str) -> BackendResult<()>;

    /// Whether the named assembly exists
    fn assembly_exists(&self, name: &str) -> bool;

    /// Remove an assembly and its contents
    fn remove_assembly(&mut self, name: &str) -> BackendResult<()>;

    /// Instantiate `assembly` under the master assembly
    fn define_assembly_instance(
        &mut self,
        name: &str,
        assembly: &str,
        transforms: &TransformSequence,
    ) -> BackendResult<()>;

    /// Whether the named assembly instance exists
    fn assembly_instance_exists(&self, name: &str) -> bool;

    /// Replace an existing instance's transform sequence in place and bump
    /// its version so the renderer notices (the interactive fast path)
    fn replace_assembly_instance_transforms(
        &mut self,
        name: &str,
        transforms: &TransformSequence,
    ) -> BackendResult<()>;

    /// Remove an assembly instance
    fn remove_assembly_instance(&mut self, name: &str) -> BackendResult<()>;

    /// Define a geometry object inside the named assembly
    fn define_object(&mut self, assembly: &str, object: &ObjectDef) -> BackendResult<()>;

    /// Remove a geometry object from the named assembly
    fn remove_object(&mut self, assembly: &str, name: &str) -> BackendResult<()>;

    /// Define a light inside the named assembly
    fn define_light(&mut self, assembly: &str, light: &LightDef) -> BackendResult<()>;

    /// Remove a light from the named assembly
    fn remove_light(&mut self, assembly: &str, name: &str) -> BackendResult<()>;

    /// Define a camera in world space
    fn define_camera(&mut self, camera: &CameraDef) -> BackendResult<()>;

    /// Remove a camera
    fn remove_camera(&mut self, name: &str) -> BackendResult<()>;

    /// Start rendering the currently described scene; completion and
    /// progress arrive through `notices`
    fn start_render(&mut self, notices: Sender<RenderNotice>) -> BackendResult<()>;

    /// Request an abort of the in-flight render. A request, not a
    /// guarantee: callers poll [`RenderBackend::render_state`] until the
    /// backend reports [`BackendRenderState::Idle`].
    fn abort_render(&mut self);

    /// Current render activity
    fn render_state(&self) -> BackendRenderState;
}
