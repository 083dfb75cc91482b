//! # Scene Bridge
//!
//! Translates a live host application's scene graph into a render backend's
//! assembly and assembly-instance representation, and keeps the two in sync
//! while the user keeps editing.
//!
//! ## Features
//!
//! - **Assembly Translation**: DAG nodes become named assemblies and
//!   assembly instances, with shared shapes exported once and instanced
//! - **Motion Blur**: shutter-parametrized transform and deformation
//!   sampling, planned per frame
//! - **Particle Instancers**: per-particle expansion of instanced sources
//!   into proxy objects
//! - **Interactive Updates**: dirty tracking that folds host edits into a
//!   running render without a rebuild
//! - **Pluggable Backends**: renderers integrate through a single trait and
//!   are addressed purely by entity name
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scene_bridge::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut host = MemoryScene::new();
//!     let room = host.add_transform(&NodePath::world(), "room");
//!     host.add_shape(&room, "lamp");
//!     host.add_camera(&NodePath::world(), "persp");
//!
//!     let settings = RenderSettings::default();
//!     let mut session = RenderSession::new(host, MemoryBackend::new(), settings);
//!     session.submit(SessionEvent::StartBatchRender);
//!     session.run()?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod foundation;
pub mod host;
pub mod interactive;
pub mod scene;
pub mod session;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        backend::{memory::MemoryBackend, RenderBackend, TransformSequence},
        foundation::math::{Color, Mat4, Mat4Ext, Vec3},
        host::{memory::MemoryScene, FrameTime, HostScene, NodeId, NodeKind, NodePath},
        interactive::UpdateTracker,
        scene::TranslatedScene,
        session::{
            events::{EventSender, SessionEvent},
            settings::RenderSettings,
            RenderSession, RenderState, RenderType, SessionError,
        },
    };
}
