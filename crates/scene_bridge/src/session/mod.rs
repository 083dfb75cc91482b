//! Render session lifecycle
//!
//! A [`RenderSession`] owns the host view, the render backend, one settings
//! struct and the translated scene, and advances through a small state
//! machine driven entirely by the event queue in [`events`]. The worker loop
//! lives in [`worker`]; everything here is state and plumbing.

pub mod events;
pub mod settings;
pub mod worker;

use std::collections::VecDeque;
use std::sync::mpsc::Receiver;

use thiserror::Error;

use crate::backend::{BackendError, RenderBackend, RenderNotice};
use crate::host::{FrameTime, HostScene};
use crate::interactive::{TrackerError, UpdateTracker};
use crate::scene::{TranslateError, TranslatedScene};

use self::events::{EventQueue, EventSender};
use self::settings::RenderSettings;

/// How a session drives the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderType {
    /// Fixed frame range, then done
    #[default]
    Batch,
    /// Live session that follows host edits until shut down
    Interactive,
}

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderState {
    /// No work started yet
    #[default]
    Idle,
    /// Translating the host scene for the pending frame
    Translating,
    /// The backend is rendering, or an interactive session is live
    Rendering,
    /// A stop was requested and honored; the session survives
    Stopped,
    /// All requested work finished
    Done,
}

/// Failures that abort the session's run loop.
///
/// Per-object translation problems never surface here; they are logged and
/// skipped where they occur. What remains is structural: the scene root is
/// unusable, an interactive drain hung, or the backend rejected a control
/// call.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Scene translation failed outright
    #[error(transparent)]
    Translate(#[from] TranslateError),
    /// An interactive drain failed
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    /// The backend rejected a render control call
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// One live translation and render session over a host scene
pub struct RenderSession<H: HostScene, B: RenderBackend> {
    pub(crate) host: H,
    pub(crate) backend: B,
    pub(crate) settings: RenderSettings,
    pub(crate) render_type: RenderType,
    pub(crate) state: RenderState,
    pub(crate) scene: Option<TranslatedScene>,
    pub(crate) tracker: UpdateTracker,
    pub(crate) events: EventQueue,
    pub(crate) notices: Option<Receiver<RenderNotice>>,
    pub(crate) pending_frames: VecDeque<FrameTime>,
    pub(crate) current_frame: FrameTime,
    pub(crate) progress: f32,
}

impl<H: HostScene, B: RenderBackend> RenderSession<H, B> {
    /// Create an idle session over a host and backend
    pub fn new(host: H, backend: B, settings: RenderSettings) -> Self {
        Self {
            host,
            backend,
            settings,
            render_type: RenderType::default(),
            state: RenderState::default(),
            scene: None,
            tracker: UpdateTracker::new(),
            events: EventQueue::new(),
            notices: None,
            pending_frames: VecDeque::new(),
            current_frame: 0.0,
            progress: 0.0,
        }
    }

    /// Producer handle for enqueueing events from any thread
    pub fn sender(&self) -> EventSender {
        self.events.sender()
    }

    /// Enqueue one event from the owning thread
    pub fn submit(&self, event: events::SessionEvent) {
        self.events.push(event);
    }

    /// Current lifecycle state
    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Whether the session is batch or interactive
    pub fn render_type(&self) -> RenderType {
        self.render_type
    }

    /// Settings in effect
    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Frame currently being translated or rendered
    pub fn current_frame(&self) -> FrameTime {
        self.current_frame
    }

    /// Last reported progress of the current frame, in [0, 1]
    pub fn progress(&self) -> f32 {
        self.progress
    }

    /// Translated scene, once a render has started
    pub fn scene(&self) -> Option<&TranslatedScene> {
        self.scene.as_ref()
    }

    /// Host view
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Mutable host view, for edits between pumps
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Render backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable render backend
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}
