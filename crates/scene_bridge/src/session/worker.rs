//! Session worker loop
//!
//! The worker is the single consumer of the session queue and the only code
//! that mutates the translated scene or talks to the backend. Batch sessions
//! sequence frames through self-enqueued `FrameReady`/`FrameDone` events;
//! interactive sessions stay alive, folding host edits into the live render
//! whenever `ApplyPendingUpdates` arrives.

use std::sync::mpsc::channel;
use std::time::Duration;

use crate::backend::{BackendRenderState, RenderBackend, RenderNotice};
use crate::foundation::logging::{debug, info, warn};
use crate::host::{HostScene, NodePath};
use crate::interactive::UpdateTracker;
use crate::scene::motion::plan_steps;
use crate::scene::{assembly, TranslatedScene};

use super::events::SessionEvent;
use super::{RenderSession, RenderState, RenderType, SessionError};

/// How long `run` blocks on the queue before re-checking backend notices
const QUEUE_POLL: Duration = Duration::from_millis(10);

impl<H: HostScene, B: RenderBackend> RenderSession<H, B> {
    /// Drain queued events and backend notices until the queue runs dry.
    /// Returns the state the session lands in.
    pub fn pump(&mut self) -> Result<RenderState, SessionError> {
        loop {
            self.forward_notices();
            match self.events.try_recv() {
                Some(event) => self.handle_event(event)?,
                None => break,
            }
        }
        Ok(self.state)
    }

    /// Block on the queue, handling events until the session finishes or is
    /// stopped.
    pub fn run(&mut self) -> Result<RenderState, SessionError> {
        loop {
            let state = self.pump()?;
            if matches!(state, RenderState::Done | RenderState::Stopped) {
                return Ok(state);
            }
            if let Some(event) = self.events.recv_timeout(QUEUE_POLL) {
                self.handle_event(event)?;
            }
        }
    }

    fn handle_event(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        match event {
            SessionEvent::StartBatchRender => self.start_batch()?,
            SessionEvent::StartInteractiveRender => self.start_interactive()?,
            // frame events queued before a stop are stale once it lands
            SessionEvent::FrameReady if !self.halted() => self.start_render()?,
            SessionEvent::FrameDone if !self.halted() => self.finish_frame()?,
            SessionEvent::FrameReady | SessionEvent::FrameDone => {}
            SessionEvent::DisplayUpdate(progress) => self.progress = progress,
            SessionEvent::ApplyPendingUpdates => self.apply_pending()?,
            SessionEvent::NodeDirty(id) => self.tracker.on_node_dirty(id),
            SessionEvent::NodeAdded(path) => self.node_added(&path),
            SessionEvent::NodeRemoved(id) => {
                if let Some(scene) = self.scene.as_mut() {
                    self.tracker.on_node_removed(scene, id);
                }
            }
            SessionEvent::NodeRenamed { id, new_path } => {
                if let Some(scene) = self.scene.as_mut() {
                    self.tracker.on_node_renamed(scene, id, &new_path);
                }
            }
            SessionEvent::StopRendering => self.stop(),
            SessionEvent::Shutdown => {
                self.stop();
                self.state = RenderState::Done;
            }
        }
        Ok(())
    }

    fn halted(&self) -> bool {
        matches!(self.state, RenderState::Done | RenderState::Stopped)
    }

    /// Bridge backend notices into the queue so they are handled in order
    /// with everything else
    fn forward_notices(&mut self) {
        let Some(rx) = &self.notices else {
            return;
        };
        while let Ok(notice) = rx.try_recv() {
            match notice {
                RenderNotice::FrameDone => self.events.push(SessionEvent::FrameDone),
                RenderNotice::Progress(p) => self.events.push(SessionEvent::DisplayUpdate(p)),
                RenderNotice::Stopped => debug!("backend acknowledged the abort"),
            }
        }
    }

    fn start_batch(&mut self) -> Result<(), SessionError> {
        self.render_type = RenderType::Batch;
        self.state = RenderState::Translating;
        let frames = self.settings.frame_list();
        info!(
            "batch render: {} frame(s) starting at {}",
            frames.len(),
            self.settings.frame_start
        );
        let scene = TranslatedScene::parse(&self.host, &self.settings, false, None)?;
        self.scene = Some(scene);
        self.pending_frames = frames.into();
        self.advance_frame()
    }

    fn start_interactive(&mut self) -> Result<(), SessionError> {
        self.render_type = RenderType::Interactive;
        self.state = RenderState::Translating;
        self.tracker = UpdateTracker::new();
        let scene =
            TranslatedScene::parse(&self.host, &self.settings, true, Some(&mut self.tracker))?;
        self.scene = Some(scene);
        self.current_frame = self.host.current_time();
        let steps = plan_steps(&self.settings);
        if let Some(scene) = self.scene.as_mut() {
            scene.prepare_frame(&mut self.host, &steps, self.current_frame);
            let report = assembly::define_scene(scene, &mut self.backend)?;
            info!(
                "interactive scene up: {} objects, {} lights, {} cameras",
                report.objects, report.lights, report.cameras
            );
        }
        self.events.push(SessionEvent::FrameReady);
        Ok(())
    }

    /// Translate and define the next pending frame, or finish the batch
    fn advance_frame(&mut self) -> Result<(), SessionError> {
        let Some(frame) = self.pending_frames.pop_front() else {
            info!("batch complete");
            self.state = RenderState::Done;
            return Ok(());
        };
        self.current_frame = frame;
        self.progress = 0.0;
        self.state = RenderState::Translating;
        let steps = plan_steps(&self.settings);
        let Some(scene) = self.scene.as_mut() else {
            return Ok(());
        };
        scene.prepare_frame(&mut self.host, &steps, frame);
        let report = assembly::define_scene(scene, &mut self.backend)?;
        debug!(
            "frame {frame}: {} objects, {} instances, {} proxies, {} skipped",
            report.objects, report.instances, report.proxies, report.skipped
        );
        self.events.push(SessionEvent::FrameReady);
        Ok(())
    }

    fn start_render(&mut self) -> Result<(), SessionError> {
        let (tx, rx) = channel();
        self.notices = Some(rx);
        self.backend.start_render(tx)?;
        self.state = RenderState::Rendering;
        Ok(())
    }

    fn finish_frame(&mut self) -> Result<(), SessionError> {
        self.progress = 1.0;
        match self.render_type {
            RenderType::Batch => self.advance_frame(),
            // an interactive render refines until an edit restarts it
            RenderType::Interactive => Ok(()),
        }
    }

    fn apply_pending(&mut self) -> Result<(), SessionError> {
        if self.render_type != RenderType::Interactive {
            return Ok(());
        }
        let Some(scene) = self.scene.as_mut() else {
            return Ok(());
        };
        if !self.tracker.has_pending() {
            return Ok(());
        }
        let outcome = self.tracker.drain_and_apply(
            scene,
            &mut self.host,
            &mut self.backend,
            &self.settings,
            self.current_frame,
        )?;
        if outcome.changed() || outcome.aborted {
            info!(
                "interactive update: {} refreshed, {} removed",
                outcome.updated, outcome.removed
            );
            self.events.push(SessionEvent::FrameReady);
        }
        Ok(())
    }

    fn node_added(&mut self, path: &NodePath) {
        let Some(scene) = self.scene.as_mut() else {
            return;
        };
        if let Err(err) = self
            .tracker
            .on_node_added(scene, &self.host, &self.settings, path)
        {
            warn!("failed to translate added node `{path}`: {err}");
        }
    }

    fn stop(&mut self) {
        if self.backend.render_state() != BackendRenderState::Idle {
            self.backend.abort_render();
        }
        self.pending_frames.clear();
        if self.state != RenderState::Done {
            self.state = RenderState::Stopped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::foundation::math::{Mat4, Mat4Ext, Vec3};
    use crate::host::memory::{MemoryScene, MotionTrack};
    use crate::session::settings::RenderSettings;

    fn animated_host() -> (MemoryScene, NodePath, NodePath) {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let group = host.add_transform(&world, "group");
        let mesh = host.add_shape(&group, "mesh");
        host.add_camera(&world, "persp");
        host.set_track(&group, MotionTrack::Slide(Vec3::new(1.0, 0.0, 0.0)));
        (host, group, mesh)
    }

    #[test]
    fn test_batch_session_renders_every_frame() {
        let (host, ..) = animated_host();
        let settings = RenderSettings {
            frame_start: 1.0,
            frame_end: 3.0,
            ..RenderSettings::default()
        };
        let mut session = RenderSession::new(host, MemoryBackend::new(), settings);

        session.submit(SessionEvent::StartBatchRender);
        let state = session.run().unwrap();

        assert_eq!(state, RenderState::Done);
        assert_eq!(session.backend().stats().renders_started, 3);
        assert!((session.current_frame() - 3.0).abs() < f64::EPSILON);
        assert!((session.progress() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_batch_reuses_assemblies_but_tracks_motion() {
        let (host, ..) = animated_host();
        let settings = RenderSettings {
            frame_start: 1.0,
            frame_end: 3.0,
            ..RenderSettings::default()
        };
        let mut session = RenderSession::new(host, MemoryBackend::new(), settings);
        session.submit(SessionEvent::StartBatchRender);
        session.run().unwrap();

        let stats = session.backend().stats();
        // one assembly and one anchor instance for the whole range
        assert_eq!(stats.assemblies_defined, 1);
        assert_eq!(stats.instances_defined, 1);
        // geometry re-exported per frame
        assert_eq!(stats.objects_defined, 3);
        // the anchor instance followed the slide to x=3 on the last frame
        let instance = session.backend().instance("world_group_ass_assInst").unwrap();
        let x = instance.transforms.first_matrix().translation_part().x;
        assert!((x - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_stop_interrupts_a_batch() {
        let (host, ..) = animated_host();
        let settings = RenderSettings {
            frame_start: 1.0,
            frame_end: 10.0,
            ..RenderSettings::default()
        };
        let mut backend = MemoryBackend::new();
        backend.set_manual_completion(true);
        let mut session = RenderSession::new(host, backend, settings);

        session.submit(SessionEvent::StartBatchRender);
        assert_eq!(session.pump().unwrap(), RenderState::Rendering);

        session.submit(SessionEvent::StopRendering);
        let state = session.pump().unwrap();
        assert_eq!(state, RenderState::Stopped);
        assert_eq!(session.backend().stats().renders_started, 1);
        assert_eq!(session.backend().stats().renders_aborted, 1);
    }

    #[test]
    fn test_interactive_edit_restarts_the_render() {
        let (host, group, _) = animated_host();
        let settings = RenderSettings::default();
        let mut backend = MemoryBackend::new();
        backend.set_manual_completion(true);
        let mut session = RenderSession::new(host, backend, settings);

        session.submit(SessionEvent::StartInteractiveRender);
        assert_eq!(session.pump().unwrap(), RenderState::Rendering);
        assert_eq!(session.backend().stats().renders_started, 1);

        let id = session.host().node_id(&group).unwrap();
        session
            .host_mut()
            .set_local(&group, Mat4::new_translation(&Vec3::new(0.0, 2.0, 0.0)));
        let sender = session.sender();
        sender.send(SessionEvent::NodeDirty(id));
        sender.send(SessionEvent::ApplyPendingUpdates);

        assert_eq!(session.pump().unwrap(), RenderState::Rendering);
        assert_eq!(session.backend().stats().renders_aborted, 1);
        assert_eq!(session.backend().stats().renders_started, 2);
    }

    #[test]
    fn test_shutdown_ends_an_interactive_session() {
        let (host, ..) = animated_host();
        let mut session =
            RenderSession::new(host, MemoryBackend::new(), RenderSettings::default());

        session.submit(SessionEvent::StartInteractiveRender);
        session.submit(SessionEvent::Shutdown);
        let state = session.run().unwrap();
        assert_eq!(state, RenderState::Done);
    }

    #[test]
    fn test_stale_dirt_does_not_restart_the_render() {
        let (host, ..) = animated_host();
        let settings = RenderSettings::default();
        let mut backend = MemoryBackend::new();
        backend.set_manual_completion(true);
        let mut session = RenderSession::new(host, backend, settings);

        session.submit(SessionEvent::StartInteractiveRender);
        session.pump().unwrap();

        session.submit(SessionEvent::ApplyPendingUpdates);
        session.pump().unwrap();
        assert_eq!(session.backend().stats().renders_started, 1);
        assert_eq!(session.backend().stats().renders_aborted, 0);
    }
}
