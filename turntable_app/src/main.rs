//! Turntable demo application
//!
//! Builds a small studio stage in the in-memory host, renders a short
//! motion-blurred batch sequence through the recording backend, then runs a
//! brief interactive stint with a live edit.

use scene_bridge::config::Config;
use scene_bridge::host::memory::MotionTrack;
use scene_bridge::prelude::*;

/// Frames rendered by the batch phase
const BATCH_FRAMES: (f64, f64) = (1.0, 5.0);

pub struct TurntableDemo {
    session: RenderSession<MemoryScene, MemoryBackend>,
    stand: NodePath,
}

impl TurntableDemo {
    pub fn new(settings: RenderSettings) -> Self {
        log::info!("Building the turntable stage...");
        let (host, stand) = Self::build_stage();
        let session = RenderSession::new(host, MemoryBackend::new(), settings);
        Self { session, stand }
    }

    /// A spinning display stand, a shared prop on two pedestals, a confetti
    /// instancer, a key light and a camera
    fn build_stage() -> (MemoryScene, NodePath) {
        let mut host = MemoryScene::new();
        let world = NodePath::world();

        let stand = host.add_transform(&world, "stand");
        host.set_track(&stand, MotionTrack::Spin(std::f64::consts::PI / 12.0));
        let vase = host.add_shape(&stand, "vase");
        host.set_local(&vase, Mat4::new_translation(&Vec3::new(0.0, 1.0, 0.0)));

        let pedestal_a = host.add_transform(&world, "pedestal_a");
        host.set_local(&pedestal_a, Mat4::new_translation(&Vec3::new(3.0, 0.0, 0.0)));
        let bowl = host.add_shape(&pedestal_a, "bowl");
        let pedestal_b = host.add_transform(&world, "pedestal_b");
        host.set_local(&pedestal_b, Mat4::new_translation(&Vec3::new(-3.0, 0.0, 0.0)));
        host.add_instance(&bowl, &pedestal_b);

        let confetti = host.add_shape(&world, "confetti");
        let scatter = host.add_instancer(&world, "scatter");
        let particles = (0..24)
            .map(|i| {
                let angle = f64::from(i) * std::f64::consts::TAU / 24.0;
                let spot = Vec3::new(angle.cos() * 2.0, 0.1 * f64::from(i), angle.sin() * 2.0);
                (Mat4::new_translation(&spot), vec![confetti.clone()])
            })
            .collect();
        let colors = (0..24)
            .map(|i| Color::new(i as f32 / 24.0, 0.4, 1.0 - i as f32 / 24.0))
            .collect();
        host.set_particles(&scatter, particles, Some(colors));
        host.set_particle_drift(&scatter, Vec3::new(0.0, 0.05, 0.0));

        let key_light = host.add_light(&world, "key_light");
        host.set_local(&key_light, Mat4::new_translation(&Vec3::new(5.0, 8.0, 5.0)));
        let camera = host.add_camera(&world, "persp");
        host.set_local(&camera, Mat4::new_translation(&Vec3::new(0.0, 3.0, 12.0)));

        (host, stand)
    }

    pub fn run(&mut self) -> Result<(), SessionError> {
        self.batch_phase()?;
        self.interactive_phase()?;
        Ok(())
    }

    fn batch_phase(&mut self) -> Result<(), SessionError> {
        log::info!(
            "Rendering frames {} through {}...",
            BATCH_FRAMES.0,
            BATCH_FRAMES.1
        );
        self.session.submit(SessionEvent::StartBatchRender);
        let state = self.session.run()?;
        log::info!("Batch finished in state {state:?}");

        let stats = self.session.backend().stats().clone();
        log::info!(
            "Backend saw {} assemblies, {} objects, {} lights, {} instances, {} cameras",
            stats.assemblies_defined,
            stats.objects_defined,
            stats.lights_defined,
            stats.instances_defined,
            stats.cameras_defined
        );
        log::info!(
            "{} renders started, {} transform refreshes",
            stats.renders_started,
            stats.instance_transform_updates
        );
        Ok(())
    }

    fn interactive_phase(&mut self) -> Result<(), SessionError> {
        log::info!("Starting an interactive session...");
        self.session.submit(SessionEvent::StartInteractiveRender);
        self.session.pump()?;

        // nudge the stand while the render is live, as an editor would
        log::info!("Moving the stand mid-render...");
        let id = self.session.host().node_id(&self.stand);
        self.session
            .host_mut()
            .set_local(&self.stand, Mat4::new_translation(&Vec3::new(0.0, 0.5, 0.0)));
        if let Some(id) = id {
            self.session.submit(SessionEvent::NodeDirty(id));
        }
        self.session.submit(SessionEvent::ApplyPendingUpdates);
        self.session.pump()?;

        self.session.submit(SessionEvent::Shutdown);
        let state = self.session.run()?;
        log::info!("Interactive session ended in state {state:?}");

        let stats = self.session.backend().stats();
        log::info!(
            "Session total: {} renders started, {} aborted",
            stats.renders_started,
            stats.renders_aborted
        );
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Starting turntable demo");

    // an optional settings file overrides the built-in demo setup
    let settings = match RenderSettings::load_from_file("turntable.ron") {
        Ok(loaded) => {
            log::info!("Loaded render settings from turntable.ron");
            loaded
        }
        Err(_) => RenderSettings {
            motion_blur: true,
            transform_samples: 4,
            deform_samples: 2,
            frame_start: BATCH_FRAMES.0,
            frame_end: BATCH_FRAMES.1,
            scene_scale: 0.1,
            view_camera: Some("persp".to_string()),
            ..RenderSettings::default()
        },
    };

    let mut app = TurntableDemo::new(settings);
    match app.run() {
        Ok(()) => {
            log::info!("Turntable demo finished successfully");
            Ok(())
        }
        Err(e) => {
            log::error!("Application error: {e}");
            Err(e.into())
        }
    }
}
