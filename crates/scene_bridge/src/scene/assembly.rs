//! Assembly boundaries, naming and the backend definition pass
//!
//! The resolver decides which records own a translation unit, derives the
//! canonical backend names for assemblies and their instances, and pushes the
//! translated scene into the backend in dependency order. Assembly creation
//! is memoized by name: geometry for a canonical object is defined into the
//! backend once per assembly name per session, no matter how many instances
//! reference it.

use crate::backend::{
    BackendError, CameraDef, LightDef, ObjectDef, RenderBackend, TransformSequence,
};
use crate::foundation::logging::{debug, warn};
use crate::foundation::math::{Mat4, Mat4Ext};
use crate::host::NodeKind;

use super::object::{ObjectHandle, TranslatedObject};
use super::{TranslateError, TranslatedScene};

/// Name of the top-level assembly every other assembly nests under
pub const MASTER_ASSEMBLY_NAME: &str = "world";

/// Decide whether a record owns its own translation unit.
///
/// The rules are ordered; the first that applies wins. Instances never own
/// an assembly, they reuse their canonical object's.
pub fn needs_own_assembly(
    obj: &TranslatedObject,
    has_light_child: bool,
    interactive: bool,
) -> bool {
    // interactive sessions give every transform independent update granularity
    if interactive && obj.node_kind == NodeKind::Transform {
        return true;
    }
    if obj.node_kind == NodeKind::World {
        return true;
    }
    if obj.instance_index > 0 {
        return false;
    }
    if obj.instancer_connection {
        return true;
    }
    if obj.instanced {
        return true;
    }
    if obj.animated {
        return true;
    }
    has_light_child
}

fn resolution(obj: &TranslatedObject, reason: &str) -> TranslateError {
    TranslateError::Resolution {
        path: obj.path.to_string(),
        reason: reason.to_string(),
    }
}

/// Anchor record owning `handle`'s assembly.
///
/// Instances and proxies resolve through their canonical object first, so
/// every path to one source node lands on the same anchor.
pub fn resolve_anchor(
    scene: &TranslatedScene,
    handle: ObjectHandle,
) -> Result<ObjectHandle, TranslateError> {
    let obj = scene.object(handle).ok_or(TranslateError::StaleHandle)?;
    if obj.is_instance() {
        let original = obj
            .original_object
            .ok_or_else(|| resolution(obj, "instance has no canonical object"))?;
        return resolve_anchor(scene, original);
    }
    obj.attributes
        .assembly_anchor
        .ok_or_else(|| resolution(obj, "record has no assembly anchor"))
}

/// Canonical assembly name for `handle`'s translation unit
pub fn assembly_name(
    scene: &TranslatedScene,
    handle: ObjectHandle,
) -> Result<String, TranslateError> {
    let anchor = resolve_anchor(scene, handle)?;
    let record = scene.object(anchor).ok_or(TranslateError::StaleHandle)?;
    if record.node_kind == NodeKind::World {
        Ok(MASTER_ASSEMBLY_NAME.to_string())
    } else {
        Ok(format!("{}_ass", record.path.sanitized()))
    }
}

/// Assembly-instance name for `handle`: the assembly name plus the particle
/// id and instance index when present
pub fn assembly_instance_name(
    scene: &TranslatedScene,
    handle: ObjectHandle,
) -> Result<String, TranslateError> {
    let obj = scene.object(handle).ok_or(TranslateError::StaleHandle)?;
    let mut name = assembly_name(scene, handle)?;
    if let Some(proxy) = &obj.proxy {
        name = format!("{name}_{}", proxy.particle_id);
    }
    if obj.instance_index > 0 {
        name = format!("{name}_{}", obj.instance_index);
    }
    Ok(format!("{name}_assInst"))
}

pub(crate) fn sequence_or_identity(record: &TranslatedObject) -> TransformSequence {
    if record.transform_samples.is_empty() {
        TransformSequence::single(Mat4::identity())
    } else {
        record.transform_samples.sequence()
    }
}

/// Ensure the assembly for `handle`'s translation unit exists.
///
/// On first reference this creates the assembly and one assembly instance
/// positioned by the anchor's sampled transforms; later calls find the name
/// in the backend and return without touching it.
pub fn resolve_assembly(
    scene: &TranslatedScene,
    backend: &mut dyn RenderBackend,
    handle: ObjectHandle,
) -> Result<String, TranslateError> {
    if !backend.has_master_assembly() {
        backend.define_master_assembly(&scene.global_scale())?;
    }
    let name = assembly_name(scene, handle)?;
    if name == MASTER_ASSEMBLY_NAME || backend.assembly_exists(&name) {
        return Ok(name);
    }
    backend.define_assembly(&name)?;

    let anchor = resolve_anchor(scene, handle)?;
    let record = scene.object(anchor).ok_or(TranslateError::StaleHandle)?;
    let instance_name = assembly_instance_name(scene, anchor)?;
    let transforms = sequence_or_identity(record);
    define_instance_checked(backend, &instance_name, &name, &transforms)?;
    Ok(name)
}

/// Counters reported by one definition pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DefineReport {
    /// Geometry objects defined
    pub objects: usize,
    /// Lights defined
    pub lights: usize,
    /// Assembly instances created for instanced records
    pub instances: usize,
    /// Assembly instances created for particle proxies
    pub proxies: usize,
    /// Cameras defined
    pub cameras: usize,
    /// Records skipped after a resolution or backend failure
    pub skipped: usize,
}

/// Push the translated scene into the backend.
///
/// Stale proxy instances from the previous frame are removed first, then
/// three passes run in dependency order: canonical geometry, lights and
/// cameras; assembly instances for instanced records; one instance per live
/// particle proxy. A failure is local to its record: it is logged, counted
/// and the pass moves on.
pub fn define_scene(
    scene: &mut TranslatedScene,
    backend: &mut dyn RenderBackend,
) -> Result<DefineReport, TranslateError> {
    let mut report = DefineReport::default();
    if !backend.has_master_assembly() {
        backend.define_master_assembly(&scene.global_scale())?;
    }

    for &handle in &scene.objects {
        match define_canonical_geometry(scene, backend, handle) {
            Ok(true) => report.objects += 1,
            Ok(false) => {}
            Err(err) => {
                warn!("skipping geometry {handle:?}: {err}");
                report.skipped += 1;
            }
        }
    }
    for &handle in &scene.lights {
        match define_light_record(scene, backend, handle) {
            Ok(true) => report.lights += 1,
            Ok(false) => {}
            Err(err) => {
                warn!("skipping light {handle:?}: {err}");
                report.skipped += 1;
            }
        }
    }
    for &handle in &scene.cameras {
        match define_camera_record(scene, backend, handle) {
            Ok(true) => report.cameras += 1,
            Ok(false) => {}
            Err(err) => {
                warn!("skipping camera {handle:?}: {err}");
                report.skipped += 1;
            }
        }
    }

    // assemblies are memoized across frames, so anchors that already exist
    // pick up this frame's motion here
    for &handle in &scene.objects {
        refresh_anchor_placement(scene, backend, handle);
    }

    for &handle in &scene.objects {
        match define_instance_record(scene, backend, handle) {
            Ok(true) => report.instances += 1,
            Ok(false) => {}
            Err(err) => {
                warn!("skipping instance {handle:?}: {err}");
                report.skipped += 1;
            }
        }
    }

    let (defined, skipped) = refresh_proxy_instances(scene, backend);
    report.proxies = defined;
    report.skipped += skipped;

    Ok(report)
}

/// Retire last frame's proxy instances and define one per live proxy.
///
/// Returns how many were defined and how many failed. Used both by the full
/// define pass and by interactive updates after an instancer re-expansion.
pub(crate) fn refresh_proxy_instances(
    scene: &mut TranslatedScene,
    backend: &mut dyn RenderBackend,
) -> (usize, usize) {
    for name in std::mem::take(&mut scene.defined_proxy_instances) {
        if backend.remove_assembly_instance(&name).is_err() {
            debug!("stale proxy instance `{name}` was already gone");
        }
    }

    let mut defined = 0;
    let mut skipped = 0;
    let mut live = Vec::new();
    for &handle in &scene.instancer_elements {
        match define_proxy_instance(scene, backend, handle) {
            Ok(Some(name)) => {
                live.push(name);
                defined += 1;
            }
            Ok(None) => {}
            Err(err) => {
                warn!("skipping instancer proxy {handle:?}: {err}");
                skipped += 1;
            }
        }
    }
    scene.defined_proxy_instances = live;
    (defined, skipped)
}

fn refresh_anchor_placement(
    scene: &TranslatedScene,
    backend: &mut dyn RenderBackend,
    handle: ObjectHandle,
) {
    let Some(record) = scene.object(handle) else {
        return;
    };
    if record.attributes.assembly_anchor != Some(handle) || record.removed {
        return;
    }
    let Ok(assembly) = assembly_name(scene, handle) else {
        return;
    };
    if assembly == MASTER_ASSEMBLY_NAME {
        return;
    }
    let Ok(name) = assembly_instance_name(scene, handle) else {
        return;
    };
    let transforms = sequence_or_identity(record);
    if let Err(err) = backend.replace_assembly_instance_transforms(&name, &transforms) {
        debug!("anchor instance `{name}` not refreshed: {err}");
    }
}

/// Define one canonical shape into its resolved assembly. Returns false for
/// records this pass does not cover (transforms, instances, hidden nodes).
pub(crate) fn define_canonical_geometry(
    scene: &TranslatedScene,
    backend: &mut dyn RenderBackend,
    handle: ObjectHandle,
) -> Result<bool, TranslateError> {
    let obj = scene.object(handle).ok_or(TranslateError::StaleHandle)?;
    if obj.node_kind != NodeKind::Shape
        || obj.instance_index != 0
        || obj.proxy.is_some()
        || obj.removed
        || !obj.visible
    {
        return Ok(false);
    }
    let assembly = resolve_assembly(scene, backend, handle)?;
    let def = ObjectDef {
        name: obj.path.sanitized(),
        placement: obj.attributes.accumulated_local,
        color_override: obj.attributes.color_override,
        opacity_override: obj.attributes.opacity_override,
    };
    define_object_checked(backend, &assembly, &def)?;
    Ok(true)
}

/// Create the assembly instance for one instanced record (`instance_index > 0`)
pub(crate) fn define_instance_record(
    scene: &TranslatedScene,
    backend: &mut dyn RenderBackend,
    handle: ObjectHandle,
) -> Result<bool, TranslateError> {
    let obj = scene.object(handle).ok_or(TranslateError::StaleHandle)?;
    if obj.instance_index == 0 || obj.proxy.is_some() || obj.removed || !obj.visible {
        return Ok(false);
    }
    let assembly = resolve_assembly(scene, backend, handle)?;
    if assembly == MASTER_ASSEMBLY_NAME {
        return Ok(false);
    }
    let instance_name = assembly_instance_name(scene, handle)?;
    let transforms = sequence_or_identity(obj);
    define_instance_checked(backend, &instance_name, &assembly, &transforms)?;
    Ok(true)
}

/// Create the assembly instance for one particle proxy; returns the instance
/// name so the caller can retire it when the proxy list is rebuilt
pub(crate) fn define_proxy_instance(
    scene: &TranslatedScene,
    backend: &mut dyn RenderBackend,
    handle: ObjectHandle,
) -> Result<Option<String>, TranslateError> {
    let obj = scene.object(handle).ok_or(TranslateError::StaleHandle)?;
    if obj.proxy.is_none() || obj.removed || !obj.visible {
        return Ok(None);
    }
    let assembly = resolve_assembly(scene, backend, handle)?;
    if assembly == MASTER_ASSEMBLY_NAME {
        return Ok(None);
    }
    let instance_name = assembly_instance_name(scene, handle)?;
    let transforms = sequence_or_identity(obj);
    define_instance_checked(backend, &instance_name, &assembly, &transforms)?;
    Ok(Some(instance_name))
}

/// Define one light into its resolved assembly
pub(crate) fn define_light_record(
    scene: &TranslatedScene,
    backend: &mut dyn RenderBackend,
    handle: ObjectHandle,
) -> Result<bool, TranslateError> {
    let obj = scene.object(handle).ok_or(TranslateError::StaleHandle)?;
    if obj.removed || !obj.visible {
        return Ok(false);
    }
    let assembly = resolve_assembly(scene, backend, handle)?;
    let def = LightDef {
        name: obj.path.sanitized(),
        placement: obj.attributes.accumulated_local,
    };
    define_light_checked(backend, &assembly, &def)?;
    Ok(true)
}

/// Define one camera, scaling only its translation by the global scene scale
pub(crate) fn define_camera_record(
    scene: &TranslatedScene,
    backend: &mut dyn RenderBackend,
    handle: ObjectHandle,
) -> Result<bool, TranslateError> {
    let obj = scene.object(handle).ok_or(TranslateError::StaleHandle)?;
    if obj.removed || !obj.visible {
        return Ok(false);
    }
    let matrices: Vec<Mat4> = obj
        .transform_samples
        .matrices()
        .iter()
        .map(|m| m.scaled_translation(scene.scale_factor))
        .collect();
    let transforms = if matrices.is_empty() {
        TransformSequence::single(Mat4::identity())
    } else {
        TransformSequence::from_matrices(&matrices)
    };
    let def = CameraDef {
        name: obj.path.sanitized(),
        transforms,
    };
    define_camera_checked(backend, &def)?;
    Ok(true)
}

// A name collision means a stale entity from an earlier definition of the
// same scene; remove it and try once more.

fn define_object_checked(
    backend: &mut dyn RenderBackend,
    assembly: &str,
    def: &ObjectDef,
) -> Result<(), TranslateError> {
    match backend.define_object(assembly, def) {
        Ok(()) => Ok(()),
        Err(BackendError::NameCollision(_)) => {
            debug!("replacing stale object `{}` in `{assembly}`", def.name);
            backend.remove_object(assembly, &def.name)?;
            backend.define_object(assembly, def)?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn define_instance_checked(
    backend: &mut dyn RenderBackend,
    name: &str,
    assembly: &str,
    transforms: &TransformSequence,
) -> Result<(), TranslateError> {
    match backend.define_assembly_instance(name, assembly, transforms) {
        Ok(()) => Ok(()),
        Err(BackendError::NameCollision(_)) => {
            debug!("replacing stale assembly instance `{name}`");
            backend.remove_assembly_instance(name)?;
            backend.define_assembly_instance(name, assembly, transforms)?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn define_light_checked(
    backend: &mut dyn RenderBackend,
    assembly: &str,
    def: &LightDef,
) -> Result<(), TranslateError> {
    match backend.define_light(assembly, def) {
        Ok(()) => Ok(()),
        Err(BackendError::NameCollision(_)) => {
            debug!("replacing stale light `{}` in `{assembly}`", def.name);
            backend.remove_light(assembly, &def.name)?;
            backend.define_light(assembly, def)?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn define_camera_checked(
    backend: &mut dyn RenderBackend,
    def: &CameraDef,
) -> Result<(), TranslateError> {
    match backend.define_camera(def) {
        Ok(()) => Ok(()),
        Err(BackendError::NameCollision(_)) => {
            debug!("replacing stale camera `{}`", def.name);
            backend.remove_camera(&def.name)?;
            backend.define_camera(def)?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::foundation::math::Vec3;
    use crate::host::memory::{MemoryScene, MotionTrack};
    use crate::host::NodePath;
    use crate::scene::motion::plan_steps;
    use crate::session::settings::RenderSettings;

    fn prepared(host: &mut MemoryScene, settings: &RenderSettings) -> TranslatedScene {
        let mut scene = TranslatedScene::parse(host, settings, false, None).unwrap();
        let steps = plan_steps(settings);
        scene.prepare_frame(host, &steps, 1.0);
        scene
    }

    #[test]
    fn test_resolve_assembly_is_memoized() {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let group = host.add_transform(&world, "group");
        let mesh = host.add_shape(&group, "mesh");
        host.set_track(&group, MotionTrack::Slide(Vec3::new(1.0, 0.0, 0.0)));

        let settings = RenderSettings::default();
        let scene = prepared(&mut host, &settings);
        let mut backend = MemoryBackend::new();
        let handle = scene.handle_at(&mesh).unwrap();

        let first = resolve_assembly(&scene, &mut backend, handle).unwrap();
        let second = resolve_assembly(&scene, &mut backend, handle).unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.stats().assemblies_defined, 1);
        assert_eq!(backend.stats().instances_defined, 1);
    }

    #[test]
    fn test_world_anchored_geometry_lands_in_master() {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let group = host.add_transform(&world, "group");
        host.add_shape(&group, "mesh");

        let settings = RenderSettings::default();
        let mut scene = prepared(&mut host, &settings);
        let mut backend = MemoryBackend::new();
        let report = define_scene(&mut scene, &mut backend).unwrap();

        assert_eq!(report.objects, 1);
        // nothing in the chain forces a boundary, so the mesh sits in the
        // master assembly with its accumulated placement
        let master = backend.assembly(MASTER_ASSEMBLY_NAME).unwrap();
        assert_eq!(master.objects.len(), 1);
        assert_eq!(backend.stats().assemblies_defined, 0);
    }

    #[test]
    fn test_instances_share_one_assembly() {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let a = host.add_transform(&world, "a");
        let b = host.add_transform(&world, "b");
        let c = host.add_transform(&world, "c");
        let mesh = host.add_shape(&a, "mesh");
        host.add_instance(&mesh, &b);
        host.add_instance(&mesh, &c);

        let settings = RenderSettings::default();
        let mut scene = prepared(&mut host, &settings);
        let mut backend = MemoryBackend::new();
        let report = define_scene(&mut scene, &mut backend).unwrap();

        assert_eq!(report.objects, 1);
        assert_eq!(report.instances, 2);
        assert_eq!(backend.stats().assemblies_defined, 1);
        // canonical anchor instance plus the two explicit instances
        assert_eq!(backend.stats().instances_defined, 3);
        let names = backend.instance_names();
        assert!(names.iter().any(|n| n.ends_with("_1_assInst")));
        assert!(names.iter().any(|n| n.ends_with("_2_assInst")));
    }

    #[test]
    fn test_assembly_names_derive_from_the_anchor_path() {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let rig = host.add_transform(&world, "rig");
        let mesh = host.add_shape(&rig, "meshShape");
        host.set_animated(&rig, true);

        let settings = RenderSettings::default();
        let scene = prepared(&mut host, &settings);
        let handle = scene.handle_at(&mesh).unwrap();
        assert_eq!(assembly_name(&scene, handle).unwrap(), "world_rig_ass");

        let anchor = resolve_anchor(&scene, handle).unwrap();
        assert_eq!(
            assembly_instance_name(&scene, anchor).unwrap(),
            "world_rig_ass_assInst"
        );
    }

    #[test]
    fn test_stale_entity_is_replaced_once() {
        let mut backend = MemoryBackend::new();
        backend.define_master_assembly(&Mat4::identity()).unwrap();
        backend.define_assembly("a_ass").unwrap();
        let def = ObjectDef {
            name: "mesh".to_string(),
            placement: Mat4::identity(),
            color_override: None,
            opacity_override: None,
        };
        backend.define_object("a_ass", &def).unwrap();

        let replacement = ObjectDef {
            placement: Mat4::new_scaling(2.0),
            ..def
        };
        define_object_checked(&mut backend, "a_ass", &replacement).unwrap();
        let stored = &backend.assembly("a_ass").unwrap().objects["mesh"];
        assert_eq!(stored.placement, Mat4::new_scaling(2.0));
        assert_eq!(backend.assembly("a_ass").unwrap().version, 1);
    }

    #[test]
    fn test_hidden_geometry_is_not_defined() {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let group = host.add_transform(&world, "group");
        let mesh = host.add_shape(&group, "mesh");
        host.set_visible(&mesh, false);

        let settings = RenderSettings::default();
        let mut scene = prepared(&mut host, &settings);
        let mut backend = MemoryBackend::new();
        let report = define_scene(&mut scene, &mut backend).unwrap();
        assert_eq!(report.objects, 0);
        assert_eq!(backend.stats().objects_defined, 0);
    }

    #[test]
    fn test_light_defines_into_its_transform_assembly() {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let rig = host.add_transform(&world, "rig");
        host.add_light(&rig, "key");

        let settings = RenderSettings::default();
        let mut scene = prepared(&mut host, &settings);
        let mut backend = MemoryBackend::new();
        let report = define_scene(&mut scene, &mut backend).unwrap();

        assert_eq!(report.lights, 1);
        let assembly = backend.assembly("world_rig_ass").unwrap();
        assert_eq!(assembly.lights.len(), 1);
        assert!(backend.assembly_instance_exists("world_rig_ass_assInst"));
    }

    #[test]
    fn test_camera_translation_is_scaled_but_orientation_kept() {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let cam = host.add_camera(&world, "persp");
        host.set_local(&cam, Mat4::new_translation(&Vec3::new(0.0, 0.0, 10.0)));

        let settings = RenderSettings {
            scene_scale: 0.1,
            ..RenderSettings::default()
        };
        let mut scene = prepared(&mut host, &settings);
        let mut backend = MemoryBackend::new();
        define_scene(&mut scene, &mut backend).unwrap();

        let stored = backend.camera("world_persp").unwrap();
        let placement = stored.transforms.first_matrix();
        assert!((placement.translation_part().z - 1.0).abs() < 1e-12);
        // the rotation/scale block stays untouched
        assert!((placement[(0, 0)] - 1.0).abs() < 1e-12);
    }
}
