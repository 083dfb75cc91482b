//! Depth-first hierarchy walker
//!
//! Turns the host DAG into the scene's classified object lists. Each node is
//! visited once, receives an attribute snapshot derived from its parent's and
//! hands its own snapshot down to its children, so boundary decisions and
//! accumulated matrices never depend on global state.

use crate::foundation::logging::{debug, warn};
use crate::host::{HostScene, NodeKind, NodePath};
use crate::interactive::UpdateTracker;
use crate::session::settings::RenderSettings;

use super::assembly;
use super::attributes::ObjectAttributes;
use super::object::{ObjectHandle, TranslatedObject};
use super::{TranslateError, TranslatedScene};

struct WalkContext<'a> {
    host: &'a dyn HostScene,
    interactive: bool,
    exclusion: &'a str,
    view_camera: Option<&'a str>,
}

/// Walk the host DAG from its root, filling the scene's arena and lists.
///
/// For interactive sessions every visited node is also registered with the
/// update tracker so later dirty notifications can find its record.
pub(crate) fn walk(
    scene: &mut TranslatedScene,
    host: &dyn HostScene,
    settings: &RenderSettings,
    tracker: Option<&mut UpdateTracker>,
) -> Result<(), TranslateError> {
    let root = host.root();
    if host.kind(&root) != Some(NodeKind::World) {
        return Err(TranslateError::Resolution {
            path: root.to_string(),
            reason: "host root is not a world node".to_string(),
        });
    }
    let ctx = WalkContext {
        host,
        interactive: scene.interactive,
        exclusion: settings.exclusion_pattern.as_str(),
        view_camera: settings.view_camera.as_deref(),
    };
    visit(scene, &ctx, &root, None, &ObjectAttributes::root(), tracker)
}

/// Translate one newly added subtree in place, attached under its already
/// translated parent.
pub(crate) fn walk_subtree(
    scene: &mut TranslatedScene,
    host: &dyn HostScene,
    settings: &RenderSettings,
    path: &NodePath,
    tracker: Option<&mut UpdateTracker>,
) -> Result<(), TranslateError> {
    let parent_path = path.parent().ok_or_else(|| TranslateError::Resolution {
        path: path.to_string(),
        reason: "added node has no parent".to_string(),
    })?;
    let parent = scene
        .handle_at(&parent_path)
        .ok_or_else(|| TranslateError::Resolution {
            path: path.to_string(),
            reason: format!("parent `{parent_path}` is not translated"),
        })?;
    let parent_attrs = scene
        .object(parent)
        .map(|r| r.attributes.clone())
        .ok_or(TranslateError::StaleHandle)?;
    let ctx = WalkContext {
        host,
        interactive: scene.interactive,
        exclusion: settings.exclusion_pattern.as_str(),
        view_camera: settings.view_camera.as_deref(),
    };
    visit(scene, &ctx, path, Some(parent), &parent_attrs, tracker)
}

fn visit(
    scene: &mut TranslatedScene,
    ctx: &WalkContext<'_>,
    path: &NodePath,
    parent: Option<ObjectHandle>,
    parent_attrs: &ObjectAttributes,
    mut tracker: Option<&mut UpdateTracker>,
) -> Result<(), TranslateError> {
    if !ctx.exclusion.is_empty() && path.leaf().contains(ctx.exclusion) {
        debug!("skipping excluded subtree `{path}`");
        return Ok(());
    }
    let Some(kind) = ctx.host.kind(path) else {
        warn!("host no longer knows `{path}`; skipping subtree");
        return Ok(());
    };
    let Some(node_id) = ctx.host.node_id(path) else {
        warn!("no node identity behind `{path}`; skipping subtree");
        return Ok(());
    };

    // interactive sessions translate only the camera being looked through
    if kind == NodeKind::Camera && ctx.interactive {
        if let Some(view) = ctx.view_camera {
            if path.leaf() != view && path.sanitized() != view {
                debug!("culling editor camera `{path}`");
                return Ok(());
            }
        }
    }

    let instance_index = ctx.host.instance_index(path);
    let mut record = TranslatedObject::new(path.clone(), node_id, kind);
    record.parent = parent;
    record.instance_index = instance_index;
    record.visible = ctx.host.is_visible(path);
    record.animated = ctx.host.is_animated(path);
    record.motion_blurred = ctx.host.motion_blur_enabled(path);
    record.instancer_connection = ctx.host.has_instancer_connection(path);
    record.instanced = ctx.host.path_count(path) > 1;

    if instance_index > 0 {
        match scene.canonical_by_id.get(&node_id) {
            Some(&original) => record.original_object = Some(original),
            None => {
                warn!("instance `{path}` precedes its canonical object; skipping subtree");
                return Ok(());
            }
        }
    }

    let children = ctx.host.children(path);
    let has_light_child = kind == NodeKind::Transform
        && children
            .iter()
            .any(|child| ctx.host.kind(child) == Some(NodeKind::Light));

    // attribute snapshot, derived from the parent's before boundary promotion
    let mut attrs = ObjectAttributes::inherited(parent_attrs);
    attrs.has_instancer_connection |= record.instancer_connection;
    if kind == NodeKind::Transform {
        attrs.accumulated_local = parent_attrs.accumulated_local * ctx.host.local_transform(path);
    }
    let boundary = assembly::needs_own_assembly(&record, has_light_child, ctx.interactive)
        || attrs.has_instancer_connection;

    let handle = scene.insert(record);
    if boundary {
        attrs.promote_to_boundary(handle);
    }
    if let Some(obj) = scene.arena.get_mut(handle.key()) {
        obj.attributes = attrs.clone();
    }
    if instance_index == 0 {
        scene.canonical_by_id.insert(node_id, handle);
    }
    scene.by_path.insert(path.clone(), handle);

    match kind {
        NodeKind::World => scene.world = Some(handle),
        NodeKind::Transform | NodeKind::Shape => scene.objects.push(handle),
        NodeKind::Light => scene.lights.push(handle),
        NodeKind::Camera => scene.cameras.push(handle),
        NodeKind::Instancer => scene.instancers.push(handle),
    }
    if let Some(t) = tracker.as_deref_mut() {
        t.register(node_id, handle);
    }

    for child in &children {
        visit(scene, ctx, child, Some(handle), &attrs, tracker.as_deref_mut())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Mat4, Mat4Ext, Vec3};
    use crate::host::memory::MemoryScene;
    use approx::assert_relative_eq;

    fn parse(host: &MemoryScene) -> TranslatedScene {
        TranslatedScene::parse(host, &RenderSettings::default(), false, None).unwrap()
    }

    #[test]
    fn test_world_root_is_a_boundary() {
        let host = MemoryScene::new();
        let scene = parse(&host);
        let world = scene.world().unwrap();
        let record = scene.object(world).unwrap();
        assert!(record.attributes.needs_own_assembly);
        assert_eq!(record.attributes.assembly_anchor, Some(world));
    }

    #[test]
    fn test_static_chain_accumulates_into_world_assembly() {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let a = host.add_transform(&world, "a");
        let b = host.add_transform(&a, "b");
        let mesh = host.add_shape(&b, "mesh");
        host.set_local(&a, Mat4::new_translation(&Vec3::new(1.0, 0.0, 0.0)));
        host.set_local(&b, Mat4::new_translation(&Vec3::new(0.0, 2.0, 0.0)));

        let scene = parse(&host);
        let record = scene.object(scene.handle_at(&mesh).unwrap()).unwrap();
        // nothing in the chain is animated or instanced, so the anchor stays
        // at the world root and the accumulated matrix composes a then b
        assert_eq!(record.attributes.assembly_anchor, scene.world());
        let acc = record.attributes.accumulated_local.translation_part();
        assert_relative_eq!(acc.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(acc.y, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_animated_transform_becomes_a_boundary() {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let a = host.add_transform(&world, "a");
        let b = host.add_transform(&a, "b");
        let mesh = host.add_shape(&b, "mesh");
        host.set_animated(&a, true);
        host.set_local(&b, Mat4::new_translation(&Vec3::new(0.0, 3.0, 0.0)));

        let scene = parse(&host);
        let a_handle = scene.handle_at(&a).unwrap();
        let a_record = scene.object(a_handle).unwrap();
        assert!(a_record.attributes.needs_own_assembly);
        assert_eq!(a_record.attributes.accumulated_local, Mat4::identity());

        // b and the mesh anchor at a; their accumulated matrix restarts there
        let mesh_record = scene.object(scene.handle_at(&mesh).unwrap()).unwrap();
        assert_eq!(mesh_record.attributes.assembly_anchor, Some(a_handle));
        assert_relative_eq!(
            mesh_record.attributes.accumulated_local.translation_part().y,
            3.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_interactive_mode_gives_every_transform_a_boundary() {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let a = host.add_transform(&world, "a");
        let b = host.add_transform(&a, "b");

        let scene = TranslatedScene::parse(&host, &RenderSettings::default(), true, None).unwrap();
        for path in [&a, &b] {
            let record = scene.object(scene.handle_at(path).unwrap()).unwrap();
            assert!(record.attributes.needs_own_assembly, "{path} should be a boundary");
        }
    }

    #[test]
    fn test_instance_resolves_to_canonical_record() {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let a = host.add_transform(&world, "a");
        let b = host.add_transform(&world, "b");
        let mesh = host.add_shape(&a, "mesh");
        let copy = host.add_instance(&mesh, &b);

        let scene = parse(&host);
        let canonical = scene.handle_at(&mesh).unwrap();
        let instance = scene.object(scene.handle_at(&copy).unwrap()).unwrap();
        assert_eq!(instance.instance_index, 1);
        assert_eq!(instance.original_object, Some(canonical));
        // the canonical record itself never resolves through another object
        assert!(scene.object(canonical).unwrap().original_object.is_none());
    }

    #[test]
    fn test_exclusion_pattern_skips_subtree() {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let ball = host.add_transform(&world, "shaderBall");
        host.add_shape(&ball, "ballShape");
        let keep = host.add_transform(&world, "keep");
        host.add_shape(&keep, "keepShape");

        let scene = parse(&host);
        assert!(scene.handle_at(&ball).is_none());
        assert!(scene.handle_at(&ball.join("ballShape")).is_none());
        assert!(scene.handle_at(&keep).is_some());
        assert_eq!(scene.objects().len(), 2);
    }

    #[test]
    fn test_light_transform_becomes_a_boundary() {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let rig = host.add_transform(&world, "rig");
        host.add_light(&rig, "key");

        let scene = parse(&host);
        let record = scene.object(scene.handle_at(&rig).unwrap()).unwrap();
        assert!(record.attributes.needs_own_assembly);
    }

    #[test]
    fn test_instancer_connected_node_and_descendants_are_boundaries() {
        let mut host = MemoryScene::new();
        let world = NodePath::world();
        let seed = host.add_transform(&world, "seed");
        let mesh = host.add_shape(&seed, "mesh");
        host.set_instancer_connection(&seed, true);

        let scene = parse(&host);
        let seed_record = scene.object(scene.handle_at(&seed).unwrap()).unwrap();
        assert!(seed_record.attributes.needs_own_assembly);
        // the flag inherits, so the shape below is promoted too
        let mesh_record = scene.object(scene.handle_at(&mesh).unwrap()).unwrap();
        assert!(mesh_record.attributes.has_instancer_connection);
        assert!(mesh_record.attributes.needs_own_assembly);
    }
}
