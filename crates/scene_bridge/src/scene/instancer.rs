//! Particle-instancer expansion into per-particle proxy records
//!
//! Each expansion throws the previous proxy population away and rebuilds it
//! from a live particle snapshot. Particle birth and death make any retained
//! proxy list stale, so callers must never hold proxy handles across a
//! rebuild.

use std::collections::HashMap;

use crate::foundation::logging::{debug, warn};
use crate::foundation::math::Mat4Ext;
use crate::host::{HostScene, NodePath, ParticleSnapshot};

use super::object::{ObjectHandle, ProxyInfo, TranslatedObject};
use super::{record_push, record_single, TranslatedScene};

/// Rebuild the proxy population from fresh particle snapshots.
///
/// Every live particle produces one proxy per path instanced under it. The
/// proxy's transform is the particle matrix expressed relative to the
/// canonical object's authored placement, so its assembly instance lands
/// where the particle is regardless of where the source geometry sits.
pub(crate) fn expand(scene: &mut TranslatedScene, host: &dyn HostScene) {
    let old = std::mem::take(&mut scene.instancer_elements);
    for handle in old {
        scene.remove(handle);
    }

    let instancer_handles: Vec<ObjectHandle> = scene.instancers.clone();
    for inst in instancer_handles {
        let Some(record) = scene.object(inst) else {
            continue;
        };
        if !record.visible {
            debug!("instancer `{}` is hidden; no proxies", record.path);
            continue;
        }
        let instancer_path = record.path.clone();
        let snapshot = host.particles(&instancer_path);
        for (pid, particle) in snapshot.particles.iter().enumerate() {
            for source in &particle.paths {
                let Some(node_id) = host.node_id(source) else {
                    warn!("instancer `{instancer_path}` references vanished path `{source}`");
                    continue;
                };
                let Some(canonical) = scene.canonical_for(node_id) else {
                    warn!(
                        "instancer `{instancer_path}` references `{source}` which is \
                         not in the translated scene"
                    );
                    continue;
                };
                let Some(canonical_record) = scene.object(canonical) else {
                    continue;
                };
                let canonical_path = canonical_record.path.clone();
                let node_kind = canonical_record.node_kind;
                let mut attributes = canonical_record.attributes.clone();
                attributes.has_instancer_connection = true;
                if let Some(color) = snapshot.color(pid) {
                    attributes.color_override = Some(color);
                }

                let proxy_path = NodePath::new(format!("{}_i_{pid}", canonical_path.as_str()));
                let mut proxy = TranslatedObject::new(proxy_path, node_id, node_kind);
                proxy.original_object = Some(canonical);
                proxy.instance_index = host.instance_index(source);
                proxy.animated = true;
                proxy.instancer_connection = true;
                proxy.attributes = attributes;
                proxy.proxy = Some(ProxyInfo {
                    instancer: instancer_path.clone(),
                    particle_id: pid as u32,
                });

                let origin = host.world_transform(&canonical_path);
                record_single(&mut proxy, origin.inverse_or_identity() * particle.matrix);

                let handle = scene.insert(proxy);
                scene.instancer_elements.push(handle);
            }
        }
    }
}

/// Advance proxy motion for one transform-tagged step.
///
/// The first step of a frame rebuilds the population outright; later steps
/// append one blur sample per proxy from a fresh snapshot. A particle that
/// died between steps simply stops collecting samples.
pub(crate) fn refresh(scene: &mut TranslatedScene, host: &dyn HostScene, first: bool) {
    if scene.instancers.is_empty() {
        return;
    }
    if first {
        expand(scene, host);
        return;
    }

    let mut snapshots: HashMap<NodePath, ParticleSnapshot> = HashMap::new();
    for &inst in &scene.instancers {
        if let Some(record) = scene.object(inst) {
            if record.visible {
                snapshots.insert(record.path.clone(), host.particles(&record.path));
            }
        }
    }

    let elements: Vec<ObjectHandle> = scene.instancer_elements.clone();
    for handle in elements {
        let Some(record) = scene.object(handle) else {
            continue;
        };
        let Some(proxy) = record.proxy.clone() else {
            continue;
        };
        let Some(canonical) = record.original_object else {
            continue;
        };
        let Some(canonical_path) = scene.object(canonical).map(|r| r.path.clone()) else {
            continue;
        };
        let Some(snapshot) = snapshots.get(&proxy.instancer) else {
            continue;
        };
        let Some(particle) = snapshot.particles.get(proxy.particle_id as usize) else {
            debug!(
                "particle {} of `{}` died mid-shutter",
                proxy.particle_id, proxy.instancer
            );
            continue;
        };
        let origin = host.world_transform(&canonical_path);
        let matrix = origin.inverse_or_identity() * particle.matrix;
        if let Some(obj) = scene.object_mut(handle) {
            record_push(obj, matrix);
        }
    }
}
