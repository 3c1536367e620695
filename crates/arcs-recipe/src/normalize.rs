//! Recipe normalization: deterministic canonical ordering plus freeze.
//!
//! Normalization never mutates the source recipe. It validates, clones,
//! canonicalizes node-local state, computes the canonical order of every
//! arena, rewrites all indices, and seals the result as a `FrozenRecipe`.
//! Because the output is a distinct type, re-normalization is
//! unrepresentable and freezing is terminal.

use crate::frozen::FrozenRecipe;
use crate::nodes::{EndPoint, HandleConnectionIndex, HandleIndex, ParticleIndex, SlotConnectionIndex, SlotIndex};
use crate::recipe::Recipe;
use crate::{RecipeError, RecipeResult};
use log::warn;
use std::cmp::Ordering;
use std::collections::BTreeMap;

impl Recipe {
    /// Normalize into a frozen, canonically-ordered recipe.
    ///
    /// Refuses (leaving `self` untouched) when the recipe is invalid; the
    /// error carries the per-node problem map.
    pub fn normalize(&self) -> RecipeResult<FrozenRecipe> {
        let mut errors = BTreeMap::new();
        if !self.is_valid(Some(&mut errors)) {
            return Err(RecipeError::Invalid(errors));
        }

        let mut recipe = self.clone();

        // Node-local canonicalization.
        for handle in &mut recipe.handles {
            handle.tags.sort();
            handle.tags.dedup();
        }
        for slot in &mut recipe.slots {
            slot.tags.sort();
            slot.tags.dedup();
        }
        for particle in &mut recipe.particles {
            particle.verbs.sort();
            particle.verbs.dedup();
        }
        recipe.verbs.sort();
        recipe.verbs.dedup();
        recipe.patterns.sort();
        recipe.patterns.dedup();
        if let Some(search) = &mut recipe.search {
            search.normalize();
        }

        for (at, slot) in recipe.slots.iter().enumerate() {
            if slot.is_orphan() {
                warn!("recipe {:?} slot {at} is an orphan", recipe.name);
            }
        }

        // Canonical order of the connection arenas.
        let mut hc_order: Vec<usize> = (0..recipe.handle_connections.len()).collect();
        hc_order.sort_by(|&a, &b| compare_handle_connections(&recipe, a, b));
        let mut sc_order: Vec<usize> = (0..recipe.slot_connections.len()).collect();
        sc_order.sort_by(|&a, &b| compare_slot_connections(&recipe, a, b));

        // Particles by first appearance in the sorted connection lists;
        // orphans appended by comparator.
        let mut particle_order: Vec<usize> = Vec::new();
        for &c in &hc_order {
            push_unique(&mut particle_order, recipe.handle_connections[c].particle.0);
        }
        for &c in &sc_order {
            push_unique(&mut particle_order, recipe.slot_connections[c].particle.0);
        }
        let mut particle_orphans: Vec<usize> = (0..recipe.particles.len())
            .filter(|p| !particle_order.contains(p))
            .collect();
        particle_orphans.sort_by(|&a, &b| compare_particles(&recipe, a, b));
        particle_order.extend(particle_orphans);

        // Handles analogously.
        let mut handle_order: Vec<usize> = Vec::new();
        for &c in &hc_order {
            if let Some(handle) = recipe.handle_connections[c].handle {
                push_unique(&mut handle_order, handle.0);
            }
        }
        let mut handle_orphans: Vec<usize> = (0..recipe.handles.len())
            .filter(|h| !handle_order.contains(h))
            .collect();
        handle_orphans.sort_by(|&a, &b| compare_handles(&recipe, a, b));
        handle_order.extend(handle_orphans);

        // Slots: consumed slots in connection order, each connection's
        // provided slots following it.
        let mut slot_order: Vec<usize> = Vec::new();
        for &c in &sc_order {
            let connection = &recipe.slot_connections[c];
            if let Some(target) = connection.target {
                push_unique(&mut slot_order, target.0);
            }
            for provided in &connection.provided {
                push_unique(&mut slot_order, provided.0);
            }
        }
        let mut slot_orphans: Vec<usize> = (0..recipe.slots.len())
            .filter(|s| !slot_order.contains(s))
            .collect();
        slot_orphans.sort_by(|&a, &b| compare_slots(&recipe, a, b));
        slot_order.extend(slot_orphans);

        // Rebuild every arena in canonical order and rewrite indices.
        let (particles, particle_remap) = permute(&recipe.particles, &particle_order);
        let (handles, handle_remap) = permute(&recipe.handles, &handle_order);
        let (slots, slot_remap) = permute(&recipe.slots, &slot_order);
        let (handle_connections, hc_remap) = permute(&recipe.handle_connections, &hc_order);
        let (slot_connections, sc_remap) = permute(&recipe.slot_connections, &sc_order);

        recipe.particles = particles;
        recipe.handles = handles;
        recipe.slots = slots;
        recipe.handle_connections = handle_connections;
        recipe.slot_connections = slot_connections;

        for particle in &mut recipe.particles {
            for connection in &mut particle.connections {
                *connection = HandleConnectionIndex(hc_remap[connection.0]);
            }
            particle.connections.sort();
            for connection in &mut particle.slot_connections {
                *connection = SlotConnectionIndex(sc_remap[connection.0]);
            }
            particle.slot_connections.sort();
        }
        for handle in &mut recipe.handles {
            for connection in &mut handle.connections {
                *connection = HandleConnectionIndex(hc_remap[connection.0]);
            }
            handle.connections.sort();
        }
        for slot in &mut recipe.slots {
            if let Some(source) = &mut slot.source_connection {
                *source = SlotConnectionIndex(sc_remap[source.0]);
            }
            for connection in &mut slot.consume_connections {
                *connection = SlotConnectionIndex(sc_remap[connection.0]);
            }
            slot.consume_connections.sort();
        }
        for connection in &mut recipe.handle_connections {
            connection.particle = ParticleIndex(particle_remap[connection.particle.0]);
            connection.handle = connection.handle.map(|h| HandleIndex(handle_remap[h.0]));
        }
        for connection in &mut recipe.slot_connections {
            connection.particle = ParticleIndex(particle_remap[connection.particle.0]);
            connection.target = connection.target.map(|s| SlotIndex(slot_remap[s.0]));
            for provided in &mut connection.provided {
                *provided = SlotIndex(slot_remap[provided.0]);
            }
        }
        let remap_endpoint = |endpoint: &mut EndPoint| match endpoint {
            EndPoint::Particle { particle, .. } => {
                *particle = ParticleIndex(particle_remap[particle.0]);
            }
            EndPoint::Handle(handle) => *handle = HandleIndex(handle_remap[handle.0]),
            EndPoint::Tag(_) => {}
        };
        for constraint in &mut recipe.connection_constraints {
            remap_endpoint(&mut constraint.from);
            remap_endpoint(&mut constraint.to);
        }
        for obligation in &mut recipe.obligations {
            remap_endpoint(&mut obligation.from);
            remap_endpoint(&mut obligation.to);
        }

        Ok(FrozenRecipe::from_normalized(recipe))
    }
}

fn push_unique(order: &mut Vec<usize>, value: usize) {
    if !order.contains(&value) {
        order.push(value);
    }
}

/// Rebuild `items` following `order` (order[new] = old) and return the
/// old-to-new index map alongside.
fn permute<T: Clone>(items: &[T], order: &[usize]) -> (Vec<T>, Vec<usize>) {
    let new_items: Vec<T> = order.iter().map(|&old| items[old].clone()).collect();
    let mut remap = vec![0; items.len()];
    for (new, &old) in order.iter().enumerate() {
        remap[old] = new;
    }
    (new_items, remap)
}

/// Total order over handle connections. Interface-typed connections sort
/// strictly last so resolver strategies always see a deterministic,
/// data-first view.
fn compare_handle_connections(recipe: &Recipe, a: usize, b: usize) -> Ordering {
    let ca = &recipe.handle_connections[a];
    let cb = &recipe.handle_connections[b];
    ca.is_interface_typed()
        .cmp(&cb.is_interface_typed())
        .then_with(|| ca.name.cmp(&cb.name))
        .then_with(|| {
            recipe.particles[ca.particle.0]
                .name
                .cmp(&recipe.particles[cb.particle.0].name)
        })
        .then_with(|| handle_sort_key(recipe, ca.handle).cmp(&handle_sort_key(recipe, cb.handle)))
        .then_with(|| a.cmp(&b))
}

fn handle_sort_key(
    recipe: &Recipe,
    handle: Option<HandleIndex>,
) -> (bool, Option<String>, Option<String>, usize) {
    match handle {
        // Unbound connections sort before bound ones with equal names.
        None => (false, None, None, 0),
        Some(handle) => {
            let node = &recipe.handles[handle.0];
            (true, node.id.clone(), node.local_name.clone(), handle.0)
        }
    }
}

fn compare_slot_connections(recipe: &Recipe, a: usize, b: usize) -> Ordering {
    let ca = &recipe.slot_connections[a];
    let cb = &recipe.slot_connections[b];
    ca.name
        .cmp(&cb.name)
        .then_with(|| {
            recipe.particles[ca.particle.0]
                .name
                .cmp(&recipe.particles[cb.particle.0].name)
        })
        .then_with(|| a.cmp(&b))
}

fn compare_particles(recipe: &Recipe, a: usize, b: usize) -> Ordering {
    let pa = &recipe.particles[a];
    let pb = &recipe.particles[b];
    pa.name
        .cmp(&pb.name)
        .then_with(|| pa.local_name.cmp(&pb.local_name))
        .then_with(|| a.cmp(&b))
}

fn compare_handles(recipe: &Recipe, a: usize, b: usize) -> Ordering {
    let ha = &recipe.handles[a];
    let hb = &recipe.handles[b];
    ha.id
        .cmp(&hb.id)
        .then_with(|| ha.local_name.cmp(&hb.local_name))
        .then_with(|| ha.tags.cmp(&hb.tags))
        .then_with(|| a.cmp(&b))
}

fn compare_slots(recipe: &Recipe, a: usize, b: usize) -> Ordering {
    let sa = &recipe.slots[a];
    let sb = &recipe.slots[b];
    sa.id
        .cmp(&sb.id)
        .then_with(|| sa.local_name.cmp(&sb.local_name))
        .then_with(|| sa.name.cmp(&sb.name))
        .then_with(|| a.cmp(&b))
}
