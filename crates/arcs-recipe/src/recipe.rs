//! The mutable recipe: arena owner and builder API.

use crate::nodes::{
    ConnectionConstraint, Direction, Fate, Handle, HandleConnection, HandleConnectionIndex,
    HandleIndex, Obligation, Particle, ParticleIndex, Search, Slot, SlotConnection,
    SlotConnectionIndex, SlotIndex,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// A recipe under construction: unordered, freely mutable, shareable only
/// by cloning. `normalize` turns it into a `FrozenRecipe`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub name: Option<String>,
    pub(crate) particles: Vec<Particle>,
    pub(crate) handles: Vec<Handle>,
    pub(crate) slots: Vec<Slot>,
    pub(crate) handle_connections: Vec<HandleConnection>,
    pub(crate) slot_connections: Vec<SlotConnection>,
    pub(crate) connection_constraints: Vec<ConnectionConstraint>,
    pub(crate) obligations: Vec<Obligation>,
    pub(crate) verbs: Vec<String>,
    pub(crate) patterns: Vec<String>,
    pub(crate) search: Option<Search>,
}

/// Mapping from source arena indices to target arena indices recorded
/// while copying one recipe into another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloneMap {
    pub particles: BTreeMap<usize, usize>,
    pub handles: BTreeMap<usize, usize>,
    pub slots: BTreeMap<usize, usize>,
    pub handle_connections: BTreeMap<usize, usize>,
    pub slot_connections: BTreeMap<usize, usize>,
}

/// The sub-ranges of the target's arenas appended by `merge_into`.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub particles: Range<usize>,
    pub handles: Range<usize>,
    pub slots: Range<usize>,
}

impl Recipe {
    /// Create an empty recipe.
    pub fn new(name: Option<String>) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    // -- builders ---------------------------------------------------------

    /// Add a particle by name; returns its index.
    pub fn add_particle(&mut self, name: &str) -> ParticleIndex {
        self.particles.push(Particle {
            name: name.to_string(),
            ..Particle::default()
        });
        ParticleIndex(self.particles.len() - 1)
    }

    /// Add a handle with the given fate; returns its index.
    pub fn add_handle(&mut self, fate: Fate) -> HandleIndex {
        self.handles.push(Handle {
            fate,
            ..Handle::default()
        });
        HandleIndex(self.handles.len() - 1)
    }

    /// Add a slot with the given name; returns its index.
    pub fn add_slot(&mut self, name: &str) -> SlotIndex {
        self.slots.push(Slot {
            name: name.to_string(),
            ..Slot::default()
        });
        SlotIndex(self.slots.len() - 1)
    }

    /// Connect a particle's named connection point to a handle.
    pub fn connect(
        &mut self,
        particle: ParticleIndex,
        name: &str,
        direction: Direction,
        handle: Option<HandleIndex>,
    ) -> HandleConnectionIndex {
        self.handle_connections.push(HandleConnection {
            name: name.to_string(),
            direction,
            particle,
            handle,
            declared_type: None,
        });
        let index = HandleConnectionIndex(self.handle_connections.len() - 1);
        self.particles[particle.0].connections.push(index);
        if let Some(handle) = handle {
            self.handles[handle.0].connections.push(index);
        }
        index
    }

    /// Connect a particle's named consume point to a slot.
    pub fn connect_slot(
        &mut self,
        particle: ParticleIndex,
        name: &str,
        target: Option<SlotIndex>,
    ) -> SlotConnectionIndex {
        self.slot_connections.push(SlotConnection {
            name: name.to_string(),
            particle,
            target,
            provided: Vec::new(),
        });
        let index = SlotConnectionIndex(self.slot_connections.len() - 1);
        self.particles[particle.0].slot_connections.push(index);
        if let Some(target) = target {
            self.slots[target.0].consume_connections.push(index);
        }
        index
    }

    /// Record that a slot connection provides a slot.
    pub fn provide_slot(&mut self, connection: SlotConnectionIndex, slot: SlotIndex) {
        self.slot_connections[connection.0].provided.push(slot);
        self.slots[slot.0].source_connection = Some(connection);
    }

    /// Add a pre-resolution connection constraint.
    pub fn add_connection_constraint(&mut self, constraint: ConnectionConstraint) {
        self.connection_constraints.push(constraint);
    }

    /// Add an obligation.
    pub fn add_obligation(&mut self, obligation: Obligation) {
        self.obligations.push(obligation);
    }

    /// Attach a search phrase.
    pub fn set_search(&mut self, search: Search) {
        self.search = Some(search);
    }

    /// Add a recipe-level verb.
    pub fn add_verb(&mut self, verb: &str) {
        self.verbs.push(verb.to_string());
    }

    /// Add a description pattern.
    pub fn add_pattern(&mut self, pattern: &str) {
        self.patterns.push(pattern.to_string());
    }

    // -- accessors --------------------------------------------------------

    pub fn particle(&self, index: ParticleIndex) -> &Particle {
        &self.particles[index.0]
    }

    pub fn particle_mut(&mut self, index: ParticleIndex) -> &mut Particle {
        &mut self.particles[index.0]
    }

    pub fn handle(&self, index: HandleIndex) -> &Handle {
        &self.handles[index.0]
    }

    pub fn handle_mut(&mut self, index: HandleIndex) -> &mut Handle {
        &mut self.handles[index.0]
    }

    pub fn slot(&self, index: SlotIndex) -> &Slot {
        &self.slots[index.0]
    }

    pub fn slot_mut(&mut self, index: SlotIndex) -> &mut Slot {
        &mut self.slots[index.0]
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn handles(&self) -> &[Handle] {
        &self.handles
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn search(&self) -> Option<&Search> {
        self.search.as_ref()
    }

    pub fn search_mut(&mut self) -> Option<&mut Search> {
        self.search.as_mut()
    }

    // -- validity ---------------------------------------------------------

    /// Check structural validity, accumulating problems into the optional
    /// error map. Invalidity never mutates the recipe.
    pub fn is_valid(&self, mut errors: Option<&mut BTreeMap<String, String>>) -> bool {
        let mut ok = true;
        let mut report = |key: String, message: String, errors: &mut Option<&mut BTreeMap<String, String>>| {
            if let Some(map) = errors {
                map.insert(key, message);
            }
        };

        // No duplicate handles by id.
        let mut seen_handle_ids = BTreeMap::new();
        for (at, handle) in self.handles.iter().enumerate() {
            if let Some(id) = &handle.id {
                if let Some(first) = seen_handle_ids.insert(id.clone(), at) {
                    ok = false;
                    report(
                        format!("handle:{at}"),
                        format!("duplicate handle id '{id}' (first at {first})"),
                        &mut errors,
                    );
                }
            }
            if !handle.is_valid() {
                ok = false;
                report(
                    format!("handle:{at}"),
                    "invalid handle".to_string(),
                    &mut errors,
                );
            }
        }

        // No duplicate slots by id.
        let mut seen_slot_ids = BTreeMap::new();
        for (at, slot) in self.slots.iter().enumerate() {
            if let Some(id) = &slot.id {
                if let Some(first) = seen_slot_ids.insert(id.clone(), at) {
                    ok = false;
                    report(
                        format!("slot:{at}"),
                        format!("duplicate slot id '{id}' (first at {first})"),
                        &mut errors,
                    );
                }
            }
        }

        for (at, particle) in self.particles.iter().enumerate() {
            if !particle.is_valid() {
                ok = false;
                report(
                    format!("particle:{at}"),
                    "particle has neither name nor verbs".to_string(),
                    &mut errors,
                );
            }
        }

        for (at, connection) in self.handle_connections.iter().enumerate() {
            if !connection.is_valid() {
                ok = false;
                report(
                    format!("handle-connection:{at}"),
                    "connection has no name".to_string(),
                    &mut errors,
                );
            }
            if connection.particle.0 >= self.particles.len() {
                ok = false;
                report(
                    format!("handle-connection:{at}"),
                    "connection references a particle outside the recipe".to_string(),
                    &mut errors,
                );
            }
            if let Some(handle) = connection.handle {
                if handle.0 >= self.handles.len() {
                    ok = false;
                    report(
                        format!("handle-connection:{at}"),
                        "connection references a handle outside the recipe".to_string(),
                        &mut errors,
                    );
                }
            }
        }

        for (at, connection) in self.slot_connections.iter().enumerate() {
            if !connection.is_valid() {
                ok = false;
                report(
                    format!("slot-connection:{at}"),
                    "slot connection has no name".to_string(),
                    &mut errors,
                );
            }
            if let Some(target) = connection.target {
                if target.0 >= self.slots.len() {
                    ok = false;
                    report(
                        format!("slot-connection:{at}"),
                        "slot connection references a slot outside the recipe".to_string(),
                        &mut errors,
                    );
                }
            }
        }

        if let Some(search) = &self.search {
            if !search.is_valid() {
                ok = false;
                report(
                    "search".to_string(),
                    "search tokens do not partition the phrase".to_string(),
                    &mut errors,
                );
            }
        }

        ok
    }

    // -- copying ----------------------------------------------------------

    /// Copy every node of this recipe into `target`, recording the index
    /// mapping. Search, verbs, and patterns are copied by value; the
    /// target keeps its own search if it already has one.
    pub fn copy_into(&self, target: &mut Recipe) -> CloneMap {
        let particle_offset = target.particles.len();
        let handle_offset = target.handles.len();
        let slot_offset = target.slots.len();
        let handle_connection_offset = target.handle_connections.len();
        let slot_connection_offset = target.slot_connections.len();

        let mut map = CloneMap::default();
        for old in 0..self.particles.len() {
            map.particles.insert(old, old + particle_offset);
        }
        for old in 0..self.handles.len() {
            map.handles.insert(old, old + handle_offset);
        }
        for old in 0..self.slots.len() {
            map.slots.insert(old, old + slot_offset);
        }
        for old in 0..self.handle_connections.len() {
            map.handle_connections
                .insert(old, old + handle_connection_offset);
        }
        for old in 0..self.slot_connections.len() {
            map.slot_connections
                .insert(old, old + slot_connection_offset);
        }

        // Handles and slots carry no cross-arena indices except into the
        // connection arenas, so a fixed-offset rewrite covers everything.
        for handle in &self.handles {
            let mut handle = handle.clone();
            handle.connections = handle
                .connections
                .iter()
                .map(|c| HandleConnectionIndex(c.0 + handle_connection_offset))
                .collect();
            target.handles.push(handle);
        }
        for slot in &self.slots {
            let mut slot = slot.clone();
            slot.source_connection = slot
                .source_connection
                .map(|c| SlotConnectionIndex(c.0 + slot_connection_offset));
            slot.consume_connections = slot
                .consume_connections
                .iter()
                .map(|c| SlotConnectionIndex(c.0 + slot_connection_offset))
                .collect();
            target.slots.push(slot);
        }
        for particle in &self.particles {
            let mut particle = particle.clone();
            particle.connections = particle
                .connections
                .iter()
                .map(|c| HandleConnectionIndex(c.0 + handle_connection_offset))
                .collect();
            particle.slot_connections = particle
                .slot_connections
                .iter()
                .map(|c| SlotConnectionIndex(c.0 + slot_connection_offset))
                .collect();
            target.particles.push(particle);
        }
        for connection in &self.handle_connections {
            let mut connection = connection.clone();
            connection.particle = ParticleIndex(connection.particle.0 + particle_offset);
            connection.handle = connection.handle.map(|h| HandleIndex(h.0 + handle_offset));
            target.handle_connections.push(connection);
        }
        for connection in &self.slot_connections {
            let mut connection = connection.clone();
            connection.particle = ParticleIndex(connection.particle.0 + particle_offset);
            connection.target = connection.target.map(|s| SlotIndex(s.0 + slot_offset));
            connection.provided = connection
                .provided
                .iter()
                .map(|s| SlotIndex(s.0 + slot_offset))
                .collect();
            target.slot_connections.push(connection);
        }

        let remap_endpoint = |endpoint: &crate::nodes::EndPoint| match endpoint {
            crate::nodes::EndPoint::Particle {
                particle,
                connection,
            } => crate::nodes::EndPoint::Particle {
                particle: ParticleIndex(particle.0 + particle_offset),
                connection: connection.clone(),
            },
            crate::nodes::EndPoint::Handle(handle) => {
                crate::nodes::EndPoint::Handle(HandleIndex(handle.0 + handle_offset))
            }
            crate::nodes::EndPoint::Tag(tag) => crate::nodes::EndPoint::Tag(tag.clone()),
        };
        for constraint in &self.connection_constraints {
            target.connection_constraints.push(ConnectionConstraint {
                from: remap_endpoint(&constraint.from),
                to: remap_endpoint(&constraint.to),
                direction: constraint.direction,
            });
        }
        for obligation in &self.obligations {
            target.obligations.push(Obligation {
                from: remap_endpoint(&obligation.from),
                to: remap_endpoint(&obligation.to),
                direction: obligation.direction,
            });
        }

        target.verbs.extend(self.verbs.iter().cloned());
        target.patterns.extend(self.patterns.iter().cloned());
        if target.search.is_none() {
            target.search = self.search.clone();
        }

        map
    }

    /// Append this recipe's nodes to `target`, returning the appended
    /// arena ranges.
    pub fn merge_into(&self, target: &mut Recipe) -> MergeResult {
        let particles_start = target.particles.len();
        let handles_start = target.handles.len();
        let slots_start = target.slots.len();
        self.copy_into(target);
        MergeResult {
            particles: particles_start..target.particles.len(),
            handles: handles_start..target.handles.len(),
            slots: slots_start..target.slots.len(),
        }
    }

    /// Deep-copy this recipe, returning the copy and the index mapping.
    pub fn cloned_with_map(&self) -> (Recipe, CloneMap) {
        let mut copy = Recipe::new(self.name.clone());
        let map = self.copy_into(&mut copy);
        (copy, map)
    }
}
