//! Frozen recipes: the immutable, canonically-ordered result of
//! normalization, and the only form resolution code accepts.

use crate::nodes::{
    ConnectionConstraint, Handle, HandleConnection, HandleConnectionIndex, Obligation, Particle,
    Search, Slot, SlotConnection, SlotConnectionIndex,
};
use crate::recipe::Recipe;
use serde::{Deserialize, Serialize};

/// How strictly resolution treats UI composition gaps.
///
/// Orphan slots are invariant violations under strict mode and ignored
/// (after a normalization-time warning) under the default lenient mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionOptions {
    pub strict_slots: bool,
}

/// A normalized recipe. Deeply immutable: there is no mutating API and no
/// way back to the mutable form except cloning into a fresh `Recipe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenRecipe {
    inner: Recipe,
}

impl FrozenRecipe {
    pub(crate) fn from_normalized(inner: Recipe) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.inner.particles
    }

    pub fn handles(&self) -> &[Handle] {
        &self.inner.handles
    }

    pub fn slots(&self) -> &[Slot] {
        &self.inner.slots
    }

    pub fn handle_connection(&self, index: HandleConnectionIndex) -> &HandleConnection {
        &self.inner.handle_connections[index.0]
    }

    pub fn slot_connection(&self, index: SlotConnectionIndex) -> &SlotConnection {
        &self.inner.slot_connections[index.0]
    }

    pub fn connection_constraints(&self) -> &[ConnectionConstraint] {
        &self.inner.connection_constraints
    }

    pub fn obligations(&self) -> &[Obligation] {
        &self.inner.obligations
    }

    pub fn search(&self) -> Option<&Search> {
        self.inner.search.as_ref()
    }

    pub fn verbs(&self) -> &[String] {
        &self.inner.verbs
    }

    pub fn patterns(&self) -> &[String] {
        &self.inner.patterns
    }

    /// Copy this recipe back into a fresh mutable recipe, e.g. as a
    /// starting point for a resolver that wants to bind more nodes.
    pub fn thaw(&self) -> Recipe {
        let mut recipe = Recipe::new(self.inner.name.clone());
        self.inner.copy_into(&mut recipe);
        recipe
    }

    /// The resolution predicate with default (lenient) options.
    pub fn is_resolved(&self) -> bool {
        self.is_resolved_with(&ResolutionOptions::default())
    }

    /// Pure predicate: no obligations, no remaining connection
    /// constraints, search resolved, and every node individually resolved.
    pub fn is_resolved_with(&self, options: &ResolutionOptions) -> bool {
        if !self.inner.obligations.is_empty() || !self.inner.connection_constraints.is_empty() {
            return false;
        }
        if let Some(search) = &self.inner.search {
            if !search.is_resolved() {
                return false;
            }
        }
        if !self.inner.handles.iter().all(Handle::is_resolved) {
            return false;
        }
        if !self
            .inner
            .handle_connections
            .iter()
            .all(HandleConnection::is_resolved)
        {
            return false;
        }
        if !self.inner.particles.iter().all(Particle::is_valid) {
            return false;
        }
        if options.strict_slots {
            if !self
                .inner
                .slot_connections
                .iter()
                .all(SlotConnection::is_resolved)
            {
                return false;
            }
            if self.inner.slots.iter().any(Slot::is_orphan) {
                return false;
            }
        }
        true
    }

    /// The deterministic textual form. Synthetic local names
    /// (`particle0`, `handle0`, `slot0`) are assigned, in arena order,
    /// only to nodes without one.
    pub fn to_canonical_string(&self) -> String {
        let handle_names = assign_names(
            self.inner.handles.iter().map(|h| h.local_name.as_deref()),
            "handle",
        );
        let slot_names = assign_names(
            self.inner.slots.iter().map(|s| s.local_name.as_deref()),
            "slot",
        );
        let particle_names = assign_names(
            self.inner.particles.iter().map(|p| p.local_name.as_deref()),
            "particle",
        );

        let mut out = String::from("recipe");
        if let Some(name) = &self.inner.name {
            out.push(' ');
            out.push_str(name);
        }
        for verb in &self.inner.verbs {
            out.push_str(&format!(" &{verb}"));
        }
        out.push('\n');

        if let Some(search) = &self.inner.search {
            out.push_str(&format!("  search `{}`\n", search.phrase()));
            if !search.unresolved_tokens().is_empty() {
                let tokens: Vec<String> = search
                    .unresolved_tokens()
                    .iter()
                    .map(|t| format!("`{t}`"))
                    .collect();
                out.push_str(&format!("    tokens {}\n", tokens.join(" ")));
            }
        }

        for (at, handle) in self.inner.handles.iter().enumerate() {
            out.push_str(&format!("  {}: {}", handle_names[at], handle.fate));
            if let Some(id) = &handle.id {
                out.push_str(&format!(" '{id}'"));
            }
            for tag in &handle.tags {
                out.push_str(&format!(" #{tag}"));
            }
            out.push('\n');
        }

        for (at, slot) in self.inner.slots.iter().enumerate() {
            out.push_str(&format!("  {}: slot", slot_names[at]));
            if let Some(id) = &slot.id {
                out.push_str(&format!(" '{id}'"));
            }
            for tag in &slot.tags {
                out.push_str(&format!(" #{tag}"));
            }
            out.push('\n');
        }

        for (at, particle) in self.inner.particles.iter().enumerate() {
            out.push_str(&format!("  {} as {}", particle.name, particle_names[at]));
            for verb in &particle.verbs {
                out.push_str(&format!(" &{verb}"));
            }
            out.push('\n');
            for &connection in &particle.connections {
                let connection = &self.inner.handle_connections[connection.0];
                let bound = connection
                    .handle
                    .map(|h| handle_names[h.0].clone())
                    .unwrap_or_else(|| "?".to_string());
                out.push_str(&format!(
                    "    {}: {} {bound}\n",
                    connection.name, connection.direction
                ));
            }
            for &connection in &particle.slot_connections {
                let connection = &self.inner.slot_connections[connection.0];
                let bound = connection
                    .target
                    .map(|s| slot_names[s.0].clone())
                    .unwrap_or_else(|| "?".to_string());
                out.push_str(&format!("    {}: consumes {bound}\n", connection.name));
                for &provided in &connection.provided {
                    out.push_str(&format!("      provides {}\n", slot_names[provided.0]));
                }
            }
        }

        for pattern in &self.inner.patterns {
            out.push_str(&format!("  description `{pattern}`\n"));
        }

        out
    }

    /// Stable identity: hex sha256 over the canonical textual form.
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.to_canonical_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for FrozenRecipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

/// Assign display names in arena order, keeping explicit local names and
/// numbering only the anonymous nodes.
fn assign_names<'a, I>(locals: I, prefix: &str) -> Vec<String>
where
    I: Iterator<Item = Option<&'a str>>,
{
    let mut counter = 0;
    locals
        .map(|local| match local {
            Some(name) => name.to_string(),
            None => {
                let name = format!("{prefix}{counter}");
                counter += 1;
                name
            }
        })
        .collect()
}
