//! # Arcs Recipe Crate
//!
//! A recipe is a static composition artifact: a graph of particles,
//! handles, and slots wired together by connections, plus the constraints
//! and search terms a resolver still has to discharge. Recipes are built
//! mutable, normalized exactly once into a frozen, canonically-ordered
//! form, and only frozen recipes are fed to resolution and strategizer
//! code.
//!
//! Nodes live in arenas owned by the recipe and address each other through
//! stable indices, which keeps the inherently cyclic graph representable
//! without reference counting.

use std::collections::BTreeMap;

pub mod frozen;
pub mod nodes;
pub mod normalize;
pub mod recipe;

pub use frozen::{FrozenRecipe, ResolutionOptions};
pub use nodes::{
    ConnectionConstraint, Direction, EndPoint, Fate, Handle, HandleConnection,
    HandleConnectionIndex, HandleIndex, HandleType, Obligation, Particle, ParticleIndex, Search,
    Slot, SlotConnection, SlotConnectionIndex, SlotIndex,
};
pub use recipe::{CloneMap, MergeResult, Recipe};

/// Errors produced by recipe construction and normalization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecipeError {
    /// Normalization refused; the map carries one entry per offending
    /// node. The original recipe is left unchanged.
    #[error("Recipe is invalid ({} errors)", .0.len())]
    Invalid(BTreeMap<String, String>),

    /// An index referred to a node outside its arena.
    #[error("Dangling node index: {0}")]
    DanglingIndex(String),
}

/// Result type for recipe operations.
pub type RecipeResult<T> = Result<T, RecipeError>;
