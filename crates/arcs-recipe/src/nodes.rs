//! Recipe node types.
//!
//! Nodes are plain data addressed by index into the owning recipe's
//! arenas. None of them carry back-references to the recipe; the recipe is
//! the single owner and the only place edges are recorded.

use arcs_schema::Schema;
use serde::{Deserialize, Serialize};

macro_rules! index_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub usize);

        impl $name {
            pub fn index(&self) -> usize {
                self.0
            }
        }
    };
}

index_newtype!(
    /// Index of a particle in its recipe's arena.
    ParticleIndex
);
index_newtype!(
    /// Index of a handle in its recipe's arena.
    HandleIndex
);
index_newtype!(
    /// Index of a slot in its recipe's arena.
    SlotIndex
);
index_newtype!(
    /// Index of a handle connection in its recipe's arena.
    HandleConnectionIndex
);
index_newtype!(
    /// Index of a slot connection in its recipe's arena.
    SlotConnectionIndex
);

/// A handle's acquisition intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Fate {
    /// Not yet decided; resolvers must assign one.
    #[default]
    Unknown,
    Use,
    Map,
    Copy,
    Create,
}

impl std::fmt::Display for Fate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fate::Unknown => write!(f, "?"),
            Fate::Use => write!(f, "use"),
            Fate::Map => write!(f, "map"),
            Fate::Copy => write!(f, "copy"),
            Fate::Create => write!(f, "create"),
        }
    }
}

/// Data-flow direction of a handle connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Reads,
    Writes,
    ReadsWrites,
    Hosts,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Reads => write!(f, "reads"),
            Direction::Writes => write!(f, "writes"),
            Direction::ReadsWrites => write!(f, "reads writes"),
            Direction::Hosts => write!(f, "hosts"),
        }
    }
}

/// The type carried by a handle or declared on a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HandleType {
    /// A single entity of the given schema.
    Entity(Schema),
    /// A collection of the inner type.
    CollectionOf(Box<HandleType>),
    /// A reference to the inner type.
    Reference(Box<HandleType>),
    /// A particle interface, named by its signature hash.
    Interface(String),
}

impl HandleType {
    /// True when the type bottoms out in an interface. Interface-typed
    /// connections sort last during normalization so resolver strategies
    /// see data connections first.
    pub fn is_interface(&self) -> bool {
        match self {
            HandleType::Entity(_) => false,
            HandleType::CollectionOf(inner) | HandleType::Reference(inner) => inner.is_interface(),
            HandleType::Interface(_) => true,
        }
    }

    /// Short display tag used by the pretty-printer.
    pub fn tag(&self) -> String {
        match self {
            HandleType::Entity(schema) => {
                let mut names = schema.names.clone();
                names.sort();
                names.join(" ")
            }
            HandleType::CollectionOf(inner) => format!("[{}]", inner.tag()),
            HandleType::Reference(inner) => format!("&{}", inner.tag()),
            HandleType::Interface(name) => format!("hosts {name}"),
        }
    }
}

/// A particle node: a named computation with connection endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub name: String,
    pub local_name: Option<String>,
    pub verbs: Vec<String>,
    /// Handle connections owned by this particle, in canonical order after
    /// normalization.
    pub connections: Vec<HandleConnectionIndex>,
    /// Slot connections owned by this particle.
    pub slot_connections: Vec<SlotConnectionIndex>,
}

impl Particle {
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() || !self.verbs.is_empty()
    }
}

/// A handle node: a typed, fated reference to a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Handle {
    pub id: Option<String>,
    pub local_name: Option<String>,
    pub tags: Vec<String>,
    pub fate: Fate,
    pub handle_type: Option<HandleType>,
    /// Connections attached to this handle.
    pub connections: Vec<HandleConnectionIndex>,
}

impl Handle {
    pub fn is_valid(&self) -> bool {
        // A created handle needs no id yet; any other fate without an id
        // is still valid pre-resolution, just unresolved.
        true
    }

    /// A handle is resolved when its fate is known, its type is known,
    /// and it is either identified or will be created.
    pub fn is_resolved(&self) -> bool {
        self.fate != Fate::Unknown
            && self.handle_type.is_some()
            && (self.id.is_some() || self.fate == Fate::Create)
    }
}

/// A slot node: a UI-composition point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Option<String>,
    pub local_name: Option<String>,
    pub name: String,
    pub tags: Vec<String>,
    /// The connection providing this slot, if any.
    pub source_connection: Option<SlotConnectionIndex>,
    /// Connections consuming this slot.
    pub consume_connections: Vec<SlotConnectionIndex>,
}

impl Slot {
    pub fn is_valid(&self) -> bool {
        true
    }

    /// A slot with neither a provider nor consumers is an orphan.
    pub fn is_orphan(&self) -> bool {
        self.source_connection.is_none() && self.consume_connections.is_empty()
    }

    pub fn is_resolved(&self) -> bool {
        self.id.is_some() || self.source_connection.is_some()
    }
}

/// An edge from a particle's named connection point to a handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleConnection {
    pub name: String,
    pub direction: Direction,
    pub particle: ParticleIndex,
    pub handle: Option<HandleIndex>,
    /// Type declared by the particle's spec for this connection.
    pub declared_type: Option<HandleType>,
}

impl HandleConnection {
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn is_resolved(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether this connection is interface-typed; such connections sort
    /// last in the canonical order.
    pub fn is_interface_typed(&self) -> bool {
        self.declared_type
            .as_ref()
            .map(HandleType::is_interface)
            .unwrap_or(false)
            || self.direction == Direction::Hosts
    }
}

/// An edge from a particle's named consume point to a slot, possibly
/// providing further slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotConnection {
    pub name: String,
    pub particle: ParticleIndex,
    /// The slot this connection consumes.
    pub target: Option<SlotIndex>,
    /// Slots this connection provides, following it in canonical order.
    pub provided: Vec<SlotIndex>,
}

impl SlotConnection {
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn is_resolved(&self) -> bool {
        self.target.is_some()
    }
}

/// One side of a connection constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EndPoint {
    /// A named connection point on a particle.
    Particle {
        particle: ParticleIndex,
        connection: String,
    },
    /// A specific handle.
    Handle(HandleIndex),
    /// Any handle carrying the tag.
    Tag(String),
}

/// A pre-resolution constraint: some particle endpoint must end up
/// connected to some other endpoint. Resolvers replace constraints with
/// real connections; a resolved recipe has none left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConstraint {
    pub from: EndPoint,
    pub to: EndPoint,
    pub direction: Direction,
}

/// An obligation recorded during merging that must be discharged before
/// the recipe counts as resolved. Shaped like a constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obligation {
    pub from: EndPoint,
    pub to: EndPoint,
    pub direction: Direction,
}

/// A free-text search attached to a recipe, tracked token by token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Search {
    phrase: String,
    unresolved_tokens: Vec<String>,
    resolved_tokens: Vec<String>,
}

impl Search {
    /// Create a search over a phrase; all tokens start unresolved.
    pub fn new(phrase: &str) -> Self {
        let unresolved_tokens = phrase
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        Self {
            phrase: phrase.to_string(),
            unresolved_tokens,
            resolved_tokens: Vec::new(),
        }
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn unresolved_tokens(&self) -> &[String] {
        &self.unresolved_tokens
    }

    pub fn resolved_tokens(&self) -> &[String] {
        &self.resolved_tokens
    }

    /// Mark a token as resolved. Returns false if it was not pending.
    pub fn resolve_token(&mut self, token: &str) -> bool {
        let token = token.to_lowercase();
        match self.unresolved_tokens.iter().position(|t| *t == token) {
            Some(at) => {
                self.unresolved_tokens.remove(at);
                self.resolved_tokens.push(token);
                true
            }
            None => false,
        }
    }

    /// The token lists must exactly partition the phrase.
    pub fn is_valid(&self) -> bool {
        let mut tokens: Vec<String> = self
            .unresolved_tokens
            .iter()
            .chain(self.resolved_tokens.iter())
            .cloned()
            .collect();
        tokens.sort();
        let mut expected: Vec<String> = self
            .phrase
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        expected.sort();
        tokens == expected
    }

    pub fn is_resolved(&self) -> bool {
        self.unresolved_tokens.is_empty()
    }

    /// Canonical ordering of token lists, applied during normalization.
    pub(crate) fn normalize(&mut self) {
        self.unresolved_tokens.sort();
        self.resolved_tokens.sort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcs_schema::Schema;

    #[test]
    fn test_fate_display() {
        assert_eq!(Fate::Unknown.to_string(), "?");
        assert_eq!(Fate::Create.to_string(), "create");
    }

    #[test]
    fn test_handle_type_interface_detection() {
        let entity = HandleType::Entity(Schema::new(vec!["Person".to_string()]));
        assert!(!entity.is_interface());
        assert!(!HandleType::CollectionOf(Box::new(entity.clone())).is_interface());

        let iface = HandleType::Interface("HostedParticle".to_string());
        assert!(iface.is_interface());
        assert!(HandleType::CollectionOf(Box::new(iface)).is_interface());
    }

    #[test]
    fn test_handle_type_tags() {
        let entity = HandleType::Entity(Schema::new(vec!["Person".to_string()]));
        assert_eq!(entity.tag(), "Person");
        assert_eq!(
            HandleType::CollectionOf(Box::new(entity.clone())).tag(),
            "[Person]"
        );
        assert_eq!(HandleType::Reference(Box::new(entity)).tag(), "&Person");
    }

    #[test]
    fn test_handle_resolution() {
        let mut handle = Handle::default();
        assert!(!handle.is_resolved());
        handle.fate = Fate::Create;
        handle.handle_type = Some(HandleType::Entity(Schema::new(vec!["T".to_string()])));
        assert!(handle.is_resolved());
        handle.fate = Fate::Map;
        assert!(!handle.is_resolved());
        handle.id = Some("id0".to_string());
        assert!(handle.is_resolved());
    }

    #[test]
    fn test_search_token_lifecycle() {
        let mut search = Search::new("Find People");
        assert!(search.is_valid());
        assert!(!search.is_resolved());

        assert!(search.resolve_token("FIND"));
        assert!(!search.resolve_token("find"));
        assert!(search.is_valid());
        assert!(!search.is_resolved());

        assert!(search.resolve_token("people"));
        assert!(search.is_resolved());
        assert!(search.is_valid());
    }
}
