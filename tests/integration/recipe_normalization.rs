//! Recipe graph scenarios: canonical ordering, stable text and digest,
//! and the resolution predicate.

use arcs_recipe::{Direction, Fate, HandleType, Recipe, ResolutionOptions};
use arcs_schema::Schema;

fn entity_type() -> HandleType {
    HandleType::Entity(Schema::new(vec!["Thing".to_string()]))
}

/// Two particles P and Q connected through a handle H, plus an
/// interface-typed hosting connection.
fn build() -> Recipe {
    let mut recipe = Recipe::new(Some("PQ".to_string()));
    let h = recipe.add_handle(Fate::Create);
    recipe.handle_mut(h).handle_type = Some(entity_type());
    let host = recipe.add_handle(Fate::Use);
    recipe.handle_mut(host).handle_type =
        Some(HandleType::Interface("HostedParticle".to_string()));
    recipe.handle_mut(host).id = Some("host0".to_string());

    let p = recipe.add_particle("P");
    let q = recipe.add_particle("Q");
    recipe.connect(p, "hosted", Direction::Hosts, Some(host));
    recipe.connect(p, "output", Direction::Writes, Some(h));
    recipe.connect(q, "input", Direction::Reads, Some(h));
    recipe
}

#[test]
fn interface_connections_order_last_and_text_is_stable() {
    let frozen = build().normalize().unwrap();

    // Every interface-typed connection sorts after every data connection,
    // globally and per particle.
    for particle in frozen.particles() {
        let mut seen_interface = false;
        for &connection in &particle.connections {
            let connection = frozen.handle_connection(connection);
            if connection.is_interface_typed() {
                seen_interface = true;
            } else {
                assert!(
                    !seen_interface,
                    "data connection after an interface connection"
                );
            }
        }
    }

    // The textual form is deterministic across runs.
    let again = build().normalize().unwrap();
    assert_eq!(frozen.to_canonical_string(), again.to_canonical_string());
    assert_eq!(frozen.digest(), again.digest());
}

#[test]
fn resolution_requires_fates_and_bound_connections() {
    let frozen = build().normalize().unwrap();
    assert!(frozen.is_resolved());

    // An unknown fate breaks resolution.
    let mut unfated = build();
    let h = unfated.add_handle(Fate::Unknown);
    unfated.handle_mut(h).handle_type = Some(entity_type());
    unfated.handle_mut(h).id = Some("idx".to_string());
    let p = unfated.add_particle("R");
    unfated.connect(p, "data", Direction::Reads, Some(h));
    assert!(!unfated.normalize().unwrap().is_resolved());

    // An unbound connection breaks resolution.
    let mut unbound = build();
    let p = unbound.add_particle("R");
    unbound.connect(p, "data", Direction::Reads, None);
    assert!(!unbound.normalize().unwrap().is_resolved());
}

#[test]
fn normalization_does_not_mutate_the_source() {
    let recipe = build();
    let before = recipe.clone();
    let _ = recipe.normalize().unwrap();
    assert_eq!(recipe, before);
}

#[test]
fn digest_tracks_structure_not_build_order() {
    // The same graph built in a different insertion order normalizes to
    // the same canonical text.
    let mut reordered = Recipe::new(Some("PQ".to_string()));
    let host = reordered.add_handle(Fate::Use);
    reordered.handle_mut(host).handle_type =
        Some(HandleType::Interface("HostedParticle".to_string()));
    reordered.handle_mut(host).id = Some("host0".to_string());
    let h = reordered.add_handle(Fate::Create);
    reordered.handle_mut(h).handle_type = Some(entity_type());

    let q = reordered.add_particle("Q");
    let p = reordered.add_particle("P");
    reordered.connect(q, "input", Direction::Reads, Some(h));
    reordered.connect(p, "output", Direction::Writes, Some(h));
    reordered.connect(p, "hosted", Direction::Hosts, Some(host));

    assert_eq!(
        build().normalize().unwrap().digest(),
        reordered.normalize().unwrap().digest()
    );
}

#[test]
fn orphan_slots_are_lenient_by_default() {
    let mut recipe = build();
    recipe.add_slot("floating");
    let frozen = recipe.normalize().unwrap();
    assert!(frozen.is_resolved());
    assert!(!frozen.is_resolved_with(&ResolutionOptions { strict_slots: true }));
}

#[test]
fn clone_preserves_canonical_form() {
    let source = build();
    let (cloned, map) = source.cloned_with_map();
    assert_eq!(map.particles.len(), 2);
    assert_eq!(
        source.normalize().unwrap().digest(),
        cloned.normalize().unwrap().digest()
    );
}
