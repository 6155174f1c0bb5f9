//! Canonical block names. Every cross-block reference goes through here so
//! an entity maps to the same name everywhere in a document.

use std::collections::HashMap;

use handoff_core::slugify;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderIntegrityError {
    #[error("{block} for {entity_id} has no usable name")]
    EmptyName { block: &'static str, entity_id: String },
    #[error("{block} name {name:?} claimed by both {first} and {second}")]
    Collision {
        block: &'static str,
        name: String,
        first: String,
        second: String,
    },
    #[error("{block} {from} references {to}, which is not rendered")]
    DanglingReference {
        block: &'static str,
        from: String,
        to: String,
    },
}

/// Lower-case ASCII with non-alphanumeric runs collapsed to `_`. A leading
/// digit gets a `_` prefix so the result is a valid identifier.
pub fn canonical_name(input: &str) -> String {
    prefix_digit(slugify(input, '_'))
}

/// Joins canonical parts with `__`, a sequence no single slug contains. Any
/// empty part makes the whole name empty.
pub fn composite_name(parts: &[&str]) -> String {
    let slugs: Vec<String> = parts.iter().map(|p| slugify(p, '_')).collect();
    if slugs.iter().any(String::is_empty) {
        return String::new();
    }
    prefix_digit(slugs.join("__"))
}

fn prefix_digit(name: String) -> String {
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{name}")
    } else {
        name
    }
}

/// Hands out block names per block type, refusing to give one name to two
/// entities.
#[derive(Debug, Default)]
pub struct NameRegistry {
    claimed: HashMap<(&'static str, String), String>,
    by_entity: HashMap<(&'static str, String), String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(
        &mut self,
        block: &'static str,
        entity_id: &str,
        name: String,
    ) -> Result<String, RenderIntegrityError> {
        if name.is_empty() {
            return Err(RenderIntegrityError::EmptyName {
                block,
                entity_id: entity_id.to_string(),
            });
        }
        if let Some(existing) = self.by_entity.get(&(block, entity_id.to_string())) {
            return Ok(existing.clone());
        }
        if let Some(owner) = self.claimed.get(&(block, name.clone())) {
            return Err(RenderIntegrityError::Collision {
                block,
                name,
                first: owner.clone(),
                second: entity_id.to_string(),
            });
        }
        self.claimed
            .insert((block, name.clone()), entity_id.to_string());
        self.by_entity
            .insert((block, entity_id.to_string()), name.clone());
        Ok(name)
    }

    /// Claims `preferred` unless another entity already holds it, in which
    /// case `qualified` is claimed instead. Claim order decides who keeps the
    /// plain name, so callers must claim in a stable order.
    pub fn claim_or_qualify(
        &mut self,
        block: &'static str,
        entity_id: &str,
        preferred: String,
        qualified: String,
    ) -> Result<String, RenderIntegrityError> {
        if let Some(existing) = self.lookup(block, entity_id) {
            return Ok(existing.to_string());
        }
        let name = if self.claimed.contains_key(&(block, preferred.clone())) {
            qualified
        } else {
            preferred
        };
        self.claim(block, entity_id, name)
    }

    pub fn lookup(&self, block: &'static str, entity_id: &str) -> Option<&str> {
        self.by_entity
            .get(&(block, entity_id.to_string()))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_are_identifiers() {
        assert_eq!(canonical_name("Site Reliability"), "site_reliability");
        assert_eq!(canonical_name("alice@x.com"), "alice_x_com");
        assert_eq!(canonical_name("24x7 NOC"), "_24x7_noc");
        assert_eq!(canonical_name("***"), "");
    }

    #[test]
    fn composite_names_cannot_be_forged_by_single_slugs() {
        assert_eq!(composite_name(&["SRE", "Primary"]), "sre__primary");
        assert_ne!(composite_name(&["a b", "c"]), composite_name(&["a", "b c"]));
        assert_eq!(composite_name(&["SRE", "!!!"]), "");
    }

    #[test]
    fn distinct_entities_never_share_a_name() {
        let mut names = NameRegistry::new();
        let first = names
            .claim("firehydrant_user", "U1", canonical_name("a.b@x.com"))
            .unwrap();
        assert_eq!(first, "a_b_x_com");

        let err = names
            .claim("firehydrant_user", "U2", canonical_name("a-b@x.com"))
            .unwrap_err();
        assert_eq!(
            err,
            RenderIntegrityError::Collision {
                block: "firehydrant_user",
                name: "a_b_x_com".into(),
                first: "U1".into(),
                second: "U2".into(),
            }
        );
    }

    #[test]
    fn taken_names_fall_back_to_the_qualified_form() {
        let mut names = NameRegistry::new();
        let plain = names
            .claim_or_qualify(
                "firehydrant_on_call_schedule",
                "SA",
                composite_name(&["Platform", "Primary"]),
                composite_name(&["Platform", "Primary", "SA"]),
            )
            .unwrap();
        let qualified = names
            .claim_or_qualify(
                "firehydrant_on_call_schedule",
                "SB",
                composite_name(&["Platform", "Primary"]),
                composite_name(&["Platform", "Primary", "SB"]),
            )
            .unwrap();
        assert_eq!(plain, "platform__primary");
        assert_eq!(qualified, "platform__primary__sb");

        // Only a clash of the qualified name is left to fail.
        let err = names
            .claim_or_qualify(
                "firehydrant_on_call_schedule",
                "sb",
                composite_name(&["Platform", "Primary"]),
                composite_name(&["Platform", "Primary", "sb"]),
            )
            .unwrap_err();
        assert!(matches!(err, RenderIntegrityError::Collision { ref name, .. } if name == "platform__primary__sb"));
    }

    #[test]
    fn same_entity_keeps_its_name_and_block_types_are_separate() {
        let mut names = NameRegistry::new();
        names.claim("firehydrant_team", "T1", "sre".into()).unwrap();
        assert_eq!(
            names.claim("firehydrant_team", "T1", "other".into()).unwrap(),
            "sre"
        );
        names.claim("firehydrant_user", "U1", "sre".into()).unwrap();
        assert_eq!(names.lookup("firehydrant_team", "T1"), Some("sre"));
        assert!(matches!(
            names.claim("firehydrant_team", "T2", String::new()),
            Err(RenderIntegrityError::EmptyName { .. })
        ));
    }
}
