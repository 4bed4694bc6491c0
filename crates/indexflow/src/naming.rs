//! Deterministic unique-name allocation.
//!
//! A [`NameRegistry`] hands out names within one namespace: flow names,
//! transient flow names, and the field/collector names of a single flow
//! each get their own registry.

use std::collections::{HashMap, HashSet};

/// Allocates unique names, either explicit or `prefix + N`.
///
/// Explicit names are recorded verbatim and never rejected here, even if
/// they collide with an earlier auto-generated name. Auto-generation skips
/// every name recorded so far.
#[derive(Debug, Default)]
pub struct NameRegistry {
    existing_names: HashSet<String>,
    next_index: HashMap<String, u64>,
}

impl NameRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `explicit` if given, otherwise synthesize the smallest unused
    /// `prefix + N` at or above the last index used for `prefix`.
    pub fn build_name(&mut self, explicit: Option<&str>, prefix: &str) -> String {
        if let Some(name) = explicit {
            self.existing_names.insert(name.to_string());
            tracing::debug!(name, "recorded explicit name");
            return name.to_string();
        }

        let next = self.next_index.entry(prefix.to_string()).or_insert(0);
        loop {
            let candidate = format!("{prefix}{next}");
            *next += 1;
            if self.existing_names.insert(candidate.clone()) {
                tracing::debug!(name = %candidate, "generated name");
                return candidate;
            }
        }
    }

    /// Whether `name` has been recorded.
    pub fn contains(&self, name: &str) -> bool {
        self.existing_names.contains(name)
    }

    /// Number of recorded names.
    pub fn len(&self) -> usize {
        self.existing_names.len()
    }

    /// Returns `true` if no names are recorded.
    pub fn is_empty(&self) -> bool {
        self.existing_names.is_empty()
    }
}

/// Convert a `PascalCase` op kind to `snake_case`, e.g.
/// `SplitRecursively` -> `split_recursively`.
pub fn to_snake_case(kind: &str) -> String {
    let mut out = String::with_capacity(kind.len() + 4);
    for (i, ch) in kind.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Auto-name prefix for nodes produced by an op of `kind`.
pub(crate) fn op_prefix(kind: &str) -> String {
    format!("{}_", to_snake_case(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_name_is_returned_verbatim() {
        let mut names = NameRegistry::new();
        assert_eq!(names.build_name(Some("documents"), "_collector_"), "documents");
        assert!(names.contains("documents"));
    }

    #[test]
    fn generated_names_are_sequential_per_prefix() {
        let mut names = NameRegistry::new();
        assert_eq!(names.build_name(None, "foo"), "foo0");
        assert_eq!(names.build_name(None, "foo"), "foo1");
        assert_eq!(names.build_name(None, "bar"), "bar0");
        assert_eq!(names.build_name(None, "foo"), "foo2");
    }

    #[test]
    fn generation_skips_explicit_names() {
        let mut names = NameRegistry::new();
        names.build_name(Some("foo0"), "x");
        names.build_name(Some("foo2"), "x");

        assert_eq!(names.build_name(None, "foo"), "foo1");
        assert_eq!(names.build_name(None, "foo"), "foo3");
    }

    #[test]
    fn explicit_collision_with_generated_name_is_accepted() {
        let mut names = NameRegistry::new();
        let generated = names.build_name(None, "foo");
        assert_eq!(names.build_name(Some(&generated), "foo"), "foo0");
        assert_eq!(names.len(), 1);
        assert_eq!(names.build_name(None, "foo"), "foo1");
    }

    #[test]
    fn generated_names_never_repeat_recorded_ones() {
        let mut names = NameRegistry::new();
        let mut seen = HashSet::new();
        for i in 0..50 {
            if i % 7 == 0 {
                seen.insert(names.build_name(Some(&format!("p{}", i + 3)), "p"));
            } else {
                let name = names.build_name(None, "p");
                assert!(seen.insert(name), "generated name was already recorded");
            }
        }
    }

    #[test]
    fn snake_case_conversion() {
        assert_eq!(to_snake_case("SplitRecursively"), "split_recursively");
        assert_eq!(to_snake_case("LocalFile"), "local_file");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(op_prefix("SentenceTransformerEmbed"), "sentence_transformer_embed_");
    }
}
