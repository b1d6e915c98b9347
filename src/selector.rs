//! Type/key selectors: which types and which items an operation covers.

use std::collections::BTreeMap;

use crate::core::Result;
use crate::item::TypeName;
use crate::registry::TypeRegistry;

/// Mapping from type name to the keys selected within it. An empty key
/// list selects every item of the type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    entries: BTreeMap<TypeName, Vec<String>>,
}

impl Selector {
    /// Select every item of the given types.
    pub fn types<I: IntoIterator<Item = TypeName>>(types: I) -> Self {
        Self {
            entries: types.into_iter().map(|t| (t, Vec::new())).collect(),
        }
    }

    /// Select every type the registry marks as retrieved by default.
    pub fn default_types(registry: &TypeRegistry) -> Self {
        Self::types(registry.retrieved_by_default())
    }

    /// Add specific keys for one type. Extends any existing selection.
    #[must_use]
    pub fn with_keys(mut self, type_name: TypeName, keys: impl IntoIterator<Item = String>) -> Self {
        self.entries.entry(type_name).or_default().extend(keys);
        self
    }

    /// The selected types, ordered by name.
    pub fn type_names(&self) -> Vec<TypeName> {
        self.entries.keys().cloned().collect()
    }

    /// Keys selected for a type; `None` means "all keys".
    pub fn keys_for(&self, type_name: &TypeName) -> Option<&[String]> {
        self.entries
            .get(type_name)
            .and_then(|keys| (!keys.is_empty()).then_some(keys.as_slice()))
    }

    /// Whether a (type, key) pair is covered by this selector.
    pub fn covers(&self, type_name: &TypeName, key: &str) -> bool {
        match self.entries.get(type_name) {
            Some(keys) => keys.is_empty() || keys.iter().any(|k| k == key),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail fast on any type name the registry does not know.
    pub fn validate(&self, registry: &TypeRegistry) -> Result<()> {
        for type_name in self.entries.keys() {
            registry.get(type_name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_list_means_all() {
        let t = TypeName::from("dataExtension");
        let selector = Selector::types([t.clone()]);
        assert!(selector.keys_for(&t).is_none());
        assert!(selector.covers(&t, "anything"));
        assert!(!selector.covers(&TypeName::from("query"), "anything"));
    }

    #[test]
    fn explicit_keys_restrict_coverage() {
        let t = TypeName::from("query");
        let selector = Selector::default().with_keys(t.clone(), ["q1".to_string()]);
        assert_eq!(selector.keys_for(&t).unwrap(), ["q1".to_string()]);
        assert!(selector.covers(&t, "q1"));
        assert!(!selector.covers(&t, "q2"));
    }

    #[test]
    fn validation_rejects_unknown_types() {
        let registry = TypeRegistry::builtin();
        let good = Selector::types([TypeName::from("asset")]);
        assert!(good.validate(&registry).is_ok());
        let bad = Selector::types([TypeName::from("nope")]);
        assert!(bad.validate(&registry).is_err());
    }

    #[test]
    fn default_selection_follows_the_registry() {
        let registry = TypeRegistry::builtin();
        let selector = Selector::default_types(&registry);
        assert!(selector.covers(&TypeName::from("dataExtension"), "x"));
        // Fields ride along with their parent extension, never directly.
        assert!(!selector.covers(&TypeName::from("dataExtensionField"), "x"));
    }
}
