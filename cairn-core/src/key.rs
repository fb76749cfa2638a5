//! Deterministic cache key construction.
//!
//! Keys are colon-delimited: `keyspace:class:component:...`. Literal colons
//! inside a component are escaped as `%3A`, and every space in the finished
//! key becomes `_`. The mapping is one-way; keys are never parsed back.

/// Keyspace used by [`KeyBuilder::make_global_key`].
pub const GLOBAL_KEYSPACE: &str = "global";

/// Key class for the chunks of a segmented value.
pub const SEGMENT_CLASS: &str = "segment";

/// Escaped form of a colon inside a key component.
const ESCAPED_COLON: &str = "%3A";

/// Builds keys scoped to one keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyBuilder {
    keyspace: String,
}

impl KeyBuilder {
    /// Create a key builder for the given keyspace.
    pub fn new(keyspace: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
        }
    }

    /// The keyspace used by [`make_key`](Self::make_key).
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// Make a key scoped to this builder's keyspace.
    pub fn make_key(&self, class: &str, components: &[&str]) -> String {
        make_key_internal(&self.keyspace, class, components)
    }

    /// Make a key in the shared `global` keyspace.
    pub fn make_global_key(&self, class: &str, components: &[&str]) -> String {
        make_key_internal(GLOBAL_KEYSPACE, class, components)
    }

    /// Key of one chunk of the segmented value stored under `key`.
    pub fn segment_key(&self, key: &str, segment_hash: &str) -> String {
        self.make_global_key(SEGMENT_CLASS, &[key, segment_hash])
    }
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new("local")
    }
}

fn make_key_internal(keyspace: &str, class: &str, components: &[&str]) -> String {
    let mut key = String::from(keyspace);
    for part in std::iter::once(&class).chain(components.iter()) {
        key.push(':');
        key.push_str(&part.replace(':', ESCAPED_COLON));
    }
    key.replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_make_key_uses_keyspace() {
        let keys = KeyBuilder::new("enwiki");
        assert_eq!(keys.make_key("page", &["42", "rev"]), "enwiki:page:42:rev");
    }

    #[test]
    fn test_make_global_key_ignores_keyspace() {
        let keys = KeyBuilder::new("enwiki");
        assert_eq!(keys.make_global_key("user", &["7"]), "global:user:7");
    }

    #[test]
    fn test_colons_are_escaped_and_spaces_normalized() {
        let keys = KeyBuilder::new("local");
        assert_eq!(
            keys.make_key("title", &["Talk:Main Page"]),
            "local:title:Talk%3AMain_Page"
        );
    }

    #[test]
    fn test_keyspace_spaces_are_normalized() {
        let keys = KeyBuilder::new("my wiki");
        assert_eq!(keys.make_key("a", &[]), "my_wiki:a");
    }

    #[test]
    fn test_segment_key_layout() {
        let keys = KeyBuilder::default();
        assert_eq!(
            keys.segment_key("local:blob:1", "abcd"),
            "global:segment:local%3Ablob%3A1:abcd"
        );
    }

    proptest! {
        /// Escaped components never introduce extra delimiters.
        #[test]
        fn prop_component_count_is_stable(
            parts in proptest::collection::vec("[a-z: ]{0,8}", 0..5),
        ) {
            let keys = KeyBuilder::new("ks");
            let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
            let key = keys.make_key("class", &refs);
            prop_assert_eq!(key.matches(':').count(), parts.len() + 1);
            prop_assert!(!key.contains(' '));
        }
    }
}
