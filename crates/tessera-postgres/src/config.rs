//! Engine configuration.

use heck::{ToKebabCase, ToLowerCamelCase, ToSnakeCase};
use serde::Deserialize;

/// Default upper bound of ids bound into one batched IN clause.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Casing of attribute and relationship member names in response documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberCase {
    #[default]
    Snake,
    Kebab,
    Camel,
}

impl MemberCase {
    pub fn apply(&self, name: &str) -> String {
        match self {
            MemberCase::Snake => name.to_snake_case(),
            MemberCase::Kebab => name.to_kebab_case(),
            MemberCase::Camel => name.to_lower_camel_case(),
        }
    }
}

/// Configuration for query orchestration and document assembly.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of parent ids per batched included-resource query
    pub chunk_size: usize,
    /// Run the chunk queries of one relationship concurrently
    pub parallel_chunks: bool,
    pub member_case: MemberCase,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallel_chunks: false,
            member_case: MemberCase::Snake,
        }
    }
}

impl EngineConfig {
    /// Chunk size clamped to at least one id.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_size, 10_000);
        assert!(!config.parallel_chunks);
        assert_eq!(config.member_case, MemberCase::Snake);
    }

    #[test]
    fn test_engine_config_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"member_case": "kebab", "chunk_size": 0}"#).unwrap();
        assert_eq!(config.member_case, MemberCase::Kebab);
        assert!(!config.parallel_chunks);
        assert_eq!(config.effective_chunk_size(), 1);
    }

    #[test]
    fn test_member_case() {
        assert_eq!(MemberCase::Snake.apply("article_count"), "article_count");
        assert_eq!(MemberCase::Kebab.apply("article_count"), "article-count");
        assert_eq!(MemberCase::Camel.apply("article_count"), "articleCount");
    }
}
