//! ID generation utilities.

use ulid::Ulid;
use uuid::Uuid;

/// ID generator for votes and voter tokens.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new ULID-based row ID.
    ///
    /// Vote rows sort by creation time when ordered by ID.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Generate a voter edit token.
    ///
    /// Holding this token is what lets a voter edit their own response later,
    /// so it carries no time component.
    #[must_use]
    pub fn generate_edit_token(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ulid() {
        let id_gen = IdGenerator::new();
        let id1 = id_gen.generate();
        let id2 = id_gen.generate();

        assert_eq!(id1.len(), 26);
        assert_ne!(id1, id2);
        assert_eq!(id1, id1.to_lowercase());
    }

    #[test]
    fn test_generate_edit_token() {
        let id_gen = IdGenerator::new();
        let token = id_gen.generate_edit_token();

        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, id_gen.generate_edit_token());
    }
}
