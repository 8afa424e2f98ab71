//! Voter identity as handed over by the external identity resolver.

use serde::{Deserialize, Serialize};
use slotvote_db::entities::vote::VoterSource;

/// Who is voting.
///
/// `voter_key`/`voter_source` are produced outside this crate (session
/// cookie, device token or account) and are treated as an opaque dedup key
/// next to the email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterIdentity {
    pub voter_key: Option<String>,
    pub voter_source: Option<VoterSource>,
    pub email: String,
    pub name: String,
    pub user_id: Option<String>,
}

impl VoterIdentity {
    /// Trim all fields, lower-case the email and drop blank keys.
    #[must_use]
    pub fn normalized(self) -> Self {
        let voter_key = self
            .voter_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        let voter_source = voter_key.as_ref().and(self.voter_source);

        Self {
            voter_key,
            voter_source,
            email: self.email.trim().to_lowercase(),
            name: self.name.trim().to_string(),
            user_id: self
                .user_id
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> VoterIdentity {
        VoterIdentity {
            voter_key: Some("  ".to_string()),
            voter_source: Some(VoterSource::Device),
            email: " Anna@Example.COM ".to_string(),
            name: " Anna ".to_string(),
            user_id: None,
        }
    }

    #[test]
    fn test_normalized() {
        let id = identity().normalized();
        assert_eq!(id.email, "anna@example.com");
        assert_eq!(id.name, "Anna");
        assert_eq!(id.voter_key, None);
        assert_eq!(id.voter_source, None);
    }
}
