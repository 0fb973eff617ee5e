//! Caller identity threaded explicitly through every operation.

use serde::{Deserialize, Serialize};

/// Organization and user on whose behalf an operation runs.
///
/// All reads and writes are confined to `organization_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgScope {
    pub organization_id: String,
    pub user_id: String,
}

impl OrgScope {
    /// User id recorded when the caller does not identify one.
    pub const ANONYMOUS_USER: &'static str = "anonymous";

    pub fn new(organization_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            user_id: user_id.into(),
        }
    }
}
