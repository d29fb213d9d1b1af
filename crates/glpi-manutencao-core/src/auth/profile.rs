use serde::{Deserialize, Serialize};

/// Identity returned by the backend once it has verified the credential.
///
/// Held in memory for the current page only; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionProfile {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub groups: Option<Vec<String>>,
}

impl SessionProfile {
    /// Name to show for the signed-in user
    pub fn label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.username,
        }
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups
            .as_ref()
            .map(|groups| groups.iter().any(|g| g == group))
            .unwrap_or(false)
    }
}
