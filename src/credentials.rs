//! Read-only view of the backend CLI's credentials file.

use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(rename = "claudeAiOauth")]
    oauth: Option<OauthSection>,
}

#[derive(Debug, Deserialize)]
struct OauthSection {
    #[serde(rename = "subscriptionType")]
    subscription_type: Option<String>,
}

/// `claudeAiOauth.subscriptionType`, or `None` if the file is missing,
/// unreadable or lacks the field.
pub async fn subscription_type(path: &Path) -> Option<String> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "credentials not readable");
            return None;
        }
    };
    match serde_json::from_str::<CredentialsFile>(&content) {
        Ok(file) => file.oauth.and_then(|o| o.subscription_type),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "credentials not parseable");
            None
        }
    }
}
