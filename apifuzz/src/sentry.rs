//! Best-effort retrieval of Sentry events recorded by a target during a run.

use serde_json::Value;
use tracing::debug;

use crate::constants::RUN_ID_TAG;
use crate::errors::HarnessError;

/// Connection details for a Sentry instance.
///
/// Event collection only happens when the full set is supplied; a
/// partial set silently disables it.
#[derive(Clone, Debug)]
pub struct SentryConfig {
    /// Sentry instance base URL, with a trailing slash.
    pub url: String,
    /// API access token.
    pub token: String,
    /// Slug of the organization the target project belongs to.
    pub organization: String,
    /// Slug of the project.
    pub project: String,
}

impl SentryConfig {
    /// Assemble a config out of individually optional CLI inputs.
    pub fn from_options(
        url: Option<String>,
        token: Option<String>,
        organization: Option<String>,
        project: Option<String>,
    ) -> Option<Self> {
        Some(Self {
            url: url?,
            token: token?,
            organization: organization?,
            project: project?,
        })
    }
}

/// Fetch every event tagged with this run's identifier, paging through
/// `Link` headers until exhausted.
pub async fn list_events(config: &SentryConfig, run_id: &str) -> Result<Vec<Value>, HarnessError> {
    let client = reqwest::Client::new();
    let mut url = format!(
        "{}api/0/projects/{}/{}/events/?full=true",
        config.url, config.organization, config.project
    );
    let mut events = Vec::new();
    loop {
        let response = client
            .get(&url)
            .bearer_auth(&config.token)
            .send()
            .await?
            .error_for_status()?;
        let link = response
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let page: Vec<Value> = response.json().await?;
        debug!(url = %url, total = page.len(), "Fetched events page");
        events.extend(
            page.into_iter()
                .filter(|event| has_tag(event, RUN_ID_TAG, run_id)),
        );
        match link.as_deref().and_then(next_link) {
            Some(next) => url = next,
            None => break,
        }
    }
    Ok(events)
}

/// URL of the next page, if the server reports more results.
fn next_link(header: &str) -> Option<String> {
    let links = parse_link_header::parse(header).ok()?;
    let next = links.get(&Some("next".to_string()))?;
    if next.params.get("results").map(String::as_str) == Some("true") {
        Some(next.raw_uri.clone())
    } else {
        None
    }
}

fn has_tag(event: &Value, key: &str, value: &str) -> bool {
    event["tags"]
        .as_array()
        .map(|tags| {
            tags.iter()
                .any(|tag| tag["key"] == key && tag["value"] == value)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINK_HEADER_WITH_NEXT: &str = "<https://sentry.io/api/0/projects/org/proj/events/?full=true&cursor=0:0:1>; rel=\"previous\"; results=\"false\"; cursor=\"0:0:1\", <https://sentry.io/api/0/projects/org/proj/events/?full=true&cursor=0:100:0>; rel=\"next\"; results=\"true\"; cursor=\"0:100:0\"";

    const LINK_HEADER_EXHAUSTED: &str = "<https://sentry.io/api/0/projects/org/proj/events/?full=true&cursor=0:0:1>; rel=\"previous\"; results=\"true\"; cursor=\"0:0:1\", <https://sentry.io/api/0/projects/org/proj/events/?full=true&cursor=0:200:0>; rel=\"next\"; results=\"false\"; cursor=\"0:200:0\"";

    #[test]
    fn test_next_link() {
        let next = next_link(LINK_HEADER_WITH_NEXT).unwrap();
        assert!(next.contains("cursor=0:100:0"), "{next}");
    }

    #[test]
    fn test_next_link_exhausted() {
        assert!(next_link(LINK_HEADER_EXHAUSTED).is_none());
        assert!(next_link("garbage").is_none());
    }

    #[test]
    fn test_has_tag() {
        let event = serde_json::json!({
            "id": "1",
            "tags": [
                {"key": "release", "value": "1.0"},
                {"key": RUN_ID_TAG, "value": "run-42"},
            ]
        });
        assert!(has_tag(&event, RUN_ID_TAG, "run-42"));
        assert!(!has_tag(&event, RUN_ID_TAG, "run-43"));
        assert!(!has_tag(&serde_json::json!({"id": "2"}), RUN_ID_TAG, "run-42"));
    }

    #[test]
    fn test_sentry_config_requires_full_set() {
        assert!(SentryConfig::from_options(
            Some("https://sentry.io/".into()),
            Some("token".into()),
            Some("org".into()),
            None,
        )
        .is_none());
    }
}
