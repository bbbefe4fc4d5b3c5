//! User-Agent string sent with every fetch.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/dragonlist/video-downloader";

/// Default User-Agent for fetch requests (identifies the tool and version).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("video-downloader/{version} (+{PROJECT_UA_URL})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_version_and_project_url() {
        let ua = default_user_agent();
        assert!(ua.contains(PROJECT_UA_URL), "UA must contain project URL: {ua}");
        assert_eq!(
            Some(env!("CARGO_PKG_VERSION")),
            ua.strip_prefix("video-downloader/")
                .and_then(|s| s.split(' ').next()),
            "UA must contain crate version"
        );
    }
}
