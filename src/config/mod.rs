use std::env;
use std::time::Duration;

use crate::gitlab::client::{DEFAULT_PER_PAGE, DEFAULT_TIMEOUT};

/// Config holds the GitLab connection settings
#[derive(Debug, Clone)]
pub struct Config {
    pub project_url: String,
    pub token: String,
    pub per_page: u32,
    pub timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        Self {
            project_url: get_env("GITLAB_PROJECT_URL", ""),
            token: get_env("GITLAB_TOKEN", ""),
            per_page: get_env("GITLAB_PER_PAGE", &DEFAULT_PER_PAGE.to_string())
                .parse()
                .unwrap_or(DEFAULT_PER_PAGE),
            timeout: get_env("GITLAB_TIMEOUT_SECS", "")
                .parse()
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
        }
    }

    /// Both the project URL and a token must be set before talking to GitLab
    pub fn require(&self) -> anyhow::Result<()> {
        if self.project_url.is_empty() {
            anyhow::bail!("GitLab project URL not configured (set GITLAB_PROJECT_URL or --project-url)");
        }
        if self.token.is_empty() {
            anyhow::bail!("GitLab token not configured (set GITLAB_TOKEN or --token)");
        }
        Ok(())
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
