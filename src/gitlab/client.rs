use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::error::TransportError;
use crate::sync::{RawRecord, RemoteClient};

pub const DEFAULT_PER_PAGE: u32 = 100;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// GitLab project CI/CD variables API client
pub struct GitLabClient {
    base_url: String,
    token: String,
    per_page: u32,
    client: Client,
}

impl GitLabClient {
    /// `project_url` is the project's web URL, e.g. `https://gitlab.com/group/project`
    pub fn new(project_url: &str, token: String, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: variables_api_url(project_url)?,
            token,
            per_page: DEFAULT_PER_PAGE,
            client,
        })
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn item_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(key))
    }

    fn scoped(&self, req: reqwest::RequestBuilder, scope: Option<&str>) -> reqwest::RequestBuilder {
        match scope {
            Some(scope) => req.query(&[("filter[environment_scope]", scope)]),
            None => req,
        }
    }

    /// Test connectivity and token validity
    pub async fn test_connection(&self) -> bool {
        match self
            .client
            .get(&self.base_url)
            .header("PRIVATE-TOKEN", &self.token)
            .query(&[("per_page", "1")])
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Fetch a single variable
    pub async fn get(&self, key: &str, scope: Option<&str>) -> Result<Value, TransportError> {
        let req = self.client.get(self.item_url(key)).header("PRIVATE-TOKEN", &self.token);
        let resp = self.scoped(req, scope).send().await?;
        decode(check(resp).await?).await
    }
}

#[async_trait]
impl RemoteClient for GitLabClient {
    async fn list(&self) -> Result<Vec<Value>, TransportError> {
        let mut result = Vec::new();
        let mut page = "1".to_string();

        while is_page_number(&page) {
            let resp = self
                .client
                .get(&self.base_url)
                .header("PRIVATE-TOKEN", &self.token)
                .query(&[("per_page", self.per_page.to_string()), ("page", page.clone())])
                .send()
                .await?;
            let resp = check(resp).await?;

            // An absent header means this was the last page
            let next = resp
                .headers()
                .get("X-Next-Page")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();

            let items: Vec<Value> = resp
                .json()
                .await
                .map_err(|e| TransportError::Decode(format!("page {}: {}", page, e)))?;
            tracing::debug!("Fetched page {} ({} variables)", page, items.len());
            result.extend(items);
            page = next;
        }

        Ok(result)
    }

    async fn create(&self, record: &RawRecord) -> Result<Value, TransportError> {
        let resp = self
            .client
            .post(&self.base_url)
            .header("PRIVATE-TOKEN", &self.token)
            .form(record)
            .send()
            .await?;
        decode(check(resp).await?).await
    }

    async fn update(&self, key: &str, record: &RawRecord, scope: &str) -> Result<Value, TransportError> {
        let req = self
            .client
            .put(self.item_url(key))
            .header("PRIVATE-TOKEN", &self.token)
            .form(record);
        let resp = self.scoped(req, Some(scope)).send().await?;
        decode(check(resp).await?).await
    }

    async fn delete(&self, key: &str, scope: &str) -> Result<(), TransportError> {
        let req = self.client.delete(self.item_url(key)).header("PRIVATE-TOKEN", &self.token);
        let resp = self.scoped(req, Some(scope)).send().await?;
        check(resp).await?;
        Ok(())
    }
}

/// Turn a project web URL into its variables API endpoint
fn variables_api_url(project_url: &str) -> Result<String, TransportError> {
    let url = Url::parse(project_url).map_err(|e| TransportError::InvalidUrl(format!("{}: {}", project_url, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidUrl(format!("{}: missing host", project_url)))?;

    let project = url.path().trim_matches('/');
    if project.is_empty() {
        return Err(TransportError::InvalidUrl(format!("{}: missing project path", project_url)));
    }

    let authority = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    Ok(format!(
        "{}://{}/api/v4/projects/{}/variables",
        url.scheme(),
        authority,
        urlencoding::encode(project)
    ))
}

fn is_page_number(page: &str) -> bool {
    !page.is_empty() && page.chars().all(|c| c.is_ascii_digit())
}

async fn check(resp: Response) -> Result<Response, TransportError> {
    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(TransportError::Status { status, body });
    }
    Ok(resp)
}

async fn decode(resp: Response) -> Result<Value, TransportError> {
    resp.json().await.map_err(|e| TransportError::Decode(e.to_string()))
}
