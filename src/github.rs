use async_trait::async_trait;
use octocrab::models::Repository;
use octocrab::{FromResponse, Octocrab, Page};
use tracing::{debug, info};

use crate::config::Config;
use crate::discovery::{RepoRecord, RepositorySource};
use crate::error::BackupError;

const PER_PAGE: u8 = 100;

/// GitHub client wrapper for listing the repositories a token can see
pub struct GitHubClient {
    client: Octocrab,
}

impl GitHubClient {
    /// Create a client authenticated with the configured personal access token
    ///
    /// No request is made here; a rejected token surfaces on the first listing.
    pub fn new(config: &Config) -> Result<Self, BackupError> {
        let client = Octocrab::builder()
            .base_uri(config.api_url.as_str())
            .map_err(|e| {
                BackupError::Configuration(format!(
                    "invalid GitHub API URL '{}': {}",
                    config.api_url, e
                ))
            })?
            .personal_token(config.access_token.clone())
            .build()
            .map_err(|e| {
                BackupError::Configuration(format!("failed to create GitHub client: {}", e))
            })?;

        debug!("GitHub client created for {}", config.api_url);
        Ok(Self { client })
    }

    /// List all repositories for the authenticated user
    ///
    /// Covers everything `/user/repos` returns for the token: owned, collaborator
    /// and organization-member repositories. Pages are followed through the
    /// `Link: rel="next"` header until GitHub stops sending one.
    pub async fn list_user_repositories(&self) -> Result<Vec<Repository>, BackupError> {
        debug!("Fetching repositories for the authenticated user");

        let mut repositories = Vec::new();
        let mut page = self
            .fetch_page(format!("/user/repos?per_page={}&page=1", PER_PAGE))
            .await?;
        let mut page_number = 1usize;

        loop {
            debug!("Page {} returned {} repositories", page_number, page.items.len());
            repositories.extend(page.items);

            let Some(next) = page.next else {
                break;
            };
            page = self.fetch_page(next.to_string()).await?;
            page_number += 1;
        }

        info!("Found {} user repositories", repositories.len());
        Ok(repositories)
    }

    /// GET one page of repositories, classifying failures by HTTP status
    ///
    /// Status is checked before the body is parsed, so throttling responses
    /// with a non-JSON body still come back as `RateLimited`.
    async fn fetch_page(&self, uri: String) -> Result<Page<Repository>, BackupError> {
        let response = self.client._get(uri).await.map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            let quota_exhausted = response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|value| value.to_str().ok())
                .map(|value| value.trim() == "0")
                .unwrap_or(false);
            let body = self
                .client
                .body_to_string(response)
                .await
                .unwrap_or_default();

            let message = error_message(&body)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| "unexpected response".to_string());
            return Err(classify_status(status.as_u16(), quota_exhausted, message));
        }

        Page::<Repository>::from_response(response)
            .await
            .map_err(classify_error)
    }
}

#[async_trait]
impl RepositorySource for GitHubClient {
    async fn list_repositories(&self) -> Result<Vec<RepoRecord>, BackupError> {
        let repositories = self.list_user_repositories().await?;
        Ok(repositories.iter().map(repo_to_record).collect())
    }

    fn provider_name(&self) -> &'static str {
        "GitHub"
    }
}

/// Convert octocrab Repository to our RepoRecord
fn repo_to_record(repo: &Repository) -> RepoRecord {
    let owner = repo
        .owner
        .as_ref()
        .map(|o| o.login.clone())
        .or_else(|| {
            repo.full_name
                .as_deref()
                .and_then(|full_name| full_name.split_once('/'))
                .map(|(owner, _)| owner.to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    // An empty URL is reported as a failure by the mirror updater
    let clone_url = repo
        .clone_url
        .as_ref()
        .map(|url| url.to_string())
        .unwrap_or_default();

    RepoRecord {
        name: repo.name.clone(),
        owner,
        clone_url,
    }
}

/// Map a non-success API status onto the backup error taxonomy
fn classify_status(status: u16, quota_exhausted: bool, message: String) -> BackupError {
    let mentions_rate_limit = message.to_lowercase().contains("rate limit");

    match status {
        401 => BackupError::Authentication(message),
        429 => BackupError::RateLimited(message),
        403 if quota_exhausted || mentions_rate_limit => BackupError::RateLimited(message),
        403 => BackupError::Authentication(message),
        _ => BackupError::Network(format!("GitHub API returned {}: {}", status, message)),
    }
}

/// Transport and decoding failures from octocrab
fn classify_error(error: octocrab::Error) -> BackupError {
    match &error {
        octocrab::Error::GitHub { source, .. } => classify_status(
            source.status_code.as_u16(),
            false,
            source.message.clone(),
        ),
        _ => BackupError::Network(error.to_string()),
    }
}

/// The `message` field of a GitHub error body, or the body itself when it isn't JSON
fn error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => json
            .get("message")
            .and_then(|message| message.as_str())
            .map(str::to_string),
        Err(_) => Some(body.chars().take(200).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_url: &str) -> Config {
        Config {
            access_token: "ghp_testtoken".to_string(),
            backup_dir: "/tmp/unused".into(),
            backup_interval: std::time::Duration::from_secs(60),
            layout: Default::default(),
            api_url: api_url.to_string(),
        }
    }

    fn repo_json(id: u64, owner: &str, name: &str) -> serde_json::Value {
        json!({
            "id": id,
            "node_id": format!("R_{}", id),
            "name": name,
            "full_name": format!("{}/{}", owner, name),
            "private": false,
            "fork": false,
            "url": format!("https://api.github.com/repos/{}/{}", owner, name),
            "html_url": format!("https://github.com/{}/{}", owner, name),
            "clone_url": format!("https://github.com/{}/{}.git", owner, name),
        })
    }

    #[tokio::test]
    async fn test_lists_single_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/repos"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                repo_json(1, "octocat", "alpha"),
                repo_json(2, "octocat", "beta"),
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = GitHubClient::new(&test_config(&server.uri())).unwrap();
        let records = client.list_repositories().await.unwrap();

        assert_eq!(
            records,
            vec![
                RepoRecord::new("alpha", "octocat", "https://github.com/octocat/alpha.git"),
                RepoRecord::new("beta", "octocat", "https://github.com/octocat/beta.git"),
            ]
        );
    }

    #[tokio::test]
    async fn test_follows_next_link_until_exhausted() {
        let server = MockServer::start().await;
        let next_link = format!(
            "<{}/user/repos?per_page=100&page=2>; rel=\"next\", <{}/user/repos?per_page=100&page=2>; rel=\"last\"",
            server.uri(),
            server.uri()
        );

        Mock::given(method("GET"))
            .and(path("/user/repos"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", next_link.as_str())
                    .set_body_json(json!([repo_json(1, "octocat", "alpha")])),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/user/repos"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([repo_json(2, "acme", "gamma")])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = GitHubClient::new(&test_config(&server.uri())).unwrap();
        let records = client.list_repositories().await.unwrap();

        let names: Vec<_> = records.iter().map(|r| r.full_name()).collect();
        assert_eq!(names, vec!["octocat/alpha", "acme/gamma"]);
    }

    #[tokio::test]
    async fn test_empty_account_lists_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/repos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let client = GitHubClient::new(&test_config(&server.uri())).unwrap();
        let records = client.list_repositories().await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_bad_credentials_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/repos"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "message": "Bad credentials",
                "documentation_url": "https://docs.github.com/rest"
            })))
            .mount(&server)
            .await;

        let client = GitHubClient::new(&test_config(&server.uri())).unwrap();
        let result = client.list_repositories().await;

        assert_matches!(result, Err(BackupError::Authentication(msg)) if msg.contains("Bad credentials"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/repos"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .set_body_json(json!({
                        "message": "API rate limit exceeded for user ID 1.",
                        "documentation_url": "https://docs.github.com/rest/overview/resources-in-the-rest-api#rate-limiting"
                    })),
            )
            .mount(&server)
            .await;

        let client = GitHubClient::new(&test_config(&server.uri())).unwrap();
        let result = client.list_repositories().await;

        assert_matches!(result, Err(BackupError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_network_error() {
        // Nothing listens on the discard port
        let client = GitHubClient::new(&test_config("http://127.0.0.1:9")).unwrap();
        let result = client.list_repositories().await;

        assert_matches!(result, Err(BackupError::Network(_)));
    }

    #[tokio::test]
    async fn test_invalid_api_url_is_configuration_error() {
        let result = GitHubClient::new(&test_config("not a url"));
        assert_matches!(result.err(), Some(BackupError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_too_many_requests_with_plain_body_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/repos"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = GitHubClient::new(&test_config(&server.uri())).unwrap();
        let result = client.list_repositories().await;

        assert_matches!(result, Err(BackupError::RateLimited(msg)) if msg == "slow down");
    }

    #[tokio::test]
    async fn test_exhausted_quota_header_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/repos"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html><body>Forbidden</body></html>"),
            )
            .mount(&server)
            .await;

        let client = GitHubClient::new(&test_config(&server.uri())).unwrap();
        let result = client.list_repositories().await;

        assert_matches!(result, Err(BackupError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_forbidden_without_rate_limit_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/repos"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "message": "Resource not accessible by personal access token"
            })))
            .mount(&server)
            .await;

        let client = GitHubClient::new(&test_config(&server.uri())).unwrap();
        let result = client.list_repositories().await;

        assert_matches!(result, Err(BackupError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_follows_every_page_without_a_page_limit() {
        let server = MockServer::start().await;

        for page in 1..=3u64 {
            let mut response = ResponseTemplate::new(200)
                .set_body_json(json!([repo_json(page, "octocat", &format!("repo-{}", page))]));
            if page < 3 {
                let next_link = format!(
                    "<{}/user/repos?per_page=100&page={}>; rel=\"next\"",
                    server.uri(),
                    page + 1
                );
                response = response.insert_header("link", next_link.as_str());
            }

            Mock::given(method("GET"))
                .and(path("/user/repos"))
                .and(query_param("page", page.to_string()))
                .respond_with(response)
                .expect(1)
                .mount(&server)
                .await;
        }

        let client = GitHubClient::new(&test_config(&server.uri())).unwrap();
        let records = client.list_repositories().await.unwrap();

        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["repo-1", "repo-2", "repo-3"]);
    }

    #[test]
    fn test_error_message_from_body() {
        assert_eq!(
            error_message(r#"{"message": "Bad credentials"}"#),
            Some("Bad credentials".to_string())
        );
        assert_eq!(error_message("  not json  "), Some("not json".to_string()));
        assert_eq!(error_message(""), None);
    }
}
