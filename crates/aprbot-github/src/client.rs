//! REST client for the handful of GitHub endpoints the materializer uses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Method, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use aprbot_core::host::{FileUpdate, PullRequestDraft};
use aprbot_core::{
    AccessToken, HostConnector, HostError, PullRequestError, PullRequestRecord, RemoteFile,
    RepositoryHost, RepositoryRef,
};

use crate::{error_message, ACCEPT, API_VERSION, USER_AGENT};

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Serialize)]
struct CreateRefRequest<'a> {
    #[serde(rename = "ref")]
    reference: String,
    sha: &'a str,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(rename = "type")]
    kind: Option<String>,
    content: Option<String>,
    encoding: Option<String>,
    sha: String,
}

#[derive(Debug, Serialize)]
struct PutContentRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CreatePullRequest<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    html_url: String,
    number: u64,
}

/// [`RepositoryHost`] over the GitHub REST API, authenticated with one
/// installation token.
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: Url,
    token: SecretString,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("api_base", &self.api_base.as_str())
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    pub fn new(api_base_url: &str, token: &AccessToken, timeout: Duration) -> Result<Self, HostError> {
        let api_base = Url::parse(api_base_url)
            .map_err(|e| HostError::Transport(format!("invalid API base URL {api_base_url}: {e}")))?;
        if api_base.cannot_be_a_base() {
            return Err(HostError::Transport(format!(
                "invalid API base URL {api_base_url}"
            )));
        }
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| HostError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_base,
            token: SecretString::from(token.expose().to_string()),
        })
    }

    /// `{api}/repos/{owner}/{name}/{tail...}`; each `/`-separated piece of
    /// `tail` becomes a percent-encoded segment.
    fn repo_url(&self, repo: &RepositoryRef, tail: &[&str]) -> Result<Url, HostError> {
        let mut url = self.api_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| HostError::Transport("API base URL cannot take a path".into()))?;
            segments
                .pop_if_empty()
                .extend(["repos", repo.owner.as_str(), repo.name.as_str()]);
            for piece in tail {
                segments.extend(piece.split('/').filter(|s| !s.is_empty()));
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION)
            .bearer_auth(self.token.expose_secret())
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, HostError> {
        let response = builder.send().await.map_err(classify_transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(HostError::Status {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, HostError> {
        let response = self.send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| HostError::Decode(e.without_url().to_string()))
    }
}

fn classify_transport(err: reqwest::Error) -> HostError {
    if err.is_timeout() {
        HostError::Timeout
    } else {
        HostError::Transport(err.without_url().to_string())
    }
}

/// Contents API payloads are base64 with embedded line breaks.
fn decode_content(raw: &str) -> Result<String, HostError> {
    let compact: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| HostError::Decode(format!("file content is not valid base64: {e}")))?;
    String::from_utf8(bytes).map_err(|_| HostError::Decode("file content is not UTF-8".into()))
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    async fn branch_tip(&self, repo: &RepositoryRef, branch: &str) -> Result<String, HostError> {
        let url = self.repo_url(repo, &["git", "ref", "heads", branch])?;
        let reference: RefResponse = self.send_json(self.request(Method::GET, url)).await?;
        Ok(reference.object.sha)
    }

    async fn create_branch(
        &self,
        repo: &RepositoryRef,
        branch: &str,
        sha: &str,
    ) -> Result<(), HostError> {
        let url = self.repo_url(repo, &["git", "refs"])?;
        let body = CreateRefRequest {
            reference: format!("refs/heads/{branch}"),
            sha,
        };
        self.send(self.request(Method::POST, url).json(&body)).await?;
        debug!(%repo, branch, "branch created");
        Ok(())
    }

    async fn get_file(
        &self,
        repo: &RepositoryRef,
        path: &str,
        branch: &str,
    ) -> Result<Option<RemoteFile>, HostError> {
        let mut url = self.repo_url(repo, &["contents", path])?;
        url.query_pairs_mut().append_pair("ref", branch);

        let response = match self.send(self.request(Method::GET, url)).await {
            Ok(response) => response,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        let text = response
            .text()
            .await
            .map_err(|e| HostError::Decode(e.without_url().to_string()))?;
        let file: ContentResponse = serde_json::from_str(&text)
            .map_err(|_| HostError::Decode(format!("{path} is not a file")))?;

        if file.kind.as_deref().is_some_and(|kind| kind != "file") {
            return Err(HostError::Decode(format!("{path} is not a file")));
        }
        if file.encoding.as_deref().is_some_and(|enc| enc != "base64") {
            return Err(HostError::Decode(format!(
                "{path} returned unsupported encoding {}",
                file.encoding.as_deref().unwrap_or_default()
            )));
        }

        let content = decode_content(file.content.as_deref().unwrap_or_default())?;
        Ok(Some(RemoteFile {
            content,
            sha: file.sha,
        }))
    }

    async fn put_file(&self, repo: &RepositoryRef, update: FileUpdate<'_>) -> Result<(), HostError> {
        let url = self.repo_url(repo, &["contents", update.path])?;
        let body = PutContentRequest {
            message: update.message,
            content: STANDARD.encode(update.content.as_bytes()),
            branch: update.branch,
            sha: update.sha,
        };
        self.send(self.request(Method::PUT, url).json(&body)).await?;
        Ok(())
    }

    async fn create_pull_request(
        &self,
        repo: &RepositoryRef,
        draft: PullRequestDraft<'_>,
    ) -> Result<PullRequestRecord, HostError> {
        let url = self.repo_url(repo, &["pulls"])?;
        let body = CreatePullRequest {
            title: draft.title,
            body: draft.body,
            head: draft.head,
            base: draft.base,
        };
        let created: PullRequestResponse = self
            .send_json(self.request(Method::POST, url).json(&body))
            .await?;

        Ok(PullRequestRecord {
            url: created.html_url,
            number: created.number,
            title: draft.title.to_string(),
            body: draft.body.to_string(),
            branch: draft.head.to_string(),
        })
    }
}

/// Builds a [`GitHubClient`] per installation token.
#[derive(Debug, Clone)]
pub struct GitHubConnector {
    api_base_url: String,
    timeout: Duration,
}

impl GitHubConnector {
    pub fn new(api_base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            timeout,
        }
    }
}

impl HostConnector for GitHubConnector {
    fn connect(&self, token: &AccessToken) -> Result<Arc<dyn RepositoryHost>, PullRequestError> {
        let client = GitHubClient::new(&self.api_base_url, token, self.timeout)?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> GitHubClient {
        GitHubClient::new(base, &AccessToken::new("ghs_x", None), Duration::from_secs(5)).unwrap()
    }

    fn repo() -> RepositoryRef {
        RepositoryRef::new("octo", "widgets")
    }

    #[test]
    fn repo_urls_encode_each_segment() {
        let url = client("https://api.example.com")
            .repo_url(&repo(), &["contents", "src/my file#1.c"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/repos/octo/widgets/contents/src/my%20file%231.c"
        );
    }

    #[test]
    fn branch_names_with_slashes_stay_path_segments() {
        let url = client("https://ghe.example.com/api/v3/")
            .repo_url(&repo(), &["git", "ref", "heads", "apr/fix-ci-abc12345"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://ghe.example.com/api/v3/repos/octo/widgets/git/ref/heads/apr/fix-ci-abc12345"
        );
    }

    #[test]
    fn content_decoding_strips_line_breaks() {
        let encoded = "aW50IG1h\naW4oKSB7\nfQo=\n";
        assert_eq!(decode_content(encoded).unwrap(), "int main() {}\n");
        assert!(matches!(decode_content("***"), Err(HostError::Decode(_))));
    }

    #[test]
    fn rejects_unusable_base_urls() {
        let token = AccessToken::new("ghs_x", None);
        assert!(GitHubClient::new("not a url", &token, Duration::from_secs(1)).is_err());
        assert!(GitHubClient::new("mailto:a@b.c", &token, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn debug_hides_the_token() {
        let debug = format!("{:?}", client("https://api.example.com"));
        assert!(!debug.contains("ghs_x"));
    }
}
