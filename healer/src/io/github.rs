//! GitHub REST API client for repository metadata and pull requests.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "healer-agent";

/// Thin blocking client; one instance per run, used from the worker thread.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    token: String,
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    permissions: Option<RepoPermissions>,
}

#[derive(Debug, Default, Deserialize)]
struct RepoPermissions {
    #[serde(default)]
    admin: bool,
    #[serde(default)]
    maintain: bool,
    #[serde(default)]
    push: bool,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    html_url: String,
}

impl GitHubClient {
    pub fn new(token: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            token: token.to_string(),
        })
    }

    fn get(&self, path: &str) -> reqwest::blocking::RequestBuilder {
        self.client
            .get(format!("{API_BASE}{path}"))
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github+json")
    }

    /// Default branch of the repository; falls back to `main` when the
    /// metadata call fails. Never hardcoded at the call sites.
    pub fn default_branch(&self, owner: &str, repo: &str) -> String {
        match self.repo_info(owner, repo) {
            Ok(info) => info.default_branch.unwrap_or_else(|| "main".to_string()),
            Err(err) => {
                warn!(err = %err, "default branch lookup failed, assuming main");
                "main".to_string()
            }
        }
    }

    /// True when the token grants write access (admin, maintain, or push).
    ///
    /// A 404 means the repository is not visible to the token at all.
    #[instrument(skip_all, fields(owner, repo))]
    pub fn has_write_permission(&self, owner: &str, repo: &str) -> Result<bool> {
        let response = self
            .get(&format!("/repos/{owner}/{repo}"))
            .send()
            .context("repository permission check")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(anyhow!("repository not accessible with this token"));
        }
        if !response.status().is_success() {
            return Err(anyhow!(
                "permission check failed with status {}",
                response.status()
            ));
        }

        let info: RepoInfo = response.json().context("parse repository metadata")?;
        let perms = info.permissions.unwrap_or_default();
        Ok(perms.admin || perms.maintain || perms.push)
    }

    fn repo_info(&self, owner: &str, repo: &str) -> Result<RepoInfo> {
        let response = self
            .get(&format!("/repos/{owner}/{repo}"))
            .send()
            .context("repository metadata")?;
        if !response.status().is_success() {
            return Err(anyhow!("metadata request failed: {}", response.status()));
        }
        response.json().context("parse repository metadata")
    }

    /// URL of an already-open PR from `head_branch`, if one exists.
    pub fn find_open_pull_request(
        &self,
        owner: &str,
        repo: &str,
        head_branch: &str,
    ) -> Result<Option<String>> {
        let response = self
            .get(&format!("/repos/{owner}/{repo}/pulls"))
            .query(&[
                ("head", format!("{owner}:{head_branch}")),
                ("state", "open".to_string()),
            ])
            .send()
            .context("list pull requests")?;
        if !response.status().is_success() {
            return Err(anyhow!("pull request list failed: {}", response.status()));
        }
        let pulls: Vec<PullRequest> = response.json().context("parse pull request list")?;
        Ok(pulls.into_iter().next().map(|pr| pr.html_url))
    }

    /// Open a pull request and return its URL.
    #[instrument(skip_all, fields(owner, repo, head_branch, base_branch))]
    pub fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        head_branch: &str,
        base_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<String> {
        let response = self
            .client
            .post(format!("{API_BASE}/repos/{owner}/{repo}/pulls"))
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .json(&json!({
                "title": title,
                "body": body,
                "head": head_branch,
                "base": base_branch,
            }))
            .send()
            .context("create pull request")?;

        if response.status() != StatusCode::CREATED {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            let text = text.replace(&self.token, "***");
            debug!(%status, "pull request creation failed");
            return Err(anyhow!(
                "pull request creation failed ({status}): {}",
                text.chars().take(300).collect::<String>()
            ));
        }

        let pr: PullRequest = response.json().context("parse created pull request")?;
        info!(url = %pr.html_url, "pull request created");
        Ok(pr.html_url)
    }
}
