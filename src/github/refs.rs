use async_trait::async_trait;
use reqwest::Url;

use super::GithubClient;

/// The ability to delete a git reference in a repository.
///
/// `git_ref` is relative to `refs/`, so a branch is `heads/<branch>`.
#[async_trait]
pub trait RefDeleter: Send + Sync {
    async fn delete_ref(&self, org: &str, repo: &str, git_ref: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl RefDeleter for GithubClient {
    /// <https://docs.github.com/en/rest/git/refs#delete-a-reference>
    async fn delete_ref(&self, org: &str, repo: &str, git_ref: &str) -> anyhow::Result<()> {
        let url = refs_url(&self.api_url, org, repo, git_ref)?;
        self.send_req(self.delete(url.as_str())).await?;
        Ok(())
    }
}

/// Builds `{api}/repos/{org}/{repo}/git/refs/{git_ref}`.
///
/// Each segment is percent-encoded, so branch names containing `#`, `?` or
/// `%` still address that branch.
fn refs_url(api_url: &str, org: &str, repo: &str, git_ref: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(api_url)?;
    url.path_segments_mut()
        .map_err(|()| anyhow::anyhow!("{api_url} cannot be used as a base URL"))?
        .pop_if_empty()
        .extend(["repos", org, repo, "git", "refs"])
        .extend(git_ref.split('/'));
    Ok(url)
}
