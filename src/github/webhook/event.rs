use serde::Deserialize;

use crate::github::PullRequestNumber;

/// An event triggered by a webhook.
#[derive(Debug)]
pub enum Event {
    /// Activity on a pull request.
    PullRequest(PullRequestEvent),
}

impl Event {
    pub fn repo(&self) -> &Repository {
        match self {
            Event::PullRequest(event) => &event.repository,
        }
    }
}

/// A repository as identified by its owner and name.
///
/// Two repositories are the same only when both the owner and the name match
/// exactly. Empty fields (as delivered for a deleted fork) never match
/// anything, see [`Repository::is_same_repository`].
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(from = "RepositoryPayload")]
pub struct Repository {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
}

impl Repository {
    pub fn new(owner: &str, name: &str) -> Repository {
        Repository {
            owner: owner.to_string(),
            name: name.to_string(),
            default_branch: String::new(),
        }
    }

    pub fn is_same_repository(&self, other: &Repository) -> bool {
        !self.owner.is_empty()
            && !self.name.is_empty()
            && self.owner == other.owner
            && self.name == other.name
    }

    /// `owner/name`, for display and URLs.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// The shape GitHub uses for repository objects in webhook payloads.
///
/// Only the fields we need are read. Some payloads only carry `full_name`,
/// so the owner and name are recovered from it when missing.
#[derive(Deserialize)]
struct RepositoryPayload {
    name: Option<String>,
    full_name: Option<String>,
    owner: Option<Owner>,
    default_branch: Option<String>,
}

#[derive(Deserialize)]
struct Owner {
    login: Option<String>,
}

impl From<RepositoryPayload> for Repository {
    fn from(payload: RepositoryPayload) -> Repository {
        let (full_owner, full_name) = payload
            .full_name
            .as_deref()
            .and_then(|full| full.split_once('/'))
            .map(|(owner, name)| (owner.to_string(), name.to_string()))
            .unwrap_or_default();
        let owner = payload
            .owner
            .and_then(|owner| owner.login)
            .filter(|login| !login.is_empty())
            .unwrap_or(full_owner);
        let name = payload
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or(full_name);
        Repository {
            owner,
            name,
            default_branch: payload.default_branch.unwrap_or_default(),
        }
    }
}

/// Deserializes `null` the same way as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::de::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One side of a pull request: a branch and the repository it lives in.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BranchRef {
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub repo: Repository,
}

#[derive(Debug, Deserialize)]
pub struct PullRequest {
    pub number: PullRequestNumber,
    /// Only meaningful once the pull request is closed.
    #[serde(default, deserialize_with = "null_as_default")]
    pub merged: bool,
    pub base: BranchRef,
    pub head: BranchRef,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Closed,
    Reopened,
    Synchronize,
    Edited,
    ReadyForReview,
    ConvertedToDraft,
    Labeled,
    Unlabeled,
    Assigned,
    Unassigned,
    ReviewRequested,
    #[serde(other)]
    Other,
}

/// A `pull_request` webhook event.
///
/// <https://docs.github.com/en/webhooks/webhook-events-and-payloads#pull_request>
#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: PullRequestAction,
    pub number: PullRequestNumber,
    pub pull_request: PullRequest,
    #[serde(default, deserialize_with = "null_as_default")]
    pub repository: Repository,
}

impl PullRequestEvent {
    pub fn merged(&self) -> bool {
        self.pull_request.merged
    }

    pub fn base(&self) -> &BranchRef {
        &self.pull_request.base
    }

    pub fn head(&self) -> &BranchRef {
        &self.pull_request.head
    }
}
