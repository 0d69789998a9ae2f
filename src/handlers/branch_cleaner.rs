//! Deletes the source branch of a merged pull request.
//!
//! Only pull requests whose head branch lives in the base repository are
//! considered: the branch of a fork belongs to someone else. The base branch
//! is never touched.

use anyhow::Context as _;
use tracing::Instrument;
use tracing as log;

use crate::github::{PullRequestAction, PullRequestEvent, RefDeleter};

pub const DESCRIPTION: &str = "The branch-cleaner plugin automatically deletes source branches \
     for merged pull requests between two branches of the same repository. \
     This keeps repositories that don't rely on forks clean.";

/// A branch to delete, as expected by the git refs API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletionRequest {
    pub org: String,
    pub repo: String,
    /// Relative to `refs/`, e.g. `heads/my-feature`.
    pub git_ref: String,
}

impl DeletionRequest {
    /// Decides whether the head branch of `event` should be deleted.
    pub fn for_event(event: &PullRequestEvent) -> Option<DeletionRequest> {
        if event.action != PullRequestAction::Closed {
            log::debug!("skipping, action is {:?}", event.action);
            return None;
        }
        if !event.merged() {
            log::debug!("skipping, pull request was closed without merging");
            return None;
        }
        let base = &event.base().repo;
        let head = &event.head().repo;
        if !head.is_same_repository(base) {
            log::debug!(
                "skipping, head repository {:?} is not {:?}",
                head.full_name(),
                base.full_name()
            );
            return None;
        }

        Some(DeletionRequest {
            org: base.owner.clone(),
            repo: base.name.clone(),
            git_ref: format!("heads/{}", event.head().git_ref),
        })
    }
}

/// Stateless apart from the name it logs under, so redelivered events are
/// evaluated exactly like the first delivery.
pub struct BranchCleaner {
    plugin: String,
}

impl BranchCleaner {
    pub fn new(plugin: impl Into<String>) -> BranchCleaner {
        BranchCleaner {
            plugin: plugin.into(),
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub async fn evaluate(
        &self,
        scm: &dyn RefDeleter,
        event: &PullRequestEvent,
    ) -> anyhow::Result<()> {
        let span = log::info_span!("handler", plugin = %self.plugin, pr = event.number);
        async {
            let Some(request) = DeletionRequest::for_event(event) else {
                return Ok(());
            };

            log::info!(
                "deleting {} in {}/{}",
                request.git_ref,
                request.org,
                request.repo
            );
            scm.delete_ref(&request.org, &request.repo, &request.git_ref)
                .await
                .with_context(|| {
                    format!(
                        "failed to delete ref {} in {}/{}",
                        request.git_ref, request.org, request.repo
                    )
                })?;
            log::info!("deleted {}", request.git_ref);
            Ok(())
        }
        .instrument(span)
        .await
    }
}
