use std::fmt;

use secrecy::SecretString;
use tracing as log;

use crate::config::{self, ConfigCache, ConfigurationError};
use crate::github::{Event, GithubClient};

mod branch_cleaner;

pub use branch_cleaner::{BranchCleaner, DESCRIPTION, DeletionRequest};

/// A failure of a single handler while processing an event.
#[derive(Debug)]
pub struct HandlerError {
    pub handler: &'static str,
    pub error: anyhow::Error,
}

impl std::error::Error for HandlerError {}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} handler failed: {:#}", self.handler, self.error)
    }
}

pub async fn handle(ctx: &Context, event: &Event) -> Vec<HandlerError> {
    let repo = event.repo();
    let config = config::get(&ctx.github, &ctx.config_cache, repo).await;
    let mut errors = Vec::new();

    let config = match config {
        Ok(config) => config,
        Err(ConfigurationError::Missing) => {
            log::debug!("{} has no configuration, skipping", repo.full_name());
            return errors;
        }
        Err(e) => {
            errors.push(HandlerError {
                handler: "config",
                error: anyhow::Error::new(e),
            });
            return errors;
        }
    };

    match event {
        Event::PullRequest(event) => {
            if config.branch_cleaner.is_some() {
                if let Err(error) = ctx.branch_cleaner.evaluate(&ctx.github, event).await {
                    errors.push(HandlerError {
                        handler: "branch-cleaner",
                        error,
                    });
                }
            } else {
                log::debug!(
                    "branch-cleaner is not enabled in {}, skipping",
                    repo.full_name()
                );
            }
        }
    }

    errors
}

pub struct Context {
    pub github: GithubClient,
    pub config_cache: ConfigCache,
    pub branch_cleaner: BranchCleaner,
    pub webhook_secret: SecretString,
}
