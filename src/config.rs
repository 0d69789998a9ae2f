use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing as log;

use crate::github::{GithubClient, Repository};

pub(crate) static CONFIG_FILE_NAME: &str = "branchbot.toml";
const REFRESH_EVERY: Duration = Duration::from_secs(2 * 60); // Every two minutes

type CachedConfig = (Result<Arc<Config>, ConfigurationError>, Instant);

#[derive(PartialEq, Eq, Debug, serde::Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub branch_cleaner: Option<BranchCleanerConfig>,
}

/// Presence of the `[branch-cleaner]` table enables the handler.
#[derive(PartialEq, Eq, Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchCleanerConfig {
    #[serde(default)]
    _empty: (),
}

/// Per-repository configuration, refreshed every couple of minutes.
#[derive(Default)]
pub struct ConfigCache {
    entries: RwLock<HashMap<String, CachedConfig>>,
}

impl ConfigCache {
    pub fn new() -> ConfigCache {
        ConfigCache::default()
    }

    fn get(&self, repo: &str) -> Option<Result<Arc<Config>, ConfigurationError>> {
        let cache = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        cache.get(repo).and_then(|(config, fetch_time)| {
            if fetch_time.elapsed() < REFRESH_EVERY {
                Some(config.clone())
            } else {
                None
            }
        })
    }

    fn insert(&self, repo: &str, config: Result<Arc<Config>, ConfigurationError>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repo.to_string(), (config, Instant::now()));
    }
}

pub async fn get(
    gh: &GithubClient,
    cache: &ConfigCache,
    repo: &Repository,
) -> Result<Arc<Config>, ConfigurationError> {
    let full_name = repo.full_name();
    if let Some(config) = cache.get(&full_name) {
        log::trace!("returning config for {} from cache", full_name);
        config
    } else {
        log::trace!("fetching fresh config for {}", full_name);
        let res = get_fresh_config(gh, repo).await;
        cache.insert(&full_name, res.clone());
        res
    }
}

async fn get_fresh_config(
    gh: &GithubClient,
    repo: &Repository,
) -> Result<Arc<Config>, ConfigurationError> {
    let branch = if repo.default_branch.is_empty() {
        "master"
    } else {
        &repo.default_branch
    };
    let contents = gh
        .raw_file(&repo.full_name(), branch, CONFIG_FILE_NAME)
        .await
        .map_err(|e| ConfigurationError::Http(Arc::new(e)))?
        .ok_or(ConfigurationError::Missing)?;
    let config = Arc::new(parse(&contents)?);
    log::debug!("fresh configuration for {}: {:?}", repo.full_name(), config);
    Ok(config)
}

fn parse(contents: &[u8]) -> Result<Config, ConfigurationError> {
    let contents = String::from_utf8_lossy(contents);
    toml::from_str(&contents).map_err(ConfigurationError::Toml)
}

#[derive(Clone, Debug)]
pub enum ConfigurationError {
    Missing,
    Toml(toml::de::Error),
    Http(Arc<anyhow::Error>),
}

impl std::error::Error for ConfigurationError {}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigurationError::Missing => write!(
                f,
                "This repository is not enabled to use branchbot.\n\
                 Add a `{CONFIG_FILE_NAME}` in the root of the default branch to enable it."
            ),
            ConfigurationError::Toml(e) => {
                write!(f, "Malformed `{CONFIG_FILE_NAME}` in default branch.\n{e}")
            }
            ConfigurationError::Http(e) => {
                write!(f, "Failed to query configuration for this repository: {e:#}")
            }
        }
    }
}
