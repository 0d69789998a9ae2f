use std::time::{Duration, SystemTime};

use anyhow::Context;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Request, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tracing as log;

/// Retries after the initial request when GitHub's rate limit is exhausted.
const MAX_RATE_LIMIT_RETRIES: u32 = 2;

/// Finds the token in the user's environment.
pub fn default_token_from_env() -> anyhow::Result<SecretString> {
    std::env::var("GITHUB_TOKEN")
        // kept for retrocompatibility but usage is discouraged
        .or_else(|_| std::env::var("GITHUB_API_TOKEN"))
        .map(SecretString::from)
        .context("could not find token in GITHUB_TOKEN or GITHUB_API_TOKEN")
}

#[derive(Clone)]
pub struct GithubClient {
    token: SecretString,
    client: Client,
    pub(crate) api_url: String,
    raw_url: String,
    /// If `true`, requests will sleep if it hits GitHub's rate limit.
    retry_rate_limit: bool,
    /// Added to the time until the rate limit resets.
    rate_limit_padding: Duration,
}

impl GithubClient {
    pub fn new(token: SecretString, api_url: String, raw_url: String) -> Self {
        GithubClient {
            client: Client::new(),
            token,
            api_url,
            raw_url,
            retry_rate_limit: false,
            rate_limit_padding: Duration::from_secs(10),
        }
    }

    pub fn new_from_env() -> anyhow::Result<Self> {
        Ok(Self::new(
            default_token_from_env()?,
            std::env::var("GITHUB_API_URL")
                .unwrap_or_else(|_| "https://api.github.com".to_string()),
            std::env::var("GITHUB_RAW_URL")
                .unwrap_or_else(|_| "https://raw.githubusercontent.com".to_string()),
        ))
    }

    /// Sets whether or not this client will retry when it hits GitHub's rate limit.
    ///
    /// Just beware that the retry may take a long time (like 30 minutes,
    /// depending on various factors).
    pub fn set_retry_rate_limit(&mut self, retry: bool) {
        self.retry_rate_limit = retry;
    }

    pub(crate) async fn send_req(&self, req: RequestBuilder) -> anyhow::Result<(Bytes, String)> {
        log::debug!("send_req with {:?}", req);
        let req_dbg = format!("{req:?}");
        let req = req
            .build()
            .with_context(|| format!("building reqwest {req_dbg}"))?;

        let retry_req = req.try_clone();
        let mut resp = self.client.execute(req).await?;
        let mut retries = 0;
        while self.retry_rate_limit && retries < MAX_RATE_LIMIT_RETRIES {
            let Some(sleep) = self.needs_retry(&resp) else {
                break;
            };
            let Some(next) = retry_req.as_ref().and_then(Request::try_clone) else {
                break;
            };
            retries += 1;
            log::warn!(
                "Retrying after {} seconds, attempt {} of {}",
                sleep.as_secs(),
                retries,
                MAX_RATE_LIMIT_RETRIES,
            );
            tokio::time::sleep(sleep).await;
            resp = self.client.execute(next).await?;
        }
        let maybe_err = resp.error_for_status_ref().err();
        let body = resp
            .bytes()
            .await
            .with_context(|| format!("failed to read response body {req_dbg}"))?;
        if let Some(e) = maybe_err {
            return Err(anyhow::Error::new(e))
                .with_context(|| format!("response: {}", String::from_utf8_lossy(&body)));
        }

        Ok((body, req_dbg))
    }

    /// How long to wait before retrying `resp`, if it was rejected because
    /// the rate limit is used up. Malformed rate limit headers mean no retry.
    fn needs_retry(&self, resp: &Response) -> Option<Duration> {
        const REMAINING: &str = "X-RateLimit-Remaining";
        const RESET: &str = "X-RateLimit-Reset";

        if !matches!(
            resp.status(),
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
        ) {
            return None;
        }

        let headers = resp.headers();
        if headers.get(REMAINING)?.to_str().ok()? != "0" {
            return None;
        }
        let reset_time = headers.get(RESET)?.to_str().ok()?.parse::<u64>().ok()?;
        Some(Duration::from_secs(Self::calc_sleep(reset_time)) + self.rate_limit_padding)
    }

    fn calc_sleep(reset_time: u64) -> u64 {
        let epoch_time = SystemTime::UNIX_EPOCH
            .elapsed()
            .map(|d| d.as_secs())
            .unwrap_or_default();
        reset_time.saturating_sub(epoch_time)
    }

    /// Fetches a file from the raw content host.
    ///
    /// Returns `None` if the file does not exist on that branch.
    pub async fn raw_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
    ) -> anyhow::Result<Option<Bytes>> {
        let url = format!("{}/{repo}/{branch}/{path}", self.raw_url);
        let req = self.get(&url);
        let req_dbg = format!("{req:?}");
        let req = req
            .build()
            .with_context(|| format!("failed to build request {req_dbg:?}"))?;
        let resp = self.client.execute(req).await.context(req_dbg.clone())?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .with_context(|| format!("failed to read response body {req_dbg}"))?;
        match status {
            StatusCode::OK => Ok(Some(body)),
            StatusCode::NOT_FOUND => Ok(None),
            status => anyhow::bail!("failed to GET {}: {}", url, status),
        }
    }

    fn get(&self, url: &str) -> RequestBuilder {
        log::trace!("get {:?}", url);
        self.client.get(url).configure(self)
    }

    pub(crate) fn delete(&self, url: &str) -> RequestBuilder {
        log::trace!("delete {:?}", url);
        self.client.delete(url).configure(self)
    }
}

trait RequestSend: Sized {
    fn configure(self, g: &GithubClient) -> Self;
}

impl RequestSend for RequestBuilder {
    fn configure(self, g: &GithubClient) -> RequestBuilder {
        let builder = self.header(USER_AGENT, "branchbot");
        match reqwest::header::HeaderValue::from_maybe_shared(format!(
            "token {}",
            g.token.expose_secret()
        )) {
            Ok(mut auth) => {
                auth.set_sensitive(true);
                builder.header(AUTHORIZATION, auth)
            }
            // An unusable token is reported by GitHub as a 401 on the request.
            Err(_) => builder,
        }
    }
}
