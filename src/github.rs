pub(crate) mod client;
pub(crate) mod refs;
mod webhook;

pub use client::{GithubClient, default_token_from_env};
pub use refs::RefDeleter;
pub use webhook::event::*;
pub use webhook::{EventName, check_payload_signed, deserialize_payload, webhook};

pub type PullRequestNumber = u64;
