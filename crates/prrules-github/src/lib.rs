//! GitHub collaborators: a pull request as a change source, and its comment
//! thread as the report sink.

pub mod client;
pub mod refs;

pub use client::GitHubClient;
pub use refs::{parse_pull_number, Repository};
