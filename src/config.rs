//! Runtime configuration, from flags or the environment.
//!
//! | Flag              | Variable                    | Default        |
//! |-------------------|-----------------------------|----------------|
//! | `--owner`         | `BRANCH_SYNC_OWNER`         |                |
//! | `--repo`          | `BRANCH_SYNC_REPO`          |                |
//! | `--source`        | `BRANCH_SYNC_SOURCE`        |                |
//! | `--target`        | `BRANCH_SYNC_TARGET`        |                |
//! | `--token`         | `GITHUB_TOKEN`              |                |
//! | `--lookback-days` | `BRANCH_SYNC_LOOKBACK_DAYS` | 60             |
//! | `--page-size`     | `BRANCH_SYNC_PAGE_SIZE`     | 1000           |
//! | `--listen`        | `BRANCH_SYNC_LISTEN`        | `0.0.0.0:3000` |

use std::fmt;
use std::net::SocketAddr;

use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use thiserror::Error;

use crate::binding::Binding;
use crate::types::RepoId;
use crate::workflow::SyncOptions;

pub const DEFAULT_LOOKBACK_DAYS: u32 = 60;
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Constraints clap cannot express on a single argument.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {arg}: {value:?} ({reason})")]
    Invalid {
        arg: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("source and target are both {0}")]
    SameBranch(String),
}

#[derive(Clone, PartialEq, Eq, Parser)]
#[command(
    name = "branch-sync",
    version,
    about = "Compare two branches and cherry-pick the commits one is missing",
    args_override_self = true
)]
pub struct SyncConfig {
    /// Owner of the repository.
    #[arg(long, env = "BRANCH_SYNC_OWNER", value_parser = NonEmptyStringValueParser::new())]
    pub owner: String,

    /// Repository name.
    #[arg(long, env = "BRANCH_SYNC_REPO", value_parser = NonEmptyStringValueParser::new())]
    pub repo: String,

    /// Branch whose commits are offered for picking.
    #[arg(long, env = "BRANCH_SYNC_SOURCE", value_parser = NonEmptyStringValueParser::new())]
    pub source: String,

    /// Branch picked commits land on.
    #[arg(long, env = "BRANCH_SYNC_TARGET", value_parser = NonEmptyStringValueParser::new())]
    pub target: String,

    #[arg(
        long,
        env = "GITHUB_TOKEN",
        hide_env_values = true,
        value_parser = NonEmptyStringValueParser::new()
    )]
    pub token: String,

    /// How far back to list commits on both branches.
    #[arg(long, env = "BRANCH_SYNC_LOOKBACK_DAYS", default_value_t = DEFAULT_LOOKBACK_DAYS)]
    pub lookback_days: u32,

    /// Upper bound on commits listed per branch.
    #[arg(long, env = "BRANCH_SYNC_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// HTTP socket address to bind.
    #[arg(long, env = "BRANCH_SYNC_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("source", &self.source)
            .field("target", &self.target)
            .field("token", &"<redacted>")
            .field("lookback_days", &self.lookback_days)
            .field("page_size", &self.page_size)
            .field("listen", &self.listen)
            .finish()
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                arg: "--page-size",
                value: self.page_size.to_string(),
                reason: "must be positive",
            });
        }
        if self.source == self.target {
            return Err(ConfigError::SameBranch(self.source.clone()));
        }
        Ok(())
    }

    pub fn repo_id(&self) -> RepoId {
        RepoId::new(&self.owner, &self.repo)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            source: self.source.clone(),
            target: self.target.clone(),
            lookback_days: self.lookback_days,
            max_commits: self.page_size,
        }
    }

    pub fn binding(&self) -> Binding {
        Binding::new(self.repo_id(), &self.source, &self.target)
    }
}
