//! Interfaces to the collaborators the core depends on but does not
//! implement: environment management, content download/extraction, and the
//! transport that syncs remote catalogs. Implementations live in the
//! embedding application; tests use in-crate fakes.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::task::TaskLog;

/// An environment as handed out by the provider. The core never looks
/// inside; it only passes the handle back when running scripts.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentHandle {
    pub name: String,
    pub path: PathBuf,
}

#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// Return the environment with the given name, creating it if needed.
    async fn get_or_create(&self, name: &str) -> Result<EnvironmentHandle>;

    /// Run `script` inside `environment` and return the process exit code.
    /// Output is streamed line by line into `log` while the process runs,
    /// and mirrored to the subscriber when `pipe_output` is set.
    async fn run_script(
        &self,
        environment: &EnvironmentHandle,
        script: &str,
        args: &[String],
        env_vars: &HashMap<String, String>,
        pipe_output: bool,
        log: &TaskLog,
    ) -> Result<i32>;
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch `url` into `dest_dir` and return the downloaded file's path.
    /// Must fail on any non-success HTTP status.
    async fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf>;

    /// Unpack a zip archive into `dest_dir` and return the extraction root.
    /// Must fail when `archive` is not a zip.
    async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<PathBuf>;
}

/// Transport for git-backed remote catalogs.
#[async_trait]
pub trait CatalogTransport: Send + Sync {
    /// Make `local_path` an up-to-date copy of `src`.
    async fn clone_or_update(&self, src: &str, local_path: &Path) -> Result<()>;
}
