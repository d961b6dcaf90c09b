//! Shared fixtures for the integration suites: on-disk catalog builders
//! and in-memory fakes for the environment, download, and transport
//! collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use almanac::catalog::CatalogIndex;
use almanac::ports::{CatalogTransport, Downloader, EnvironmentHandle, EnvironmentProvider};
use almanac::solution::parse_solution;
use almanac::task::TaskLog;
use almanac::{Almanac, AlmanacConfig};

pub fn leaf_yaml(group: &str, name: &str, version: &str) -> String {
    format!(
        r#"setup:
  group: {group}
  name: {name}
  version: "{version}"
  title: {name} fixture
run: |
  say {name}
install: |
  provision {name}
test: |
  verify {name}
uninstall: |
  teardown {name}
"#
    )
}

pub fn leaf_yaml_with(group: &str, name: &str, version: &str, setup_extra: &str) -> String {
    format!(
        r#"setup:
  group: {group}
  name: {name}
  version: "{version}"
{setup_extra}run: |
  say {name}
install: |
  provision {name}
"#
    )
}

/// Write `yaml` as `<dir>/solution.yaml`, creating `dir`.
pub fn write_solution_dir(dir: &Path, yaml: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("solution.yaml"), yaml).unwrap();
}

/// Lay out a catalog source tree: `index.json` plus
/// `solutions/<g>/<n>/<v>/solution.yaml` for each document.
pub fn write_source_catalog(dir: &Path, name: &str, docs: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    let mut index = CatalogIndex::new(name);
    for yaml in docs {
        let solution = parse_solution(yaml, Path::new("fixture")).unwrap();
        let rel = solution.coordinates().as_relative_path();
        write_solution_dir(&dir.join("solutions").join(rel), yaml);
        index.update(solution.setup).unwrap();
    }
    index.export(&dir.join("index.json")).unwrap();
}

/// An index-only source tree, the shape a remote catalog serves: solution
/// content is only available through the download collaborator.
pub fn write_index_only_catalog(dir: &Path, name: &str, docs: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    let mut index = CatalogIndex::new(name);
    for yaml in docs {
        let solution = parse_solution(yaml, Path::new("fixture")).unwrap();
        index.update(solution.setup).unwrap();
    }
    index.export(&dir.join("index.json")).unwrap();
}

fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// What one `run_script` call saw.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub environment: String,
    pub script: String,
    pub args: Vec<String>,
    pub env_vars: HashMap<String, String>,
}

/// Environment provider that creates plain directories and records every
/// script invocation instead of executing anything.
pub struct FakeEnvironments {
    root: PathBuf,
    runs: Mutex<Vec<RunRecord>>,
    failures: Mutex<Vec<(String, i32)>>,
}

impl FakeEnvironments {
    pub fn new(root: &Path) -> Arc<Self> {
        Arc::new(Self {
            root: root.to_path_buf(),
            runs: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        })
    }

    /// Scripts containing `needle` will exit with `code`.
    pub fn fail_matching(&self, needle: &str, code: i32) {
        self.failures.lock().unwrap().push((needle.to_string(), code));
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl EnvironmentProvider for FakeEnvironments {
    async fn get_or_create(&self, name: &str) -> Result<EnvironmentHandle> {
        let path = self.root.join(name);
        fs::create_dir_all(&path)?;
        Ok(EnvironmentHandle {
            name: name.to_string(),
            path,
        })
    }

    async fn run_script(
        &self,
        environment: &EnvironmentHandle,
        script: &str,
        args: &[String],
        env_vars: &HashMap<String, String>,
        _pipe_output: bool,
        log: &TaskLog,
    ) -> Result<i32> {
        log.info(format!("script start in {}", environment.name));
        self.runs.lock().unwrap().push(RunRecord {
            environment: environment.name.clone(),
            script: script.to_string(),
            args: args.to_vec(),
            env_vars: env_vars.clone(),
        });
        for (needle, code) in self.failures.lock().unwrap().iter() {
            if script.contains(needle) {
                log.error(format!("script exited with {}", code));
                return Ok(*code);
            }
        }
        Ok(0)
    }
}

/// Downloader fake: urls are staged against local content directories; a
/// "download" drops a marker file and `extract` copies the staged content.
pub struct FakeDownloader {
    urls: Mutex<HashMap<String, PathBuf>>,
    staged: Mutex<HashMap<PathBuf, PathBuf>>,
    downloads: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            urls: Mutex::new(HashMap::new()),
            staged: Mutex::new(HashMap::new()),
            downloads: Mutex::new(Vec::new()),
        })
    }

    pub fn stage_url(&self, url: &str, content_dir: &Path) {
        self.urls
            .lock()
            .unwrap()
            .insert(url.to_string(), content_dir.to_path_buf());
    }

    /// Make a path on disk behave like an archive of `content_dir`.
    pub fn stage_archive(&self, archive: &Path, content_dir: &Path) {
        self.staged
            .lock()
            .unwrap()
            .insert(archive.to_path_buf(), content_dir.to_path_buf());
    }

    pub fn downloaded_urls(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        let content = self
            .urls
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("HTTP 404 for {}", url))?;
        self.downloads.lock().unwrap().push(url.to_string());
        fs::create_dir_all(dest_dir)?;
        let archive = dest_dir.join("solution.zip");
        fs::write(&archive, url)?;
        self.staged.lock().unwrap().insert(archive.clone(), content);
        Ok(archive)
    }

    async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<PathBuf> {
        let content = self
            .staged
            .lock()
            .unwrap()
            .get(archive)
            .cloned()
            .ok_or_else(|| anyhow!("not a zip archive: {}", archive.display()))?;
        copy_dir(&content, dest_dir)?;
        Ok(dest_dir.to_path_buf())
    }
}

/// Transport fake mirroring staged source directories, with a switch to
/// simulate the remote being unreachable.
pub struct FakeTransport {
    sources: Mutex<HashMap<String, PathBuf>>,
    offline: Mutex<bool>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sources: Mutex::new(HashMap::new()),
            offline: Mutex::new(false),
        })
    }

    pub fn stage(&self, src: &str, dir: &Path) {
        self.sources
            .lock()
            .unwrap()
            .insert(src.to_string(), dir.to_path_buf());
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }
}

#[async_trait]
impl CatalogTransport for FakeTransport {
    async fn clone_or_update(&self, src: &str, local_path: &Path) -> Result<()> {
        if *self.offline.lock().unwrap() {
            return Err(anyhow!("remote unreachable"));
        }
        let dir = self
            .sources
            .lock()
            .unwrap()
            .get(src)
            .cloned()
            .ok_or_else(|| anyhow!("unknown remote {}", src))?;
        copy_dir(&dir, local_path)
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Everything an integration test needs: a collection root plus the three
/// collaborator fakes, pre-wired into an opened [`Almanac`].
pub struct Harness {
    pub environments: Arc<FakeEnvironments>,
    pub downloader: Arc<FakeDownloader>,
    pub transport: Arc<FakeTransport>,
}

impl Harness {
    pub fn new(root: &Path) -> Self {
        Self {
            environments: FakeEnvironments::new(&root.join("environments")),
            downloader: FakeDownloader::new(),
            transport: FakeTransport::new(),
        }
    }

    pub async fn open(&self, root: &Path) -> Almanac {
        let config = AlmanacConfig::new(root.join("collection"));
        Almanac::open(
            config,
            self.environments.clone(),
            self.downloader.clone(),
            self.transport.clone(),
        )
        .await
        .unwrap()
    }
}
