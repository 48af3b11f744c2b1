//! Concurrent install/update orchestration.
//!
//! Binaries are fetched in parallel worker tasks; each env syncs as one
//! task (the file loop inside an env stays serial to preserve ordering and
//! resolver prompts). Workers collect results that the single lock owner
//! applies in completion order; the caller then writes the lock once.
//!
//! Interactive conflict prompts are serialized through a mutex so two
//! workers never interleave stdin reads.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::cancel::CancelToken;
use crate::envsync::{ConflictResolver, EnvSyncer, SyncResult};
use crate::gitcache::GitCache;
use crate::install::{InstallOutcome, Installer, NullSink, ProgressSink};
use crate::lock::Lock;
use crate::manifest::{BinarySpec, EnvSpec, Strategy};
use crate::process::Runner;
use crate::provider::asset::AssetPicker;
use crate::provider::{Http, Registry};

/// Per-binary result of an install/update run.
#[derive(Debug)]
pub enum BinaryStatus {
  Installed(InstallOutcome),
  UpToDate { name: String, version: String },
  Failed { name: String, error: String },
}

impl BinaryStatus {
  pub fn name(&self) -> &str {
    match self {
      BinaryStatus::Installed(outcome) => &outcome.name,
      BinaryStatus::UpToDate { name, .. } => name,
      BinaryStatus::Failed { name, .. } => name,
    }
  }

  pub fn is_failure(&self) -> bool {
    matches!(self, BinaryStatus::Failed { .. })
  }
}

/// Per-env result of an update run.
#[derive(Debug)]
pub struct EnvReport {
  pub key: String,
  pub result: Result<SyncResult, String>,
}

/// Two env entries writing the same destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestCollision {
  pub dest: String,
  pub first: (String, String),
  pub second: (String, String),
}

/// Serializes resolver prompts across concurrent env tasks.
struct SerializedResolver {
  inner: Arc<dyn ConflictResolver>,
  gate: Mutex<()>,
}

impl ConflictResolver for SerializedResolver {
  fn resolve(&self, source_path: &str, dest_path: &str) -> Strategy {
    let _guard = self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    self.inner.resolve(source_path, dest_path)
  }
}

/// Shared context for a concurrent install/update run.
pub struct Orchestrator<R: Runner + Send + Sync + 'static> {
  pub registry: Arc<Registry>,
  pub http: Http,
  pub cache: Arc<GitCache<R>>,
  pub bin_dir: PathBuf,
  pub workspace: PathBuf,
  pub picker: Option<Arc<dyn AssetPicker>>,
  pub resolver: Option<Arc<dyn ConflictResolver>>,
  pub sink: Arc<dyn ProgressSink>,
}

impl<R: Runner + Send + Sync + 'static> Orchestrator<R> {
  pub fn new(cache: Arc<GitCache<R>>, bin_dir: PathBuf, workspace: PathBuf) -> Self {
    Orchestrator {
      registry: Arc::new(Registry::standard()),
      http: Http::new(),
      cache,
      bin_dir,
      workspace,
      picker: None,
      resolver: None,
      sink: Arc::new(NullSink),
    }
  }

  /// Install or update binaries concurrently.
  ///
  /// With `force` false, a binary whose file exists and whose lock entry
  /// already records the wanted version is reported `UpToDate` without a
  /// download. Results are applied to `lock` in completion order; the
  /// caller writes the lock.
  pub async fn install_binaries(
    &self,
    specs: &[BinarySpec],
    force: bool,
    lock: &mut Lock,
    cancel: &CancelToken,
  ) -> Vec<BinaryStatus> {
    if specs.is_empty() {
      return Vec::new();
    }

    let semaphore = Arc::new(Semaphore::new(specs.len()));
    let mut join_set: JoinSet<BinaryStatus> = JoinSet::new();

    for spec in specs {
      let spec = spec.clone();
      let registry = self.registry.clone();
      let http = self.http.clone();
      let cache = self.cache.clone();
      let bin_dir = self.bin_dir.clone();
      let picker = self.picker.clone();
      let sink = self.sink.clone();
      let cancel = cancel.clone();
      let semaphore = semaphore.clone();
      let locked = lock
        .find_binary(&display_name(&spec))
        .map(|e| e.version.clone());

      join_set.spawn(async move {
        let Ok(_permit) = semaphore.acquire().await else {
          return BinaryStatus::Failed {
            name: display_name(&spec),
            error: "worker pool closed".to_string(),
          };
        };

        let installer = Installer {
          registry: &registry,
          http: &http,
          runner: cache.runner(),
          cache: &cache,
          bin_dir: &bin_dir,
          picker: picker.as_deref(),
          sink: sink.as_ref(),
        };

        run_one_binary(&installer, &spec, force, locked, &bin_dir, &cancel).await
      });
    }

    let mut results = Vec::with_capacity(specs.len());
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok(status) => {
          if let BinaryStatus::Installed(outcome) = &status {
            lock.upsert_binary(outcome.to_lock_entry());
          }
          results.push(status);
        }
        Err(e) => error!(error = %e, "binary worker panicked"),
      }
    }

    info!(
      total = results.len(),
      failed = results.iter().filter(|r| r.is_failure()).count(),
      "binary run complete"
    );
    results
  }

  /// Sync envs concurrently, one task per env.
  ///
  /// Skipped results are reported but never overwrite the existing lock
  /// entry.
  pub async fn sync_envs(&self, envs: &[EnvSpec], lock: &mut Lock, cancel: &CancelToken) -> Vec<EnvReport> {
    if envs.is_empty() {
      return Vec::new();
    }

    let serialized: Option<Arc<SerializedResolver>> = self.resolver.as_ref().map(|resolver| {
      Arc::new(SerializedResolver {
        inner: resolver.clone(),
        gate: Mutex::new(()),
      })
    });

    let semaphore = Arc::new(Semaphore::new(envs.len()));
    let mut join_set: JoinSet<EnvReport> = JoinSet::new();

    for env in envs {
      let env = env.clone();
      let cache = self.cache.clone();
      let workspace = self.workspace.clone();
      let resolver = serialized.clone();
      let cancel = cancel.clone();
      let semaphore = semaphore.clone();
      let prev = lock.find_env(&env.ref_base, &env.label).cloned();

      join_set.spawn(async move {
        let Ok(_permit) = semaphore.acquire().await else {
          return EnvReport {
            key: env.key.clone(),
            result: Err("worker pool closed".to_string()),
          };
        };

        let mut syncer = EnvSyncer::new(&cache, &workspace);
        if let Some(resolver) = resolver.as_deref() {
          syncer = syncer.with_resolver(resolver);
        }

        let result = syncer
          .sync(&env, prev.as_ref(), &cancel)
          .await
          .map_err(|e| e.to_string());
        EnvReport { key: env.key, result }
      });
    }

    let mut reports = Vec::with_capacity(envs.len());
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok(report) => {
          if let Ok(result) = &report.result
            && !result.skipped
          {
            lock.upsert_env(result.to_lock_entry());
          }
          reports.push(report);
        }
        Err(e) => error!(error = %e, "env worker panicked"),
      }
    }

    reports
  }
}

async fn run_one_binary<R: Runner>(
  installer: &Installer<'_, R>,
  spec: &BinarySpec,
  force: bool,
  locked_version: Option<String>,
  bin_dir: &std::path::Path,
  cancel: &CancelToken,
) -> BinaryStatus {
  let name = display_name(spec);
  let dest = spec
    .file
    .as_ref()
    .map(PathBuf::from)
    .unwrap_or_else(|| bin_dir.join(&name));

  if !force && dest.is_file() {
    let wanted = match &spec.version {
      Some(version) => Ok(version.clone()),
      None => installer.latest_version(spec, cancel).await.map_err(|e| e.to_string()),
    };
    match wanted {
      Ok(wanted) => {
        if locked_version.as_deref() == Some(wanted.as_str()) {
          return BinaryStatus::UpToDate { name, version: wanted };
        }
      }
      Err(error) => {
        warn!(name = %name, error = %error, "cannot check latest version, reinstalling");
      }
    }
  }

  match installer.install(spec, cancel).await {
    Ok(outcome) => BinaryStatus::Installed(outcome),
    Err(e) => BinaryStatus::Failed {
      name,
      error: e.to_string(),
    },
  }
}

/// The file name a spec installs under.
pub fn display_name(spec: &BinarySpec) -> String {
  if let Some(alias) = &spec.alias {
    return alias.clone();
  }
  if spec.is_provider_ref() {
    spec.parsed_ref().binary_name()
  } else {
    spec.key.clone()
  }
}

/// Detect env entries whose lock files record the same destination.
pub fn dest_collisions(lock: &Lock) -> Vec<DestCollision> {
  let mut owners: std::collections::HashMap<&str, (String, &str)> = std::collections::HashMap::new();
  let mut collisions = Vec::new();

  for env in &lock.envs {
    let key = if env.label.is_empty() {
      env.ref_.clone()
    } else {
      format!("{}#{}", env.ref_, env.label)
    };
    for file in &env.files {
      if let Some((owner_key, owner_path)) = owners.get(file.dest.as_str()) {
        if *owner_key != key {
          collisions.push(DestCollision {
            dest: file.dest.clone(),
            first: (owner_key.clone(), owner_path.to_string()),
            second: (key.clone(), file.path.clone()),
          });
        }
        continue;
      }
      owners.insert(&file.dest, (key.clone(), &file.path));
    }
  }

  collisions
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lock::{EnvEntry, LockedFile};

  fn env_with_file(ref_: &str, label: &str, dest: &str, path: &str) -> EnvEntry {
    EnvEntry {
      ref_: ref_.to_string(),
      label: label.to_string(),
      files: vec![LockedFile {
        path: path.to_string(),
        dest: dest.to_string(),
        sha256: "00".repeat(32),
        mode: "644".to_string(),
        status: None,
      }],
      ..Default::default()
    }
  }

  #[test]
  fn display_name_prefers_alias() {
    let spec = BinarySpec {
      key: "github.com/derailed/k9s".to_string(),
      version: None,
      alias: Some("k9s-beta".to_string()),
      file: None,
      asset: None,
    };
    assert_eq!(display_name(&spec), "k9s-beta");

    let bare = BinarySpec {
      key: "github.com/derailed/k9s".to_string(),
      version: None,
      alias: None,
      file: None,
      asset: None,
    };
    assert_eq!(display_name(&bare), "k9s");
  }

  #[test]
  fn no_collision_within_one_env() {
    let mut lock = Lock::default();
    lock.envs.push(env_with_file("github.com/org/a", "", "cfg/x.yaml", "x.yaml"));
    assert!(dest_collisions(&lock).is_empty());
  }

  #[test]
  fn collision_across_envs_detected() {
    let mut lock = Lock::default();
    lock.envs.push(env_with_file("github.com/org/a", "", "cfg/x.yaml", "src/x.yaml"));
    lock.envs.push(env_with_file("github.com/org/b", "mon", "cfg/x.yaml", "other/x.yaml"));

    let collisions = dest_collisions(&lock);
    assert_eq!(collisions.len(), 1);
    assert_eq!(collisions[0].dest, "cfg/x.yaml");
    assert_eq!(collisions[0].first.0, "github.com/org/a");
    assert_eq!(collisions[0].second.0, "github.com/org/b#mon");
  }
}
