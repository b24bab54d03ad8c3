//! Artifact sync triggers
//!
//! Copy the published artifact set to another location. The local
//! directory mirror compares content hashes and only copies what differs;
//! the remote variants delegate to `rsync` or the `aws` CLI, which are
//! themselves incremental.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::process::Command;

use crate::core::config::TriggerSettings;
use crate::core::package::is_package_file;
use crate::core::store::RepositorySnapshot;
use crate::core::trigger::{decode_settings, Trigger, TriggerContext};
use crate::error::TriggerError;
use crate::infra::filesystem;

/// Files touched by one mirror run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    /// Files copied because they were new or different
    pub copied: usize,
    /// Files already identical
    pub unchanged: usize,
    /// Stale files removed
    pub removed: usize,
}

#[derive(Debug, Deserialize)]
struct DirectorySettings {
    path: PathBuf,
    #[serde(default)]
    prune: bool,
}

/// Mirrors published artifacts into a local directory
#[derive(Debug, Clone)]
pub struct DirectorySyncTrigger {
    name: String,
    source: PathBuf,
    target: PathBuf,
    prune: bool,
}

impl DirectorySyncTrigger {
    /// Create a mirror from `source` into `target`
    pub fn new(name: impl Into<String>, source: PathBuf, target: PathBuf) -> Self {
        Self {
            name: name.into(),
            source,
            target,
            prune: false,
        }
    }

    /// Remove files no longer published
    #[must_use]
    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    /// Mirror `files` synchronously
    pub fn mirror(&self, files: &BTreeSet<String>) -> io::Result<MirrorStats> {
        let mut stats = MirrorStats::default();
        filesystem::create_dir_all(&self.target)?;

        for file in files {
            let source = self.source.join(file);
            if !source.is_file() {
                tracing::warn!("Published file {} is missing", source.display());
                continue;
            }
            let target = self.target.join(file);
            if target.is_file() && filesystem::sha256_file(&target)? == filesystem::sha256_file(&source)? {
                stats.unchanged += 1;
                continue;
            }
            filesystem::atomic_copy(&source, &target)?;
            stats.copied += 1;
        }

        if self.prune {
            for entry in fs::read_dir(&self.target)? {
                let path = entry?.path();
                if !path.is_file() || !is_published_file(&path) {
                    continue;
                }
                let published = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| files.contains(name));
                if !published {
                    filesystem::remove_file(&path)?;
                    stats.removed += 1;
                }
            }
        }
        Ok(stats)
    }
}

fn is_published_file(path: &Path) -> bool {
    if is_package_file(path) {
        return true;
    }
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(".sig") && name.contains(".pkg."))
}

impl Trigger for DirectorySyncTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a self,
        snapshot: &'a RepositorySnapshot,
        _changed: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, Result<(), TriggerError>> {
        let files: BTreeSet<String> = snapshot
            .artifacts()
            .map(|(_, file)| file.to_string())
            .collect();
        let trigger = self.clone();
        Box::pin(async move {
            let target = trigger.target.clone();
            let stats = tokio::task::spawn_blocking(move || trigger.mirror(&files))
                .await
                .map_err(|e| TriggerError::Failed {
                    name: self.name.clone(),
                    error: e.to_string(),
                })?
                .map_err(|e| TriggerError::Io {
                    path: target,
                    error: e.to_string(),
                })?;
            tracing::info!(
                "Mirrored into {}: {} copied, {} unchanged, {} removed",
                self.target.display(),
                stats.copied,
                stats.unchanged,
                stats.removed
            );
            Ok(())
        })
    }
}

/// Factory for `type = "directory"`
pub fn directory_factory(
    settings: &TriggerSettings,
    context: &TriggerContext,
) -> Result<Box<dyn Trigger>, TriggerError> {
    let decoded: DirectorySettings = decode_settings(settings)?;
    Ok(Box::new(
        DirectorySyncTrigger::new(&settings.name, context.paths.repository(), decoded.path)
            .with_prune(decoded.prune),
    ))
}

/// Runs an external sync command
#[derive(Debug, Clone)]
pub struct CommandSyncTrigger {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandSyncTrigger {
    /// Create a trigger running `program args`
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
        }
    }

    /// Program to run
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full argument list
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Trigger for CommandSyncTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a self,
        _snapshot: &'a RepositorySnapshot,
        _changed: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, Result<(), TriggerError>> {
        Box::pin(async move {
            tracing::debug!("Running {} {}", self.program, self.args.join(" "));
            let output = Command::new(&self.program)
                .args(&self.args)
                .output()
                .await
                .map_err(|e| TriggerError::Failed {
                    name: self.name.clone(),
                    error: format!("{}: {e}", self.program),
                })?;
            if !output.status.success() {
                return Err(TriggerError::Failed {
                    name: self.name.clone(),
                    error: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            Ok(())
        })
    }
}

fn default_rsync() -> String {
    "rsync".to_string()
}

fn default_rsync_args() -> Vec<String> {
    vec!["--archive".to_string(), "--delete".to_string()]
}

#[derive(Debug, Deserialize)]
struct RsyncSettings {
    target: String,
    #[serde(default = "default_rsync")]
    command: String,
    #[serde(default = "default_rsync_args")]
    args: Vec<String>,
}

/// Factory for `type = "rsync"`
pub fn rsync_factory(
    settings: &TriggerSettings,
    context: &TriggerContext,
) -> Result<Box<dyn Trigger>, TriggerError> {
    let decoded: RsyncSettings = decode_settings(settings)?;
    let mut args = decoded.args;
    args.push(format!("{}/", context.paths.repository().display()));
    args.push(decoded.target);
    Ok(Box::new(CommandSyncTrigger::new(&settings.name, decoded.command, args)))
}

fn default_aws() -> String {
    "aws".to_string()
}

#[derive(Debug, Deserialize)]
struct S3Settings {
    bucket: String,
    #[serde(default = "default_aws")]
    command: String,
    #[serde(default)]
    args: Vec<String>,
}

/// Factory for `type = "s3"`
pub fn s3_factory(
    settings: &TriggerSettings,
    context: &TriggerContext,
) -> Result<Box<dyn Trigger>, TriggerError> {
    let decoded: S3Settings = decode_settings(settings)?;
    let bucket = decoded.bucket.trim_end_matches('/');
    let destination = if bucket.starts_with("s3://") {
        format!("{bucket}/{}", context.paths.architecture())
    } else {
        format!("s3://{bucket}/{}", context.paths.architecture())
    };

    let mut args = vec![
        "s3".to_string(),
        "sync".to_string(),
        context.paths.repository().display().to_string(),
        destination,
    ];
    args.extend(decoded.args);
    Ok(Box::new(CommandSyncTrigger::new(&settings.name, decoded.command, args)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::dirs::RepositoryPaths;
    use tempfile::TempDir;

    fn files(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| (*name).to_string()).collect()
    }

    fn settings(kind: &str, table: &str) -> TriggerSettings {
        TriggerSettings {
            name: "sync".to_string(),
            kind: kind.to_string(),
            required: false,
            settings: toml::from_str(table).unwrap(),
        }
    }

    #[test]
    fn test_mirror_copies_only_changes() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("repo");
        let target = temp.path().join("mirror");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("foo-1-1-any.pkg.tar.zst"), b"foo").unwrap();
        fs::write(source.join("bar-1-1-any.pkg.tar.zst"), b"bar").unwrap();

        let trigger = DirectorySyncTrigger::new("mirror", source.clone(), target.clone());
        let published = files(&["foo-1-1-any.pkg.tar.zst", "bar-1-1-any.pkg.tar.zst"]);

        let first = trigger.mirror(&published).unwrap();
        assert_eq!(first.copied, 2);

        let second = trigger.mirror(&published).unwrap();
        assert_eq!(second, MirrorStats { copied: 0, unchanged: 2, removed: 0 });

        fs::write(source.join("foo-1-1-any.pkg.tar.zst"), b"foo rebuilt").unwrap();
        let third = trigger.mirror(&published).unwrap();
        assert_eq!(third.copied, 1);
        assert_eq!(fs::read(target.join("foo-1-1-any.pkg.tar.zst")).unwrap(), b"foo rebuilt");
    }

    #[test]
    fn test_mirror_prunes_stale_files() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("repo");
        let target = temp.path().join("mirror");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&target).unwrap();
        fs::write(source.join("foo-2-1-any.pkg.tar.zst"), b"new").unwrap();
        fs::write(target.join("foo-1-1-any.pkg.tar.zst"), b"old").unwrap();
        fs::write(target.join("foo-1-1-any.pkg.tar.zst.sig"), b"old sig").unwrap();
        fs::write(target.join("index.html"), b"keep").unwrap();

        let trigger = DirectorySyncTrigger::new("mirror", source, target.clone()).with_prune(true);
        let stats = trigger.mirror(&files(&["foo-2-1-any.pkg.tar.zst"])).unwrap();
        assert_eq!(stats.removed, 2);
        assert!(target.join("foo-2-1-any.pkg.tar.zst").exists());
        assert!(!target.join("foo-1-1-any.pkg.tar.zst").exists());
        assert!(target.join("index.html").exists());
    }

    #[test]
    fn test_mirror_without_prune_keeps_files() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("mirror");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("old-1-1-any.pkg.tar.zst"), b"old").unwrap();

        let trigger = DirectorySyncTrigger::new("mirror", temp.path().join("repo"), target.clone());
        trigger.mirror(&BTreeSet::new()).unwrap();
        assert!(target.join("old-1-1-any.pkg.tar.zst").exists());
    }

    #[test]
    fn test_rsync_factory_args() {
        let context = TriggerContext::new("custom", RepositoryPaths::new("/srv/repo", "x86_64"));
        let trigger = rsync_factory(&settings("rsync", "target = \"mirror:/srv/arch\""), &context).unwrap();
        assert_eq!(trigger.name(), "sync");

        let decoded: RsyncSettings = decode_settings(&settings("rsync", "target = \"t\"")).unwrap();
        assert_eq!(decoded.command, "rsync");
        assert_eq!(decoded.args, default_rsync_args());
    }

    #[test]
    fn test_s3_factory_requires_bucket() {
        let context = TriggerContext::new("custom", RepositoryPaths::new("/srv/repo", "x86_64"));
        assert!(matches!(
            s3_factory(&settings("s3", ""), &context),
            Err(TriggerError::InvalidSettings { .. })
        ));
        assert!(s3_factory(&settings("s3", "bucket = \"packages\""), &context).is_ok());
    }

    #[tokio::test]
    async fn test_command_trigger_exit_status() {
        let snapshot = RepositorySnapshot::default();
        let changed = BTreeSet::new();

        let ok = CommandSyncTrigger::new("ok", "true", Vec::new());
        assert!(ok.run(&snapshot, &changed).await.is_ok());

        let failing = CommandSyncTrigger::new(
            "bad",
            "sh",
            vec!["-c".to_string(), "echo denied >&2; exit 1".to_string()],
        );
        match failing.run(&snapshot, &changed).await {
            Err(TriggerError::Failed { name, error }) => {
                assert_eq!(name, "bad");
                assert_eq!(error, "denied");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
