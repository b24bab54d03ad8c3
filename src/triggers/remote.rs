//! Git remote push trigger
//!
//! Keeps a git repository of build descriptions in step with the managed
//! bases: each changed base's sources, with the PKGBUILD patches applied,
//! are committed under `<base>/` and pushed. Removed bases are deleted.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use serde::Deserialize;
use tempfile::TempDir;
use tokio::process::Command;

use crate::core::config::TriggerSettings;
use crate::core::patch::{PkgbuildPatch, PKGBUILD};
use crate::core::store::RepositorySnapshot;
use crate::core::trigger::{decode_settings, Trigger, TriggerContext};
use crate::error::TriggerError;
use crate::infra::filesystem;

fn default_git() -> String {
    "git".to_string()
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_user() -> String {
    "repokeeper".to_string()
}

fn default_email() -> String {
    "repokeeper@localhost".to_string()
}

#[derive(Debug, Deserialize)]
struct RemotePushSettings {
    push_url: String,
    #[serde(default = "default_branch")]
    push_branch: String,
    #[serde(default = "default_user")]
    commit_user: String,
    #[serde(default = "default_email")]
    commit_email: String,
    #[serde(default = "default_git")]
    command: String,
}

/// Pushes build descriptions of changed bases to a git remote
#[derive(Debug, Clone)]
pub struct RemotePushTrigger {
    name: String,
    command: String,
    url: String,
    branch: String,
    user: String,
    email: String,
    sources: PathBuf,
    patches: Vec<PkgbuildPatch>,
}

impl RemotePushTrigger {
    /// Create a trigger pushing to `branch` of `url`
    pub fn new(name: impl Into<String>, url: impl Into<String>, branch: impl Into<String>, sources: PathBuf) -> Self {
        Self {
            name: name.into(),
            command: default_git(),
            url: url.into(),
            branch: branch.into(),
            user: default_user(),
            email: default_email(),
            sources,
            patches: Vec::new(),
        }
    }

    /// Apply PKGBUILD patches to pushed sources
    #[must_use]
    pub fn with_patches(mut self, patches: Vec<PkgbuildPatch>) -> Self {
        self.patches = patches;
        self
    }

    /// Replace `<base>/` in `clone` with the current sources, or drop it
    /// when the base is no longer managed
    fn stage(&self, clone: &Path, base: &str, managed: bool) -> Result<(), TriggerError> {
        let io = |path: &Path, e: std::io::Error| TriggerError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        };
        let target = clone.join(base);
        if target.exists() {
            fs::remove_dir_all(&target).map_err(|e| io(&target, e))?;
        }
        let sources = self.sources.join(base);
        if !managed || !sources.is_dir() {
            return Ok(());
        }
        filesystem::copy_dir_excluding(&sources, &target, &[".git"]).map_err(|e| io(&sources, e))?;
        let pkgbuild = target.join(PKGBUILD);
        for patch in self.patches.iter().filter(|patch| patch.applies_to(base)) {
            patch.write(&pkgbuild).map_err(|e| io(&pkgbuild, e))?;
        }
        Ok(())
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<String, TriggerError> {
        tracing::debug!("Running {} {}", self.command, args.join(" "));
        let output = Command::new(&self.command)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .map_err(|e| TriggerError::Failed {
                name: self.name.clone(),
                error: format!("{}: {e}", self.command),
            })?;
        if !output.status.success() {
            return Err(TriggerError::Failed {
                name: self.name.clone(),
                error: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Trigger for RemotePushTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a self,
        snapshot: &'a RepositorySnapshot,
        changed: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, Result<(), TriggerError>> {
        Box::pin(async move {
            if changed.is_empty() {
                return Ok(());
            }
            let workdir = TempDir::new().map_err(|e| TriggerError::Io {
                path: std::env::temp_dir(),
                error: e.to_string(),
            })?;
            let clone = workdir.path().join("remote");
            let clone_arg = clone.display().to_string();
            self.git(
                workdir.path(),
                &["clone", "--depth=1", "--branch", &self.branch, &self.url, &clone_arg],
            )
            .await?;

            for base in changed {
                self.stage(&clone, base, snapshot.get(base).is_some())?;
            }

            self.git(&clone, &["add", "--all"]).await?;
            if self.git(&clone, &["status", "--porcelain"]).await?.trim().is_empty() {
                tracing::debug!("Trigger {}: remote already up to date", self.name);
                return Ok(());
            }

            let bases: Vec<&str> = changed.iter().map(String::as_str).collect();
            let message = format!("Update {}", bases.join(", "));
            let user = format!("user.name={}", self.user);
            let email = format!("user.email={}", self.email);
            self.git(&clone, &["-c", &user, "-c", &email, "commit", "--quiet", "--message", &message])
                .await?;
            self.git(&clone, &["push", "origin", &self.branch]).await?;
            tracing::info!("Pushed {} base(s) to {} ({})", bases.len(), self.url, self.branch);
            Ok(())
        })
    }
}

/// Factory for `type = "remote-push"`
pub fn remote_push_factory(
    settings: &TriggerSettings,
    context: &TriggerContext,
) -> Result<Box<dyn Trigger>, TriggerError> {
    let decoded: RemotePushSettings = decode_settings(settings)?;
    let mut trigger = RemotePushTrigger::new(
        &settings.name,
        decoded.push_url,
        decoded.push_branch,
        context.paths.sources(),
    )
    .with_patches(context.patches.clone());
    trigger.command = decoded.command;
    trigger.user = decoded.commit_user;
    trigger.email = decoded.commit_email;
    Ok(Box::new(trigger))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::package::Package;
    use crate::core::patch::PatchValue;
    use crate::core::status::BuildStatus;
    use crate::core::store::PackageRecord;
    use crate::core::version::PackageVersion;
    use crate::infra::dirs::RepositoryPaths;
    use std::collections::BTreeMap;

    fn run_git(dir: &Path, args: &[&str]) -> String {
        let output = std::process::Command::new("git")
            .args(["-c", "user.name=test", "-c", "user.email=test@localhost"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    /// Bare remote with one commit on `master`
    fn remote(temp: &Path) -> PathBuf {
        let bare = temp.join("remote.git");
        fs::create_dir_all(&bare).unwrap();
        run_git(&bare, &["init", "--quiet", "--bare"]);

        let seed = temp.join("seed");
        fs::create_dir_all(&seed).unwrap();
        run_git(&seed, &["init", "--quiet"]);
        fs::create_dir_all(seed.join("stale")).unwrap();
        fs::write(seed.join("stale/PKGBUILD"), "pkgname=stale\n").unwrap();
        run_git(&seed, &["add", "--all"]);
        run_git(&seed, &["commit", "--quiet", "--message", "init"]);
        run_git(&seed, &["push", "--quiet", bare.to_str().unwrap(), "HEAD:refs/heads/master"]);
        bare
    }

    fn snapshot(bases: &[&str]) -> RepositorySnapshot {
        let records: BTreeMap<String, PackageRecord> = bases
            .iter()
            .map(|base| {
                (
                    (*base).to_string(),
                    PackageRecord {
                        package: Package::new(*base, PackageVersion::parse("1-1").unwrap()),
                        status: BuildStatus::success(),
                        artifacts: BTreeSet::new(),
                    },
                )
            })
            .collect();
        RepositorySnapshot::new(records)
    }

    fn changed(bases: &[&str]) -> BTreeSet<String> {
        bases.iter().map(|base| (*base).to_string()).collect()
    }

    #[tokio::test]
    async fn test_pushes_changed_and_removes_dropped_bases() {
        if which::which("git").is_err() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let bare = remote(temp.path());
        let sources = temp.path().join("sources");
        fs::create_dir_all(sources.join("foo/.git")).unwrap();
        fs::write(sources.join("foo/PKGBUILD"), "pkgname=foo\n").unwrap();
        fs::write(sources.join("foo/.git/HEAD"), "ref").unwrap();

        let trigger = RemotePushTrigger::new("push", bare.display().to_string(), "master", sources)
            .with_patches(vec![PkgbuildPatch::new("pkgrel", PatchValue::Single("2".to_string()))]);
        trigger
            .run(&snapshot(&["foo"]), &changed(&["foo", "stale"]))
            .await
            .unwrap();

        let files = run_git(&bare, &["ls-tree", "-r", "--name-only", "master"]);
        assert_eq!(files.lines().collect::<Vec<_>>(), vec!["foo/PKGBUILD"]);
        let pkgbuild = run_git(&bare, &["show", "master:foo/PKGBUILD"]);
        assert_eq!(pkgbuild, "pkgname=foo\n\npkgrel=2\n");
        let log = run_git(&bare, &["log", "--format=%an %s", "-1", "master"]);
        assert_eq!(log.trim(), "repokeeper Update foo, stale");

        // a second run has nothing to commit
        trigger
            .run(&snapshot(&["foo"]), &changed(&["foo", "stale"]))
            .await
            .unwrap();
        let count = run_git(&bare, &["rev-list", "--count", "master"]);
        assert_eq!(count.trim(), "2");
    }

    #[tokio::test]
    async fn test_unreachable_remote_fails() {
        if which::which("git").is_err() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let trigger = RemotePushTrigger::new(
            "push",
            temp.path().join("missing.git").display().to_string(),
            "master",
            temp.path().join("sources"),
        );
        let result = trigger.run(&snapshot(&["foo"]), &changed(&["foo"])).await;
        assert!(matches!(result, Err(TriggerError::Failed { .. })));
    }

    #[tokio::test]
    async fn test_nothing_changed_skips_git() {
        let mut trigger = RemotePushTrigger::new("push", "unused", "master", PathBuf::from("/nonexistent"));
        trigger.command = "/nonexistent/git".to_string();
        assert!(trigger.run(&snapshot(&[]), &BTreeSet::new()).await.is_ok());
    }

    #[test]
    fn test_factory_settings() {
        let context = TriggerContext::new("custom", RepositoryPaths::new("/srv/repo", "x86_64"));
        let settings = |table: &str| TriggerSettings {
            name: "push".to_string(),
            kind: "remote-push".to_string(),
            required: false,
            settings: toml::from_str(table).unwrap(),
        };
        assert!(remote_push_factory(&settings(""), &context).is_err());

        let decoded: RemotePushSettings =
            decode_settings(&settings("push_url = \"git@example.com:pkgbuilds.git\"")).unwrap();
        assert_eq!(decoded.push_branch, "master");
        assert_eq!(decoded.command, "git");
        assert_eq!(decoded.commit_user, "repokeeper");
        assert!(remote_push_factory(&settings("push_url = \"u\"\npush_branch = \"main\""), &context).is_ok());
    }
}
