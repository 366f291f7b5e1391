//! Corpus-to-model adapter
//!
//! Turns a grammar corpus into decoder artifacts by running the external
//! n-gram trainer, binary packager and scorer packager in sequence. Every
//! build happens in a staging directory; artifacts are moved into place only
//! after all three tools succeed, so a failed build leaves the previous model
//! in use.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use tokio::process::Command;
use tokio::time::timeout;

use crate::grammar::Corpus;

/// Corpus text file name inside the models directory
pub const CORPUS_FILE: &str = "local_lm.txt";
const ARPA_FILE: &str = "local_lm.arpa";
const BINARY_FILE: &str = "local_lm.binary";
/// Scorer package file name inside the models directory
pub const SCORER_FILE: &str = "local_lm.scorer";

/// Default time allowed for each external tool
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Failure while building decoder artifacts
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{tool} not found")]
    ToolNotFound { tool: &'static str },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: &'static str,
        status: String,
        stderr: String,
    },

    #[error("{tool} timed out after {after:?}")]
    Timeout { tool: &'static str, after: Duration },

    #[error("artifact io failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Paths of a completed build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifacts {
    pub dir: PathBuf,
    pub corpus: PathBuf,
    pub arpa: PathBuf,
    pub binary: PathBuf,
    pub scorer: PathBuf,
}

impl ModelArtifacts {
    /// Artifact paths inside `dir`
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            corpus: dir.join(CORPUS_FILE),
            arpa: dir.join(ARPA_FILE),
            binary: dir.join(BINARY_FILE),
            scorer: dir.join(SCORER_FILE),
        }
    }
}

/// Change marker for a models directory
///
/// The latest modification time of the corpus and scorer; `None` when
/// neither exists.
#[must_use]
pub fn stamp(dir: &Path) -> Option<SystemTime> {
    [CORPUS_FILE, SCORER_FILE]
        .iter()
        .filter_map(|f| std::fs::metadata(dir.join(f)).and_then(|m| m.modified()).ok())
        .max()
}

/// Write only the corpus text into `dir`
///
/// Used when the packaging tools are not installed; decoders that bias on
/// the corpus alone still pick up the new device names.
///
/// # Errors
///
/// Returns error if the directory or file cannot be written
pub async fn publish_corpus(corpus: &Corpus, dir: &Path) -> Result<PathBuf, BuildError> {
    tokio::fs::create_dir_all(dir).await?;
    let staged = dir.join(format!(".{CORPUS_FILE}.{}", uuid::Uuid::new_v4()));
    let path = dir.join(CORPUS_FILE);
    tokio::fs::write(&staged, corpus.to_text()).await?;
    tokio::fs::rename(&staged, &path).await?;
    Ok(path)
}

/// Runs the external LM tools
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    tools_dir: Option<PathBuf>,
    alphabet: PathBuf,
    tool_timeout: Duration,
}

impl ModelBuilder {
    /// Create a builder
    ///
    /// Tools are looked up in `tools_dir` first, then on `PATH`.
    #[must_use]
    pub const fn new(tools_dir: Option<PathBuf>, alphabet: PathBuf, tool_timeout: Duration) -> Self {
        Self {
            tools_dir,
            alphabet,
            tool_timeout,
        }
    }

    fn locate(&self, tool: &'static str) -> Result<PathBuf, BuildError> {
        if let Some(dir) = &self.tools_dir {
            let candidate = dir.join(tool);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        which::which(tool).map_err(|_| BuildError::ToolNotFound { tool })
    }

    /// Whether every tool can be found
    #[must_use]
    pub fn tools_available(&self) -> bool {
        ["lmplz", "build_binary", "generate_scorer_package"]
            .into_iter()
            .all(|t| self.locate(t).is_ok())
    }

    async fn run(&self, tool: &'static str, args: &[&OsStr]) -> Result<(), BuildError> {
        let program = self.locate(tool)?;
        tracing::debug!(tool, program = %program.display(), "running model tool");

        let child = Command::new(&program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = timeout(self.tool_timeout, child.wait_with_output())
            .await
            .map_err(|_| BuildError::Timeout {
                tool,
                after: self.tool_timeout,
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(BuildError::Failed {
                tool,
                status: output.status.to_string(),
                stderr,
            });
        }

        if !output.stderr.is_empty() {
            tracing::trace!(tool, stderr = %String::from_utf8_lossy(&output.stderr), "model tool stderr");
        }
        Ok(())
    }

    /// Build artifacts for `corpus` into `out_dir`
    ///
    /// # Errors
    ///
    /// Returns the failing tool with its exit status and stderr, a timeout,
    /// or an IO error. Existing artifacts in `out_dir` are untouched on error.
    pub async fn build(&self, corpus: &Corpus, out_dir: &Path) -> Result<ModelArtifacts, BuildError> {
        tokio::fs::create_dir_all(out_dir).await?;
        let staging = out_dir.join(format!(".staging-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&staging).await?;

        let result = self.build_in(corpus, &staging).await;
        let result = match result {
            Ok(staged) => Self::promote(&staged, out_dir).await,
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            tracing::debug!(error = %e, dir = %staging.display(), "failed to remove staging dir");
        }
        result
    }

    async fn build_in(&self, corpus: &Corpus, dir: &Path) -> Result<ModelArtifacts, BuildError> {
        let artifacts = ModelArtifacts::in_dir(dir);
        tokio::fs::write(&artifacts.corpus, corpus.to_text()).await?;

        self.run(
            "lmplz",
            &[
                OsStr::new("--memory"),
                OsStr::new("64M"),
                OsStr::new("--order"),
                OsStr::new("2"),
                OsStr::new("--discount_fallback"),
                OsStr::new("--text"),
                artifacts.corpus.as_os_str(),
                OsStr::new("--arpa"),
                artifacts.arpa.as_os_str(),
            ],
        )
        .await?;

        self.run(
            "build_binary",
            &[
                OsStr::new("-a"),
                OsStr::new("255"),
                OsStr::new("-q"),
                OsStr::new("8"),
                OsStr::new("-v"),
                OsStr::new("trie"),
                artifacts.arpa.as_os_str(),
                artifacts.binary.as_os_str(),
            ],
        )
        .await?;

        self.run(
            "generate_scorer_package",
            &[
                OsStr::new("--lm"),
                artifacts.binary.as_os_str(),
                OsStr::new("--vocab"),
                artifacts.corpus.as_os_str(),
                OsStr::new("--package"),
                artifacts.scorer.as_os_str(),
                OsStr::new("--default_alpha"),
                OsStr::new("0.75"),
                OsStr::new("--default_beta"),
                OsStr::new("1.85"),
                OsStr::new("--alphabet"),
                self.alphabet.as_os_str(),
            ],
        )
        .await?;

        Ok(artifacts)
    }

    /// Move staged artifacts into place, scorer last
    async fn promote(staged: &ModelArtifacts, out_dir: &Path) -> Result<ModelArtifacts, BuildError> {
        let target = ModelArtifacts::in_dir(out_dir);
        for (from, to) in [
            (&staged.arpa, &target.arpa),
            (&staged.binary, &target.binary),
            (&staged.corpus, &target.corpus),
            (&staged.scorer, &target.scorer),
        ] {
            tokio::fs::rename(from, to).await?;
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Corpus {
        ["turn kitchen on".to_string(), "hey beacon".to_string()]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn test_missing_tool_keeps_previous_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CORPUS_FILE), "old\n").unwrap();

        let builder = ModelBuilder::new(
            Some(tools.path().to_path_buf()),
            tools.path().join("alphabet.txt"),
            DEFAULT_TOOL_TIMEOUT,
        );

        // Only fails with ToolNotFound when the tool is not on PATH either
        if which::which("lmplz").is_err() {
            let err = builder.build(&corpus(), dir.path()).await.unwrap_err();
            assert!(matches!(err, BuildError::ToolNotFound { tool: "lmplz" }));
            assert_eq!(
                std::fs::read_to_string(dir.path().join(CORPUS_FILE)).unwrap(),
                "old\n"
            );
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".staging"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_tool_reports_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        let lmplz = tools.path().join("lmplz");
        std::fs::write(&lmplz, "#!/bin/sh\necho 'bad corpus' >&2\nexit 2\n").unwrap();
        std::fs::set_permissions(&lmplz, std::fs::Permissions::from_mode(0o755)).unwrap();

        let builder = ModelBuilder::new(
            Some(tools.path().to_path_buf()),
            tools.path().join("alphabet.txt"),
            DEFAULT_TOOL_TIMEOUT,
        );

        let err = builder.build(&corpus(), dir.path()).await.unwrap_err();
        match err {
            BuildError::Failed { tool, stderr, .. } => {
                assert_eq!(tool, "lmplz");
                assert_eq!(stderr, "bad corpus");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(stamp(dir.path()).is_none());
    }

    #[tokio::test]
    async fn test_publish_corpus_updates_stamp() {
        let dir = tempfile::tempdir().unwrap();
        assert!(stamp(dir.path()).is_none());

        let path = publish_corpus(&corpus(), dir.path()).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "hey beacon\nturn kitchen on\n"
        );
        assert!(stamp(dir.path()).is_some());
    }
}
