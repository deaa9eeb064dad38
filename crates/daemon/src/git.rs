// Git publishing sequence for one revision.
//
// Drives the local working copy of the destination repository:
// branch selection, hard reset to the remote tip, staging, commit with the
// upstream author's identity and timestamp, pull, push, and periodic gc.
// Commit identity is threaded explicitly as per-child environment variables
// on the spawned `git` process; the daemon's own environment is never
// mutated, so no global serialization is needed around commits.

use std::path::{Path, PathBuf};
use std::process::Command;

use confsync_common::identity::IdentityMap;
use confsync_common::types::RevisionRecord;
use thiserror::Error;
use tracing::{debug, warn};

/// Format git's `--date` argument is given in.
const COMMIT_DATE_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Seam for spawning `git`; tests inject a recording fake.
pub trait CommandExecutor: Send + Sync {
    fn execute(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        envs: &[(String, String)],
    ) -> Result<CommandResult, std::io::Error>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessCommandExecutor;

impl CommandExecutor for ProcessCommandExecutor {
    fn execute(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        envs: &[(String, String)],
    ) -> Result<CommandResult, std::io::Error> {
        let mut command = Command::new(program);
        command.args(args).current_dir(cwd);
        for (key, value) in envs {
            command.env(key, value);
        }
        let output = command.output()?;
        Ok(CommandResult {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git repository directory {dir:?} not found")]
    MissingRepoDir { dir: PathBuf },
    #[error("failed to run `{command}`: {message}")]
    Spawn { command: String, message: String },
    #[error("`{command}` failed with code {code:?}: {stderr}")]
    Command { command: String, code: Option<i32>, stderr: String },
}

/// Outcome of the commit step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Created,
    /// The tree already matched the revision being published. Reclassified
    /// as success so republishing an identical tree stays idempotent.
    NothingToCommit,
}

/// Publisher for one destination working copy.
#[derive(Debug, Clone)]
pub struct GitPublisher<E = ProcessCommandExecutor> {
    repo_dir: PathBuf,
    identities: IdentityMap,
    executor: E,
}

impl GitPublisher<ProcessCommandExecutor> {
    /// The identity map is validated at load time (mandatory `Default`
    /// entry), so construction itself cannot produce an unattributable
    /// commit later.
    pub fn new(repo_dir: impl Into<PathBuf>, identities: IdentityMap) -> Self {
        Self { repo_dir: repo_dir.into(), identities, executor: ProcessCommandExecutor }
    }
}

impl<E: CommandExecutor> GitPublisher<E> {
    pub fn with_executor(repo_dir: impl Into<PathBuf>, identities: IdentityMap, executor: E) -> Self {
        Self { repo_dir: repo_dir.into(), identities, executor }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// Steps 1–2 of a publish: select the target branch and force the
    /// working tree to match the remote tip, discarding any leftover
    /// partial state from a previous failed dump.
    pub fn prepare(&self, branch: &str) -> Result<(), GitError> {
        self.ensure_repo_dir()?;

        let current = self.current_branch()?;
        if current != branch {
            // A failed checkout aborts the publish: committing into the
            // wrong branch is worse than skipping a tick.
            self.run(&["checkout", branch], &[])?;
        }

        self.run(&["fetch", "origin"], &[])?;
        let remote_ref = format!("origin/{branch}");
        if let Err(error) = self.run(&["reset", "--hard", &remote_ref], &[]) {
            if !is_unknown_revision(&error) {
                return Err(error);
            }
            // The remote branch does not exist yet on a fresh destination;
            // the first push will create it.
            debug!(%error, branch, "remote branch missing, resetting to local head");
            self.run(&["reset", "--hard"], &[])?;
        }
        Ok(())
    }

    /// Steps 4–7 of a publish: stage, commit with the revision's identity
    /// and timestamp, pull, push, compact.
    pub fn commit_and_push(
        &self,
        record: &RevisionRecord,
        branch: &str,
    ) -> Result<CommitOutcome, GitError> {
        self.ensure_repo_dir()?;

        self.run(&["add", "--all"], &[])?;
        let outcome = self.commit(record)?;
        self.pull(branch)?;
        self.run(&["push", "origin", branch], &[])?;

        // Compaction is best-effort.
        if let Err(error) = self.run(&["gc", "--auto"], &[]) {
            warn!(%error, "git gc failed");
        }

        Ok(outcome)
    }

    fn commit(&self, record: &RevisionRecord) -> Result<CommitOutcome, GitError> {
        let identity = self.identities.resolve(record.author_trimmed());
        let author_arg = format!("--author={}", identity.as_author_arg());

        let mut args: Vec<String> = vec!["commit".into()];
        if let Some(stamp) = record.created_at {
            args.push(format!("--date={}", stamp.format(COMMIT_DATE_FORMAT)));
        }
        args.push(author_arg);
        // The message must reach git verbatim; comments may be blank.
        args.push("--cleanup=verbatim".into());
        args.push("--allow-empty-message".into());
        args.push("-m".into());
        args.push(record.comment.clone());

        let envs = [
            ("GIT_AUTHOR_NAME".to_string(), identity.name.clone()),
            ("GIT_AUTHOR_EMAIL".to_string(), identity.email.clone()),
            ("GIT_COMMITTER_NAME".to_string(), identity.name.clone()),
            ("GIT_COMMITTER_EMAIL".to_string(), identity.email.clone()),
        ];

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        match self.run(&arg_refs, &envs) {
            Ok(_) => Ok(CommitOutcome::Created),
            Err(error) if is_nothing_to_commit(&error) => {
                debug!(revision = record.number, "tree unchanged, nothing to commit");
                Ok(CommitOutcome::NothingToCommit)
            }
            Err(error) => Err(error),
        }
    }

    fn pull(&self, branch: &str) -> Result<(), GitError> {
        match self.run(&["pull", "origin", branch], &[]) {
            Ok(_) => Ok(()),
            // Fresh destination: the remote branch appears with the first push.
            Err(error) if is_missing_remote_ref(&error) => {
                debug!(branch, "remote branch missing, skipping pull");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn current_branch(&self) -> Result<String, GitError> {
        let result = self.run(&["rev-parse", "--abbrev-ref", "HEAD"], &[])?;
        Ok(result.stdout.trim().to_string())
    }

    fn ensure_repo_dir(&self) -> Result<(), GitError> {
        if self.repo_dir.is_dir() {
            Ok(())
        } else {
            Err(GitError::MissingRepoDir { dir: self.repo_dir.clone() })
        }
    }

    fn run(&self, args: &[&str], envs: &[(String, String)]) -> Result<CommandResult, GitError> {
        let command = format!("git {}", args.join(" "));
        debug!(command = %command, dir = %self.repo_dir.display(), "running git command");

        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let result = self
            .executor
            .execute("git", &args, &self.repo_dir, envs)
            .map_err(|error| GitError::Spawn { command: command.clone(), message: error.to_string() })?;

        if result.success {
            Ok(result)
        } else {
            Err(GitError::Command {
                command,
                code: result.code,
                // git reports "nothing to commit" on stdout; keep both streams.
                stderr: format!("{}{}", result.stdout, result.stderr),
            })
        }
    }
}

fn is_nothing_to_commit(error: &GitError) -> bool {
    match error {
        GitError::Command { stderr, .. } => {
            stderr.contains("nothing to commit") || stderr.contains("nothing added to commit")
        }
        _ => false,
    }
}

/// True when a ref argument did not resolve, which is how a not-yet-pushed
/// remote branch surfaces on `reset --hard origin/<branch>`.
fn is_unknown_revision(error: &GitError) -> bool {
    match error {
        GitError::Command { stderr, .. } => {
            stderr.contains("unknown revision") || stderr.contains("ambiguous argument")
        }
        _ => false,
    }
}

fn is_missing_remote_ref(error: &GitError) -> bool {
    match error {
        GitError::Command { stderr, .. } => stderr.contains("couldn't find remote ref"),
        _ => false,
    }
}
