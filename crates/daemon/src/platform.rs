// Upstream platform client.
//
// The proprietary configuration-management platform is reachable only
// through its command-line binary. Every operation that touches an upstream
// repository needs a throwaway scratch database: we create one per
// invocation, bind it to the upstream with credentials, and delete it
// afterward regardless of outcome. Structured output of every invocation is
// redirected to a log file that is likewise deleted after each call.
//
// Argument shapes follow the platform's DESIGNER batch mode.

use std::future::Future;
use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempDir};
use thiserror::Error;
use tracing::debug;

use crate::config::SourceConfig;
use crate::process::{self, Invocation, ProcessError};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("failed to create scratch workspace: {0}")]
    Scratch(std::io::Error),
    #[error("extension source configured but extension_template is not set")]
    ExtensionTemplateNotConfigured,
    #[error("extension template {path:?} not found")]
    MissingExtensionTemplate { path: PathBuf },
    #[error("failed to read report file: {0}")]
    ReadReport(std::io::Error),
}

/// A disposable file-system-backed working database. Created fresh for
/// every invocation that needs one, never reused, removed on drop.
#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: TempDir,
}

impl ScratchWorkspace {
    fn create() -> Result<Self, PlatformError> {
        let dir = TempDir::with_prefix("confsync-db-").map_err(PlatformError::Scratch)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Seam for executing assembled platform invocations; tests inject a
/// recorder to observe the argument lists.
pub trait InvocationRunner: Send + Sync + 'static {
    fn run(
        &self,
        invocation: &Invocation,
        tool_log: &Path,
    ) -> impl Future<Output = Result<(), ProcessError>> + Send;
}

/// Production runner: the real process harness with the standard timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl InvocationRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation, tool_log: &Path) -> Result<(), ProcessError> {
        process::run(invocation, Some(tool_log)).await
    }
}

/// Seam the orchestrator talks through; tests inject a scripted fake.
pub trait UpstreamClient: Send + Sync + 'static {
    /// Textual revision-history report starting at `start` (0 = from the
    /// beginning).
    fn fetch_report(
        &self,
        source: &SourceConfig,
        start: u64,
    ) -> impl Future<Output = Result<String, PlatformError>> + Send;

    /// Materialize the exact revision's file tree into `dest`.
    fn materialize(
        &self,
        source: &SourceConfig,
        revision: u64,
        dest: &Path,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;
}

/// Production client driving the platform binary.
#[derive(Debug, Clone)]
pub struct PlatformClient<R = ProcessRunner> {
    bin: PathBuf,
    extension_template: Option<PathBuf>,
    runner: R,
}

impl PlatformClient<ProcessRunner> {
    pub fn new(bin: impl Into<PathBuf>, extension_template: Option<PathBuf>) -> Self {
        Self::with_runner(bin, extension_template, ProcessRunner)
    }
}

impl<R: InvocationRunner> PlatformClient<R> {
    pub fn with_runner(
        bin: impl Into<PathBuf>,
        extension_template: Option<PathBuf>,
        runner: R,
    ) -> Self {
        Self { bin: bin.into(), extension_template, runner }
    }

    /// Create a scratch database; for extension sources, load the extension
    /// template into it so repository commands accept `-Extension`.
    async fn create_scratch(&self, extension: bool) -> Result<ScratchWorkspace, PlatformError> {
        let scratch = ScratchWorkspace::create()?;
        debug!(path = %scratch.path().display(), "creating scratch database");

        let log = self.log_file()?;
        let invocation = Invocation::new(&self.bin)
            .arg("CREATEINFOBASE")
            .arg(format!("File='{}'", scratch.path().display()))
            .arg("/OUT")
            .arg(log.path().display().to_string());
        self.runner.run(&invocation, log.path()).await?;

        if extension {
            let template = self
                .extension_template
                .clone()
                .ok_or(PlatformError::ExtensionTemplateNotConfigured)?;
            if !template.is_file() {
                return Err(PlatformError::MissingExtensionTemplate { path: template });
            }

            let log = self.log_file()?;
            let invocation = self
                .designer(scratch.path())
                .arg("/LoadCfg")
                .arg(template.display().to_string())
                .arg("-Extension")
                .arg("temp")
                .arg("/OUT")
                .arg(log.path().display().to_string());
            self.runner.run(&invocation, log.path()).await?;
        }

        Ok(scratch)
    }

    /// Bind a scratch database to the upstream and update it to the exact
    /// revision, in one batch invocation.
    async fn bind_and_update(
        &self,
        source: &SourceConfig,
        scratch: &ScratchWorkspace,
        revision: u64,
    ) -> Result<(), PlatformError> {
        let log = self.log_file()?;
        let mut invocation = self
            .designer(scratch.path())
            .args(self.repository_args(source))
            .arg("/ConfigurationRepositoryBindCfg")
            .arg("-forceBindAlreadyBindedUser")
            .arg("-forceReplaceCfg");
        if source.extension {
            invocation = invocation.arg("-Extension").arg("temp");
        }
        invocation = invocation
            .arg("/ConfigurationRepositoryUpdateCfg")
            .arg("-v")
            .arg(revision.to_string())
            .arg("-force")
            .arg("-revised");
        if source.extension {
            invocation = invocation.arg("-Extension").arg("temp");
        }
        invocation = invocation.arg("/OUT").arg(log.path().display().to_string());

        self.runner.run(&invocation, log.path()).await?;
        Ok(())
    }

    /// Dump the bound workspace's contents as a file tree into `dest`.
    async fn dump_to_files(
        &self,
        source: &SourceConfig,
        scratch: &ScratchWorkspace,
        dest: &Path,
    ) -> Result<(), PlatformError> {
        let log = self.log_file()?;
        let mut invocation = self
            .designer(scratch.path())
            .arg("/DumpConfigToFiles")
            .arg(dest.display().to_string());
        if source.extension {
            invocation = invocation.arg("-Extension").arg("temp");
        }
        invocation = invocation.arg("/OUT").arg(log.path().display().to_string());

        self.runner.run(&invocation, log.path()).await?;
        Ok(())
    }

    fn designer(&self, db_path: &Path) -> Invocation {
        Invocation::new(&self.bin)
            .arg("DESIGNER")
            .arg("/F")
            .arg(db_path.display().to_string())
            .arg("/DisableStartupDialogs")
            .arg("/DisableStartupMessages")
    }

    fn repository_args(&self, source: &SourceConfig) -> Vec<String> {
        vec![
            "/ConfigurationRepositoryF".into(),
            source.url.clone(),
            "/ConfigurationRepositoryN".into(),
            source.login.clone(),
            "/ConfigurationRepositoryP".into(),
            source.password.clone(),
        ]
    }

    fn log_file(&self) -> Result<NamedTempFile, PlatformError> {
        NamedTempFile::with_prefix("confsync-out-").map_err(PlatformError::Scratch)
    }
}

impl<R: InvocationRunner> UpstreamClient for PlatformClient<R> {
    async fn fetch_report(
        &self,
        source: &SourceConfig,
        start: u64,
    ) -> Result<String, PlatformError> {
        let scratch = self.create_scratch(source.extension).await?;
        let report_file = self.log_file()?;
        let log = self.log_file()?;

        let mut invocation = self
            .designer(scratch.path())
            .args(self.repository_args(source))
            .arg("/ConfigurationRepositoryReport")
            .arg(report_file.path().display().to_string());
        if start > 0 {
            invocation = invocation.arg("-NBegin").arg(start.to_string());
        }
        if source.extension {
            invocation = invocation.arg("-Extension").arg("temp");
        }
        invocation = invocation.arg("/OUT").arg(log.path().display().to_string());

        self.runner.run(&invocation, log.path()).await?;

        let bytes = std::fs::read(report_file.path()).map_err(PlatformError::ReadReport)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn materialize(
        &self,
        source: &SourceConfig,
        revision: u64,
        dest: &Path,
    ) -> Result<(), PlatformError> {
        debug!(url = %source.url, revision, dest = %dest.display(), "materializing revision");

        // The scratch database lives exactly as long as this call; drop
        // removes it on every exit path.
        let scratch = self.create_scratch(source.extension).await?;
        self.bind_and_update(source, &scratch, revision).await?;
        self.dump_to_files(source, &scratch, dest).await?;
        Ok(())
    }
}
