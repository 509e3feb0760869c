//! Client mount of the filesystem under test.

use crate::process;
use async_trait::async_trait;
use killpoint_core::{CoreError, CoreResult};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const MIB: usize = 1024 * 1024;

/// Filesystem client used to create and observe the fixture
#[async_trait]
pub trait MountClient: Send + Sync {
    /// Mount the filesystem
    ///
    /// # Errors
    ///
    /// Returns error if the mount fails
    async fn mount(&self) -> CoreResult<()>;

    /// Unmount the filesystem, waiting for it to detach
    ///
    /// # Errors
    ///
    /// Returns error if the unmount fails
    async fn unmount(&self) -> CoreResult<()>;

    /// Names directly under the mount root
    ///
    /// # Errors
    ///
    /// Returns error if the root cannot be listed
    async fn list_top_level_entries(&self) -> CoreResult<BTreeSet<String>>;

    /// Create a directory relative to the mount root
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    async fn make_dir(&self, path: &str) -> CoreResult<()>;

    /// Write a `size_mb` MiB file relative to the mount root
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    async fn write_fixture(&self, path: &str, size_mb: u64) -> CoreResult<()>;
}

/// Mount driven by external mount/unmount commands over a local directory
///
/// Empty argv means the directory is mounted out of band and the call is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMount {
    root: PathBuf,
    mount_argv: Vec<String>,
    unmount_argv: Vec<String>,
    command_timeout: Duration,
}

impl CommandMount {
    /// Create over an already-mounted directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mount_argv: Vec::new(),
            unmount_argv: Vec::new(),
            command_timeout: Duration::from_secs(120),
        }
    }

    /// Set the mount command
    #[must_use]
    pub fn with_mount_command(mut self, argv: Vec<String>) -> Self {
        self.mount_argv = argv;
        self
    }

    /// Set the unmount command
    #[must_use]
    pub fn with_unmount_command(mut self, argv: Vec<String>) -> Self {
        self.unmount_argv = argv;
        self
    }

    /// Mount root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative.trim_start_matches('/'))
    }

    async fn run_argv(&self, argv: &[String]) -> CoreResult<()> {
        let Some((program, args)) = argv.split_first() else {
            return Ok(());
        };
        let output = process::run(program, args, self.command_timeout)
            .await
            .map_err(|e| CoreError::Io {
                path: self.root.display().to_string(),
                message: e.to_string(),
            })?;
        if output.success {
            Ok(())
        } else {
            Err(CoreError::CommandRejected {
                command: argv.join(" "),
                reason: output.reason(),
            })
        }
    }
}

#[async_trait]
impl MountClient for CommandMount {
    async fn mount(&self) -> CoreResult<()> {
        self.run_argv(&self.mount_argv).await?;
        // the root must be listable before the mount counts as up
        self.list_top_level_entries().await.map(|_| ())
    }

    async fn unmount(&self) -> CoreResult<()> {
        self.run_argv(&self.unmount_argv).await
    }

    async fn list_top_level_entries(&self) -> CoreResult<BTreeSet<String>> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| CoreError::io(self.root.display(), &e))?;
        let mut names = BTreeSet::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| CoreError::io(self.root.display(), &e))?
        {
            names.insert(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn make_dir(&self, path: &str) -> CoreResult<()> {
        let target = self.resolve(path);
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| CoreError::io(target.display(), &e))
    }

    async fn write_fixture(&self, path: &str, size_mb: u64) -> CoreResult<()> {
        let target = self.resolve(path);
        let err = |e: std::io::Error| CoreError::io(target.display(), &e);
        let mut file = tokio::fs::File::create(&target).await.map_err(err)?;

        let chunk: Vec<u8> = (0..MIB).map(|i| (i % 251) as u8).collect();
        for _ in 0..size_mb {
            file.write_all(&chunk).await.map_err(err)?;
        }
        file.sync_all().await.map_err(err)?;
        tracing::debug!(path = %target.display(), size_mb, "fixture written");
        Ok(())
    }
}
