//! Rotation-aware file sink.
//!
//! Before every write the file currently at the configured path is compared,
//! by device and inode, with the open handle. When a rotation tool has moved
//! or replaced it the path is reopened before writing, so no record lands in
//! a file nobody reads any more.
//!
//! ## Metrics
//!
//! `write_failure`: Records that could not be written
//!

use std::{
    io,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};

use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{info, warn};

fn default_true() -> bool {
    true
}

fn default_dir_mode() -> Mode {
    Mode(0o755)
}

fn default_file_mode() -> Mode {
    Mode(0o644)
}

/// The file system operation that failed, as the io error alone lacks detail.
#[derive(Debug, Clone, Copy)]
pub enum IoOp {
    /// `fs::try_exists` or `fs::metadata`
    Stat,
    /// `fs::DirBuilder::create`
    CreateDir,
    /// `fs::OpenOptions::open`
    Open,
    /// Writing and flushing a record
    Write,
    /// `sync_all`
    Sync,
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`File`].
pub enum Error {
    /// Wrapper around [`std::io::Error`].
    #[error("IO error [{path}] during {operation:?}: {source}")]
    Io {
        /// The path being operated on
        path: PathBuf,
        /// The operation
        operation: IoOp,
        /// The error
        #[source]
        source: Box<io::Error>,
    },
    /// The file or its directory is missing and may not be created.
    #[error("{what} {path} does not exist and create is false")]
    Missing {
        /// `file` or `directory`
        what: &'static str,
        /// The missing path
        path: PathBuf,
    },
    /// Write attempted after [`File::close`].
    #[error("write to closed file {0}")]
    Closed(PathBuf),
}

/// Error parsing a [`Mode`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid mode {0:?}, expected permission bits such as \"0644\"")]
pub struct ModeError(String);

/// Unix permission bits. Deserializes from an octal string such as `"0644"`
/// or from an integer holding the bits themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "ModeRepr", into = "String")]
pub struct Mode(u32);

#[derive(Deserialize)]
#[serde(untagged)]
enum ModeRepr {
    Bits(u32),
    Octal(String),
}

impl Mode {
    /// The permission bits.
    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl TryFrom<ModeRepr> for Mode {
    type Error = ModeError;

    fn try_from(repr: ModeRepr) -> Result<Self, Self::Error> {
        let bits = match &repr {
            ModeRepr::Bits(bits) => Some(*bits),
            ModeRepr::Octal(text) => {
                let digits = text.strip_prefix("0o").unwrap_or(text);
                u32::from_str_radix(digits, 8).ok()
            }
        };
        match bits {
            Some(bits) if bits <= 0o7777 => Ok(Mode(bits)),
            _ => Err(ModeError(match repr {
                ModeRepr::Bits(bits) => bits.to_string(),
                ModeRepr::Octal(text) => text,
            })),
        }
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        format!("{:04o}", mode.0)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Configuration of [`File`]
pub struct Config {
    /// Path of the log file
    pub path: PathBuf,
    /// Create the file and its parent directories if missing
    #[serde(default = "default_true")]
    pub create: bool,
    /// Append to existing contents rather than truncating
    #[serde(default = "default_true")]
    pub append: bool,
    /// Mode of created directories
    #[serde(default = "default_dir_mode")]
    pub dir_mode: Mode,
    /// Mode of a created file
    #[serde(default = "default_file_mode")]
    pub file_mode: Mode,
    /// `fsync` after every record
    #[serde(default)]
    pub sync_after_write: bool,
}

impl Config {
    /// Configuration for `path` with every other field at its default.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            create: true,
            append: true,
            dir_mode: default_dir_mode(),
            file_mode: default_file_mode(),
            sync_after_write: false,
        }
    }
}

fn io_error(path: &Path, operation: IoOp, err: io::Error) -> Error {
    Error::Io {
        path: path.to_path_buf(),
        operation,
        source: Box::new(err),
    }
}

async fn exists(path: &Path) -> Result<bool, Error> {
    fs::try_exists(path)
        .await
        .map_err(|err| io_error(path, IoOp::Stat, err))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Identity {
    dev: u64,
    ino: u64,
}

impl Identity {
    fn of(meta: &std::fs::Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }
}

/// Writes records to a file, following it through rotation.
#[derive(Debug)]
pub struct File {
    config: Config,
    handle: Option<fs::File>,
    identity: Option<Identity>,
    closed: bool,
}

impl File {
    /// Open the configured file.
    ///
    /// # Errors
    ///
    /// Fails if the file or its directory is missing and `create` is false,
    /// or if either cannot be created or opened.
    pub async fn open(config: &Config) -> Result<Self, Error> {
        let mut file = Self {
            config: config.clone(),
            handle: None,
            identity: None,
            closed: false,
        };
        file.reopen().await?;
        Ok(file)
    }

    /// Write `buf`, reopening the path first if it was rotated.
    ///
    /// # Errors
    ///
    /// Fails if the file is closed, cannot be reopened, or the write fails.
    pub async fn write(&mut self, buf: &[u8]) -> Result<(), Error> {
        let result = self.try_write(buf).await;
        if let Err(err) = &result {
            warn!("file write failed: {err}");
            counter!("write_failure", "path" => self.config.path.display().to_string())
                .increment(1);
        }
        result
    }

    /// Flush, sync and release the handle. Only the first call does anything.
    ///
    /// # Errors
    ///
    /// Fails if the final flush or sync fails.
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.identity = None;
        if let Some(mut handle) = self.handle.take() {
            handle
                .flush()
                .await
                .map_err(|err| io_error(&self.config.path, IoOp::Write, err))?;
            handle
                .sync_all()
                .await
                .map_err(|err| io_error(&self.config.path, IoOp::Sync, err))?;
        }
        Ok(())
    }

    async fn try_write(&mut self, buf: &[u8]) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed(self.config.path.clone()));
        }
        if self.rotated().await {
            info!(path = %self.config.path.display(), "log file was rotated, reopening");
            self.reopen().await?;
        }
        let path = self.config.path.clone();
        let sync = self.config.sync_after_write;
        let Some(handle) = self.handle.as_mut() else {
            return Err(Error::Closed(path));
        };
        let written = async {
            handle.write_all(buf).await?;
            handle.flush().await
        };
        written
            .await
            .map_err(|err| io_error(&path, IoOp::Write, err))?;
        if sync {
            handle
                .sync_all()
                .await
                .map_err(|err| io_error(&path, IoOp::Sync, err))?;
        }
        Ok(())
    }

    async fn rotated(&self) -> bool {
        let Some(identity) = self.identity else {
            return true;
        };
        match fs::metadata(&self.config.path).await {
            Ok(meta) => Identity::of(&meta) != identity,
            Err(_) => true,
        }
    }

    async fn reopen(&mut self) -> Result<(), Error> {
        if let Some(mut old) = self.handle.take() {
            if let Err(err) = old.flush().await {
                warn!("flush before reopen failed: {err}");
            }
            if let Err(err) = old.sync_all().await {
                warn!("sync before reopen failed: {err}");
            }
        }
        self.identity = None;

        let path = self.config.path.clone();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            if !exists(dir).await? {
                if !self.config.create {
                    return Err(Error::Missing {
                        what: "directory",
                        path: dir.to_path_buf(),
                    });
                }
                fs::DirBuilder::new()
                    .recursive(true)
                    .mode(self.config.dir_mode.bits())
                    .create(dir)
                    .await
                    .map_err(|err| io_error(dir, IoOp::CreateDir, err))?;
                info!(dir = %dir.display(), "created directory");
            }
        }

        let exists = exists(&path).await?;
        if !exists && !self.config.create {
            return Err(Error::Missing {
                what: "file",
                path,
            });
        }
        let mut options = fs::OpenOptions::new();
        options
            .write(true)
            .create(!exists)
            .mode(self.config.file_mode.bits());
        if self.config.append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        let handle = options
            .open(&path)
            .await
            .map_err(|err| io_error(&path, IoOp::Open, err))?;
        let meta = handle
            .metadata()
            .await
            .map_err(|err| io_error(&path, IoOp::Stat, err))?;
        self.identity = Some(Identity::of(&meta));
        self.handle = Some(handle);
        info!(
            path = %path.display(),
            append = self.config.append,
            sync = self.config.sync_after_write,
            "opened log file"
        );
        Ok(())
    }
}
