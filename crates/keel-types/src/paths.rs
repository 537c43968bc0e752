//! Well-known application directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Directories an application file can be resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppDir {
    /// Per-user writable data directory (holds the program database).
    User,
    /// Directory containing the running executable and its `res/` tree.
    Executable,
    /// Scratch directory for files that may be discarded between runs.
    Temp,
}

/// Resolved locations of the [`AppDir`] directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    user: PathBuf,
    executable: PathBuf,
    temp: PathBuf,
}

impl AppPaths {
    /// Creates a set of paths from explicit directories.
    pub fn new(
        user: impl Into<PathBuf>,
        executable: impl Into<PathBuf>,
        temp: impl Into<PathBuf>,
    ) -> Self {
        Self {
            user: user.into(),
            executable: executable.into(),
            temp: temp.into(),
        }
    }

    /// Detects the directories for the current process.
    ///
    /// The user directory is `<platform data dir>/keel`, or the working
    /// directory when the platform reports none. The temp directory is a
    /// `keel` subdirectory of the system temp directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the executable or working directory cannot be
    /// determined.
    pub fn detect() -> io::Result<Self> {
        let user = match dirs::data_dir() {
            Some(dir) => dir.join("keel"),
            None => std::env::current_dir()?,
        };

        let exe = std::env::current_exe()?;
        let executable = exe
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            user,
            executable,
            temp: std::env::temp_dir().join("keel"),
        })
    }

    /// Replaces the user data directory.
    pub fn with_user_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user = dir.into();
        self
    }

    /// Returns the directory for `dir`.
    pub fn dir(&self, dir: AppDir) -> &Path {
        match dir {
            AppDir::User => &self.user,
            AppDir::Executable => &self.executable,
            AppDir::Temp => &self.temp,
        }
    }

    /// Resolves `name` against `dir`.
    pub fn path(&self, name: impl AsRef<Path>, dir: AppDir) -> PathBuf {
        self.dir(dir).join(name)
    }
}

/// Returns `true` if `path` names an existing regular file.
pub fn file_exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().is_file()
}

/// Copies `from` to `to`, creating the destination's parent directories.
///
/// An existing file at `to` is overwritten.
pub fn copy_file(from: impl AsRef<Path>, to: impl AsRef<Path>) -> io::Result<u64> {
    let to = to.as_ref();
    if let Some(parent) = to.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::copy(from, to)
}
