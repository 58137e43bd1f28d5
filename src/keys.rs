//! SSH key material generation and on-disk layout.
//!
//! Generated keys live in a dedicated directory holding `private.key` and
//! `public.key`. That directory is the unit of cleanup: discarding an owned
//! key removes it wholesale.

use std::ffi::OsString;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::shell::{CommandRunner, ShellError};

/// File name of the private key inside a key directory.
pub const PRIVATE_KEY_FILE: &str = "private.key";
/// File name of the public key inside a key directory.
pub const PUBLIC_KEY_FILE: &str = "public.key";
/// Name of the directory holding key material under a base path.
pub const KEYS_DIR: &str = "keys";

const KEYGEN_OUTPUT_SUFFIX: &str = ".pub";
const KEY_BITS: &str = "4096";

/// Returns the directory key material for `key_name` lives in.
///
/// An explicit `base` wins; otherwise the directory is derived from the key
/// name under `/tmp`.
#[must_use]
pub fn key_dir(key_name: &str, base: Option<&Utf8Path>) -> Utf8PathBuf {
    base.map_or_else(
        || Utf8PathBuf::from("/tmp").join(key_name).join(KEYS_DIR),
        |path| path.join(KEYS_DIR),
    )
}

/// Errors raised while producing or removing key material.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum KeyError {
    /// Filesystem access failed.
    #[error("key material at {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// `ssh-keygen` exited unsuccessfully.
    #[error("key generation failed with status {code:?}: {stderr}")]
    Generate {
        /// Exit code reported by the generator.
        code: Option<i32>,
        /// Diagnostic output from the generator.
        stderr: String,
    },
    /// The generator could not be started.
    #[error(transparent)]
    Shell(#[from] ShellError),
}

/// Key material written to a key directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPair {
    /// Directory holding both key files.
    pub dir: Utf8PathBuf,
    /// Public key in OpenSSH format, ready to register with the provider.
    pub public_openssh: String,
}

impl KeyPair {
    /// Path of the private key file.
    #[must_use]
    pub fn private_key_path(&self) -> Utf8PathBuf {
        self.dir.join(PRIVATE_KEY_FILE)
    }
}

/// Produces and destroys key material.
pub trait Keysmith {
    /// Writes a fresh key pair into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] when generation or file access fails.
    fn forge(&self, dir: &Utf8Path) -> Result<KeyPair, KeyError>;

    /// Removes `dir` and everything inside it.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Io`] when the directory cannot be removed. A
    /// missing directory is not an error.
    fn discard(&self, dir: &Utf8Path) -> Result<(), KeyError>;
}

/// [`Keysmith`] that shells out to `ssh-keygen`.
#[derive(Clone, Debug)]
pub struct SshKeygen<R: CommandRunner> {
    program: String,
    runner: R,
}

impl<R: CommandRunner> SshKeygen<R> {
    /// Creates a generator invoking `ssh-keygen` from `PATH`.
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self {
            program: String::from("ssh-keygen"),
            runner,
        }
    }

    fn keygen_args(private_key: &Utf8Path) -> Vec<OsString> {
        [
            "-t",
            "rsa",
            "-b",
            KEY_BITS,
            "-m",
            "PEM",
            "-N",
            "",
            "-q",
            "-C",
            "welder",
            "-f",
            private_key.as_str(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect()
    }
}

impl<R: CommandRunner> Keysmith for SshKeygen<R> {
    fn forge(&self, dir: &Utf8Path) -> Result<KeyPair, KeyError> {
        let handle = open_or_create(dir)?;
        let generated_public = format!("{PRIVATE_KEY_FILE}{KEYGEN_OUTPUT_SUFFIX}");
        for stale in [PRIVATE_KEY_FILE, PUBLIC_KEY_FILE, generated_public.as_str()] {
            remove_if_present(&handle, dir, stale)?;
        }

        let output = self
            .runner
            .run(&self.program, &Self::keygen_args(&dir.join(PRIVATE_KEY_FILE)))?;
        if !output.is_success() {
            return Err(KeyError::Generate {
                code: output.code,
                stderr: output.stderr,
            });
        }

        handle
            .rename(&generated_public, &handle, PUBLIC_KEY_FILE)
            .map_err(|err| io_error(&dir.join(&generated_public), &err))?;
        restrict_private_key(&handle, dir)?;

        let public_openssh = handle
            .read_to_string(PUBLIC_KEY_FILE)
            .map_err(|err| io_error(&dir.join(PUBLIC_KEY_FILE), &err))?;
        Ok(KeyPair {
            dir: dir.to_path_buf(),
            public_openssh: public_openssh.trim().to_owned(),
        })
    }

    fn discard(&self, dir: &Utf8Path) -> Result<(), KeyError> {
        remove_key_dir(dir)
    }
}

/// Removes a key directory, tolerating its absence.
///
/// # Errors
///
/// Returns [`KeyError::Io`] when the directory exists but cannot be removed.
pub fn remove_key_dir(dir: &Utf8Path) -> Result<(), KeyError> {
    let parent = dir.parent().unwrap_or_else(|| Utf8Path::new("."));
    let Some(name) = dir.file_name() else {
        return Err(KeyError::Io {
            path: dir.to_path_buf(),
            message: String::from("key directory path is missing a final component"),
        });
    };
    let handle = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(handle) => handle,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(io_error(parent, &err)),
    };
    match handle.remove_dir_all(name) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_error(dir, &err)),
    }
}

/// Returns `true` when `dir` holds a private key file.
#[must_use]
pub fn private_key_exists(dir: &Utf8Path) -> bool {
    Dir::open_ambient_dir(dir, ambient_authority())
        .and_then(|handle| handle.try_exists(PRIVATE_KEY_FILE))
        .unwrap_or(false)
}

fn open_or_create(dir: &Utf8Path) -> Result<Dir, KeyError> {
    Dir::create_ambient_dir_all(dir, ambient_authority()).map_err(|err| io_error(dir, &err))?;
    Dir::open_ambient_dir(dir, ambient_authority()).map_err(|err| io_error(dir, &err))
}

fn remove_if_present(handle: &Dir, dir: &Utf8Path, name: &str) -> Result<(), KeyError> {
    match handle.remove_file(name) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_error(&dir.join(name), &err)),
    }
}

#[cfg(unix)]
fn restrict_private_key(handle: &Dir, dir: &Utf8Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let owner_only = cap_std::fs::Permissions::from_std(std::fs::Permissions::from_mode(0o600));
    handle
        .set_permissions(PRIVATE_KEY_FILE, owner_only)
        .map_err(|err| io_error(&dir.join(PRIVATE_KEY_FILE), &err))
}

#[cfg(not(unix))]
fn restrict_private_key(_handle: &Dir, _dir: &Utf8Path) -> Result<(), KeyError> {
    Ok(())
}

fn io_error(path: &Utf8Path, err: &io::Error) -> KeyError {
    KeyError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
