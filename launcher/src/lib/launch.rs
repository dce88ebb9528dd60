use crate::image::EmbeddedImage;
use crate::utils::LaunchError;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};

/// Where the patched tracer is dropped unless told otherwise.
pub const DEFAULT_DEPLOY_PATH: &str = "/tmp/libvizzy.so";

pub const PRELOAD_ENV: &str = "LD_PRELOAD";

/// A tracer image together with the place it gets written to.
#[derive(Clone, Debug)]
pub struct Deployment {
    image:          EmbeddedImage,
    destination:    PathBuf,
    env_key:        &'static str,
}

impl Deployment {
    pub fn new(image: EmbeddedImage, destination: impl Into<PathBuf>) -> Self {
        Self {
            image,
            destination:    destination.into(),
            env_key:        PRELOAD_ENV,
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn env_key(&self) -> &'static str {
        self.env_key
    }

    pub fn deploy(&self, log_path: &Path) -> Result<(), LaunchError> {
        //! Replaces whatever sits at the destination with a copy of the
        //! image patched to log into `log_path`.
        //!
        //! The log path is made absolute first: the target may well
        //! change its working directory before its first allocation.

        // A leftover from an earlier run may be mapped by a process
        // that is still alive: unlink it rather than rewrite it in place.
        // A failure here resurfaces when opening below.
        match fs::remove_file(&self.destination) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                log::warn!("Couldn't remove stale {}: {e}", self.destination.display());
            },
            _ => {},
        }

        let log_path = std::path::absolute(log_path).unwrap_or_else(|_| log_path.to_path_buf());
        let image = self.image.patched(&log_path)?;

        let deploy_err = |source| LaunchError::Deploy { path: self.destination.clone(), source };
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&self.destination)
            .map_err(deploy_err)?;
        file.write_all(&image).map_err(deploy_err)?;
        file.flush().map_err(deploy_err)?;

        log::debug!("Tracer patched to log into {}", log_path.display());
        Ok(())
    }

    /// The preload list the child should see, given the one we inherited.
    ///
    /// Our library goes first. Entries already present are kept in
    /// their order, and the library is never listed twice.
    pub fn preload_value(&self, inherited: Option<&OsStr>) -> OsString {
        let ours = self.destination.as_os_str();
        let mut value = OsString::from(ours);
        let Some(inherited) = inherited else {
            return value;
        };
        // The loader accepts both colons and spaces as separators.
        for entry in inherited.as_bytes().split(|b| *b == b':' || *b == b' ') {
            if entry.is_empty() || entry == ours.as_bytes() {
                continue;
            }
            value.push(":");
            value.push(OsStr::from_bytes(entry));
        }

        value
    }
}

/// How the target process ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChildOutcome {
    Exited(i32),
    Signaled(i32),
    /// Neither of the above. Carries the raw wait status.
    Unknown(i32),
}

impl From<ExitStatus> for ChildOutcome {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _)     => ChildOutcome::Exited(code),
            (None, Some(sig))   => ChildOutcome::Signaled(sig),
            (None, None)        => ChildOutcome::Unknown(status.into_raw()),
        }
    }
}

impl fmt::Display for ChildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildOutcome::Exited(code)      => write!(f, "Child exited with a return code of {code}"),
            ChildOutcome::Signaled(sig)     => write!(f, "Child exited via signal {sig}"),
            ChildOutcome::Unknown(status)   => write!(f, "Child ended with wait status {status:#x}"),
        }
    }
}

/// Runs commands with a freshly deployed tracer preloaded.
#[derive(Clone, Debug)]
pub struct Launcher {
    deployment: Deployment,
}

impl Launcher {
    pub fn new(deployment: Deployment) -> Self {
        Self { deployment }
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// Starts `command` with the tracer preloaded. Does not deploy.
    ///
    /// Only the child's environment is touched. The command is looked up
    /// in `PATH` unless it contains a slash.
    pub fn spawn<S: AsRef<OsStr>>(&self, command: &OsStr, args: &[S]) -> Result<Child, LaunchError> {
        let key = self.deployment.env_key();
        let preload = self.deployment.preload_value(std::env::var_os(key).as_deref());
        log::debug!("{key}={}", preload.to_string_lossy());

        Command::new(command)
            .args(args)
            .env(key, preload)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                command: command.to_string_lossy().into_owned(),
                source,
            })
    }

    pub fn run<S: AsRef<OsStr>>(
        &self,
        log_path:   &Path,
        command:    &OsStr,
        args:       &[S],
    ) -> Result<ChildOutcome, LaunchError> {
        //! Deploy, spawn, wait. The child's exit code is reported,
        //! never propagated as an error.
        self.deployment.deploy(log_path)?;
        log::info!("Dropped tracer library at {}", self.deployment.destination().display());

        let mut child = self.spawn(command, args)?;
        log::info!("Child process started (pid={})", child.id());

        let status = child.wait().map_err(LaunchError::Wait)?;
        let outcome = ChildOutcome::from(status);
        log::info!("{outcome}");

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::read_tagged_path;
    use crate::utils::PatchError;

    fn deployment(destination: &str) -> Deployment {
        Deployment::new(EmbeddedImage::tracer(), destination)
    }

    #[test]
    fn preload_of_a_clean_environment() {
        let d = deployment("/tmp/libvizzy.so");
        assert_eq!(d.preload_value(None), OsString::from("/tmp/libvizzy.so"));
        assert_eq!(d.preload_value(Some(OsStr::new(""))), OsString::from("/tmp/libvizzy.so"));
    }

    #[test]
    fn preload_goes_in_front_of_inherited_entries() {
        let d = deployment("/tmp/libvizzy.so");
        assert_eq!(
            d.preload_value(Some(OsStr::new("/usr/lib/libfoo.so:/usr/lib/libbar.so"))),
            OsString::from("/tmp/libvizzy.so:/usr/lib/libfoo.so:/usr/lib/libbar.so")
        );
        assert_eq!(
            d.preload_value(Some(OsStr::new("libfoo.so libbar.so"))),
            OsString::from("/tmp/libvizzy.so:libfoo.so:libbar.so")
        );
    }

    #[test]
    fn preload_never_lists_us_twice() {
        let d = deployment("/tmp/libvizzy.so");
        assert_eq!(
            d.preload_value(Some(OsStr::new("libfoo.so:/tmp/libvizzy.so"))),
            OsString::from("/tmp/libvizzy.so:libfoo.so")
        );
    }

    #[test]
    fn outcome_from_wait_status() {
        assert_eq!(ChildOutcome::from(ExitStatus::from_raw(0)), ChildOutcome::Exited(0));
        assert_eq!(ChildOutcome::from(ExitStatus::from_raw(3 << 8)), ChildOutcome::Exited(3));
        assert_eq!(ChildOutcome::from(ExitStatus::from_raw(9)), ChildOutcome::Signaled(9));
        // Stopped by SIGSTOP.
        assert_eq!(ChildOutcome::from(ExitStatus::from_raw(0x137f)), ChildOutcome::Unknown(0x137f));
    }

    #[test]
    fn deploy_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("libvizzy.so");
        fs::write(&destination, b"stale").unwrap();

        let d = deployment(destination.to_str().unwrap());
        d.deploy(Path::new("/tmp/trace.csv")).unwrap();

        let written = fs::read(&destination).unwrap();
        assert_eq!(written.len(), EmbeddedImage::tracer().bytes().len());
        assert_eq!(read_tagged_path(&written), Ok(&b"/tmp/trace.csv"[..]));
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&destination).unwrap().permissions().mode();
        assert_eq!(mode & 0o022, 0);
    }

    #[test]
    fn deploy_makes_log_path_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("libvizzy.so");
        let d = deployment(destination.to_str().unwrap());
        d.deploy(Path::new("trace.csv")).unwrap();

        let written = fs::read(&destination).unwrap();
        let expected = std::env::current_dir().unwrap().join("trace.csv");
        assert_eq!(read_tagged_path(&written).unwrap(), expected.as_os_str().as_bytes());
    }

    #[test]
    fn failed_patch_deploys_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("libvizzy.so");
        let d = deployment(destination.to_str().unwrap());
        let long = format!("/{}", "x".repeat(vizzy_common::PATH_CAPACITY));

        match d.deploy(Path::new(&long)) {
            Err(LaunchError::Patch(PatchError::PathTooLong { .. }))   => {},
            other                                                   => panic!("unexpected {other:?}"),
        }
        assert!(!destination.exists());
    }

    #[test]
    fn image_without_marker_is_not_deployed() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("libvizzy.so");
        let d = Deployment::new(EmbeddedImage::from_static(b"\x7fELF but no slot"), &destination);
        assert!(matches!(
            d.deploy(Path::new("/tmp/trace.csv")),
            Err(LaunchError::Patch(PatchError::MarkerMissing))
        ));
        assert!(!destination.exists());
    }

    #[test]
    fn unwritable_destination() {
        let d = deployment("/nonexistent-dir/libvizzy.so");
        assert!(matches!(d.deploy(Path::new("/tmp/trace.csv")), Err(LaunchError::Deploy { .. })));
    }
}
