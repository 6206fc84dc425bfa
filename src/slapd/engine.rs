use std::{
    env,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
};

use crate::error::{Error, Result};

/// Environment variable overriding the container engine executable.
pub const ENGINE_ENV_VAR: &str = "TESTSLAPD_CONTAINER_ENGINE";
/// Port slapd listens on inside the container.
pub const LDAP_PORT: u16 = 389;

const DOCKER: &str = "docker";

/// Handle on the container engine CLI.
///
/// By default the engine is `docker`, looked up on `PATH` whenever it is
/// needed. An explicit executable (e.g. `podman`, or an absolute path) can be
/// injected with [`ContainerEngine::with_executable`] or through
/// [`ENGINE_ENV_VAR`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEngine {
    executable: PathBuf,
}

/// Arguments of one `run` invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunSpec<'a> {
    /// Value of `LDAP_ORGANIZATION`.
    pub organization: &'a str,
    /// Value of `LDAP_DOMAIN`.
    pub domain: &'a str,
    /// Value of `LDAP_ADMIN_PASSWORD`.
    pub admin_password: &'a str,
    /// Host port bound to [`LDAP_PORT`].
    pub host_port: u16,
    /// Container name.
    pub name: &'a str,
    /// Image reference.
    pub image: &'a str,
}

impl ContainerEngine {
    /// The `docker` CLI, resolved on `PATH`.
    pub fn docker() -> Self {
        Self::with_executable(DOCKER)
    }

    /// A specific engine executable, either a bare name searched on `PATH`
    /// or a path to the binary.
    pub fn with_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Reads [`ENGINE_ENV_VAR`], falling back to [`ContainerEngine::docker`]
    /// when it is unset or empty.
    pub fn from_env() -> Self {
        match env::var_os(ENGINE_ENV_VAR) {
            Some(executable) if !executable.is_empty() => Self::with_executable(executable),
            _ => Self::docker(),
        }
    }

    /// The configured executable, as given.
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Locates the executable, returning [`Error::EngineNotFound`] if it does
    /// not exist.
    pub fn resolve(&self) -> Result<PathBuf> {
        let not_found = || Error::EngineNotFound {
            executable: self.executable.clone(),
        };
        if self.executable.is_absolute() || self.executable.components().count() > 1 {
            return if is_executable(&self.executable) {
                Ok(self.executable.clone())
            } else {
                Err(not_found())
            };
        }
        let search_path = env::var_os("PATH").unwrap_or_default();
        env::split_paths(&search_path)
            .flat_map(|dir| candidates(&dir, &self.executable))
            .find(|candidate| is_executable(candidate))
            .ok_or_else(not_found)
    }

    /// Pulls `image`, streaming the engine output to our stdout/stderr.
    pub fn pull(&self, image: &str) -> Result<()> {
        let program = self.resolve()?;
        let args = pull_args(image);
        log::debug!("pulling image {image}");
        execute(&program, &args).map_err(|source| Error::Pull {
            image: image.to_owned(),
            source: Box::new(source),
        })
    }

    /// Spawns the server container without waiting for it.
    ///
    /// The container runs attached (`--rm`, no `-d`), so the returned child
    /// lives exactly as long as the container does.
    pub fn run(&self, spec: &RunSpec<'_>) -> Result<Child> {
        let program = self.resolve()?;
        let args = run_args(spec);
        log::debug!("starting container {} from {}", spec.name, spec.image);
        Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| Error::Spawn { source })
    }

    /// Stops the named container.
    pub fn stop(&self, name: &str) -> Result<()> {
        let program = self.resolve()?;
        log::debug!("stopping container {name}");
        execute(&program, &stop_args(name))
    }
}

impl Default for ContainerEngine {
    fn default() -> Self {
        Self::from_env()
    }
}

fn execute(program: &Path, args: &[String]) -> Result<()> {
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(Error::Engine {
            command: args.join(" "),
            status,
        })
    }
}

pub(crate) fn pull_args(image: &str) -> Vec<String> {
    vec!["pull".to_owned(), image.to_owned()]
}

pub(crate) fn run_args(spec: &RunSpec<'_>) -> Vec<String> {
    vec![
        "run".to_owned(),
        "-e".to_owned(),
        format!("LDAP_ORGANIZATION={}", spec.organization),
        "-e".to_owned(),
        format!("LDAP_DOMAIN={}", spec.domain),
        "-e".to_owned(),
        format!("LDAP_ADMIN_PASSWORD={}", spec.admin_password),
        "-p".to_owned(),
        format!("{}:{LDAP_PORT}", spec.host_port),
        format!("--name={}", spec.name),
        "--rm".to_owned(),
        spec.image.to_owned(),
    ]
}

pub(crate) fn stop_args(name: &str) -> Vec<String> {
    vec!["stop".to_owned(), name.to_owned()]
}

fn candidates(dir: &Path, executable: &Path) -> Vec<PathBuf> {
    let candidate = dir.join(executable);
    if cfg!(windows) && candidate.extension().is_none() {
        vec![candidate.with_extension(env::consts::EXE_EXTENSION), candidate]
    } else {
        vec![candidate]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
