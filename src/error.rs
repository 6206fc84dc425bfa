use std::{path::PathBuf, process::ExitStatus, time::Duration};

use crate::slapd::Lifecycle;

/// Boxed error returned by provisioners.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while driving a [`TestSlapd`](crate::TestSlapd).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The container engine executable could not be located.
    #[error("container engine `{}` not found", executable.display())]
    EngineNotFound {
        /// The executable name or path that was looked up.
        executable: PathBuf,
    },
    /// Pulling the server image failed.
    #[error("failed pulling container image `{image}`")]
    Pull {
        /// The image reference that was pulled.
        image: String,
        /// Why the pull failed.
        #[source]
        source: Box<Error>,
    },
    /// The long-running `run` process could not be spawned.
    #[error("failed spawning the container process")]
    Spawn {
        /// The underlying spawn failure.
        #[source]
        source: std::io::Error,
    },
    /// The container engine exited unsuccessfully.
    #[error("`{command}` exited with {status}")]
    Engine {
        /// The engine command line, without the executable.
        command: String,
        /// Exit status reported by the engine.
        status: ExitStatus,
    },
    /// The container process exited before the server became ready.
    #[error("container exited before the server became ready ({status})")]
    ContainerExited {
        /// Exit status of the `run` process.
        status: ExitStatus,
    },
    /// The server did not accept an admin bind before the deadline.
    #[error("server at {address} not ready after {waited:?}")]
    NotReady {
        /// Address that was probed.
        address: String,
        /// Total time spent waiting.
        waited: Duration,
        /// The last probe failure.
        #[source]
        source: ldap3::LdapError,
    },
    /// [`TestSlapd::provision`](crate::TestSlapd::provision) was called without a provisioner.
    #[error("no provisioner configured")]
    NoProvisioner,
    /// The provisioner returned an error.
    #[error("provisioner failed")]
    Provision(#[source] BoxError),
    /// A lifecycle operation was called out of order.
    #[error("cannot {operation} a server that is {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the server was in.
        state: Lifecycle,
    },
    /// Any other I/O failure while talking to the engine.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
