use std::{
    fmt,
    io::{self, Write},
    net::TcpListener,
    process::Child,
};

use parse_display::Display;

use crate::error::{BoxError, Error, Result};

mod engine;
mod readiness;

pub use engine::{ContainerEngine, RunSpec, ENGINE_ENV_VAR, LDAP_PORT};
pub use readiness::{WaitStrategy, DEFAULT_READY_TIMEOUT, DEFAULT_START_DELAY};

/// Container name used when an empty one is given to [`TestSlapd::new`].
pub const DEFAULT_CONTAINER_NAME: &str = "ldaptest";
/// Image used when an empty one is given to [`TestSlapd::new`].
pub const DEFAULT_CONTAINER_IMAGE: &str = "osixia/openldap";

/// Setup callback run by [`TestSlapd::provision`].
pub type Provisioner = Box<dyn FnMut() -> Result<(), BoxError> + Send>;

/// Writes a formatted line to stdout when the server is verbose.
///
/// ```
/// let slapd = testslapd::TestSlapd::new(10389, "acme", "dc=acme,dc=com", "acme.com", "pw", "", "");
/// testslapd::verbose!(slapd, "listening on {}", slapd.address());
/// ```
#[macro_export]
macro_rules! verbose {
    ($slapd:expr, $($arg:tt)+) => {
        $slapd.emit_verbose(::std::format_args!($($arg)+))
    };
}

/// Where a [`TestSlapd`] is in its lifecycle.
///
/// Transitions only move forward: `Created -> Started -> Provisioned -> Stopped`,
/// where `Provisioned` may be skipped.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed, container not started yet.
    #[display("not started")]
    Created,
    /// Container running.
    #[display("started")]
    Started,
    /// Container running and provisioner applied.
    #[display("provisioned")]
    Provisioned,
    /// Container stopped.
    #[display("stopped")]
    Stopped,
}

/// A disposable OpenLDAP server running in a Docker container.
///
/// The container is driven through the engine CLI: the image is pulled, a
/// container is run with the organization, domain and admin password passed
/// as environment variables, and host port `port` is mapped to the server's
/// port 389. [`TestSlapd::start`] blocks until the server accepts an admin
/// bind (see [`WaitStrategy`]).
///
/// # Example
/// ```no_run
/// use testslapd::{pick_free_port, TestSlapd};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut slapd = TestSlapd::new(
///     pick_free_port()?,
///     "scribd",
///     "dc=scribd,dc=com",
///     "scribd.com",
///     "letmein",
///     "",
///     "",
/// );
/// let url = slapd.url();
/// let admin_dn = slapd.admin_dn();
/// slapd.set_provisioner(move || {
///     let mut ldap = ldap3::LdapConn::new(&url)?;
///     ldap.simple_bind(&admin_dn, "letmein")?.success()?;
///     Ok(())
/// });
/// slapd.start()?;
/// slapd.provision()?;
/// // ... run the test against slapd.address() ...
/// slapd.stop()?;
/// # Ok(())
/// # }
/// ```
pub struct TestSlapd {
    port: u16,
    address: String,
    organization: String,
    base: String,
    domain: String,
    admin_password: String,
    container_name: String,
    container_image: String,
    verbose: bool,
    provisioner: Option<Provisioner>,
    engine: ContainerEngine,
    wait: WaitStrategy,
    state: Lifecycle,
    container: Option<Child>,
}

impl TestSlapd {
    /// Describes a server reachable on `127.0.0.1:<port>`.
    ///
    /// An empty `container_name` selects [`DEFAULT_CONTAINER_NAME`] and an empty
    /// `container_image` selects [`DEFAULT_CONTAINER_IMAGE`]. Nothing is
    /// started and nothing else is validated.
    pub fn new(
        port: u16,
        organization: impl Into<String>,
        base: impl Into<String>,
        domain: impl Into<String>,
        admin_password: impl Into<String>,
        container_name: impl Into<String>,
        container_image: impl Into<String>,
    ) -> Self {
        Self {
            port,
            address: format!("127.0.0.1:{port}"),
            organization: organization.into(),
            base: base.into(),
            domain: domain.into(),
            admin_password: admin_password.into(),
            container_name: or_default(container_name.into(), DEFAULT_CONTAINER_NAME),
            container_image: or_default(container_image.into(), DEFAULT_CONTAINER_IMAGE),
            verbose: false,
            provisioner: None,
            engine: ContainerEngine::from_env(),
            wait: WaitStrategy::default(),
            state: Lifecycle::Created,
            container: None,
        }
    }

    /// Uses `engine` instead of the one picked from the environment.
    pub fn with_engine(mut self, engine: ContainerEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Changes how [`TestSlapd::start`] waits for the server.
    /// Default: [`WaitStrategy::LdapBind`] with [`DEFAULT_READY_TIMEOUT`].
    pub fn with_wait_strategy(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }

    /// Sets the callback run by [`TestSlapd::provision`].
    pub fn set_provisioner<F>(&mut self, provisioner: F)
    where
        F: FnMut() -> Result<(), BoxError> + Send + 'static,
    {
        self.provisioner = Some(Box::new(provisioner));
    }

    /// Turns progress output on stdout on or off.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Prints `args` as one line on stdout if verbose output is on.
    /// Usually called through [`verbose!`](crate::verbose).
    pub fn emit_verbose(&self, args: fmt::Arguments<'_>) {
        let _ = self.write_verbose(&mut io::stdout().lock(), args);
    }

    fn write_verbose(&self, out: &mut impl Write, args: fmt::Arguments<'_>) -> io::Result<()> {
        if self.verbose {
            writeln!(out, "{args}")?;
        }
        Ok(())
    }

    /// Pulls the image, runs the container and waits until it is ready.
    ///
    /// Once the container process has been spawned the server counts as
    /// started, even if waiting for it fails, so that [`TestSlapd::stop`] can
    /// still be used to clean it up.
    pub fn start(&mut self) -> Result<()> {
        self.expect_state("start", &[Lifecycle::Created])?;
        crate::verbose!(
            self,
            "Spinning up docker container named {} on port {}",
            self.container_name,
            self.port
        );
        let executable = self.engine.resolve()?;

        crate::verbose!(self, "Pulling image {}", self.container_image);
        self.engine.pull(&self.container_image)?;

        let spec = self.run_spec();
        crate::verbose!(
            self,
            "Command: {} {}",
            executable.display(),
            engine::run_args(&spec).join(" ")
        );
        let mut container = self.engine.run(&spec)?;
        log::info!("started container {} on {}", self.container_name, self.address);
        self.state = Lifecycle::Started;

        crate::verbose!(self, "Waiting for {} to come up ({:?})", self.address, self.wait);
        let url = self.url();
        let bind_dn = self.admin_dn();
        let target = readiness::ProbeTarget {
            address: &self.address,
            url: &url,
            bind_dn: &bind_dn,
            password: &self.admin_password,
        };
        let ready = readiness::wait_until_ready(self.wait, &target, &mut container);
        self.container = Some(container);
        ready?;

        crate::verbose!(self, "Container should be up.  Moving on.");
        Ok(())
    }

    /// Runs the provisioner against the started server.
    ///
    /// Fails with [`Error::NoProvisioner`] when none was set; the
    /// provisioner's own error is returned as [`Error::Provision`].
    pub fn provision(&mut self) -> Result<()> {
        self.expect_state("provision", &[Lifecycle::Started])?;
        crate::verbose!(self, "Running provisioner against {}", self.address);
        let provisioner = self.provisioner.as_mut().ok_or(Error::NoProvisioner)?;
        provisioner().map_err(Error::Provision)?;
        self.state = Lifecycle::Provisioned;
        Ok(())
    }

    /// Stops the container by name and reaps the `run` process.
    pub fn stop(&mut self) -> Result<()> {
        self.expect_state("stop", &[Lifecycle::Started, Lifecycle::Provisioned])?;
        crate::verbose!(self, "Stopping {}.", self.container_name);
        self.engine.stop(&self.container_name)?;
        self.state = Lifecycle::Stopped;
        if let Some(mut container) = self.container.take() {
            let status = container.wait()?;
            log::debug!("container {} exited with {status}", self.container_name);
        }
        log::info!("stopped container {}", self.container_name);
        Ok(())
    }

    fn expect_state(&self, operation: &'static str, allowed: &[Lifecycle]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn run_spec(&self) -> RunSpec<'_> {
        RunSpec {
            organization: &self.organization,
            domain: &self.domain,
            admin_password: &self.admin_password,
            host_port: self.port,
            name: &self.container_name,
            image: &self.container_image,
        }
    }

    /// Host port the server listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `127.0.0.1:<port>`.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// `ldap://127.0.0.1:<port>`.
    pub fn url(&self) -> String {
        format!("ldap://{}", self.address)
    }

    /// Distinguished name of the admin account, `cn=admin,<base>`.
    pub fn admin_dn(&self) -> String {
        format!("cn=admin,{}", self.base)
    }

    /// Organization passed as `LDAP_ORGANIZATION`.
    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// Base DN of the directory.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Domain passed as `LDAP_DOMAIN`.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Password of [`TestSlapd::admin_dn`].
    pub fn admin_password(&self) -> &str {
        &self.admin_password
    }

    /// Name of the container.
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Image the container runs.
    pub fn container_image(&self) -> &str {
        &self.container_image
    }

    /// Whether verbose output is on.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Current lifecycle state.
    pub fn state(&self) -> Lifecycle {
        self.state
    }

    /// The same server as a testcontainers request, for use with the
    /// testcontainers runners instead of the engine CLI.
    #[cfg(feature = "openldap")]
    pub fn container_request(
        &self,
    ) -> testcontainers::ContainerRequest<crate::openldap::OsixiaOpenLdap> {
        use testcontainers::{core::ContainerPort, ImageExt};

        crate::openldap::OsixiaOpenLdap::from_reference(&self.container_image)
            .with_organization(&self.organization)
            .with_domain(&self.domain)
            .with_admin_password(&self.admin_password)
            .with_mapped_port(self.port, ContainerPort::Tcp(LDAP_PORT))
            .with_container_name(&self.container_name)
    }
}

impl fmt::Debug for TestSlapd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSlapd")
            .field("address", &self.address)
            .field("organization", &self.organization)
            .field("base", &self.base)
            .field("domain", &self.domain)
            .field("container_name", &self.container_name)
            .field("container_image", &self.container_image)
            .field("verbose", &self.verbose)
            .field("provisioner", &self.provisioner.is_some())
            .field("engine", &self.engine)
            .field("wait", &self.wait)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Asks the OS for a TCP port that is free on 127.0.0.1 right now.
pub fn pick_free_port() -> io::Result<u16> {
    Ok(TcpListener::bind(("127.0.0.1", 0))?.local_addr()?.port())
}

fn or_default(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_owned()
    } else {
        value
    }
}
