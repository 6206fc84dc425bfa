use std::{
    iter,
    process::Child,
    thread,
    time::{Duration, Instant},
};

use ldap3::{LdapConn, LdapConnSettings, LdapError};
use retry::OperationResult;

use crate::error::{Error, Result};

/// Delay used by [`WaitStrategy::fixed_delay`].
pub const DEFAULT_START_DELAY: Duration = Duration::from_secs(5);
/// Deadline used by the default [`WaitStrategy::LdapBind`].
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(2);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const MIN_PROBE_TIMEOUT: Duration = Duration::from_millis(50);

/// How [`TestSlapd::start`](crate::TestSlapd::start) decides the server is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Sleep for a fixed amount of time, then only check that the container
    /// is still running.
    FixedDelay(Duration),
    /// Retry an admin bind with exponential backoff until it succeeds or
    /// `timeout` elapses.
    LdapBind {
        /// Overall deadline.
        timeout: Duration,
    },
}

impl WaitStrategy {
    /// Sleep [`DEFAULT_START_DELAY`].
    pub fn fixed_delay() -> Self {
        Self::FixedDelay(DEFAULT_START_DELAY)
    }

    /// Bind probe with a custom deadline.
    pub fn ldap_bind(timeout: Duration) -> Self {
        Self::LdapBind { timeout }
    }
}

impl Default for WaitStrategy {
    fn default() -> Self {
        Self::ldap_bind(DEFAULT_READY_TIMEOUT)
    }
}

/// Where and as whom to probe.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProbeTarget<'a> {
    pub(crate) address: &'a str,
    pub(crate) url: &'a str,
    pub(crate) bind_dn: &'a str,
    pub(crate) password: &'a str,
}

enum Failure {
    Exited(Error),
    Probe(LdapError),
}

pub(crate) fn wait_until_ready(
    strategy: WaitStrategy,
    target: &ProbeTarget<'_>,
    container: &mut Child,
) -> Result<()> {
    match strategy {
        WaitStrategy::FixedDelay(delay) => {
            thread::sleep(delay);
            check_running(container)
        }
        WaitStrategy::LdapBind { timeout } => wait_for_bind(target, timeout, container),
    }
}

fn wait_for_bind(target: &ProbeTarget<'_>, timeout: Duration, container: &mut Child) -> Result<()> {
    let started = Instant::now();
    let deadline = started + timeout;
    let outcome = retry::retry_with_index(backoff(deadline), |attempt| {
        if let Err(err) = check_running(container) {
            return OperationResult::Err(Failure::Exited(err));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match probe(target, remaining.clamp(MIN_PROBE_TIMEOUT, PROBE_TIMEOUT)) {
            Ok(()) => OperationResult::Ok(()),
            Err(err) => {
                log::trace!("bind probe #{attempt} against {} failed: {err}", target.address);
                OperationResult::Retry(Failure::Probe(err))
            }
        }
    });
    match outcome {
        Ok(()) => {
            log::debug!("{} ready after {:?}", target.address, started.elapsed());
            Ok(())
        }
        Err(retry::Error {
            error: Failure::Exited(err),
            ..
        }) => Err(err),
        Err(retry::Error {
            error: Failure::Probe(source),
            ..
        }) => Err(Error::NotReady {
            address: target.address.to_owned(),
            waited: started.elapsed(),
            source,
        }),
    }
}

fn check_running(container: &mut Child) -> Result<()> {
    match container.try_wait()? {
        Some(status) => Err(Error::ContainerExited { status }),
        None => Ok(()),
    }
}

/// One connect + admin bind, each step bounded by `timeout`.
fn probe(target: &ProbeTarget<'_>, timeout: Duration) -> Result<(), LdapError> {
    let settings = LdapConnSettings::new().set_conn_timeout(timeout);
    let mut conn = LdapConn::with_settings(settings, target.url)?;
    conn.with_timeout(timeout)
        .simple_bind(target.bind_dn, target.password)?
        .success()?;
    conn.with_timeout(timeout).unbind()
}

/// Delays doubling from [`INITIAL_BACKOFF`] up to [`MAX_BACKOFF`], clipped to
/// the time left before `deadline` and ending once it has passed.
///
/// Pulled lazily after each failed attempt, so the clock is read then.
fn backoff(deadline: Instant) -> impl Iterator<Item = Duration> {
    iter::successors(Some(INITIAL_BACKOFF), |delay| Some((*delay * 2).min(MAX_BACKOFF)))
        .map_while(move |delay| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            (!remaining.is_zero()).then(|| delay.min(remaining))
        })
}
