// let's document our code for other/future developers
#![deny(missing_docs)]
#![cfg_attr(docsrs, deny(rustdoc::broken_intra_doc_links))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]
//! See [`TestSlapd`] for the engine-driven server and [`openldap`] for the
//! testcontainers image.

mod error;
/// Lifecycle of a disposable OpenLDAP container driven through the engine CLI
pub mod slapd;

#[cfg(feature = "openldap")]
#[cfg_attr(docsrs, doc(cfg(feature = "openldap")))]
/// **osixia/openldap** (ldap directory) testcontainer
pub mod openldap;

pub use error::{BoxError, Error, Result};
pub use slapd::{pick_free_port, ContainerEngine, Lifecycle, TestSlapd, WaitStrategy};

/// Re-exported version of `testcontainers` to avoid version conflicts
pub use testcontainers;
