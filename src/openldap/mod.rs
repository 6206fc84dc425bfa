use std::{borrow::Cow, collections::BTreeMap};

use testcontainers::{
    core::{ContainerPort, WaitFor},
    Image,
};

const NAME: &str = "osixia/openldap";
const TAG: &str = "1.5.0";
const OPENLDAP_PORT: ContainerPort = ContainerPort::Tcp(crate::slapd::LDAP_PORT);

/// Module to work with the [`osixia/openldap docker image`] through the
/// testcontainers runners.
///
/// This is the image [`TestSlapd`](crate::TestSlapd) runs through the engine
/// CLI; [`TestSlapd::container_request`](crate::TestSlapd::container_request)
/// builds the equivalent request from a `TestSlapd`.
///
/// # Example
/// ```no_run
/// use testslapd::{openldap::OsixiaOpenLdap, testcontainers::runners::SyncRunner};
///
/// let node = OsixiaOpenLdap::default()
///     .with_organization("Acme")
///     .with_domain("acme.com")
///     .with_admin_password("letmein")
///     .start()
///     .unwrap();
/// let url = format!(
///     "ldap://{}:{}",
///     node.get_host().unwrap(),
///     node.get_host_port_ipv4(389).unwrap(),
/// );
/// let mut conn = ldap3::LdapConn::new(&url).unwrap();
/// conn.simple_bind("cn=admin,dc=acme,dc=com", "letmein")
///     .unwrap()
///     .success()
///     .unwrap();
/// ```
///
/// [`osixia/openldap docker image`]: https://hub.docker.com/r/osixia/openldap
#[derive(Debug, Clone)]
pub struct OsixiaOpenLdap {
    name: String,
    tag: String,
    env_vars: BTreeMap<String, String>,
}

impl OsixiaOpenLdap {
    /// Uses the image `reference` (`name[:tag]`) instead of `osixia/openldap:1.5.0`.
    /// A reference without a tag means `latest`, like the docker CLI.
    pub fn from_reference(reference: &str) -> Self {
        let (name, tag) = split_reference(reference);
        Self {
            name: name.to_owned(),
            tag: tag.to_owned(),
            ..Self::default()
        }
    }

    /// Sets `LDAP_ORGANIZATION`.
    /// Default: `"Example Inc."`
    pub fn with_organization(mut self, organization: impl ToString) -> Self {
        self.env_vars
            .insert("LDAP_ORGANIZATION".to_owned(), organization.to_string());
        self
    }

    /// Sets `LDAP_DOMAIN`; the base DN is derived from it (`acme.com` => `dc=acme,dc=com`).
    /// Default: `"example.org"`
    pub fn with_domain(mut self, domain: impl ToString) -> Self {
        self.env_vars
            .insert("LDAP_DOMAIN".to_owned(), domain.to_string());
        self
    }

    /// Overrides the base DN instead of deriving it from the domain.
    pub fn with_base_dn(mut self, base_dn: impl ToString) -> Self {
        self.env_vars
            .insert("LDAP_BASE_DN".to_owned(), base_dn.to_string());
        self
    }

    /// Sets the password of `cn=admin,<base dn>`.
    /// Default: `"admin"`
    pub fn with_admin_password(mut self, password: impl ToString) -> Self {
        self.env_vars
            .insert("LDAP_ADMIN_PASSWORD".to_owned(), password.to_string());
        self
    }

    /// Adds a read-only user `cn=<username>,<base dn>`.
    /// Default: `None`
    pub fn with_readonly_user(mut self, username: impl ToString, password: impl ToString) -> Self {
        self.env_vars
            .insert("LDAP_READONLY_USER".to_owned(), "true".to_owned());
        self.env_vars.insert(
            "LDAP_READONLY_USER_USERNAME".to_owned(),
            username.to_string(),
        );
        self.env_vars.insert(
            "LDAP_READONLY_USER_PASSWORD".to_owned(),
            password.to_string(),
        );
        self
    }

    /// Enables or disables StartTLS support.
    /// Default: `true`
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.env_vars
            .insert("LDAP_TLS".to_owned(), tls.to_string());
        self
    }
}

impl Default for OsixiaOpenLdap {
    /// The image's own defaults: organization `"Example Inc."`, domain
    /// `"example.org"`, admin `cn=admin,dc=example,dc=org` with password `"admin"`.
    fn default() -> Self {
        Self {
            name: NAME.to_owned(),
            tag: TAG.to_owned(),
            env_vars: BTreeMap::new(),
        }
    }
}

impl Image for OsixiaOpenLdap {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn ready_conditions(&self) -> Vec<WaitFor> {
        vec![WaitFor::message_on_either_std("slapd starting")]
    }

    fn env_vars(
        &self,
    ) -> impl IntoIterator<Item = (impl Into<Cow<'_, str>>, impl Into<Cow<'_, str>>)> {
        &self.env_vars
    }

    fn expose_ports(&self) -> &[ContainerPort] {
        &[OPENLDAP_PORT]
    }
}

/// Splits `name[:tag]`, ignoring colons that belong to a registry port.
fn split_reference(reference: &str) -> (&str, &str) {
    let name_start = reference.rfind('/').map_or(0, |slash| slash + 1);
    match reference[name_start..].rfind(':') {
        Some(colon) => {
            let colon = name_start + colon;
            (&reference[..colon], &reference[colon + 1..])
        }
        None => (reference, "latest"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use ldap3::{LdapConnAsync, Scope, SearchEntry};
    use testcontainers::runners::AsyncRunner;

    use super::*;

    fn env_of(image: &OsixiaOpenLdap) -> HashMap<String, String> {
        image
            .env_vars()
            .into_iter()
            .map(|(key, value)| {
                let key: Cow<'_, str> = key.into();
                let value: Cow<'_, str> = value.into();
                (key.into_owned(), value.into_owned())
            })
            .collect()
    }

    #[test]
    fn splits_image_references() {
        assert_eq!(split_reference("osixia/openldap"), ("osixia/openldap", "latest"));
        assert_eq!(
            split_reference("osixia/openldap:1.5.0"),
            ("osixia/openldap", "1.5.0")
        );
        assert_eq!(
            split_reference("registry.local:5000/osixia/openldap"),
            ("registry.local:5000/osixia/openldap", "latest")
        );
        assert_eq!(
            split_reference("registry.local:5000/openldap:dev"),
            ("registry.local:5000/openldap", "dev")
        );
    }

    #[test]
    fn env_vars_follow_builders() {
        let image = OsixiaOpenLdap::default()
            .with_organization("scribd")
            .with_domain("scribd.com")
            .with_admin_password("letmein")
            .with_readonly_user("reader", "readpw")
            .with_tls(false);
        let env = env_of(&image);
        assert_eq!(env["LDAP_ORGANIZATION"], "scribd");
        assert_eq!(env["LDAP_DOMAIN"], "scribd.com");
        assert_eq!(env["LDAP_ADMIN_PASSWORD"], "letmein");
        assert_eq!(env["LDAP_READONLY_USER"], "true");
        assert_eq!(env["LDAP_READONLY_USER_USERNAME"], "reader");
        assert_eq!(env["LDAP_READONLY_USER_PASSWORD"], "readpw");
        assert_eq!(env["LDAP_TLS"], "false");
        assert!(env_of(&OsixiaOpenLdap::default()).is_empty());
    }

    #[test]
    fn default_image_is_pinned() {
        let image = OsixiaOpenLdap::default();
        assert_eq!((image.name(), image.tag()), (NAME, TAG));
        assert_eq!(image.expose_ports(), &[ContainerPort::Tcp(389)]);

        let image = OsixiaOpenLdap::from_reference("osixia/openldap");
        assert_eq!((image.name(), image.tag()), ("osixia/openldap", "latest"));
    }

    #[test]
    fn container_request_mirrors_test_slapd() {
        let slapd = crate::TestSlapd::new(
            10389,
            "scribd",
            "dc=scribd,dc=com",
            "scribd.com",
            "letmein",
            "",
            "osixia/openldap:1.5.0",
        );
        let request = slapd.container_request();
        let image = request.image();
        assert_eq!((image.name(), image.tag()), ("osixia/openldap", "1.5.0"));
        let env = env_of(image);
        assert_eq!(env["LDAP_ORGANIZATION"], "scribd");
        assert_eq!(env["LDAP_DOMAIN"], "scribd.com");
        assert_eq!(env["LDAP_ADMIN_PASSWORD"], "letmein");
    }

    #[tokio::test]
    #[ignore = "needs a Docker daemon"]
    async fn osixia_admin_can_search_base() -> Result<(), Box<dyn std::error::Error + 'static>> {
        let _ = pretty_env_logger::try_init();
        let node = OsixiaOpenLdap::default()
            .with_organization("scribd")
            .with_domain("scribd.com")
            .with_admin_password("letmein")
            .start()
            .await?;

        let connection_string = format!(
            "ldap://{}:{}",
            node.get_host().await?,
            node.get_host_port_ipv4(OPENLDAP_PORT).await?,
        );
        let (conn, mut ldap) = LdapConnAsync::new(&connection_string).await?;
        ldap3::drive!(conn);
        ldap.simple_bind("cn=admin,dc=scribd,dc=com", "letmein")
            .await?
            .success()?;
        let (rs, _res) = ldap
            .search("dc=scribd,dc=com", Scope::Subtree, "(objectClass=*)", vec!["dn"])
            .await?
            .success()?;
        let dns: Vec<_> = rs
            .into_iter()
            .map(|entry| SearchEntry::construct(entry).dn)
            .collect();
        assert_eq!(dns, ["dc=scribd,dc=com", "cn=admin,dc=scribd,dc=com"]);
        ldap.unbind().await?;
        Ok(())
    }
}
