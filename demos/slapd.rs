use std::collections::HashSet;

use testslapd::{pick_free_port, TestSlapd};

fn main() -> Result<(), Box<dyn std::error::Error + 'static>> {
    let _ = pretty_env_logger::try_init();

    let mut slapd = TestSlapd::new(
        pick_free_port()?,
        "Acme",
        "dc=acme,dc=com",
        "acme.com",
        "letmein",
        "",
        "",
    );
    slapd.set_verbose(true);

    let url = slapd.url();
    let admin_dn = slapd.admin_dn();
    slapd.set_provisioner(move || {
        let mut ldap = ldap3::LdapConn::new(&url)?;
        ldap.simple_bind(&admin_dn, "letmein")?.success()?;
        ldap.add(
            "ou=users,dc=acme,dc=com",
            vec![
                ("ou", HashSet::from(["users"])),
                ("objectClass", HashSet::from(["top", "organizationalUnit"])),
            ],
        )?
        .success()?;
        ldap.unbind()?;
        Ok(())
    });

    slapd.start()?;
    let outcome = slapd.provision().map_err(Into::into).and_then(|()| {
        // container is up and seeded, you can use it
        let mut ldap = ldap3::LdapConn::new(&slapd.url())?;
        ldap.simple_bind(&slapd.admin_dn(), slapd.admin_password())?
            .success()?;
        let (entries, _) = ldap
            .search(
                "ou=users,dc=acme,dc=com",
                ldap3::Scope::Base,
                "(objectClass=*)",
                vec!["ou"],
            )?
            .success()?;
        println!("found {} entries", entries.len());
        ldap.unbind()?;
        Ok::<_, Box<dyn std::error::Error + 'static>>(())
    });
    slapd.stop()?;
    outcome
}
