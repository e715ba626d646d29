//! Startup configuration validation.

use super::Config;

/// Validate a loaded configuration. Returns all problems, not just the
/// first, so operators can fix a config in one pass.
pub fn validate(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    let sid = &config.server.sid;
    let sid_ok = sid.len() == 3
        && sid.as_bytes()[0].is_ascii_digit()
        && sid.bytes().skip(1).all(|b| b.is_ascii_digit() || b.is_ascii_uppercase());
    if !sid_ok {
        errors.push(format!(
            "server.sid {sid:?} must be a digit followed by two digits/uppercase letters"
        ));
    }

    if config.server.name.is_empty() || !config.server.name.contains('.') {
        errors.push(format!(
            "server.name {:?} must be a hostname",
            config.server.name
        ));
    }

    if config.listen.is_empty() && config.websocket.is_empty() {
        errors.push("no client listeners configured".to_string());
    }

    let needs_tls = config.listen.iter().chain(&config.listen_server).any(|l| l.tls)
        || config.websocket.iter().any(|w| w.tls);
    if needs_tls && config.tls.is_none() {
        errors.push("a listener requests tls but [tls] is not configured".to_string());
    }

    for link in &config.links {
        if link.name == config.server.name {
            errors.push(format!("link block {:?} points at ourselves", link.name));
        }
        if link.send_password.is_empty() || link.receive_password.is_empty() {
            errors.push(format!("link block {:?} has an empty password", link.name));
        }
        if let Some(link_sid) = &link.sid {
            if link_sid == sid {
                errors.push(format!(
                    "link block {:?} declares our own sid {sid}",
                    link.name
                ));
            }
        }
    }

    for cidr in &config.security.rate_limit.exempt_cidrs {
        if cidr.parse::<ipnet::IpNet>().is_err() {
            errors.push(format!("rate_limit.exempt_cidrs entry {cidr:?} is not a CIDR"));
        }
    }

    if !config.security.cloak_secret.is_empty() && config.security.cloak_secret.len() < 16 {
        errors.push("security.cloak_secret must be at least 16 characters".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn base_config() -> Config {
        toml::from_str(
            r#"
            [server]
            name = "irc.example.org"
            sid = "001"
            description = "d"
            network = "n"

            [[listen]]
            addr = "127.0.0.1:6667"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn bad_sid_rejected() {
        let mut config = base_config();
        config.server.sid = "A01".into();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("server.sid")));

        config.server.sid = "0a1".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn tls_listener_requires_material() {
        let mut config = base_config();
        config.listen[0].tls = true;
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("[tls]")));
    }

    #[test]
    fn bad_exempt_cidr_rejected() {
        let mut config = base_config();
        config.security.rate_limit.exempt_cidrs = vec!["not-a-cidr".into()];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn weak_cloak_secret_rejected() {
        let mut config = base_config();
        config.security.cloak_secret = "short".into();
        assert!(validate(&config).is_err());
    }
}
