use std::fs;
use tracing::{debug, error, info, warn};

use crate::policy::AccessPolicy;
use crate::types::access::RouteClass;
use crate::types::server_config::{AppConfig, ConfigError};
use crate::types::session::Role;

pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    info!("Loading configuration from: {}", path);

    let contents = fs::read_to_string(path)?;
    debug!("Processing file: {}", path);

    if contents.trim().is_empty() {
        error!("Configuration file is empty");
        return Err(ConfigError::InvalidConfig("empty file".into()));
    }

    let config = parse_config(&contents)?;

    info!(
        "Configuration loaded: {} users, {} guard exclusions",
        config.users.len(),
        config.routes.exclude.len()
    );

    Ok(config)
}

/// Parse and validate a TOML document without touching the filesystem.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = toml::from_str(contents)?;
    validate_config(&config)?;
    debug!("Config validated");
    Ok(config)
}

fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.paths.web_dir.is_empty() {
        return Err(ConfigError::InvalidConfig("web_dir cannot be empty".into()));
    }

    if config.auth.access_token_minutes == 0 {
        return Err(ConfigError::InvalidConfig(
            "access_token_minutes must be greater than 0".into(),
        ));
    }

    if config.auth.refresh_token_hours == 0 {
        return Err(ConfigError::InvalidConfig(
            "refresh_token_hours must be greater than 0".into(),
        ));
    }

    if config.auth.access_cookie == config.auth.refresh_cookie {
        return Err(ConfigError::InvalidConfig(
            "access_cookie and refresh_cookie must differ".into(),
        ));
    }

    let routes = &config.routes;
    for (name, value) in [
        ("admin_prefix", &routes.admin_prefix),
        ("client_prefix", &routes.client_prefix),
        ("login_path", &routes.login_path),
        ("landing_path", &routes.landing_path),
    ] {
        if !value.starts_with('/') {
            return Err(ConfigError::InvalidConfig(format!(
                "{} must start with '/' (got {:?})",
                name, value
            )));
        }
    }

    for (name, value) in [
        ("admin_prefix", &routes.admin_prefix),
        ("client_prefix", &routes.client_prefix),
    ] {
        if value.trim_end_matches('/').is_empty() {
            return Err(ConfigError::InvalidConfig(format!(
                "{} cannot be the root path",
                name
            )));
        }
    }

    if routes.admin_prefix.trim_end_matches('/') == routes.client_prefix.trim_end_matches('/') {
        return Err(ConfigError::InvalidConfig(
            "admin_prefix and client_prefix must differ".into(),
        ));
    }

    // Redirect targets must stay reachable without a session, or anonymous
    // users loop on them.
    let policy = AccessPolicy::from_routes(routes);
    for (name, value) in [
        ("login_path", &routes.login_path),
        ("landing_path", &routes.landing_path),
    ] {
        if policy.classify(value) != RouteClass::Public {
            return Err(ConfigError::InvalidConfig(format!(
                "{} {:?} falls under a scoped prefix",
                name, value
            )));
        }
    }

    if let Some(bad) = routes.exclude.iter().find(|p| !p.starts_with('/')) {
        return Err(ConfigError::InvalidConfig(format!(
            "exclusion pattern must start with '/' (got {:?})",
            bad
        )));
    }

    for user in &config.users {
        match user.role() {
            Role::Admin | Role::Client => {}
            Role::Anonymous | Role::Unrecognized(_) => {
                // Loaded anyway; the policy denies them on every scoped route.
                warn!(
                    "User {} has role {:?}; scoped routes will be denied",
                    user.email,
                    user.role
                );
            }
        }
        if user.password_hash.is_empty() {
            return Err(ConfigError::InvalidConfig(format!(
                "user {} has an empty password_hash",
                user.email
            )));
        }
    }

    // JWT secret must be resolvable (env var or config field) and long enough.
    // Checked on every load, SIGHUP reloads included.
    match config.auth.resolved_jwt_secret() {
        None => {
            return Err(ConfigError::InvalidConfig(
                "jwt_secret must be set via the JWT_SECRET env var or auth.jwt_secret config field"
                    .into(),
            ));
        }
        Some(secret) if secret.len() < 32 => {
            return Err(ConfigError::InvalidConfig(
                "jwt_secret must be at least 32 characters long".into(),
            ));
        }
        _ => {}
    }

    Ok(())
}
