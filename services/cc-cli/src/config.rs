//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The cache password and salt come from CC_CLI_STORAGE_PASSWORD /
//! CC_CLI_STORAGE_SALT or from files named in `[cache]`; they are never
//! read from the TOML itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use cutchart_auth::{DEFAULT_REDIRECT_PORT, DEFAULT_SCOPES, OidcConfig, TcpProbe};
use serde::Deserialize;

pub const PASSWORD_ENV: &str = "CC_CLI_STORAGE_PASSWORD";
pub const SALT_ENV: &str = "CC_CLI_STORAGE_SALT";

const DEFAULT_CONFIG_FILE: &str = "cc-cli.toml";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub oidc: OidcSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub network: NetworkSection,
}

/// Identity provider settings
#[derive(Debug, Deserialize)]
pub struct OidcSection {
    pub authority: String,
    pub client_id: String,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "default_scopes")]
    pub scopes: String,
    #[serde(default = "default_redirect_port")]
    pub redirect_port: u16,
    #[serde(default = "default_login_timeout")]
    pub login_timeout_secs: u64,
}

/// Cut chart API settings
#[derive(Debug, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Credential cache settings
#[derive(Debug, Default, Deserialize)]
pub struct CacheSection {
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Store tokens unencrypted when no password/salt is configured
    #[serde(default)]
    pub allow_plaintext: bool,
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    #[serde(default)]
    pub salt_file: Option<PathBuf>,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
    #[serde(skip)]
    pub salt: Option<Secret<String>>,
}

/// Reachability probe settings
#[derive(Debug, Deserialize)]
pub struct NetworkSection {
    /// `host:port`; defaults to the authority's host
    #[serde(default)]
    pub probe_addr: Option<String>,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            probe_addr: None,
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

fn default_scopes() -> String {
    DEFAULT_SCOPES.to_string()
}

fn default_redirect_port() -> u16 {
    DEFAULT_REDIRECT_PORT
}

fn default_login_timeout() -> u64 {
    300
}

fn default_base_url() -> String {
    "https://api.hypertherm.com".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    3000
}

fn require_http_url(field: &str, value: &str) -> common::Result<()> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {value}"
        )));
    }
    Ok(())
}

/// Resolve one secret: env var first, then the file named in config.
/// Blank values count as unset.
fn resolve_secret(env_key: &str, file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env_key) {
        let value = value.trim().to_owned();
        if !value.is_empty() {
            return Ok(Some(Secret::new(value)));
        }
    }
    let Some(file) = file else {
        return Ok(None);
    };
    let value = std::fs::read_to_string(file).map_err(|e| {
        common::Error::Config(format!("failed to read {}: {e}", file.display()))
    })?;
    let value = value.trim().to_owned();
    Ok((!value.is_empty()).then(|| Secret::new(value)))
}

impl Config {
    /// Load configuration from a TOML file, validate it, then overlay the
    /// cache secrets.
    ///
    /// Without `allow_plaintext`, a missing password or salt is an error.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        require_http_url("oidc.authority", &config.oidc.authority)?;
        require_http_url("api.base_url", &config.api.base_url)?;

        if config.oidc.client_id.trim().is_empty() {
            return Err(common::Error::Config("oidc.client_id must not be empty".into()));
        }
        if config.oidc.redirect_port == 0 {
            return Err(common::Error::Config(
                "redirect_port must be greater than 0".into(),
            ));
        }
        if config.oidc.login_timeout_secs == 0 {
            return Err(common::Error::Config(
                "login_timeout_secs must be greater than 0".into(),
            ));
        }
        if config.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if config.network.probe_timeout_ms == 0 {
            return Err(common::Error::Config(
                "probe_timeout_ms must be greater than 0".into(),
            ));
        }

        config.cache.password = resolve_secret(PASSWORD_ENV, config.cache.password_file.as_deref())?;
        config.cache.salt = resolve_secret(SALT_ENV, config.cache.salt_file.as_deref())?;

        if !config.cache.allow_plaintext {
            if config.cache.password.is_none() {
                return Err(common::Error::MissingSecret(format!(
                    "credential cache password: set {PASSWORD_ENV} or [cache] password_file"
                )));
            }
            if config.cache.salt.is_none() {
                return Err(common::Error::MissingSecret(format!(
                    "credential cache salt: set {SALT_ENV} or [cache] salt_file"
                )));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    pub fn oidc_config(&self) -> OidcConfig {
        OidcConfig {
            authority: self.oidc.authority.clone(),
            client_id: self.oidc.client_id.clone(),
            audience: self.oidc.audience.clone().filter(|a| !a.is_empty()),
            scopes: self.oidc.scopes.clone(),
            redirect_port: self.oidc.redirect_port,
            login_timeout: Duration::from_secs(self.oidc.login_timeout_secs),
        }
    }

    /// `[cache] path`, else `<data dir>/cc-cli/credentials.json` where the
    /// data dir is the platform's per-user one (XDG on Linux,
    /// `~/Library/Application Support` on macOS, `%APPDATA%` on Windows).
    pub fn cache_path(&self) -> common::Result<PathBuf> {
        if let Some(path) = &self.cache.path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join("cc-cli").join("credentials.json"))
            .ok_or_else(|| {
                common::Error::Config(
                    "no per-user data directory found, set [cache] path".into(),
                )
            })
    }

    /// Reachability probe: the configured address, else the authority's host.
    pub fn probe(&self) -> common::Result<TcpProbe> {
        let timeout = Duration::from_millis(self.network.probe_timeout_ms);
        match &self.network.probe_addr {
            Some(addr) => Ok(TcpProbe::new(addr.clone(), timeout)),
            None => TcpProbe::for_url(&self.oidc.authority, timeout).ok_or_else(|| {
                common::Error::Config(format!(
                    "cannot derive a probe address from {}",
                    self.oidc.authority
                ))
            }),
        }
    }
}
