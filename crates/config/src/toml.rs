//! The `toml` module provides TOML deserialization and parsing for Gatehouse's configuration files.

// Due to the need for multiple serialization mappings, TOML deserialization is not done
// directly in the [`gatehouse_config`](crate) module's structs.

use {
    crate::{normalize_endpoint, parse_duration, ConfigFileError},
    serde::{Deserialize, Serialize},
    std::{fs, path::Path, time::Duration},
    tracing::debug,
    validator::Validate,
};

/// The TOML serialization for a Config structure.
#[derive(Serialize, Deserialize, Default)]
struct Config {
    #[serde(default)]
    service: Service,
    #[serde(default)]
    ext_auth: ExtAuth,
    #[serde(default)]
    upstream: Upstream,
    #[serde(default)]
    metrics: Metrics,
}

/// The TOML serialization for a Service config structure.
#[derive(Serialize, Deserialize)]
struct Service {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_admin_port")]
    admin_port: u16,
    #[serde(default = "default_admin")]
    admin: bool,
}

/// The default port for the primary service.
///
/// See [`DEFAULT_PORT`](crate::DEFAULT_PORT).
fn default_port() -> u16 {
    crate::DEFAULT_PORT
}

/// The default port for the internal admin service.
///
/// See [`DEFAULT_ADMIN_PORT`](crate::DEFAULT_ADMIN_PORT).
fn default_admin_port() -> u16 {
    crate::DEFAULT_ADMIN_PORT
}

/// The default for whether the admin service should be enabled or not.
fn default_admin() -> bool {
    true
}

impl Default for Service {
    fn default() -> Self {
        Self {
            port: default_port(),
            admin_port: default_admin_port(),
            admin: default_admin(),
        }
    }
}

impl From<Service> for crate::Service {
    fn from(service: Service) -> Self {
        Self {
            port: service.port,
            admin_port: service.admin_port,
            admin_enabled: service.admin,
        }
    }
}

/// The TOML serialization for an ExtAuth structure.
#[derive(Serialize, Deserialize)]
struct ExtAuth {
    #[serde(default)]
    proxy: String,
    #[serde(default = "default_headers")]
    headers: bool,
    #[serde(default = "default_cookies")]
    cookies: bool,
    #[serde(default = "default_ext_auth_timeout")]
    timeout: String,
    #[serde(default)]
    insecure_skip_verify: bool,
    #[serde(default)]
    router: bool,
}

/// The default for whether inbound headers are sent to the verification service.
fn default_headers() -> bool {
    crate::DEFAULT_PROPAGATE_HEADERS
}

/// The default for whether inbound cookies are sent to the verification service.
fn default_cookies() -> bool {
    crate::DEFAULT_PROPAGATE_COOKIES
}

/// The default verification timeout.
///
/// See [`DEFAULT_EXT_AUTH_TIMEOUT`](crate::DEFAULT_EXT_AUTH_TIMEOUT).
fn default_ext_auth_timeout() -> String {
    crate::format_duration(crate::DEFAULT_EXT_AUTH_TIMEOUT)
}

impl Default for ExtAuth {
    fn default() -> Self {
        Self {
            proxy: String::new(),
            headers: default_headers(),
            cookies: default_cookies(),
            timeout: default_ext_auth_timeout(),
            insecure_skip_verify: false,
            router: false,
        }
    }
}

impl TryFrom<ExtAuth> for crate::ExtAuth {
    type Error = ConfigFileError;

    fn try_from(ext_auth: ExtAuth) -> Result<Self, Self::Error> {
        Ok(Self {
            proxy: normalize_endpoint(&ext_auth.proxy),
            headers: ext_auth.headers,
            cookies: ext_auth.cookies,
            timeout: parse_timeout("ext_auth.timeout", &ext_auth.timeout)?,
            insecure_skip_verify: ext_auth.insecure_skip_verify,
            router: ext_auth.router,
        })
    }
}

/// The TOML serialization for an Upstream structure.
#[derive(Serialize, Deserialize)]
struct Upstream {
    #[serde(default)]
    uri: String,
    #[serde(default = "default_upstream_timeout")]
    timeout: String,
}

/// The default upstream timeout.
///
/// See [`DEFAULT_UPSTREAM_TIMEOUT`](crate::DEFAULT_UPSTREAM_TIMEOUT).
fn default_upstream_timeout() -> String {
    crate::format_duration(crate::DEFAULT_UPSTREAM_TIMEOUT)
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            uri: String::new(),
            timeout: default_upstream_timeout(),
        }
    }
}

impl TryFrom<Upstream> for crate::Upstream {
    type Error = ConfigFileError;

    fn try_from(upstream: Upstream) -> Result<Self, Self::Error> {
        Ok(Self {
            uri: normalize_endpoint(&upstream.uri),
            timeout: parse_timeout("upstream.timeout", &upstream.timeout)?,
        })
    }
}

/// The TOML serialization for a Metrics structure.
#[derive(Serialize, Deserialize, Default)]
struct Metrics {
    #[serde(default)]
    prefix: String,
}

impl From<Metrics> for crate::Metrics {
    fn from(metrics: Metrics) -> Self {
        Self {
            prefix: metrics.prefix,
        }
    }
}

fn parse_timeout(key: &str, value: &str) -> Result<Duration, ConfigFileError> {
    parse_duration(value).map_err(|err| ConfigFileError::InvalidDuration(key.to_string(), err))
}

/// Parses TOML configuration text into a validated [`Config`](crate::Config) structure.
pub fn parse_config(toml_data: &str) -> Result<crate::Config, ConfigFileError> {
    let root: Config = toml::from_str(toml_data)?;

    let ext_auth: crate::ExtAuth = root.ext_auth.try_into()?;
    if ext_auth.proxy.is_empty() {
        return Err(ConfigFileError::MissingEndpoint);
    }
    ext_auth.validate()?;

    let upstream: crate::Upstream = root.upstream.try_into()?;
    if upstream.uri.is_empty() {
        return Err(ConfigFileError::MissingUpstream);
    }
    upstream.validate()?;

    Ok(crate::Config {
        service: root.service.into(),
        ext_auth,
        upstream,
        metrics: root.metrics.into(),
    })
}

/// Loads a TOML config file into a [`Config`](crate::Config) structure.
pub fn load_config<'a, P>(path: &'a P) -> Result<crate::Config, ConfigFileError>
where
    P: 'a + ?Sized + AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigFileError::NotFound(path.to_path_buf()));
    }
    debug!(message = "load config", path = %path.display());
    let toml_data = fs::read_to_string(path)?;
    parse_config(&toml_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize() -> Result<(), Box<dyn std::error::Error>> {
        let root: Config = toml::from_str(
            r#"
        [service]
        port = 10002

        [ext_auth]
        proxy = "https://auth.internal:9000"
        cookies = false
        timeout = "5s"

        [upstream]
        uri = "http://127.0.0.1:9000"
    "#,
        )?;

        assert_eq!(root.service.port, 10002); // non-default
        assert_eq!(root.service.admin_port, crate::DEFAULT_ADMIN_PORT);
        assert!(root.service.admin);

        assert_eq!(root.ext_auth.proxy, "https://auth.internal:9000");
        assert!(!root.ext_auth.cookies); // non-default
        assert!(root.ext_auth.headers);
        assert_eq!(root.ext_auth.timeout, "5s"); // non-default
        assert!(!root.ext_auth.router);
        assert!(!root.ext_auth.insecure_skip_verify);

        assert_eq!(root.upstream.uri, "http://127.0.0.1:9000");
        assert_eq!(root.upstream.timeout, "30s");

        assert_eq!(root.metrics.prefix, "");

        Ok(())
    }

    #[test]
    fn test_parse_config() -> Result<(), Box<dyn std::error::Error>> {
        let config = parse_config(
            r#"
        [ext_auth]
        proxy = "auth.internal:9000"
        router = true
        timeout = "1m30s"

        [upstream]
        uri = "127.0.0.1:9000"
        timeout = "500ms"
    "#,
        )?;

        assert_eq!(config.ext_auth.proxy, "http://auth.internal:9000");
        assert!(config.ext_auth.router);
        assert_eq!(config.ext_auth.timeout, Duration::from_secs(90));
        assert_eq!(config.upstream.uri, "http://127.0.0.1:9000");
        assert_eq!(config.upstream.timeout, Duration::from_millis(500));
        assert_eq!(config.service.port, crate::DEFAULT_PORT);

        Ok(())
    }

    #[test]
    fn test_parse_config_errors() {
        assert!(matches!(
            parse_config("[upstream]\nuri = \"http://127.0.0.1:9000\""),
            Err(ConfigFileError::MissingEndpoint)
        ));
        assert!(matches!(
            parse_config("[ext_auth]\nproxy = \"http://127.0.0.1:9001\""),
            Err(ConfigFileError::MissingUpstream)
        ));
        assert!(matches!(
            parse_config(
                "[ext_auth]\nproxy = \"http://127.0.0.1:9001\"\ntimeout = \"soon\"\n[upstream]\nuri = \"http://127.0.0.1:9000\""
            ),
            Err(ConfigFileError::InvalidDuration(_, _))
        ));
        assert!(matches!(
            parse_config(
                "[ext_auth]\nproxy = \"ftp://127.0.0.1:9001\"\n[upstream]\nuri = \"http://127.0.0.1:9000\""
            ),
            Err(ConfigFileError::Validations(_))
        ));
        assert!(matches!(
            parse_config("[ext_auth]\nproxy = 9001"),
            Err(ConfigFileError::Deserialization(_))
        ));
    }

    #[test]
    fn test_load_config() -> Result<(), Box<dyn std::error::Error>> {
        let root = load_config("tests/gatehouse.toml")?;

        assert_eq!(root.service.port, 10002); // non-default
        assert_eq!(root.service.admin_port, crate::DEFAULT_ADMIN_PORT);
        assert!(!root.service.admin_enabled); // non-default

        assert_eq!(root.ext_auth.proxy, "https://auth.internal:9443/verify");
        assert!(root.ext_auth.headers);
        assert!(!root.ext_auth.cookies);
        assert!(root.ext_auth.insecure_skip_verify);
        assert!(root.ext_auth.router);
        assert_eq!(root.ext_auth.timeout, Duration::from_secs(5));

        assert_eq!(root.upstream.uri, "http://127.0.0.1:9000");
        assert_eq!(root.metrics.prefix, "gatehouse");

        assert!(matches!(
            load_config("tests/missing.toml"),
            Err(ConfigFileError::NotFound(_))
        ));

        Ok(())
    }
}
