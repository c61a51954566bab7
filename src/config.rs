//! Locator configuration.
//!
//! Configuration can be built in code, deserialized with serde, or read from environment
//! variables with [`LocatorConfig::from_env`]:
//!
//! - `LOCATOR_KIND` - `hash` or `replica`
//! - `LOCATOR_HASH` - hash algorithm name, e.g. `native`, `crc32`, `fnv1a_64`
//! - `LOCATOR_FAILURE_MODE` - `true` to hand back closed sessions instead of failing over
//! - `LOCATOR_COPY_NUM` - replication factor for the replica locator
//! - `LOCATOR_OVERRIDE_POLICY` - `random` or `round-robin`
//! - `LOCATOR_CONTROLLER` - controller DSN (`tcp://host:port`); enables override routing
//! - `LOCATOR_POLL_INTERVAL_SECS` - controller poll interval
use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::error::Error;
use crate::hash::HashAlgorithm;
use crate::overrides::OverridePolicy;
use crate::parser::RecordFormat;

/// Which locator [`build_locator`](crate::build_locator) constructs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorKind {
    /// [`HashLocator`](crate::HashLocator): weighted hash routing with optional overrides.
    #[default]
    Hash,
    /// [`ReplicaLocator`](crate::ReplicaLocator): lazily grown replica sets.
    Replica,
}

impl FromStr for LocatorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hash" | "array" => Ok(Self::Hash),
            "replica" | "random_replica" => Ok(Self::Replica),
            other => Err(Error::Config(format!("unknown locator kind `{other}`"))),
        }
    }
}

fn deserialize_secs<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(d)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

/// Where and how to poll the mapping controller.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Controller host name or IP.
    pub host: String,
    /// Controller port. `0` is rejected by [`validate`](ControllerConfig::validate).
    pub port: u16,
    /// Pause between poll cycles, also used as the reconnect backoff.
    #[serde(rename = "poll_interval_secs", deserialize_with = "deserialize_secs")]
    pub poll_interval: Duration,
    /// Limit on establishing the connection.
    #[serde(rename = "connect_timeout_secs", deserialize_with = "deserialize_secs")]
    pub connect_timeout: Duration,
    /// Limit on one request/response exchange. An expired exchange counts as an I/O failure.
    #[serde(rename = "read_timeout_secs", deserialize_with = "deserialize_secs")]
    pub read_timeout: Duration,
    /// Request written at the start of every poll cycle.
    pub request: String,
    /// Separator between a record's key and its host list.
    pub field_separator: char,
    /// Byte ending each response line. A trailing `\r` is always stripped.
    pub line_terminator: char,
    /// Truncate `host:port` entries to `host`.
    pub strip_ports: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            poll_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            request: "2:\r\n".to_string(),
            field_separator: ':',
            line_terminator: '\n',
            strip_ports: false,
        }
    }
}

impl ControllerConfig {
    /// Defaults for everything but the address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Parses a controller DSN: `tcp://<host>:<port>` or `<host>:<port>`.
    pub fn from_dsn(dsn: &str) -> Result<Self, Error> {
        let dsn = if dsn.contains("://") {
            dsn.to_string()
        } else {
            format!("tcp://{dsn}")
        };

        let url = Url::parse(&dsn).map_err(|e| Error::Config(format!("{dsn}: {e}")))?;
        if url.scheme() != "tcp" {
            return Err(Error::Config(format!(
                "{dsn}: unsupported scheme `{}`",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config(format!("{dsn}: missing host")))?;
        let port = url
            .port()
            .ok_or_else(|| Error::Config(format!("{dsn}: missing port")))?;

        Ok(Self::new(host, port))
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the response read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the request written each cycle.
    pub fn with_request(mut self, request: impl Into<String>) -> Self {
        self.request = request.into();
        self
    }

    /// Sets the key/host-list separator.
    pub fn with_field_separator(mut self, separator: char) -> Self {
        self.field_separator = separator;
        self
    }

    /// Sets the line terminator.
    pub fn with_line_terminator(mut self, terminator: char) -> Self {
        self.line_terminator = terminator;
        self
    }

    /// Enables or disables port stripping.
    pub fn with_strip_ports(mut self, strip: bool) -> Self {
        self.strip_ports = strip;
        self
    }

    /// `host:port` string suitable for connecting.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Record layout for the parser.
    pub fn record_format(&self) -> RecordFormat {
        RecordFormat {
            field_separator: self.field_separator,
            strip_ports: self.strip_ports,
        }
    }

    /// Checks the address, interval, timeouts and separators.
    pub fn validate(&self) -> Result<(), Error> {
        if self.host.is_empty() || self.port == 0 {
            return Err(Error::Config(format!(
                "invalid controller address `{}`",
                self.addr()
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be positive".into()));
        }
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(Error::Config("controller timeouts must be positive".into()));
        }
        if !self.field_separator.is_ascii() || self.field_separator == ',' {
            return Err(Error::Config(format!(
                "invalid field separator {:?}",
                self.field_separator
            )));
        }
        if !self.line_terminator.is_ascii() || self.line_terminator == self.field_separator {
            return Err(Error::Config(format!(
                "invalid line terminator {:?}",
                self.line_terminator
            )));
        }
        Ok(())
    }
}

/// Top-level locator configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Which locator to build.
    pub kind: LocatorKind,
    /// Key hash used for routing.
    pub hash_algorithm: HashAlgorithm,
    /// Return closed sessions as-is instead of failing over.
    pub failure_mode: bool,
    /// Replication factor of the replica locator.
    pub copy_num: usize,
    /// Consult controller overrides before hash routing.
    pub override_enabled: bool,
    /// How a host is picked from an override list.
    pub override_policy: OverridePolicy,
    /// Controller to poll for overrides.
    pub controller: Option<ControllerConfig>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            kind: LocatorKind::Hash,
            hash_algorithm: HashAlgorithm::Native,
            failure_mode: false,
            copy_num: 3,
            override_enabled: false,
            override_policy: OverridePolicy::Random,
            controller: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(variable = name, value = %raw, error = %e, "ignoring invalid environment value");
            None
        }
    }
}

impl LocatorConfig {
    /// Create configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(kind) = env_parse("LOCATOR_KIND") {
            config.kind = kind;
        }
        if let Some(algorithm) = env_parse("LOCATOR_HASH") {
            config.hash_algorithm = algorithm;
        }
        if let Some(failure_mode) = env_parse("LOCATOR_FAILURE_MODE") {
            config.failure_mode = failure_mode;
        }
        if let Some(copy_num) = env_parse("LOCATOR_COPY_NUM") {
            config.copy_num = copy_num;
        }
        if let Some(policy) = env_parse("LOCATOR_OVERRIDE_POLICY") {
            config.override_policy = policy;
        }

        if let Ok(dsn) = std::env::var("LOCATOR_CONTROLLER") {
            match ControllerConfig::from_dsn(&dsn) {
                Ok(controller) => {
                    config.controller = Some(controller);
                    config.override_enabled = true;
                }
                Err(e) => warn!(error = %e, "ignoring invalid LOCATOR_CONTROLLER"),
            }
        }

        if let Some(secs) = env_parse::<u64>("LOCATOR_POLL_INTERVAL_SECS") {
            if let Some(controller) = config.controller.as_mut() {
                controller.poll_interval = Duration::from_secs(secs);
            }
        }

        config
    }

    /// Sets the locator kind.
    pub fn with_kind(mut self, kind: LocatorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the hash algorithm.
    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Sets failure mode.
    pub fn with_failure_mode(mut self, enabled: bool) -> Self {
        self.failure_mode = enabled;
        self
    }

    /// Sets the replication factor.
    pub fn with_copy_num(mut self, copy_num: usize) -> Self {
        self.copy_num = copy_num;
        self
    }

    /// Enables override routing against the given controller.
    pub fn with_controller(mut self, controller: ControllerConfig, policy: OverridePolicy) -> Self {
        self.controller = Some(controller);
        self.override_policy = policy;
        self.override_enabled = true;
        self
    }

    /// Checks the replication factor and the controller settings.
    pub fn validate(&self) -> Result<(), Error> {
        if self.kind == LocatorKind::Replica && self.copy_num == 0 {
            return Err(Error::Config("copy_num must be at least 1".into()));
        }
        if self.override_enabled {
            match &self.controller {
                Some(controller) => controller.validate()?,
                None => {
                    return Err(Error::Config(
                        "override routing is enabled but no controller is configured".into(),
                    ))
                }
            }
        }
        Ok(())
    }
}
