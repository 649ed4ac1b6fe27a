//! Qualified names for networks and variables.
//!
//! A network is addressed as `host:port/network`; a variable as `host:port/network.variable`.
//! Either host part may be omitted when parsing, in which case the defaults of the parsing
//! context apply.
use crate::{config::DEFAULT_REGISTRY_PORT, error::InferenceError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?P<host>[^:/\s]+)(?::(?P<port>\d+))?/)?(?P<network>[^./:\s]+)(?:\.(?P<variable>[^/:\s]+))?$",
    )
    .expect("name pattern is a valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NameInfo {
    pub host: String,
    pub port: u16,
    pub network: String,
    pub variable: Option<String>,
}

impl NameInfo {
    /// Parse `[host[:port]/]network[.variable]`.
    ///
    /// Without a host part the supplied defaults are used; with a host but no port the
    /// registry default port applies.
    pub fn parse(
        text: &str,
        default_host: &str,
        default_port: u16,
    ) -> Result<NameInfo, InferenceError> {
        let caps = NAME_PATTERN
            .captures(text.trim())
            .ok_or_else(|| InferenceError::InvalidArgument(format!("malformed name '{text}'")))?;
        let (host, port) = match caps.name("host") {
            Some(host) => {
                let port = match caps.name("port") {
                    Some(p) => p.as_str().parse::<u16>().map_err(|e| {
                        InferenceError::InvalidArgument(format!("bad port in '{text}': {e}"))
                    })?,
                    None => DEFAULT_REGISTRY_PORT,
                };
                (host.as_str().to_string(), port)
            }
            None => (default_host.to_string(), default_port),
        };
        Ok(NameInfo {
            host,
            port,
            network: caps["network"].to_string(),
            variable: caps.name("variable").map(|v| v.as_str().to_string()),
        })
    }

    pub fn network_fullname(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.network)
    }

    /// The same location with the variable part stripped.
    pub fn network_only(&self) -> NameInfo {
        NameInfo {
            variable: None,
            ..self.clone()
        }
    }

    pub fn variable_key(&self) -> Option<VariableKey> {
        self.variable
            .as_ref()
            .map(|v| VariableKey::new(self.network_fullname(), v))
    }

    pub fn is_at(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }
}

impl Display for NameInfo {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.network_fullname())?;
        if let Some(variable) = &self.variable {
            write!(f, ".{variable}")?;
        }
        Ok(())
    }
}

/// Identity of one variable anywhere in the system: its network's fullname and its own name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariableKey {
    pub network: String,
    pub variable: String,
}

impl VariableKey {
    pub fn new(network: impl Into<String>, variable: impl Into<String>) -> Self {
        VariableKey {
            network: network.into(),
            variable: variable.into(),
        }
    }
}

impl Display for VariableKey {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}.{}", self.network, self.variable)
    }
}
