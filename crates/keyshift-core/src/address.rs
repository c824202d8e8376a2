//! Endpoint connection strings
//!
//! Accepted forms:
//!
//! - `host:port`
//! - `password@host:port`
//! - `user:password@host:port`
//! - any of the above prefixed with `redis://`
//!
//! Only database 0 is ever addressed; a trailing `/0` is tolerated, any
//! other database index is rejected.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{KeyshiftError, Result};

const SCHEME: &str = "redis://";
const DEFAULT_PORT: u16 = 6379;

/// A parsed endpoint address with optional credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAddr {
    /// Hostname or IP
    pub host: String,
    /// TCP port
    pub port: u16,
    /// ACL username (`AUTH user pass`)
    pub username: Option<String>,
    /// Password (`AUTH pass` or `AUTH user pass`)
    pub password: Option<String>,
}

impl EndpointAddr {
    /// Parse a connection string.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(KeyshiftError::invalid_address(input, "empty connection string"));
        }

        let rest = trimmed.strip_prefix(SCHEME).unwrap_or(trimmed);
        if rest.contains("://") {
            return Err(KeyshiftError::invalid_address(
                input,
                "unsupported scheme, expected redis://",
            ));
        }

        let rest = match rest.split_once('/') {
            None => rest,
            Some((authority, "" | "0")) => authority,
            Some(_) => {
                return Err(KeyshiftError::invalid_address(
                    input,
                    "only database 0 can be migrated",
                ))
            }
        };

        // The password may itself contain '@', so split on the last one.
        let (userinfo, hostport) = match rest.rsplit_once('@') {
            Some((userinfo, hostport)) => (Some(userinfo), hostport),
            None => (None, rest),
        };

        let (username, password) = match userinfo {
            None => (None, None),
            Some(info) => match info.split_once(':') {
                Some(("", pass)) => (None, non_empty(pass)),
                Some((user, pass)) => (Some(user.to_string()), non_empty(pass)),
                None => (None, non_empty(info)),
            },
        };

        let (host, port) = match hostport.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| KeyshiftError::invalid_address(input, "invalid port"))?;
                (host, port)
            }
            None => (hostport, DEFAULT_PORT),
        };

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(KeyshiftError::invalid_address(input, "missing host"));
        }
        if port == 0 {
            return Err(KeyshiftError::invalid_address(input, "port cannot be 0"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            username,
            password,
        })
    }

    /// `host:port` suitable for `TcpStream::connect`
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Whether an AUTH handshake is needed
    pub fn requires_auth(&self) -> bool {
        self.password.is_some()
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

impl std::str::FromStr for EndpointAddr {
    type Err = KeyshiftError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// Credentials never reach logs.
impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.username, &self.password) {
            (Some(user), Some(_)) => write!(f, "{}{}:***@{}", SCHEME, user, self.socket_addr()),
            (None, Some(_)) => write!(f, "{}***@{}", SCHEME, self.socket_addr()),
            _ => write!(f, "{}{}", SCHEME, self.socket_addr()),
        }
    }
}

impl fmt::Debug for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointAddr")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}
