//! Parsing of `HOST[:PORT][/LATENCY]` endpoint strings into connection
//! parameters, independent of any live socket.

use std::fmt;

use crate::error::Error;

pub const DEFAULT_PORT: u16 = 6600;

#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// A user-supplied static latency offset, bypassing the adaptive
    /// controller for this follower.
    pub static_latency: Option<f64>,
}

impl Endpoint {
    pub fn parse(text: &str, password: Option<String>) -> Result<Self, Error> {
        let (rest, static_latency) = match text.split_once('/') {
            Some((rest, latency)) => {
                let latency = latency.parse::<f64>().map_err(|e| {
                    Error::Configuration(format!("invalid latency {latency:?} in {text:?}: {e}"))
                })?;
                (rest, Some(latency))
            }
            None => (text, None),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    Error::Configuration(format!("invalid port {port:?} in {text:?}: {e}"))
                })?;
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(Error::Configuration(format!(
                "empty host in endpoint {text:?}"
            )));
        }

        Ok(Self {
            host: host.to_owned(),
            port,
            password,
            static_latency,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)?;
        if let Some(latency) = self.static_latency {
            write!(f, "/{latency}")?;
        }
        Ok(())
    }
}
