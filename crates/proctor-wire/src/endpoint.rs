use std::fmt;

/// Errors produced while parsing an agency URL.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("agency url is empty")]
    Empty,

    #[error("unsupported agency url scheme {0:?} (expected tcp)")]
    UnsupportedScheme(String),

    #[error("agency url has no host: {0}")]
    MissingHost(String),

    #[error("agency url has an invalid port: {0}")]
    InvalidPort(String),
}

/// Address of an agency, parsed from a `tcp://host:port[/path]` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgencyEndpoint {
    /// Host name or IP literal (IPv6 literals keep their brackets).
    pub host: String,
    /// TCP port the agency listens on.
    pub port: u16,
    /// Optional object path after the authority, without the leading `/`.
    pub path: String,
}

impl AgencyEndpoint {
    /// The only scheme both bindings understand.
    pub const SCHEME: &str = "tcp";

    /// Parse an agency URL.
    ///
    /// ```text
    /// tcp://127.0.0.1:4567/TestAgency
    /// tcp://[::1]:4567
    /// ```
    pub fn parse(url: &str) -> Result<Self, EndpointError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(EndpointError::Empty);
        }

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| EndpointError::UnsupportedScheme(String::new()))?;
        if !scheme.eq_ignore_ascii_case(Self::SCHEME) {
            return Err(EndpointError::UnsupportedScheme(scheme.to_owned()));
        }

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (rest, ""),
        };

        // IPv6 literals look like [::1]:port, so split on the last colon
        // after the closing bracket.
        let port_sep = match authority.rfind(']') {
            Some(bracket) => authority[bracket..].rfind(':').map(|i| i + bracket),
            None => authority.rfind(':'),
        };
        let Some(sep) = port_sep else {
            return Err(EndpointError::InvalidPort(url.to_owned()));
        };

        let host = &authority[..sep];
        if host.is_empty() || host == "[]" {
            return Err(EndpointError::MissingHost(url.to_owned()));
        }
        let port: u16 = authority[sep + 1..]
            .parse()
            .map_err(|_| EndpointError::InvalidPort(url.to_owned()))?;
        if port == 0 {
            return Err(EndpointError::InvalidPort(url.to_owned()));
        }

        Ok(Self {
            host: host.to_owned(),
            port,
            path: path.to_owned(),
        })
    }

    /// The `host:port` string accepted by `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for AgencyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", Self::SCHEME, self.host, self.port)?;
        if !self.path.is_empty() {
            write!(f, "/{}", self.path)?;
        }
        Ok(())
    }
}
