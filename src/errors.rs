use std::path::Path;

/// All error types that can occur while running the Pop bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A datagram was shorter than the fixed packet header.
    #[error("datagram too short for header: got {got} bytes, need {need}")]
    TruncatedHeader { got: usize, need: usize },

    /// A datagram carried a recognized code but not enough payload bytes.
    #[error("payload too short for code {code}: got {got} bytes, need {need}")]
    TruncatedPayload { code: u16, got: usize, need: usize },

    /// A network socket operation failed.
    #[error("socket {action} error: {err:?}")]
    Socket { action: String, err: std::io::Error },

    /// The configuration file could not be read.
    #[error("failed to read {path}: {err}")]
    ConfigRead { path: String, err: std::io::Error },

    /// The configuration file could not be parsed.
    #[error("failed to parse config: {0}")]
    ConfigParse(Box<toml::de::Error>),

    /// The IP filter was not a valid IPv4 CIDR expression.
    #[error("bad IP address format specified for IP filter: {0:?}")]
    BadIpFilter(String),

    /// A switch filter contained a token that is not `on`, `off`, or a
    /// number suffixed with one of `h`, `s`, `b`, `k`.
    #[error("unknown parameter {token:?} while parsing {filter:?}")]
    BadFilterToken { token: String, filter: String },

    /// A URL or body template referenced a placeholder that does not exist.
    #[error("unknown placeholder {name:?} in template {template:?}")]
    UnknownPlaceholder { name: String, template: String },

    /// A template contained an unbalanced `{` or `}`.
    #[error("unbalanced braces in template {template:?}")]
    UnbalancedTemplate { template: String },

    /// An endpoint auth block is missing a required parameter.
    #[error("{param:?} parameter is required when using {scheme} HTTP authentication")]
    MissingAuthParam { scheme: String, param: String },

    /// An endpoint auth block named a scheme other than `basic` or `bearer`.
    #[error("unknown authentication scheme {0:?}")]
    UnknownAuthScheme(String),

    /// An endpoint prefix was not an absolute http(s) URL prefix.
    #[error("endpoint prefix {0:?} must start with http:// or https://")]
    BadEndpointPrefix(String),

    /// A target or endpoint named an unsupported HTTP method.
    #[error("unknown HTTP method {0:?}")]
    BadMethod(String),

    /// The outbound HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(reqwest::Error),
}

impl Error {
    /// Create a new socket error
    pub fn socket(action: &str, err: std::io::Error) -> Self {
        Error::Socket {
            action: action.to_string(),
            err,
        }
    }

    /// Create a new config read error
    pub fn config_read(path: &Path, err: std::io::Error) -> Self {
        Error::ConfigRead {
            path: path.display().to_string(),
            err,
        }
    }

    /// Create a new bad filter token error
    pub fn bad_filter_token(token: &str, filter: &str) -> Self {
        Error::BadFilterToken {
            token: token.to_string(),
            filter: filter.to_string(),
        }
    }

    /// Create a new missing auth parameter error
    pub fn missing_auth_param(scheme: &str, param: &str) -> Self {
        Error::MissingAuthParam {
            scheme: scheme.to_string(),
            param: param.to_string(),
        }
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
