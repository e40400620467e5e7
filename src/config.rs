//! Startup configuration: bind address, sender allow-list, switch rules,
//! and endpoint overlays, loaded from a TOML file.
//!
//! Everything here is validated eagerly; any problem is fatal before the
//! server loop starts. The raw serde schema is lowered into the runtime
//! types ([`Router`], [`CidrFilter`]) so nothing downstream re-parses
//! strings per request.

use std::collections::HashMap;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::errors::Error;
use crate::router::{EndpointOverlay, HttpMethod, Router, SwitchFilter, TargetSpec, Template};

type Result<T> = std::result::Result<T, Error>;

/// IPv4 CIDR allow-list gating which senders are processed at all.
///
/// ```
/// use pop_http_rs::CidrFilter;
///
/// let filter: CidrFilter = "10.0.0.0/24".parse().unwrap();
/// assert!(filter.allows("10.0.0.17".parse().unwrap()));
/// assert!(!filter.allows("10.0.1.17".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrFilter {
    addr: u32,
    prefix: u8,
}

impl CidrFilter {
    /// The permissive `0.0.0.0/0` filter.
    pub fn any() -> Self {
        CidrFilter { addr: 0, prefix: 0 }
    }

    pub fn allows(&self, ip: Ipv4Addr) -> bool {
        let mask = if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        };
        (u32::from(ip) & mask) == (self.addr & mask)
    }
}

impl FromStr for CidrFilter {
    type Err = Error;

    /// Parse `a.b.c.d/len`; a bare address means `/32`.
    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::BadIpFilter(s.to_string());
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, len)) => (addr, len.parse::<u8>().map_err(|_| bad())?),
            None => (s, 32),
        };
        if prefix > 32 {
            return Err(bad());
        }
        let addr: Ipv4Addr = addr.parse().map_err(|_| bad())?;
        Ok(CidrFilter {
            addr: addr.into(),
            prefix,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    interface: Option<Ipv4Addr>,
    port: Option<u16>,
    ip_filter: Option<String>,
    default: Option<RawTarget>,
    #[serde(default, rename = "switch")]
    switches: Vec<RawSwitch>,
    #[serde(default, rename = "endpoint")]
    endpoints: Vec<RawEndpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTarget {
    url: String,
    method: Option<String>,
    body: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSwitch {
    #[serde(rename = "match")]
    filter: String,
    url: String,
    method: Option<String>,
    body: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEndpoint {
    prefix: String,
    method: Option<String>,
    auth: Option<RawAuth>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAuth {
    scheme: String,
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
}

/// Validated runtime configuration.
#[derive(Debug)]
pub struct Config {
    pub interface: Ipv4Addr,
    pub port: u16,
    pub ip_filter: CidrFilter,
    pub router: Router,
}

impl Config {
    pub const DEFAULT_PORT: u16 = 56700;

    /// Load and validate the configuration file.
    pub fn load(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path).map_err(|e| Error::config_read(path, e))?;
        Config::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Config> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|e| Error::ConfigParse(Box::new(e)))?;

        let ip_filter = match raw.ip_filter.as_deref() {
            Some(expr) => expr.parse()?,
            None => CidrFilter::any(),
        };

        let mut rules = Vec::with_capacity(raw.switches.len());
        for switch in raw.switches {
            let filter = parse_filter(&switch.filter)?;
            let target = build_target(switch.url, switch.method, switch.body, switch.headers)?;
            rules.push((filter, target));
        }

        let default_target = raw
            .default
            .map(|t| build_target(t.url, t.method, t.body, t.headers))
            .transpose()?;

        let overlays = raw
            .endpoints
            .into_iter()
            .map(build_overlay)
            .collect::<Result<Vec<_>>>()?;

        Ok(Config {
            interface: raw.interface.unwrap_or(Ipv4Addr::UNSPECIFIED),
            port: raw.port.unwrap_or(Self::DEFAULT_PORT),
            ip_filter,
            router: Router::new(rules, default_target, overlays),
        })
    }

    /// The socket address the server binds.
    pub fn bind_addr(&self) -> SocketAddr {
        (self.interface, self.port).into()
    }
}

// Switch filters use the compact token syntax `25486h,655s,on`: an
// integer suffixed with h/s/b/k, or the bare words on/off. Unlisted
// fields stay wildcards.
fn parse_filter(expr: &str) -> Result<SwitchFilter> {
    let mut filter = SwitchFilter::default();
    for token in expr.to_lowercase().split(',') {
        let token = token.trim();
        match token {
            "on" => filter.power = Some(true),
            "off" => filter.power = Some(false),
            _ => {
                let Some(suffix) = token.chars().last() else {
                    return Err(Error::bad_filter_token(token, expr));
                };
                let value = token[..token.len() - suffix.len_utf8()]
                    .parse::<u16>()
                    .map_err(|_| Error::bad_filter_token(token, expr))?;
                match suffix {
                    'h' => filter.hue = Some(value),
                    's' => filter.saturation = Some(value),
                    'b' => filter.brightness = Some(value),
                    'k' => filter.kelvin = Some(value),
                    _ => return Err(Error::bad_filter_token(token, expr)),
                }
            }
        }
    }
    Ok(filter)
}

fn build_target(
    url: String,
    method: Option<String>,
    body: Option<String>,
    headers: HashMap<String, String>,
) -> Result<TargetSpec> {
    let mut target = TargetSpec::new(Template::parse(&url)?);
    target.method = method.as_deref().map(HttpMethod::parse).transpose()?;
    target.body = body.as_deref().map(Template::parse).transpose()?;
    target.headers = headers;
    Ok(target)
}

fn build_overlay(raw: RawEndpoint) -> Result<EndpointOverlay> {
    if !raw.prefix.starts_with("http://") && !raw.prefix.starts_with("https://") {
        return Err(Error::BadEndpointPrefix(raw.prefix));
    }
    let method = raw.method.as_deref().map(HttpMethod::parse).transpose()?;
    let mut headers = raw.headers;
    if let Some(auth) = raw.auth {
        headers.insert("Authorization".to_string(), auth_header(&auth)?);
    }
    Ok(EndpointOverlay {
        prefix: raw.prefix,
        method,
        headers,
    })
}

fn auth_header(auth: &RawAuth) -> Result<String> {
    match auth.scheme.as_str() {
        "basic" => {
            let username = auth
                .username
                .as_deref()
                .ok_or_else(|| Error::missing_auth_param("basic", "username"))?;
            let password = auth
                .password
                .as_deref()
                .ok_or_else(|| Error::missing_auth_param("basic", "password"))?;
            let credentials = base64_encode(format!("{username}:{password}").as_bytes());
            Ok(format!("Basic {credentials}"))
        }
        "bearer" => {
            let token = auth
                .token
                .as_deref()
                .ok_or_else(|| Error::missing_auth_param("bearer", "token"))?;
            Ok(format!("Bearer {token}"))
        }
        other => Err(Error::UnknownAuthScheme(other.to_string())),
    }
}

/// Standard base64 (RFC 4648) with padding.
fn base64_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);

    for chunk in data.chunks(3) {
        let b0 = chunk[0] as usize;
        let b1 = chunk.get(1).copied().unwrap_or(0) as usize;
        let b2 = chunk.get(2).copied().unwrap_or(0) as usize;

        out.push(ALPHABET[b0 >> 2] as char);
        out.push(ALPHABET[((b0 & 0x03) << 4) | (b1 >> 4)] as char);

        if chunk.len() > 1 {
            out.push(ALPHABET[((b1 & 0x0f) << 2) | (b2 >> 6)] as char);
        } else {
            out.push('=');
        }

        if chunk.len() > 2 {
            out.push(ALPHABET[b2 & 0x3f] as char);
        } else {
            out.push('=');
        }
    }

    out
}
