//! Client origin filtering.
//!
//! Rules are exact addresses or CIDR ranges. Evaluation order is fixed:
//! 1. deny-list match → deny (deny wins over allow)
//! 2. non-empty allow-list and no match → deny
//! 3. otherwise allow
//!
//! With both lists empty the controller is disabled and allows everything.
//! The check runs on the peer address before the request body is read.

use std::fmt;
use std::net::IpAddr;

use axum::http::HeaderMap;
use thiserror::Error;

use crate::config::AccessConfig;

/// Rule text that could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessRuleError {
    #[error("invalid address {0:?}")]
    Address(String),
    #[error("invalid prefix length in {0:?}")]
    Prefix(String),
}

/// A single allow/deny entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRule {
    Exact(IpAddr),
    Cidr { network: IpAddr, prefix: u8 },
}

impl AccessRule {
    /// Parse `"10.0.0.5"`, `"10.0.0.0/8"`, `"::1"` or `"fd00::/8"`.
    pub fn parse(text: &str) -> Result<Self, AccessRuleError> {
        let text = text.trim();
        match text.split_once('/') {
            None => text
                .parse::<IpAddr>()
                .map(|ip| AccessRule::Exact(canonical(ip)))
                .map_err(|_| AccessRuleError::Address(text.to_string())),
            Some((addr, prefix)) => {
                let network = addr
                    .parse::<IpAddr>()
                    .map(canonical)
                    .map_err(|_| AccessRuleError::Address(text.to_string()))?;
                let prefix: u8 = prefix
                    .parse()
                    .map_err(|_| AccessRuleError::Prefix(text.to_string()))?;
                let max = if network.is_ipv4() { 32 } else { 128 };
                if prefix > max {
                    return Err(AccessRuleError::Prefix(text.to_string()));
                }
                Ok(AccessRule::Cidr { network, prefix })
            }
        }
    }

    /// Return true if `ip` falls under this rule.
    pub fn matches(&self, ip: IpAddr) -> bool {
        let ip = canonical(ip);
        match *self {
            AccessRule::Exact(expected) => expected == ip,
            AccessRule::Cidr { network, prefix } => match (network, ip) {
                (IpAddr::V4(net), IpAddr::V4(addr)) => {
                    let mask = mask_u32(prefix);
                    u32::from(net) & mask == u32::from(addr) & mask
                }
                (IpAddr::V6(net), IpAddr::V6(addr)) => {
                    let mask = mask_u128(prefix);
                    u128::from(net) & mask == u128::from(addr) & mask
                }
                _ => false,
            },
        }
    }
}

impl fmt::Display for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessRule::Exact(ip) => write!(f, "{}", ip),
            AccessRule::Cidr { network, prefix } => write!(f, "{}/{}", network, prefix),
        }
    }
}

fn mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

fn mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix as u32)
    }
}

/// IPv4-mapped IPv6 addresses (dual-stack listeners) are matched as IPv4.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

/// Outcome of an origin check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny { reason: String },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Evaluates client addresses against the configured lists.
#[derive(Debug, Clone, Default)]
pub struct AccessController {
    allow: Vec<AccessRule>,
    deny: Vec<AccessRule>,
}

impl AccessController {
    pub fn new(allow: Vec<AccessRule>, deny: Vec<AccessRule>) -> Self {
        Self { allow, deny }
    }

    /// Build from configuration. Rule syntax was checked by validation;
    /// parsing again here still reports the first bad entry.
    pub fn from_config(config: &AccessConfig) -> Result<Self, AccessRuleError> {
        let parse_all = |rules: &[String]| {
            rules
                .iter()
                .map(|r| AccessRule::parse(r))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self::new(parse_all(&config.allow)?, parse_all(&config.deny)?))
    }

    /// False when both lists are empty.
    pub fn is_enabled(&self) -> bool {
        !self.allow.is_empty() || !self.deny.is_empty()
    }

    pub fn evaluate(&self, ip: IpAddr) -> AccessDecision {
        if let Some(rule) = self.deny.iter().find(|r| r.matches(ip)) {
            return AccessDecision::Deny {
                reason: format!("address {} matches deny rule {}", ip, rule),
            };
        }
        if !self.allow.is_empty() && !self.allow.iter().any(|r| r.matches(ip)) {
            return AccessDecision::Deny {
                reason: format!("address {} is not in the allow-list", ip),
            };
        }
        AccessDecision::Allow
    }
}

/// Resolve the client origin.
///
/// With `trust_forwarded_for` the left-most X-Forwarded-For entry, then
/// X-Real-IP, is used; unparsable headers fall back to the socket peer.
pub fn client_ip(peer: IpAddr, headers: &HeaderMap, trust_forwarded_for: bool) -> IpAddr {
    if !trust_forwarded_for {
        return peer;
    }
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };
    forwarded.or_else(real_ip).unwrap_or(peer)
}
