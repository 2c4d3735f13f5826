use crate::error::ConnectionError;

/// Validated device address plus the ordered list of URLs tried when
/// connecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAddress {
    /// Address without scheme, e.g. `192.168.4.1:81/stream`
    base: String,
    variants: Vec<String>,
}

impl DeviceAddress {
    /// Parse `address` (with or without `ws://` / `wss://`). When no port is
    /// given, `fallback_ports` are appended for both schemes.
    pub fn parse(address: &str, fallback_ports: &[u16]) -> Result<Self, ConnectionError> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(ConnectionError::NoAddress);
        }

        let base = match trimmed.split_once("://") {
            Some((scheme, rest)) => {
                if !scheme.eq_ignore_ascii_case("ws") && !scheme.eq_ignore_ascii_case("wss") {
                    return Err(ConnectionError::InvalidAddress {
                        address: trimmed.to_string(),
                        reason: format!("unsupported scheme '{}'", scheme),
                    });
                }
                rest
            }
            None => trimmed,
        };

        let (authority, path) = match base.find('/') {
            Some(pos) => base.split_at(pos),
            None => (base, ""),
        };

        if authority.is_empty() {
            return Err(ConnectionError::InvalidAddress {
                address: trimmed.to_string(),
                reason: "missing host".to_string(),
            });
        }
        if authority.chars().any(char::is_whitespace) {
            return Err(ConnectionError::InvalidAddress {
                address: trimmed.to_string(),
                reason: "host contains whitespace".to_string(),
            });
        }

        let mut variants = vec![format!("ws://{}", base), format!("wss://{}", base)];

        if !has_port(authority) {
            for scheme in ["ws", "wss"] {
                for port in fallback_ports {
                    variants.push(format!("{}://{}:{}{}", scheme, authority, port, path));
                }
            }
        }
        variants.dedup();

        Ok(Self {
            base: base.to_string(),
            variants,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Connection URLs in the order they are attempted
    pub fn variants(&self) -> &[String] {
        &self.variants
    }
}

fn has_port(authority: &str) -> bool {
    // Bracketed IPv6 literal: only a colon after the closing bracket counts
    if let Some(end) = authority.rfind(']') {
        return authority[end..].contains(':');
    }
    authority.contains(':')
}
