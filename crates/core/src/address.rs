//! Live server address specifications
//!
//! Format: `host:port[,port-range][,port-range...]` where each alternative is
//! either a single port or an inclusive `start-end` range. The live server
//! binds the first port of the first alternative that is free.
//!
//! ```text
//! localhost:8081,8100-8200,9100-9200
//! [::1]:0
//! ```

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Inclusive range of candidate ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    /// First port
    pub start: u16,
    /// Last port (inclusive)
    pub end: u16,
}

impl PortRange {
    /// Ports in this range, in ascending order
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Parsed live server address specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveServerAddress {
    host: String,
    ranges: Vec<PortRange>,
}

impl LiveServerAddress {
    /// Parse an address specification
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] when the host or any port
    /// alternative is missing or malformed.
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidAddress {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (host, ports) = spec
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let mut ranges = Vec::new();
        for part in ports.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(invalid("empty port alternative"));
            }
            let range = match part.split_once('-') {
                Some((start, end)) => {
                    let start = parse_port(start).ok_or_else(|| invalid("bad port"))?;
                    let end = parse_port(end).ok_or_else(|| invalid("bad port"))?;
                    if start > end {
                        return Err(invalid("port range is reversed"));
                    }
                    PortRange { start, end }
                }
                None => {
                    let port = parse_port(part).ok_or_else(|| invalid("bad port"))?;
                    PortRange {
                        start: port,
                        end: port,
                    }
                }
            };
            ranges.push(range);
        }

        Ok(Self {
            host: host.to_string(),
            ranges,
        })
    }

    /// Host as written in the specification
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host suitable for binding (IPv6 brackets removed)
    pub fn bind_host(&self) -> &str {
        self.host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host)
    }

    /// Port alternatives in the order given
    pub fn ranges(&self) -> &[PortRange] {
        &self.ranges
    }

    /// Every candidate port, in the order they should be tried
    pub fn candidates(&self) -> impl Iterator<Item = u16> + '_ {
        self.ranges.iter().flat_map(|r| r.ports())
    }
}

impl FromStr for LiveServerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for LiveServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.host)?;
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", range)?;
        }
        Ok(())
    }
}

fn parse_port(raw: &str) -> Option<u16> {
    raw.trim().parse::<u16>().ok()
}
