//! Parsing of port specifications like `8080,8081,9000-9005`.
//!
//! Parsing is strict: the first malformed token aborts the whole spec.

use crate::error::PortSpecError;
use indexmap::IndexSet;
use itertools::Itertools;
use std::fmt::Display;
use std::str::FromStr;

/// An ordered set of distinct, valid TCP ports.
///
/// Iteration follows first appearance in the spec: ascending within a range,
/// tokens left to right.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSet(IndexSet<u16>);

impl PortSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, port: u16) -> bool {
        self.0.insert(port)
    }

    pub fn contains(&self, port: u16) -> bool {
        self.0.contains(&port)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }

    /// Ports in ascending order, the order reconciliation walks them in.
    pub fn ascending(&self) -> Vec<u16> {
        self.0.iter().copied().sorted().collect()
    }
}

impl FromIterator<u16> for PortSet {
    fn from_iter<T: IntoIterator<Item = u16>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a PortSet {
    type Item = u16;
    type IntoIter = std::iter::Copied<indexmap::set::Iter<'a, u16>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().copied()
    }
}

impl FromStr for PortSet {
    type Err = PortSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Renders contiguous runs (in ascending order) as ranges, e.g. `22,8080-8082`.
impl Display for PortSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut runs: Vec<(u16, u16)> = vec![];
        for port in self.ascending() {
            match runs.last_mut() {
                Some((_, end)) if end.checked_add(1) == Some(port) => *end = port,
                _ => runs.push((port, port)),
            }
        }
        let s = runs
            .into_iter()
            .map(|(start, end)| {
                if start == end {
                    start.to_string()
                } else {
                    format!("{start}-{end}")
                }
            })
            .join(",");
        write!(f, "{s}")
    }
}

/// Parses a comma-separated list of ports and `A-B` ranges.
pub fn parse(spec: &str) -> Result<PortSet, PortSpecError> {
    let mut ports = PortSet::new();
    for token in spec.split(',').map(str::trim) {
        if token.is_empty() {
            continue;
        }
        match token.split_once('-') {
            Some((start, end)) => {
                let start = parse_port(token, start.trim())?;
                let end = parse_port(token, end.trim())?;
                if end < start {
                    return Err(PortSpecError::malformed(
                        token,
                        format!("range end {end} is lower than range start {start}"),
                    ));
                }
                for port in start..=end {
                    ports.insert(port);
                }
            }
            None => {
                ports.insert(parse_port(token, token)?);
            }
        }
    }
    Ok(ports)
}

fn parse_port(token: &str, raw: &str) -> Result<u16, PortSpecError> {
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(PortSpecError::malformed(
            token,
            format!("'{raw}' is not a port number"),
        ));
    }
    match raw.parse::<u32>() {
        Ok(port @ 1..=65535) => Ok(port as u16),
        _ => Err(PortSpecError::malformed(
            token,
            format!("{raw} is outside the valid port range 1-65535"),
        )),
    }
}
