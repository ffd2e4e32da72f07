//! The set of ports a run keeps mapped.

use std::fmt;

/// Sorted, duplicate-free set of ports to keep mapped
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PortSet(Vec<u16>);

impl PortSet {
    /// Normalize `ports` into a set
    pub fn new(mut ports: Vec<u16>) -> Self {
        ports.sort_unstable();
        ports.dedup();
        ports.shrink_to_fit();
        Self(ports)
    }

    /// Number of distinct ports
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there is nothing to map
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Membership check
    pub fn contains(&self, port: u16) -> bool {
        self.0.binary_search(&port).is_ok()
    }

    /// Ports in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }

    /// Ports in ascending order, as a slice
    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }
}

impl From<Vec<u16>> for PortSet {
    fn from(ports: Vec<u16>) -> Self {
        Self::new(ports)
    }
}

impl<const N: usize> From<[u16; N]> for PortSet {
    fn from(ports: [u16; N]) -> Self {
        Self::new(ports.to_vec())
    }
}

impl FromIterator<u16> for PortSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Display for PortSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, port) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", port)?;
        }
        write!(f, "}}")
    }
}
