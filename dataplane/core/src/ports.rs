use anyhow::{Context, Result};
use std::num::NonZeroU16;

/// A `HashSet` specialized for ports.
///
/// Because ports are `u16` values, this type avoids the overhead of actually
/// hashing ports.
pub type PortSet = std::collections::HashSet<NonZeroU16, std::hash::BuildHasherDefault<PortHasher>>;

/// A hasher for ports.
///
/// Because ports are single `NonZeroU16` values, we don't have to hash them; we can just use
/// the integer values as hashes directly.
#[derive(Debug, Default)]
pub struct PortHasher(u16);

// === impl PortHasher ===

impl std::hash::Hasher for PortHasher {
    fn write(&mut self, _: &[u8]) {
        unreachable!("hashing a `u16` calls `write_u16`");
    }

    #[inline]
    fn write_u16(&mut self, port: u16) {
        self.0 = port;
    }

    #[inline]
    fn finish(&self) -> u64 {
        self.0 as u64
    }
}

/// Parses a single port, as written in a policy's port list.
pub fn parse_port(s: &str) -> Result<NonZeroU16> {
    s.trim()
        .parse::<NonZeroU16>()
        .with_context(|| format!("invalid port {s:?}"))
}
