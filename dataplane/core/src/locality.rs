use anyhow::{anyhow, Error, Result};
use serde::Serialize;
use std::fmt;

/// A topological position: the region, zone, and subzone of a node or workload.
///
/// Unset fields are empty strings and compare equal to one another.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Locality {
    pub region: String,
    pub zone: String,
    pub subzone: String,
}

/// How close an endpoint is to a client, from most to least specific.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Region, zone, and subzone all match.
    Subzone,
    /// Region and zone match; the subzone differs.
    Zone,
    /// Only the region matches.
    Region,
    /// Anywhere in the cluster.
    Any,
}

/// A service's endpoint distribution mode.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum DistributionMode {
    /// No locality preference.
    #[default]
    Default,

    /// Prefer the closest non-empty tier, failing over progressively.
    PreferClose,

    /// Only ever select endpoints in the client's own subzone.
    Local,
}

// === impl Locality ===

impl Locality {
    pub fn new(region: impl Into<String>, zone: impl Into<String>, subzone: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            zone: zone.into(),
            subzone: subzone.into(),
        }
    }

    /// Classifies `other` relative to this locality.
    pub fn tier(&self, other: &Locality) -> Tier {
        if self.region != other.region {
            return Tier::Any;
        }
        if self.zone != other.zone {
            return Tier::Region;
        }
        if self.subzone != other.subzone {
            return Tier::Zone;
        }
        Tier::Subzone
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.region, self.zone, self.subzone)
    }
}

// === impl DistributionMode ===

impl DistributionMode {
    pub const ANNOTATION: &'static str = "networking.istio.io/traffic-distribution";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::PreferClose => "PreferClose",
            Self::Local => "Local",
        }
    }
}

impl std::str::FromStr for DistributionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "Default" => Ok(Self::Default),
            "PreferClose" => Ok(Self::PreferClose),
            "Local" => Ok(Self::Local),
            s => Err(anyhow!("invalid traffic distribution: {:?}", s)),
        }
    }
}

impl fmt::Display for DistributionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}
