/// Reasons a resource fails to compile. The index keeps its previous state for the resource.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("invalid IP block {value:?}: {source}")]
    InvalidNetwork {
        value: String,
        #[source]
        source: ipnet::AddrParseError,
    },

    #[error("invalid address {value:?}: {source}")]
    InvalidAddress {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("unsupported condition key {0:?}")]
    UnsupportedCondition(String),

    #[error("condition {0:?} must list at least one value")]
    EmptyCondition(String),

    #[error("invalid traffic distribution {0:?}")]
    InvalidDistribution(String),
}
