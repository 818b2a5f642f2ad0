use crate::{AuthorizationPolicy, Endpoints, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;
use std::fmt;

/// The namespace assumed for resources that do not set `metadata.namespace`.
pub const DEFAULT_NAMESPACE: &str = "default";

/// A single manifest document, decoded by its `kind`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "kind")]
pub enum Resource {
    AuthorizationPolicy(AuthorizationPolicy),
    Service(Service),
    Endpoints(Endpoints),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    AuthorizationPolicy,
    Service,
    Endpoints,
}

/// Identifies a resource across manifests.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("document {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("document {index}: {kind} must set metadata.name")]
    MissingName { index: usize, kind: Kind },
}

/// Decodes every document in a multi-document YAML (or JSON) manifest.
///
/// Empty documents are skipped. Any document that fails to decode fails the whole manifest.
pub fn decode_all(manifest: &str) -> Result<Vec<Resource>, Error> {
    let mut resources = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(manifest).enumerate() {
        let resource = match Option::<Resource>::deserialize(document)
            .map_err(|source| Error::Decode { index, source })?
        {
            Some(resource) => resource,
            None => continue,
        };

        if resource.metadata().name.as_deref().unwrap_or_default().is_empty() {
            return Err(Error::MissingName {
                index,
                kind: resource.kind(),
            });
        }
        resources.push(resource);
    }
    Ok(resources)
}

// === impl Resource ===

impl Resource {
    pub fn kind(&self) -> Kind {
        match self {
            Self::AuthorizationPolicy(_) => Kind::AuthorizationPolicy,
            Self::Service(_) => Kind::Service,
            Self::Endpoints(_) => Kind::Endpoints,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::AuthorizationPolicy(r) => &r.metadata,
            Self::Service(r) => &r.metadata,
            Self::Endpoints(r) => &r.metadata,
        }
    }

    pub fn namespace(&self) -> &str {
        namespace(self.metadata())
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.kind(),
            namespace: self.namespace().to_string(),
            name: self.name().to_string(),
        }
    }
}

/// Returns the resource's namespace, or [`DEFAULT_NAMESPACE`] when it is unset.
pub fn namespace(meta: &ObjectMeta) -> &str {
    meta.namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE)
}

// === impl Kind ===

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationPolicy => "AuthorizationPolicy",
            Self::Service => "Service",
            Self::Endpoints => "Endpoints",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}
