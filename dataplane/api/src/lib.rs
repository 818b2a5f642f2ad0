#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod authorization_policy;
pub mod labels;
pub mod manifest;
pub mod service;

pub use self::{
    authorization_policy::AuthorizationPolicy,
    labels::Labels,
    manifest::{decode_all, Error, Kind, Resource, ResourceKey, DEFAULT_NAMESPACE},
    service::{Endpoints, Service},
};
pub use k8s_openapi::{
    api::core::v1::ServiceSpec,
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
