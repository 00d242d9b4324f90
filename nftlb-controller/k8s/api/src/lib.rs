#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod resource_id;

pub use self::resource_id::ResourceId;
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            EndpointAddress, EndpointPort, EndpointSubset, Endpoints, ObjectReference, Pod,
            Service, ServicePort, ServiceSpec, SessionAffinityConfig,
        },
        networking::v1::NetworkPolicy,
    },
    apimachinery::pkg::apis::meta::v1::Status,
};
pub use kube::{
    api::{Api, AttachParams, ListParams, ObjectMeta, ResourceExt},
    runtime::watcher,
    Client, Error, Resource,
};
