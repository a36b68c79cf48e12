//! twinmesh Sources - Remote Source Adapters
//!
//! A [`RemoteSource`] exposes up to four record families of one upstream:
//! shell registry, shell repository, submodel registry, submodel repository.
//! [`HttpSource`] talks to registry+repository pairs and combined services
//! over the cursor-paginated REST contract.
//!
//! [`HttpRegistry`] goes the other way: it advertises locally served records
//! in external registries.

pub mod http;
pub mod registry;
pub mod source;

pub use http::{HttpSource, HttpSourceFactory};
pub use registry::{
    DescriptorRegistry, HttpRegistry, LocalRegistryConfig, Registration, RegistrationReport,
    RegistryRef, LOCAL_REGISTRY,
};
pub use source::{Page, RemoteSource, SourceFactory, SourceRef};
