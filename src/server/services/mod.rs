pub mod header_profile_services;
pub mod proxy_services;
pub mod upstream_services;

pub use header_profile_services::{HeaderProfile, HeaderProfileResolver};
pub use proxy_services::ProxyServices;
pub use upstream_services::{
    DynUpstreamService, UpstreamBody, UpstreamResponse, UpstreamService, UpstreamServiceTrait,
};
