//! Infrastructure Layer
//!
//! HTTP gateway to the attendance server and device capability adapters.

pub mod http;
pub mod location;

pub use http::HttpCheckinApi;
pub use location::StaticLocator;
