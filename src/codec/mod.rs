//! Payload formats: base64 bodies, clash documents and share links

pub mod clash;
pub mod encoding;
pub mod links;

pub use clash::{looks_structured, parse_structured, render_config, ClashProxy, StructuredDecode};
pub use links::{link_to_proxy, proxy_to_link};
