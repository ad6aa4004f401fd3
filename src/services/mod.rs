//! Run services: discovery, notification, publishing and the run pipeline

pub mod discovery;
pub mod notify;
pub mod pipeline;
pub mod publisher;

pub use discovery::{Discovery, SearchDiscovery, SeedDiscovery};
pub use notify::{announce_new_sources, LogNotifier, NewSourceEvent, Notifier, WebhookNotifier};
pub use pipeline::Pipeline;
pub use publisher::Publisher;
