//! Subscription sources: URL normalization and rate-limit state

pub mod normalize;
pub mod state;

pub use normalize::{extract_candidates, normalize, SubscriptionUrl};
pub use state::{BackoffPolicy, SourceStateTracker};
