mod node;
mod quota;
mod snapshot;
mod source;
mod traffic;

pub use node::*;
pub use quota::*;
pub use snapshot::*;
pub use source::*;
pub use traffic::*;
