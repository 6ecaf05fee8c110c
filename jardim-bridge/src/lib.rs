mod error;
pub use error::*;
mod payload;
pub use payload::*;
mod registry;
pub use registry::*;
mod bridge;
pub use bridge::*;

pub use tokio_util::sync::CancellationToken;
