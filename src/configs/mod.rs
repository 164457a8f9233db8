pub mod base;
pub mod cache;
pub mod logging;
pub mod network;
pub mod pipeline;

pub use base::*;
pub use cache::*;
pub use logging::*;
pub use network::*;
pub use pipeline::*;
