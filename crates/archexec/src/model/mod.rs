pub mod config;
pub mod ids;
pub mod queue;
pub mod request;
pub mod result;

pub use config::*;
pub use ids::ExecutionId;
pub use queue::*;
pub use request::*;
pub use result::*;
