pub mod config;
pub mod error;
pub mod reconciler;
pub mod views;
pub mod workspace;

pub use config::{Mode, RemoteConfig};
pub use error::EngineError;
pub use reconciler::{Collection, SharedLocal, shared_local};
pub use workspace::Workspace;
