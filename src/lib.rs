//! design-session - persistent state for interactive design tools
//!
//! This library provides:
//! - A session directory holding arbitrary JSON data, a scene graph and settings
//! - Lazy loading of each piece on first access
//! - Linear undo/redo over named snapshots of the session state
//! - A process-wide registry so each named session is a single shared instance

pub mod error;
pub mod registry;
pub mod scene;
pub mod session;
mod store;
pub mod types;

pub use error::{Result, SessionError};
pub use registry::{shared, SessionRegistry, SharedSession};
pub use scene::{Scene, SceneObject};
pub use session::Session;
pub use types::{HistoryRecord, SessionOptions, SessionSettings, Settings, Tolerance};
