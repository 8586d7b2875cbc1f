//! In-memory stand-ins for the browser and the download directory, used by the
//! unit and integration tests to script portal behavior under a paused clock.

pub mod memory_directory;
pub mod scripted_session;

pub use memory_directory::MemoryDirectory;
pub use scripted_session::{ScriptedSession, ScriptedSessionFactory, SessionAction};
