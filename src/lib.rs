pub mod cli;
pub mod error;
pub mod handler;
pub mod metadata;
pub mod server;
pub mod storage;
pub mod types;

pub use storage::{ProgramStore, StorageError};
pub use types::{Program, ProgramDraft, ProgramPatch, ProgramStatus};
