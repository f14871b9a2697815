pub mod backend;
pub mod cli;
pub mod commands;
pub mod errors;
pub mod readiness;
pub mod retry;
pub mod settings;
pub mod startup;
pub mod tutorial;

// Re-export core types for convenience
pub use errors::TutorboxError;
pub use tutorial::{Tutorial, Tutorials};
