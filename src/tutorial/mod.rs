pub mod repository;
pub mod types;

pub use repository::Repository;
pub use types::{slugify, ResourceRange, Tutorial, Tutorials};
