pub mod backend;
pub mod config;
pub mod decorator;
pub mod error;
pub mod filesystem;
pub mod glob;
pub mod metadata;
pub mod path;

pub use config::FsConfig;
pub use error::{FsError, FsResult};
pub use filesystem::{FileSystem, Files};
