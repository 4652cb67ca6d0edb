//! CLI command implementations

pub mod init;
pub mod render;
pub mod run;
pub mod status;
pub mod validate;
