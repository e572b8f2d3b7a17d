//! CLI command implementations

pub mod config;
pub mod presign;
pub mod run;
pub mod status;
pub mod verify;
