//! ccb-vault command-line application
//!
//! Configuration, logging, the run lock and the concrete collaborators
//! (command extractor, zip archiver, local store, mail notifier).

pub mod archive;
pub mod cmd;
pub mod extract;
pub mod locks;
pub mod logging;
pub mod notify;
pub mod store;
pub mod system_config;
pub mod util;
