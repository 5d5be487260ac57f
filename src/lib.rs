//! exnavy - notebook setup toolkit
//!
//! Extracts archives with their wrapper directories stripped, downloads
//! model files, manages git checkouts and edits configuration files for
//! hosted notebook environments.

pub mod archive;
pub mod config;
pub mod downloaders;
pub mod env;
pub mod git;
pub mod packages;
pub mod settings;
pub mod util;
