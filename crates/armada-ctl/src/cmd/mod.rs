//! CLI command modules.

pub mod http;
pub mod policy;
pub mod status;
pub mod stream;
pub mod submit;
