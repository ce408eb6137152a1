//! Core types shared across the hatchway workspace.
//!
//! This crate intentionally avoids pulling in the async runtime so it can be
//! shared by the daemon, the protocol crate, and tooling. It owns the input
//! validation rules, the environment projection, the command builder, and the
//! gateway-wide error taxonomy.

pub mod command;
pub mod error;
pub mod package;
pub mod params;
pub mod util;

pub use command::{CommandSpec, build_command, find_in_path};
pub use error::{GatewayError, NameError};
pub use package::{
    Ecosystem, ParsedPackage, is_remote_url, parse_package, validate_package_identifier,
};
pub use params::{
    build_extra_args, params_fingerprint, project_environment, server_id, validate_params,
};
