//! Command-line front end: configuration, the agent service and the HTTP
//! chat facade. The `toolwire` binary wires these to subcommands.

pub mod config;
pub mod error;
pub mod http;
pub mod service;
