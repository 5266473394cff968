//! Command-line interface definitions for the `scaleway-csi` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `scaleway-csi` binary.
#[derive(Debug, Parser)]
#[command(
    name = "scaleway-csi",
    about = "Container Storage Interface plugin for Scaleway Block SSD volumes",
    version,
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run the plugin until interrupted.
    #[command(name = "serve", about = "Run the plugin on a Unix socket until interrupted")]
    Serve(EndpointArgs),
    /// Ask a running plugin whether it is ready.
    #[command(
        name = "probe",
        about = "Ask a running plugin whether it is ready; exits non-zero when it is not"
    )]
    Probe(EndpointArgs),
}

/// Socket selection shared by every subcommand.
#[derive(Debug, Parser)]
pub(crate) struct EndpointArgs {
    /// Plugin socket as a `unix://` URL. Overrides `CSI_ENDPOINT`.
    #[arg(long, value_name = "URL")]
    pub(crate) endpoint: Option<String>,
}
