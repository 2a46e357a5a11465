//! Command-line interface definitions for the `rootgrow` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{ArgAction, Parser, Subcommand};

/// Top-level CLI for the `rootgrow` binary.
#[derive(Debug, Parser)]
#[command(
    name = "rootgrow",
    about = "Grow a cloud instance's root volume by swapping in a larger clone",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub(crate) verbose: u8,
    /// Subcommand to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of the `rootgrow` binary.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Replace the root volume with a larger clone.
    #[command(name = "resize", about = "Replace the root volume with a larger clone")]
    Resize(ResizeCommand),
    /// Grow the guest filesystem after a completed resize.
    #[command(
        name = "grow-fs",
        about = "Grow the guest partition and filesystem after a completed resize"
    )]
    GrowFs(GrowFsCommand),
    /// Show the last recorded session for an instance.
    #[command(name = "status", about = "Show the last recorded resize session")]
    Status(StatusCommand),
}

/// Arguments for the `rootgrow resize` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ResizeCommand {
    /// Instance whose root volume should grow.
    #[arg(long, value_name = "ID")]
    pub(crate) instance: String,
    /// Availability zone hosting the instance; defaults to the configured
    /// zone.
    #[arg(long, value_name = "ZONE")]
    pub(crate) zone: Option<String>,
    /// Target root volume size in gigabytes (10^9 bytes).
    #[arg(long, value_name = "GB")]
    pub(crate) size_gb: u64,
    /// Keep the original volume after a completed resize.
    #[arg(long)]
    pub(crate) keep_original: bool,
    /// Grow the guest filesystem over SSH once the instance is running.
    #[arg(long)]
    pub(crate) grow_fs: bool,
    /// Root filesystem type: auto, ext4, xfs, or btrfs.
    #[arg(long, value_name = "TYPE")]
    pub(crate) filesystem: Option<String>,
}

/// Arguments for the `rootgrow grow-fs` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct GrowFsCommand {
    /// Instance with a completed resize session.
    #[arg(long, value_name = "ID")]
    pub(crate) instance: String,
    /// Root filesystem type: auto, ext4, xfs, or btrfs.
    #[arg(long, value_name = "TYPE")]
    pub(crate) filesystem: Option<String>,
}

/// Arguments for the `rootgrow status` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct StatusCommand {
    /// Instance to report on.
    #[arg(long, value_name = "ID")]
    pub(crate) instance: String,
}
