//! CLI command definitions and dispatch.

mod history;
mod ls;
mod rebase;
mod remote;
mod remove;
mod squash;
mod tag;
mod verify_base;
mod version;

use clap::{Args, Parser, Subcommand};
use image_manip_core::options::{
    RootOptions, DEFAULT_CONTAINERD_ADDRESS, DEFAULT_LOG_LEVEL, DEFAULT_NAMESPACE,
};
use image_manip_runtime::Runtime;

/// Git-like utilities for containerd images.
#[derive(Parser)]
#[command(name = "image-manip", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags shared by every command.
#[derive(Args, Clone)]
pub struct GlobalArgs {
    /// containerd address
    #[arg(long, global = true, default_value = DEFAULT_CONTAINERD_ADDRESS)]
    pub containerd_address: String,

    /// containerd namespace
    #[arg(long, global = true, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Snapshotter name (defaults to the host's)
    #[arg(long, global = true)]
    pub snapshotter: Option<String>,

    /// Log level
    #[arg(long, global = true, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,
}

impl GlobalArgs {
    pub fn to_root_options(&self) -> RootOptions {
        RootOptions {
            containerd_address: self.containerd_address.clone(),
            namespace: self.namespace.clone(),
            snapshotter: self.snapshotter.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Rebase an image at a base-layer digest
    Rebase(rebase::RebaseArgs),
    /// Squash layers above a base layer into one
    Squash(squash::SquashArgs),
    /// Remove a file from an image
    Remove(remove::RemoveArgs),
    /// Verify that an image is built on top of a base image
    VerifyBase(verify_base::VerifyBaseArgs),
    /// Create a tag that refers to an existing image
    Tag(tag::TagArgs),
    /// Inspect image layer history
    #[command(subcommand)]
    History(history::HistoryCommand),
    /// List images
    Ls(ls::LsArgs),
    /// Talk to remote registries
    #[command(subcommand)]
    Remote(remote::RemoteCommand),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    // These two never talk to containerd.
    match cli.command {
        Command::Version(args) => return version::execute(args).await,
        Command::Remote(cmd) => return remote::execute(cmd).await,
        _ => {}
    }

    let runtime = Runtime::open(&cli.global.to_root_options()).await?;

    // Ctrl-C aborts the in-flight operation between plan steps.
    let token = runtime.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let result = match cli.command {
        Command::Rebase(args) => rebase::execute(&runtime, args).await,
        Command::Squash(args) => squash::execute(&runtime, args).await,
        Command::Remove(args) => remove::execute(&runtime, args).await,
        Command::VerifyBase(args) => verify_base::execute(&runtime, args).await,
        Command::Tag(args) => tag::execute(&runtime, args).await,
        Command::History(cmd) => history::execute(&runtime, cmd).await,
        Command::Ls(args) => ls::execute(&runtime, args).await,
        Command::Version(_) | Command::Remote(_) => unreachable!("handled above"),
    };

    if let Err(err) = runtime.close().await {
        tracing::warn!(error = %err, "failed to close runtime");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_defaults() {
        let cli = Cli::try_parse_from(["image-manip", "ls"]).unwrap();
        let opts = cli.global.to_root_options();
        assert_eq!(
            opts.containerd_address,
            "unix:///var/run/containerd/containerd.sock"
        );
        assert_eq!(opts.namespace, "k8s.io");
        assert_eq!(opts.log_level, "info");
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["image-manip", "ls", "--namespace", "default"]).unwrap();
        assert_eq!(cli.global.namespace, "default");
    }

    #[test]
    fn test_rebase_parsing() {
        let cli = Cli::try_parse_from([
            "image-manip",
            "rebase",
            "app:latest",
            "sha256:abc",
            "--new-base-image",
            "base:v2",
            "--auto-squash",
        ])
        .unwrap();
        match cli.command {
            Command::Rebase(args) => {
                assert_eq!(args.image, "app:latest");
                assert_eq!(args.base_layer_digest, "sha256:abc");
                assert_eq!(args.new_base_image.as_deref(), Some("base:v2"));
                assert!(args.auto_squash);
            }
            _ => panic!("expected rebase"),
        }
    }

    #[test]
    fn test_rebase_requires_digest() {
        assert!(Cli::try_parse_from(["image-manip", "rebase", "app:latest"]).is_err());
    }

    #[test]
    fn test_history_subcommands() {
        assert!(Cli::try_parse_from(["image-manip", "history", "list", "app"]).is_ok());
        assert!(Cli::try_parse_from(["image-manip", "history", "search", "app", "curl"]).is_ok());
        assert!(Cli::try_parse_from(["image-manip", "history"]).is_err());
    }

    #[test]
    fn test_remote_list_tags() {
        assert!(Cli::try_parse_from([
            "image-manip",
            "remote",
            "list-tags",
            "docker.io/library/nginx",
            "--insecure"
        ])
        .is_ok());
    }
}
