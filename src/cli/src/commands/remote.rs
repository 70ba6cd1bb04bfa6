//! `image-manip remote` commands — talk to remote registries.

use clap::{Args, Subcommand};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};

#[derive(Subcommand)]
pub enum RemoteCommand {
    /// List the tags of a remote repository
    ListTags(ListTagsArgs),
}

#[derive(Args)]
pub struct ListTagsArgs {
    /// Repository reference (e.g. docker.io/library/nginx)
    pub repository: String,

    /// Use plain HTTP
    #[arg(long)]
    pub insecure: bool,
}

pub async fn execute(cmd: RemoteCommand) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        RemoteCommand::ListTags(args) => {
            let reference: Reference = args.repository.parse()?;
            let protocol = if args.insecure {
                ClientProtocol::Http
            } else {
                ClientProtocol::Https
            };
            let mut client = Client::new(ClientConfig {
                protocol,
                ..Default::default()
            });
            let response = client
                .list_tags(&reference, &RegistryAuth::Anonymous, None, None)
                .await?;
            for tag in response.tags {
                println!("{tag}");
            }
            Ok(())
        }
    }
}
