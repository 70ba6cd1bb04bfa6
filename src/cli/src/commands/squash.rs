//! `image-manip squash` command — collapse layers above a base layer.

use clap::Args;
use image_manip_core::options::SquashOptions;
use image_manip_runtime::Runtime;

#[derive(Args)]
pub struct SquashArgs {
    /// Image to squash
    pub image: String,

    /// Squash everything above this layer; auto-detected from the
    /// build-frontend history marker when omitted
    #[arg(long)]
    pub base_layer_digest: Option<String>,
}

pub async fn execute(runtime: &Runtime, args: SquashArgs) -> Result<(), Box<dyn std::error::Error>> {
    let desc = runtime
        .squash(&SquashOptions {
            image: args.image,
            base_layer_digest: args.base_layer_digest,
        })
        .await?;
    println!("{}", desc.digest);
    Ok(())
}
