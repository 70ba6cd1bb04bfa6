//! `image-manip rebase` command — rewrite an image on top of a new base.

use clap::Args;
use image_manip_core::options::RebaseOptions;
use image_manip_runtime::Runtime;

#[derive(Args)]
pub struct RebaseArgs {
    /// Image to rewrite
    pub image: String,

    /// Digest of the last layer to keep as base
    pub base_layer_digest: String,

    /// Rebase onto this image instead of the original prefix
    #[arg(long)]
    pub new_base_image: Option<String>,

    /// Bind the result to this name instead of clobbering the tag
    #[arg(long)]
    pub new_image_name: Option<String>,

    /// Collapse all rewritten layers into one
    #[arg(long)]
    pub auto_squash: bool,
}

pub async fn execute(runtime: &Runtime, args: RebaseArgs) -> Result<(), Box<dyn std::error::Error>> {
    let desc = runtime
        .rebase(&RebaseOptions {
            image: args.image,
            base_layer_digest: args.base_layer_digest,
            new_base_image: args.new_base_image,
            new_image_name: args.new_image_name,
            auto_squash: args.auto_squash,
        })
        .await?;
    println!("{}", desc.digest);
    Ok(())
}
