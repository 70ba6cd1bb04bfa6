//! `image-manip tag` command — create a tag for an existing image.

use clap::Args;
use image_manip_runtime::Runtime;

#[derive(Args)]
pub struct TagArgs {
    /// Source image reference
    pub source: String,

    /// Target image reference (new tag)
    pub target: String,
}

pub async fn execute(runtime: &Runtime, args: TagArgs) -> Result<(), Box<dyn std::error::Error>> {
    runtime.tag(&args.source, &args.target).await?;
    println!("{}", args.target);
    Ok(())
}
