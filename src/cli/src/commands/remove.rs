//! `image-manip remove` command — delete a file from an image.

use clap::Args;
use image_manip_core::options::RemoveOptions;
use image_manip_runtime::Runtime;

#[derive(Args)]
pub struct RemoveArgs {
    /// Image to rewrite
    pub image: String,

    /// Path to delete from the image rootfs
    pub file: String,

    /// Bind the result to this name instead of clobbering the tag
    #[arg(long)]
    pub new_image_name: Option<String>,
}

pub async fn execute(runtime: &Runtime, args: RemoveArgs) -> Result<(), Box<dyn std::error::Error>> {
    let desc = runtime
        .remove(&RemoveOptions {
            image: args.image,
            file: args.file,
            new_image_name: args.new_image_name,
        })
        .await?;
    println!("{}", desc.digest);
    Ok(())
}
