//! `image-manip verify-base` command — check base ancestry.

use clap::Args;
use image_manip_runtime::Runtime;

#[derive(Args)]
pub struct VerifyBaseArgs {
    /// Image to check
    pub image: String,

    /// Expected base image
    pub base_image: String,
}

pub async fn execute(
    runtime: &Runtime,
    args: VerifyBaseArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    runtime.verify_base(&args.image, &args.base_image).await?;
    println!("{} is based on {}", args.image, args.base_image);
    Ok(())
}
