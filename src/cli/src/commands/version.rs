//! `image-manip version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("image-manip version {}", image_manip_core::VERSION);
    Ok(())
}
