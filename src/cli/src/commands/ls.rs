//! `image-manip ls` command — list images.

use clap::Args;
use image_manip_core::options::{ListImagesOptions, SortBy};
use image_manip_runtime::list::ImageAttr;
use image_manip_runtime::Runtime;

use crate::output;

#[derive(Args)]
pub struct LsArgs {
    /// Filter output (reference=, label=, dangling=, before=, since=)
    #[arg(long = "filter")]
    pub filters: Vec<String>,

    /// Sort output by 'created' or 'size' (desc)
    #[arg(long)]
    pub sort: Option<String>,

    /// Output format: table (default) or json
    #[arg(long)]
    pub format: Option<String>,

    /// Only print image IDs
    #[arg(short, long)]
    pub quiet: bool,

    /// Show digests
    #[arg(long)]
    pub digests: bool,

    /// Only print image names
    #[arg(long)]
    pub names: bool,

    /// Don't truncate output
    #[arg(long)]
    pub no_trunc: bool,
}

pub async fn execute(runtime: &Runtime, args: LsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let sort_by: SortBy = args.sort.as_deref().unwrap_or("").parse()?;
    let attrs = runtime
        .list_images(&ListImagesOptions {
            filters: args.filters.clone(),
            sort_by,
            format: args.format.clone(),
            quiet: args.quiet,
            digests: args.digests,
            names: args.names,
            no_trunc: args.no_trunc,
        })
        .await?;

    print_images(&attrs, &args)
}

fn print_images(attrs: &[ImageAttr], args: &LsArgs) -> Result<(), Box<dyn std::error::Error>> {
    match args.format.as_deref() {
        Some("json") => {
            println!("{}", serde_json::to_string_pretty(attrs)?);
            return Ok(());
        }
        None | Some("") | Some("table") => {}
        Some(other) => return Err(format!("unsupported format: {other:?}").into()),
    }

    if args.quiet {
        for attr in attrs {
            println!("{}", attr.id);
        }
        return Ok(());
    }
    if args.names {
        for attr in attrs {
            println!("{}", attr.name);
        }
        return Ok(());
    }

    let mut headers = vec!["REPOSITORY", "TAG"];
    if args.digests {
        headers.push("DIGEST");
    }
    headers.extend(["IMAGE ID", "CREATED", "PLATFORM", "SIZE"]);
    let mut table = output::new_table(&headers);

    for attr in attrs {
        let created = attr
            .created_at
            .map(|t| output::format_ago(&t))
            .unwrap_or_else(|| "<unknown>".to_string());
        let digest = if args.no_trunc {
            attr.digest.to_string()
        } else {
            output::truncate_str(attr.digest.as_str(), 30)
        };

        let mut row = vec![attr.repository.clone(), attr.tag.clone()];
        if args.digests {
            row.push(digest);
        }
        row.extend([
            attr.id.clone(),
            created,
            attr.platform.clone(),
            output::format_bytes(attr.size.max(0) as u64),
        ]);
        table.add_row(row);
    }
    println!("{table}");
    Ok(())
}
