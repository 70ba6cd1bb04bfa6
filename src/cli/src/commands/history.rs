//! `image-manip history` commands — list and search layer history.

use clap::{Args, Subcommand};
use image_manip_runtime::history::HistoryRow;
use image_manip_runtime::Runtime;

use crate::output;

#[derive(Subcommand)]
pub enum HistoryCommand {
    /// Show the layer history of an image
    List(HistoryListArgs),
    /// Show history entries whose CREATED BY matches a keyword
    Search(HistorySearchArgs),
}

#[derive(Args)]
pub struct HistoryListArgs {
    pub image: String,

    /// Output format: table (default) or json
    #[arg(long)]
    pub format: Option<String>,

    /// Only print snapshot and layer columns
    #[arg(short, long)]
    pub quiet: bool,

    /// Don't truncate output
    #[arg(long)]
    pub no_trunc: bool,
}

#[derive(Args)]
pub struct HistorySearchArgs {
    pub image: String,
    pub keyword: String,

    /// Output format: table (default) or json
    #[arg(long)]
    pub format: Option<String>,

    /// Only print snapshot and layer columns
    #[arg(short, long)]
    pub quiet: bool,

    /// Don't truncate output
    #[arg(long)]
    pub no_trunc: bool,
}

pub async fn execute(
    runtime: &Runtime,
    cmd: HistoryCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        HistoryCommand::List(args) => {
            let rows = runtime.history_rows(&args.image).await?;
            print_rows(&rows, args.format.as_deref(), args.quiet, args.no_trunc)
        }
        HistoryCommand::Search(args) => {
            let rows = runtime
                .search_history_rows(&args.image, &args.keyword)
                .await?;
            print_rows(&rows, args.format.as_deref(), args.quiet, args.no_trunc)
        }
    }
}

/// Rows come oldest-first; the table prints newest-first like the
/// history commands of other image tools.
fn print_rows(
    rows: &[HistoryRow],
    format: Option<&str>,
    quiet: bool,
    no_trunc: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        Some("json") => {
            if quiet {
                return Err("format and quiet must not be specified together".into());
            }
            println!("{}", serde_json::to_string_pretty(rows)?);
            return Ok(());
        }
        None | Some("") | Some("table") => {}
        Some(other) => return Err(format!("unsupported format: {other:?}").into()),
    }

    if quiet {
        for row in rows.iter().rev() {
            println!("{}\t{}", row.last_snapshot, row.last_layer);
        }
        return Ok(());
    }

    let mut table = output::new_table(&[
        "LAST SNAPSHOT",
        "LAST LAYER",
        "EMPTY",
        "CREATED",
        "CREATED BY",
        "SIZE",
        "COMMENT",
    ]);
    for row in rows.iter().rev() {
        let created = row
            .created
            .as_deref()
            .map(output::format_timestamp)
            .unwrap_or_else(|| "<unknown>".to_string());
        let created_by = if no_trunc {
            row.created_by.clone()
        } else {
            output::truncate_str(&row.created_by, 45)
        };
        let last_snapshot = if no_trunc {
            row.last_snapshot.clone()
        } else {
            output::truncate_str(&row.last_snapshot, 25)
        };
        let last_layer = if no_trunc {
            row.last_layer.clone()
        } else {
            output::truncate_str(&row.last_layer, 25)
        };
        table.add_row([
            &last_snapshot,
            &last_layer,
            &row.empty.to_string(),
            &created,
            &created_by,
            &output::format_bytes(row.size),
            &row.comment,
        ]);
    }
    println!("{table}");
    Ok(())
}
