//! columnstore-backup: copy a running cluster to a backup location.

use clap::Parser;
use columnstore_backup_core::{run_backup, BackupRequest};
use columnstore_backup_cli::{parse_args, run, CommonArgs};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "columnstore-backup", author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Backup generations kept next to the latest copy (1-20)
    #[arg(short, long, value_name = "COUNT")]
    generations: Option<usize>,

    /// Address of any reachable cluster node
    active_node: String,

    /// Directory on this host receiving the backup
    backup_location: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args::<Args>() {
        Ok(args) => args,
        Err(code) => return code,
    };

    let request = BackupRequest {
        active_node: args.active_node,
        backup_root: args.backup_location,
    };
    let generations = args.generations;

    run(
        "backup",
        &args.common,
        |settings| {
            if let Some(count) = generations {
                settings.retention.generations = count;
            }
        },
        |ctx| async move { run_backup(&ctx, &request).await },
    )
    .await
}
