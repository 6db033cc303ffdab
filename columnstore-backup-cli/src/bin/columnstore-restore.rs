//! columnstore-restore: load a backup into a stopped, empty cluster.

use clap::Parser;
use columnstore_backup_core::{run_restore, RestoreRequest};
use columnstore_backup_cli::{parse_args, run, CommonArgs};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "columnstore-restore", author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Accept modules reachable on addresses the backup did not record
    #[arg(long)]
    allow_address_change: bool,

    /// Directory on this host holding the backup
    backup_location: PathBuf,

    /// Address of any reachable node of the target cluster
    restore_node: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args::<Args>() {
        Ok(args) => args,
        Err(code) => return code,
    };

    let request = RestoreRequest {
        backup_root: args.backup_location,
        restore_node: args.restore_node,
        allow_address_change: args.allow_address_change,
    };

    run("restore", &args.common, |_| {}, |ctx| async move {
        run_restore(&ctx, &request).await
    })
    .await
}
