//! mfs CLI - Main entry point.

use anyhow::Context;
use moosefs_client::cli::{Cli, Commands, QuotaCommands, SessionCommands};
use moosefs_client::config::ClientConfig;
use moosefs_client::master::{MasterClient, QuotaInfo, QuotaLimits};
use moosefs_client::units::{format_bytes, parse_bytes, Unit};
use moosefs_client::version::CLIENT_VERSION;
use moosefs_client::{observability, Client};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    let config = cli.client_config()?;
    observability::init(&config.observability)?;

    match cli.command {
        Commands::Put { srcs, dst } => {
            let client = Client::new(config).await?;
            client.mkdir(&dst).await?;
            for src in &srcs {
                let name = src
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("no file name in {}", src.display()))?;
                let remote = remote_join(&dst, name);
                let bytes = client
                    .write_file(src, &remote)
                    .await
                    .with_context(|| format!("failed to upload {}", src.display()))?;
                println!("{} -> {} ({} bytes)", src.display(), remote, bytes);
            }
            client.close().await?;
        }

        Commands::Get { src, dir } => {
            let client = Client::new(config).await?;
            let name = src
                .rsplit('/')
                .find(|part| !part.is_empty())
                .with_context(|| format!("no file name in {}", src))?;
            let local = dir.join(name);
            let bytes = client
                .read_file(&src, &local)
                .await
                .with_context(|| format!("failed to download {}", src))?;
            println!("{} -> {} ({} bytes)", src, local.display(), bytes);
            client.close().await?;
        }

        Commands::Ls { path, long } => {
            let client = Client::new(config).await?;
            let mut entries = client.readdir(&path).await?;
            entries.retain(|e| e.name != "." && e.name != "..");
            entries.sort_by(|a, b| a.name.cmp(&b.name));

            for entry in &entries {
                match (&entry.attr, long) {
                    (Some(attr), true) => println!("{} {}", attr, entry.name),
                    _ => println!("{}", entry.name),
                }
            }
            client.close().await?;
        }

        Commands::Rm { paths } => {
            let client = Client::new(config).await?;
            for path in &paths {
                client
                    .unlink(path)
                    .await
                    .with_context(|| format!("failed to remove {}", path))?;
                println!("Removed: {}", path);
            }
            client.close().await?;
        }

        Commands::Mkdir { path, parents } => {
            let client = Client::new(config).await?;
            if parents {
                let mut prefix = String::new();
                for part in path.split('/').filter(|p| !p.is_empty()) {
                    prefix = remote_join(&prefix, part);
                    client.mkdir(&prefix).await?;
                }
            } else {
                client.mkdir(&path).await?;
            }
            println!("Created directory: {}", path);
            client.close().await?;
        }

        Commands::Rmdir { path } => {
            let client = Client::new(config).await?;
            client.rmdir(&path).await?;
            println!("Removed directory: {}", path);
            client.close().await?;
        }

        Commands::Stat { path, summary } => {
            let client = Client::new(config).await?;
            let info = client.lookup(&path).await?;
            println!("  Path: {}", path);
            println!("  Inode: {}", info.inode);
            println!("  Type: {}", info.file_type);
            println!("  Mode: {} ({:04o})", info.mode_string(), info.mode);
            println!("  Size: {}", info.display_size());
            println!("  Links: {}", info.nlink);
            println!("  UID: {}", info.uid);
            println!("  GID: {}", info.gid);
            println!("  Modified: {}", info.mtime_utc());
            println!("  Changed: {}", info.ctime_utc());

            if summary && info.is_dir() {
                let stats = client.dir_stats(&path).await?;
                println!("  Files: {}", stats.files);
                println!("  Directories: {}", stats.dirs);
                println!("  Chunks: {}", stats.chunks);
                println!("  Length: {}", format_bytes(stats.length as f64, Unit::Binary));
                println!("  Real size: {}", format_bytes(stats.real_size as f64, Unit::Binary));
            }
            client.close().await?;
        }

        Commands::Df => {
            let client = Client::new(config).await?;
            let stat = client.statfs().await?;
            let used = stat.total_space.saturating_sub(stat.avail_space);
            println!("{:>12} {:>12} {:>12} {:>12} {:>10}", "Size", "Used", "Avail", "Trash", "Inodes");
            println!(
                "{:>12} {:>12} {:>12} {:>12} {:>10}",
                format_bytes(stat.total_space as f64, Unit::Binary),
                format_bytes(used as f64, Unit::Binary),
                format_bytes(stat.avail_space as f64, Unit::Binary),
                format_bytes(stat.trash_space as f64, Unit::Binary),
                stat.inodes
            );
            client.close().await?;
        }

        Commands::Quota { command } => run_quota(config, command).await?,

        Commands::Sessions { command } => {
            let master = MasterClient::new(config)?;
            match command {
                SessionCommands::List => {
                    for s in master.list_sessions().await? {
                        println!(
                            "{:>6}  {:<15}  {:<10}  open={:<5} {}  {}",
                            s.session_id, s.ip, s.version, s.open_files, s.info, s.path
                        );
                    }
                }
                SessionCommands::Remove { session_id } => {
                    master.remove_session(session_id).await?;
                    println!("Removed session {}", session_id);
                }
            }
        }

        Commands::Info => {
            let master = MasterClient::new(config)?;
            let info = master.info().await?;
            println!("Master version: {}", info.version);
            println!("Memory usage: {}", format_bytes(info.memory_usage as f64, Unit::Binary));
            println!("Total space: {}", format_bytes(info.total_space as f64, Unit::Binary));
            println!("Available space: {}", format_bytes(info.avail_space as f64, Unit::Binary));
            println!("Trash: {} in {} nodes", format_bytes(info.trash_space as f64, Unit::Binary), info.trash_nodes);
            println!("Nodes: {} ({} dirs, {} files)", info.all_nodes, info.dir_nodes, info.file_nodes);
            println!("Chunks: {} ({} copies)", info.chunks, info.chunk_copies);
            println!("Metadata version: {}", info.meta_version);
        }

        Commands::Version => {
            println!("mfs v{} (protocol {})", env!("CARGO_PKG_VERSION"), CLIENT_VERSION);
            let master = MasterClient::new(config)?;
            match master.version().await {
                Ok(version) => println!("Master: {}", version),
                Err(e) => {
                    eprintln!("Master: unreachable ({})", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

async fn run_quota(config: ClientConfig, command: QuotaCommands) -> anyhow::Result<()> {
    let client = Client::new(config).await?;
    let master = client.master();

    match command {
        QuotaCommands::Get { path } => {
            let inode = client.lookup(&path).await?.inode;
            match master.quota_get(inode).await? {
                Some(quota) => print_quota(&path, &quota),
                None => println!("{}: no quota", path),
            }
        }
        QuotaCommands::Set {
            path,
            grace,
            soft_inodes,
            hard_inodes,
            soft_length,
            hard_length,
            soft_size,
            hard_size,
        } => {
            let soft = QuotaLimits {
                inodes: soft_inodes,
                length: size_arg(soft_length.as_deref())?,
                size: size_arg(soft_size.as_deref())?,
                real_size: 0,
            };
            let hard = QuotaLimits {
                inodes: hard_inodes,
                length: size_arg(hard_length.as_deref())?,
                size: size_arg(hard_size.as_deref())?,
                real_size: 0,
            };
            let inode = client.lookup(&path).await?.inode;
            match master.quota_set(inode, grace, soft, hard).await? {
                Some(quota) => print_quota(&path, &quota),
                None => println!("Quota set on {}", path),
            }
        }
        QuotaCommands::Del { path } => {
            let inode = client.lookup(&path).await?.inode;
            master.quota_delete(inode).await?;
            println!("Quota removed from {}", path);
        }
        QuotaCommands::List => {
            for entry in master.quota_info().await? {
                let flag = if entry.exceeded { " (exceeded)" } else { "" };
                print_quota(&format!("{}{}", entry.path, flag), &entry.quota);
            }
        }
    }

    client.close().await?;
    Ok(())
}

fn print_quota(path: &str, quota: &QuotaInfo) {
    let usage = quota.usage();
    println!(
        "{}: {} of {} ({:.1}%), grace {}s",
        path,
        usage.current,
        usage.limit,
        usage.ratio * 100.0,
        quota.grace_period
    );
}

fn size_arg(value: Option<&str>) -> anyhow::Result<u64> {
    match value {
        Some(v) => parse_bytes(v).with_context(|| format!("invalid size {:?}", v)),
        None => Ok(0),
    }
}

fn remote_join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    format!("{}/{}", dir, name)
}
