//! Command-line interface for the MooseFS client.

use crate::config::{normalize_master_addr, ClientConfig};
use crate::error::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// mfs - talk to a MooseFS cluster without mounting it.
#[derive(Parser)]
#[command(name = "mfs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Master address (host[:port])
    #[arg(short = 'H', long, env = "MFS_MASTER")]
    pub master: Option<String>,

    /// Registration password
    #[arg(short = 'P', long, env = "MFS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Exported subdirectory to use as root
    #[arg(short = 'p', long, env = "MFS_SUBDIR")]
    pub subdir: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "MFS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "MFS_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Upload local files
    Put {
        /// Local files to upload
        #[arg(required = true)]
        srcs: Vec<PathBuf>,

        /// Remote directory to upload into
        #[arg(short, long, default_value = "/")]
        dst: String,
    },

    /// Download a file
    Get {
        /// Remote file
        #[arg(short, long)]
        src: String,

        /// Local directory to save into
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// List directory contents
    Ls {
        /// Path to list
        #[arg(default_value = "/")]
        path: String,

        /// Long format
        #[arg(short, long)]
        long: bool,
    },

    /// Remove files
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Create a directory
    Mkdir {
        path: String,

        /// Create missing parent directories
        #[arg(short, long)]
        parents: bool,
    },

    /// Remove an empty directory
    Rmdir { path: String },

    /// Show attributes of a path
    Stat {
        path: String,

        /// Also show directory totals
        #[arg(short, long)]
        summary: bool,
    },

    /// Show cluster space usage
    Df,

    /// Directory quota commands
    Quota {
        #[command(subcommand)]
        command: QuotaCommands,
    },

    /// Session management commands
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Show master status
    Info,

    /// Show client and master versions
    Version,
}

/// Quota subcommands.
#[derive(Subcommand)]
pub enum QuotaCommands {
    /// Show the quota on a directory
    Get { path: String },

    /// Set the quota on a directory
    Set {
        path: String,

        /// Grace period for soft limits, in seconds
        #[arg(long, default_value_t = 7 * 86400)]
        grace: u32,

        /// Soft limit on the number of inodes
        #[arg(long, default_value_t = 0)]
        soft_inodes: u32,

        /// Hard limit on the number of inodes
        #[arg(long, default_value_t = 0)]
        hard_inodes: u32,

        /// Soft limit on total length (e.g. 10Gi)
        #[arg(long)]
        soft_length: Option<String>,

        /// Hard limit on total length
        #[arg(long)]
        hard_length: Option<String>,

        /// Soft limit on disk size
        #[arg(long)]
        soft_size: Option<String>,

        /// Hard limit on disk size
        #[arg(long)]
        hard_size: Option<String>,
    },

    /// Delete the quota on a directory
    Del { path: String },

    /// List every quota on the cluster
    List,
}

/// Session subcommands.
#[derive(Subcommand)]
pub enum SessionCommands {
    /// List sessions registered on the master
    List,

    /// Remove a session
    Remove { session_id: u32 },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Client configuration from the config file, overridden by flags.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)?,
            None => ClientConfig::default(),
        };

        if let Some(master) = &self.master {
            config.master = normalize_master_addr(master);
        }
        if let Some(password) = &self.password {
            config = config.with_password(password.as_str());
        }
        if let Some(subdir) = &self.subdir {
            config = config.with_subdir(subdir);
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        if self.json_logs {
            config.observability.json_logs = true;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "mfs", "-H", "mfsmaster", "-P", "secret", "-p", "data", "--json-logs", "ls", "-l", "/x",
        ]);
        let config = cli.client_config().unwrap();
        assert_eq!(config.master, "mfsmaster:9421");
        assert_eq!(config.password(), Some("secret"));
        assert_eq!(config.subdir, "/data");
        assert!(config.observability.json_logs);
        assert!(matches!(cli.command, Commands::Ls { long: true, ref path } if path == "/x"));
    }

    #[test]
    fn test_put_and_get_arguments() {
        let cli = Cli::parse_from(["mfs", "put", "-d", "/in", "a.txt", "b.txt"]);
        match cli.command {
            Commands::Put { srcs, dst } => {
                assert_eq!(srcs.len(), 2);
                assert_eq!(dst, "/in");
            }
            _ => panic!("expected put"),
        }

        let cli = Cli::parse_from(["mfs", "get", "-s", "/in/a.txt"]);
        match cli.command {
            Commands::Get { src, dir } => {
                assert_eq!(src, "/in/a.txt");
                assert_eq!(dir, PathBuf::from("."));
            }
            _ => panic!("expected get"),
        }
    }

    #[test]
    fn test_config_file_is_overridden_by_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(
            &path,
            r#"{"master": "10.1.1.1", "subdir": "/base", "observability": {"log_level": "warn", "json_logs": false}}"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "mfs",
            "--config",
            path.to_str().unwrap(),
            "-l",
            "debug",
            "df",
        ]);
        let config = cli.client_config().unwrap();
        assert_eq!(config.master, "10.1.1.1:9421");
        assert_eq!(config.subdir, "/base");
        assert_eq!(config.observability.log_level, "debug");
    }
}
