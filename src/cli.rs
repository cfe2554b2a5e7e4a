//! Command-line definitions for filevaultd and the filevault client

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::protocol::DEFAULT_BIND;

/// Daemon options; anything left unset falls back to the config file, then defaults
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "filevault daemon - serve put/get/delete over TCP")]
pub struct DaemonOpts {
    /// TOML config file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Bind address (host:port)
    #[arg(long)]
    pub bind: Option<String>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Number of concurrent exchanges
    #[arg(long, short = 'w')]
    pub workers: Option<usize>,

    /// Directory holding stored files
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Path of the persisted id:filename listing
    #[arg(long)]
    pub registry: Option<PathBuf>,

    /// Read/write deadline per exchange in milliseconds
    #[arg(long)]
    pub io_timeout_ms: Option<u64>,

    /// Append store outcomes to this file
    #[arg(long)]
    pub audit_log: Option<PathBuf>,
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "filevault client - one request per connection")]
pub struct ClientOpts {
    /// Server address (host:port)
    #[arg(long, short = 's', default_value = DEFAULT_BIND)]
    pub server: String,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Clone, Debug, Subcommand)]
pub enum ClientCommand {
    /// Upload a local file
    Put {
        /// Local file to send
        file: PathBuf,
        /// Name to store it under on the server (defaults to the local file name)
        #[arg(long = "as")]
        server_name: Option<String>,
    },
    /// Download a file
    Get {
        #[command(flatten)]
        target: Target,
        /// Where to write the downloaded bytes (must not exist)
        #[arg(long, short = 'o')]
        out: PathBuf,
    },
    /// Delete a file
    Delete {
        #[command(flatten)]
        target: Target,
    },
    /// Ask the server to persist its registry and shut down
    Exit,
}

/// Exactly one of --id or --name
#[derive(Clone, Debug, Args)]
#[group(required = true, multiple = false)]
pub struct Target {
    /// Address the file by id
    #[arg(long)]
    pub id: Option<u32>,
    /// Address the file by name
    #[arg(long)]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_requires_exactly_one() {
        assert!(ClientOpts::try_parse_from(["filevault", "delete"]).is_err());
        assert!(
            ClientOpts::try_parse_from(["filevault", "delete", "--id", "1", "--name", "a"]).is_err()
        );
        let opts = ClientOpts::try_parse_from(["filevault", "delete", "--id", "3"]).unwrap();
        match opts.command {
            ClientCommand::Delete { target } => {
                assert_eq!(target.id, Some(3));
                assert_eq!(target.name, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_put_server_name() {
        let opts =
            ClientOpts::try_parse_from(["filevault", "put", "local.txt", "--as", "remote.txt"]).unwrap();
        assert_eq!(opts.server, DEFAULT_BIND);
        match opts.command {
            ClientCommand::Put { file, server_name } => {
                assert_eq!(file, PathBuf::from("local.txt"));
                assert_eq!(server_name.as_deref(), Some("remote.txt"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
