use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cms-session")]
#[command(version)]
#[command(about = "Authenticated session client for the CMS backend")]
pub struct Cli {
    /// Config file (defaults to CONFIG_PATH, then ./cms-session.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: String,
    },
    /// Create an account and log in
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Verify the stored session for a protected destination
    Whoami {
        /// Destination the session is checked for
        #[arg(long, default_value = "/")]
        destination: String,
    },
    /// Authenticated GET, printing the response body
    Get {
        /// API path, e.g. /api/news
        #[arg(value_name = "PATH")]
        path: String,
    },
    /// End the session
    Logout,
}
