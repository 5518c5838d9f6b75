use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::cli::enums::LiveReloadArg;
use crate::cli::validation::parse_store;

/// Available Glint subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a theme locally against a live storefront
    ///
    /// Uploads the theme to a development theme, proxies storefront pages
    /// with the theme's assets served from disk, and reloads connected
    /// browsers as files change.
    Serve(ServeArgs),
}

/// Arguments for the serve command
///
/// Every option falls back to `glint.toml` and `GLINT_*` environment
/// variables when omitted.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Theme directory
    #[arg(value_name = "ROOT", default_value = ".")]
    pub root: PathBuf,

    /// Store domain, e.g. example.myshopify.com
    #[arg(short, long, value_name = "DOMAIN", value_parser = parse_store)]
    pub store: Option<String>,

    /// Interface to listen on
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Port to listen on
    ///
    /// An occupied port is an error; glint never picks another one.
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Theme to serve, by id or exact name
    ///
    /// Defaults to your development theme, created on first use.
    #[arg(short, long, value_name = "THEME")]
    pub theme: Option<String>,

    /// Poll the file system instead of relying on native notifications
    #[arg(long)]
    pub poll: bool,

    /// Pull changes made in the online editor into the working copy
    ///
    /// Also keeps remote JSON settings when they differ from local ones.
    #[arg(long)]
    pub editor_sync: bool,

    /// How browsers react to changes
    #[arg(long, value_enum, value_name = "MODE")]
    pub live_reload: Option<LiveReloadArg>,

    /// Extra ignore patterns (gitignore syntax), repeatable
    #[arg(short = 'x', long = "ignore", value_name = "PATTERN")]
    pub ignore: Vec<String>,

    /// Serve over HTTPS using --cert and --key
    ///
    /// Falls back to HTTP with a warning when no certificate can be loaded.
    #[arg(long)]
    pub https: bool,

    /// PEM certificate chain for --https
    #[arg(long, value_name = "FILE", requires = "https")]
    pub cert: Option<PathBuf>,

    /// PEM private key for --https
    #[arg(long, value_name = "FILE", requires = "https")]
    pub key: Option<PathBuf>,

    /// Open the served address in the default browser
    #[arg(long)]
    pub open: bool,

    /// Config file to use instead of <ROOT>/glint.toml
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}
