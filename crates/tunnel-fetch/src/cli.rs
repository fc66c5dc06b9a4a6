use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "tunnel-fetch",
    version,
    about = "Fetch URLs the way a sandboxed mini-app would, tunneling third-party requests through the host"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "tunnel.yaml")]
    pub config: PathBuf,

    /// Parent window URL (overrides config file setting)
    #[arg(long, conflicts_with = "no_parent")]
    pub parent: Option<String>,

    /// Treat the parent window location as unreadable
    #[arg(long)]
    pub no_parent: bool,

    /// Proxy the host uses for tunneled requests, e.g. socks5h://127.0.0.1:9050
    /// (overrides config file setting)
    #[arg(long)]
    pub proxy: Option<String>,

    /// HTTP method for every request
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Request header as `name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    pub data: Option<String>,

    /// URLs to fetch
    #[arg(required = true)]
    pub urls: Vec<String>,
}
