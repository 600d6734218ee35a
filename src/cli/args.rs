use clap::{Parser, Subcommand};
use vfscache::CachePolicy;

#[derive(Parser, Debug)]
#[command(name = "vfscache")]
#[command(about = "Inspect and exercise virtual filesystem handle caches")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Manage configuration")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
    #[command(about = "Run a concurrent resolve workload against a cache policy")]
    Simulate {
        #[arg(long, help = "Cache policy (defaults to the configured one)")]
        policy: Option<CachePolicy>,

        #[arg(long, help = "Entries per filesystem for the lru policy")]
        capacity: Option<usize>,

        #[arg(long, default_value_t = 2, help = "Number of filesystems")]
        filesystems: usize,

        #[arg(long, default_value_t = 200, help = "Distinct paths per filesystem")]
        paths: usize,

        #[arg(long, default_value_t = 4, help = "Resolver threads")]
        threads: usize,

        #[arg(long, default_value_t = 1000, help = "Resolves per thread")]
        rounds: usize,

        #[arg(long, default_value_t = 0, help = "Hold a content stream open on every Nth resolve")]
        pin_every: usize,

        #[arg(long, help = "JSON output")]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    #[command(about = "Show current configuration values")]
    Show,
    #[command(about = "Show config file path")]
    Path,
}
