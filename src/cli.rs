use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "channel-translate-relay",
    version,
    about = "Relays guild messages between per-language channels, translating on the fly"
)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "CONFIG_PATH")]
    pub config: Option<String>,
}
