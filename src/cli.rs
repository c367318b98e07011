use clap::Parser;

/// relaycore — multi-tenant LLM proxy gateway
#[derive(Parser)]
#[command(name = "relaycore", version, about)]
pub struct Cli {
    /// Port to bind. Overrides GATEWAY_PORT when set.
    #[arg(short, long)]
    pub port: Option<u16>,
}
