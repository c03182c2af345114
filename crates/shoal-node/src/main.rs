//! shoald - shoal storage node daemon
//!
//! Usage:
//!   shoald <ns_ip> <ns_port> <my_ip> <my_client_port> <my_repl_port>

use clap::Parser;
use tracing::error;

use shoal_config::NodeOptions;

#[derive(Parser)]
#[command(name = "shoald", version, about = "Shoal storage node daemon", long_about = None)]
struct Cli {
    /// Name server address to register with
    ns_ip: String,
    ns_port: u16,
    /// Address this node binds and advertises
    my_ip: String,
    /// Port for client and name-server requests
    my_client_port: u16,
    /// Port this node's replication listener binds
    my_repl_port: u16,
}

#[tokio::main]
async fn main() {
    shoal_config::logging::init("info");

    let cli = Cli::parse();
    let opts = NodeOptions {
        ns_ip: cli.ns_ip,
        ns_port: cli.ns_port,
        ip: cli.my_ip,
        client_port: cli.my_client_port,
        repl_port: cli.my_repl_port,
    };

    if let Err(e) = shoal_node::run_node(opts).await {
        error!(error = %e, "node terminated");
        std::process::exit(1);
    }
}
