//! Entry point for the `simio-server` binary: parse arguments, load a
//! configuration file, wire up the configured transport and plans,
//! and run the server until every known client has closed.
//!
//! Grounded in `original_source/src/multio/server/MultioServer.cc`
//! (construct a transport from configuration, build a listener on top
//! of it, then run) and spec.md §6's configuration-file shape; there
//! is no `MultioServerTool.h`/`.cc` under `examples/original_source/`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use simio::action::ActionContext;
use simio::config::{Configuration, ServerConfig};
use simio::domain::DomainRegistry;
use simio::message::Peer;
use simio::plan::Plan;
use simio::server::Server;
use simio::transport::tcp::TcpTransport;
use simio::transport::{LocalPeerTag, Transport, TransportConfig, TransportFactory};

mod cli;
use cli::Args;

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = simio::logging::init(args.verbose, args.quiet, args.log_file.as_deref())
        .context("failed to initialize logging")?;

    if let Err(err) = run(args) {
        tracing::error!(error = %err, "simio-server exiting after unrecoverable error");
        std::process::exit(1);
    }
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let configuration = Configuration::from_file(args.config.as_deref())
        .context("failed to load server configuration")?;

    let transport_kind = configuration
        .transport_kind()
        .context("configuration did not name a transport")?
        .to_string();

    let server_cfg = configuration
        .raw
        .server
        .as_ref()
        .context("configuration is missing a \"server\" block")?;
    let group = server_cfg
        .server_group
        .clone()
        .or_else(|| server_cfg.group.clone())
        .unwrap_or_else(|| "simio".to_string());
    let local_peer = Peer::new(group, 0);

    let transport_config = TransportConfig::new(local_peer.clone(), LocalPeerTag::Server);
    let transport: Arc<dyn Transport> = if transport_kind == "tcp" {
        Arc::new(bind_tcp(transport_config, &args, server_cfg)?)
    } else {
        Arc::from(
            TransportFactory::create(&transport_kind, transport_config)
                .context("failed to construct transport")?,
        )
    };

    let ctx = ActionContext {
        domain_registry: DomainRegistry::new(),
    };
    let plans: Vec<Plan> = configuration
        .build_plans()
        .context("failed to build the configured plans")?
        .into_iter()
        .map(|(name, actions)| Plan::new(name, actions, ctx.clone()))
        .collect();

    tracing::info!(
        transport = %transport_kind,
        peer = %local_peer,
        plans = plans.len(),
        "starting simio-server"
    );

    let server = Arc::new(Server::new(transport, plans));
    server.run().context("server run loop failed")?;

    tracing::info!("simio-server shut down cleanly");
    Ok(())
}

/// TCP needs one extra step beyond `TransportFactory::create`: binding
/// a listening socket. The port comes from `--port`, falling back to
/// the first port of the first `servers` entry in the configuration.
fn bind_tcp(config: TransportConfig, args: &Args, server_cfg: &ServerConfig) -> Result<TcpTransport> {
    let port = args
        .port
        .or_else(|| {
            server_cfg
                .servers
                .as_ref()
                .and_then(|peers| peers.first())
                .and_then(|peer| peer.ports.first().copied())
        })
        .context("tcp transport requires --port or a configured servers[0].ports[0]")?;

    let transport = TcpTransport::new(config).context("failed to construct tcp transport")?;
    transport
        .listen_on(("0.0.0.0", port))
        .context("failed to bind tcp listener")?;
    tracing::info!(port, "tcp transport listening");
    Ok(transport)
}
