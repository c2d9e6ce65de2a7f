//! `simio-hammer`: a minimal load-testing / manual-exercise tool,
//! ported from `original_source/src/multio/server/tools/
//! multio-hammer.cc`'s `spawnServers`/`spawnClients`/`sendData`.
//!
//! For the `thread` transport this binary plays both roles in one
//! process: it spawns `--nbservers` in-process servers (a single
//! Aggregation -> Print -> Sink(Null) plan apiece, sharing one
//! `ActionContext` so every server's Domain Registry entries are
//! visible to the others) and `--nbclients` in-process clients, each
//! registering an unstructured partition of the field and pushing
//! `--nbsteps x --nblevels x --nbparams` Field messages before
//! closing. For `tcp` it only plays the client role, connecting out
//! to an already-running `simio-server`.

use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::builder::styling::AnsiColor;
use clap::builder::Styles;
use clap::Parser;

use simio::action::aggregation::Aggregation;
use simio::action::print::Print;
use simio::action::sink::{Sink, SinkTarget};
use simio::action::{Action, ActionContext};
use simio::client::Client;
use simio::domain::{Domain, DomainRegistry};
use simio::message::{Metadata, Peer};
use simio::plan::Plan;
use simio::server::Server;
use simio::transport::tcp::TcpTransport;
use simio::transport::thread::ThreadTransport;
use simio::transport::{LocalPeerTag, Transport, TransportConfig};
use simio::utils::sequence;

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Command-line surface, mirroring the original tool's
/// `--transport`/`--nbclients`/`--nbservers`/`--port`/`--nbsteps`/
/// `--nblevels`/`--nbparams` options.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Exercise a simio server with synthetic field traffic", styles = styles())]
struct Args {
    /// Transport to use: "thread" (spawns servers in-process) or
    /// "tcp" (connects to a running server).
    #[arg(long = "transport", default_value = "thread")]
    transport: String,

    /// Host to connect to, for the `tcp` transport.
    #[arg(long = "host", default_value = "127.0.0.1")]
    host: String,

    /// Port to connect to (tcp) or base port for display purposes.
    #[arg(long = "port", default_value_t = 7777)]
    port: u16,

    /// Number of simulated client ranks.
    #[arg(long = "nbclients", default_value_t = 1)]
    nbclients: u64,

    /// Number of server ranks (`thread` transport only).
    #[arg(long = "nbservers", default_value_t = 1)]
    nbservers: u64,

    /// Number of output time steps per client.
    #[arg(long = "nbsteps", default_value_t = 3)]
    nbsteps: u64,

    /// Number of model levels per field.
    #[arg(long = "nblevels", default_value_t = 3)]
    nblevels: u64,

    /// Number of distinct parameters per step.
    #[arg(long = "nbparams", default_value_t = 3)]
    nbparams: u64,

    /// Emit debug-level logs.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

const DOMAIN_NAME: &str = "hammer-grid";

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = simio::logging::init(args.verbose, false, None)?;

    match args.transport.as_str() {
        "thread" => run_in_process(&args),
        "tcp" => run_tcp_client(&args),
        other => anyhow::bail!("unsupported transport \"{other}\"; simio-hammer supports thread or tcp"),
    }
}

/// One shared context so every in-process server's Aggregation action
/// sees domains registered by clients connected to any of them —
/// matching the single shared process-wide registry spec.md §4.5
/// describes for a real multi-rank deployment.
fn shared_context() -> ActionContext {
    ActionContext {
        domain_registry: DomainRegistry::new(),
    }
}

fn run_in_process(args: &Args) -> Result<()> {
    let ctx = shared_context();

    let server_peers: Vec<Peer> = (0..args.nbservers)
        .map(|id| Peer::new("hammer-server", id))
        .collect();
    let client_peers: Vec<Peer> = (0..args.nbclients)
        .map(|id| Peer::new("hammer-client", id))
        .collect();

    let mut server_handles = Vec::new();
    for peer in &server_peers {
        let transport = Arc::new(ThreadTransport::new(TransportConfig {
            local_peer: peer.clone(),
            peer_tag: LocalPeerTag::Server,
            pool_size: 4,
            buffer_size: 4 * 1024 * 1024,
        }));
        let plan = Plan::new(
            "hammer",
            vec![
                Action::Aggregation(Aggregation::new(1, false)),
                Action::Print(Print::new("hammer-sink")),
                Action::Sink(Sink::new(SinkTarget::Null)),
            ],
            ctx.clone(),
        );
        let server = Arc::new(Server::new(transport as Arc<dyn Transport>, vec![plan]));
        server_handles.push(thread::spawn(move || {
            if let Err(err) = server.run() {
                tracing::error!(error = %err, "hammer server exited with an error");
            }
        }));
    }

    let field_size = args.nbclients * 2;
    let mut client_handles = Vec::new();
    for (index, peer) in client_peers.iter().cloned().enumerate() {
        let args = args.clone();
        let server_peers = server_peers.clone();
        client_handles.push(thread::spawn(move || -> Result<()> {
            let transport = Arc::new(ThreadTransport::new(TransportConfig {
                local_peer: peer,
                peer_tag: LocalPeerTag::Client,
                pool_size: 4,
                buffer_size: 4 * 1024 * 1024,
            }));
            send_client_traffic(
                transport as Arc<dyn Transport>,
                server_peers,
                index as u64,
                &args,
                field_size,
            )
        }));
    }

    for handle in client_handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("a client thread panicked"))??;
    }
    for handle in server_handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("a server thread panicked"))?;
    }
    tracing::info!("simio-hammer run complete");
    Ok(())
}

fn run_tcp_client(args: &Args) -> Result<()> {
    let client_peer = Peer::new("hammer-client", 0);
    let transport = TcpTransport::new(TransportConfig {
        local_peer: client_peer,
        peer_tag: LocalPeerTag::Client,
        pool_size: 4,
        buffer_size: 4 * 1024 * 1024,
    })
    .context("failed to construct tcp transport")?;

    let server_peer = Peer::new("simio", 0);
    transport
        .connect_to(server_peer.clone(), (args.host.as_str(), args.port))
        .context("failed to connect to server")?;

    let field_size = args.nbclients.max(1) * 2;
    send_client_traffic(Arc::new(transport), vec![server_peer], 0, args, field_size)
}

/// One simulated client's traffic: open, register its domain
/// partition, push `nbsteps x nblevels x nbparams` Field messages,
/// step-complete after every step, then close.
///
/// Grounded in `multio-hammer.cc`'s `sendData`: partition `i` of
/// `nbclients` owns every `i`-th global index, a field's destination
/// server is `hash(field_id) % server_count`, and values are just the
/// global index as a float so aggregation correctness is trivially
/// checkable end to end.
fn send_client_traffic(
    transport: Arc<dyn Transport>,
    server_peers: Vec<Peer>,
    client_index: u64,
    args: &Args,
    field_size: u64,
) -> Result<()> {
    let client = Client::new(transport, server_peers.clone());
    client.open_connections()?;

    let nbclients = args.nbclients.max(1);
    let local_indices: Vec<i64> = (client_index..field_size)
        .step_by(nbclients as usize)
        .map(|i| i as i64)
        .collect();
    let domain = Domain::Unstructured(local_indices.clone());

    for server in &server_peers {
        client.write_domain(DOMAIN_NAME, &domain, field_size, server)?;
    }

    for step in sequence(args.nbsteps, 1) {
        for level in sequence(args.nblevels, 1) {
            for param in sequence(args.nbparams, 1) {
                let mut metadata = Metadata::new();
                metadata.set("precision", "double");
                metadata.set("domain", DOMAIN_NAME);
                metadata.set("param", param as i64);
                metadata.set("level", level as i64);
                metadata.set("step", step as i64);

                let values: Vec<f64> = local_indices.iter().map(|&i| i as f64).collect();
                let server = &server_peers[field_hash(param, level, step) % server_peers.len() as u64];
                client.write_field(metadata, &values, field_size, server)?;
            }
        }

        let mut step_md = Metadata::new();
        step_md.set("precision", "double");
        step_md.set("domain", DOMAIN_NAME);
        step_md.set("step", step as i64);
        client.write_step_complete(step_md)?;
    }

    client.close_connections()?;
    Ok(())
}

/// A deterministic stand-in for `std::hash<std::string>` over the
/// field-id in the original tool: just enough spread to exercise more
/// than one server when `--nbservers` > 1, without pulling in a hash
/// crate for a load-testing tool that doesn't need one.
fn field_hash(param: u64, level: u64, step: u64) -> u64 {
    param.wrapping_mul(31).wrapping_add(level.wrapping_mul(7)).wrapping_add(step)
}
