//! CLI entry point (`spec.md` §6): `gateway start --port P --services URL,URL,...`.
//!
//! The only place in this workspace that installs a global `tracing` subscriber — library code
//! stays embeddable, the binary owns the ambient logging sink (`spec.md` §9's "treat logging as
//! an injected capability ... to avoid hidden process-wide coupling").

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use federation_gateway::gateway::{Gateway, GatewayOptions};
use federation_gateway::introspection::fetch_remote_schema;
use federation_gateway::queryer::NetworkQueryer;
use federation_gateway::schema::RemoteSchema;

#[derive(Parser)]
#[command(name = "gateway", about = "A federating GraphQL gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge the given services and serve the federated schema over HTTP.
    Start {
        /// Port to bind. Falls back to the `PORT` environment variable if omitted.
        #[arg(long)]
        port: Option<u16>,

        /// Upstream service URL. Repeat the flag or comma-separate to list several.
        #[arg(long, required = true, value_delimiter = ',')]
        services: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let Command::Start { port, services } = cli.command;

    let port = match resolve_port(port) {
        Ok(port) => port,
        Err(message) => {
            tracing::error!("{message}");
            return ExitCode::from(1);
        }
    };

    run(services, port).await
}

async fn run(services: Vec<String>, port: u16) -> ExitCode {
    let sources = match introspect_all(&services).await {
        Ok(sources) => sources,
        Err(err) => {
            tracing::error!(error = %err, "failed to introspect an upstream service");
            return ExitCode::from(1);
        }
    };

    let gateway = match Gateway::new(sources, GatewayOptions::default()) {
        Ok(gateway) => gateway,
        Err(err) => {
            tracing::error!(error = %err, "failed to merge upstream schemas");
            return ExitCode::from(1);
        }
    };

    let app = federation_gateway::http::router(Arc::new(gateway));

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, port, "failed to bind listening socket");
            return ExitCode::from(2);
        }
    };

    tracing::info!(port, "gateway listening");
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(error = %err, "server exited with an error");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

fn resolve_port(port: Option<u16>) -> Result<u16, String> {
    if let Some(port) = port {
        return Ok(port);
    }
    match std::env::var("PORT") {
        Ok(value) => value
            .parse()
            .map_err(|_| format!("PORT environment variable {value:?} is not a valid port number")),
        Err(_) => Err("no --port given and PORT is not set".to_string()),
    }
}

async fn introspect_all(services: &[String]) -> Result<Vec<RemoteSchema>, federation_gateway::error::GatewayError> {
    let client = reqwest::Client::new();
    let mut sources = Vec::with_capacity(services.len());
    for url in services {
        url::Url::parse(url).map_err(|err| {
            federation_gateway::error::GatewayError::BadRequest(format!(
                "invalid service URL {url:?}: {err}"
            ))
        })?;
        let queryer = NetworkQueryer::new(url.clone(), client.clone());
        sources.push(fetch_remote_schema(url, &queryer).await?);
    }
    Ok(sources)
}
