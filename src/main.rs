// src/main.rs
// DISCOVERY CORE - API SERVER
// Serves the simulation registry over REST (Actix-Web). Simulations run on
// their own multi-threaded Tokio runtime so long interviews never block HTTP workers.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use discovery_core::api::{self, AppState};
use discovery_core::brain::AgentBrain;
use discovery_core::config::{load_config, ServerConfig};
use discovery_core::manager::SimulationManager;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Configuration
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    // 2. Neural engine (once at startup)
    let brain = match AgentBrain::new(&config.llm) {
        Ok(brain) => brain,
        Err(e) => {
            error!(error = %e, "failed to initialise LLM client");
            return ExitCode::FAILURE;
        }
    };
    info!(model = brain.model(), "LLM client ready");

    // 3. Runtime for background simulation work
    let simulation_runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("simulation")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start simulation runtime");
            return ExitCode::FAILURE;
        }
    };

    // 4. Simulation registry
    let manager = Arc::new(SimulationManager::new(
        Arc::new(brain),
        config.simulation.clone(),
        simulation_runtime.handle().clone(),
    ));

    // 5. HTTP server
    let served = actix_web::rt::System::new().block_on(serve(config.server, manager));
    simulation_runtime.shutdown_background();

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn serve(server: ServerConfig, manager: Arc<SimulationManager>) -> io::Result<()> {
    let app_state = web::Data::new(AppState { manager });

    info!(host = %server.host, port = server.port, "server running");

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(app_state.clone())
            .configure(api::configure)
    })
    .bind((server.host.as_str(), server.port))?
    .run()
    .await
}
