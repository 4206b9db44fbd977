// src/api.rs
// REST surface over the SimulationManager. Handlers stay thin: parse, delegate, shape JSON.

use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analyst::AggregatedInsight;
use crate::error::DiscoveryError;
use crate::manager::SimulationManager;
use crate::reporter::Reporter;

const DISPLAY_LIMIT: usize = 500;

// Shared state for the server
pub struct AppState {
    pub manager: Arc<SimulationManager>,
}

// 1. Request formats
#[derive(Deserialize)]
pub struct CreateSimulationRequest {
    pub context: Option<String>,
    pub num_personas: Option<usize>,
    pub max_turns: Option<usize>,
}

#[derive(Deserialize)]
pub struct ReflectRequest {
    pub context: Option<String>,
    pub num_personas: Option<usize>,
}

#[derive(Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

// 2. Response formats
#[derive(Serialize)]
pub struct SimulationCreatedResponse {
    pub simulation_id: String,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

fn error_response(err: &DiscoveryError) -> HttpResponse {
    let message = match err {
        DiscoveryError::NotFound(_) => "Simulation not found".to_string(),
        other => other.to_string(),
    };
    let body = ErrorBody { error: &message };
    match err {
        DiscoveryError::NotFound(_) => HttpResponse::NotFound().json(body),
        DiscoveryError::Validation(_) | DiscoveryError::InvalidState { .. } => HttpResponse::BadRequest().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ErrorBody {
        error: "Simulation not found",
    })
}

fn required_context(context: Option<String>) -> Result<String, DiscoveryError> {
    context
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| DiscoveryError::Validation("Context is required".to_string()))
}

// --- SIMULATION LIFECYCLE ---

// GET /api/simulations
pub async fn list_simulations(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "simulations": data.manager.list() }))
}

// POST /api/simulations
pub async fn create_simulation(
    data: web::Data<AppState>,
    req: web::Json<CreateSimulationRequest>,
) -> impl Responder {
    let req = req.into_inner();
    let defaults = data.manager.settings();
    let num_personas = req.num_personas.unwrap_or(defaults.default_personas);
    let max_turns = req.max_turns.unwrap_or(defaults.default_max_turns);

    let created = required_context(req.context)
        .and_then(|context| data.manager.create(&context, num_personas, max_turns));

    match created {
        Ok(simulation_id) => {
            info!(simulation_id = %simulation_id, "simulation created via API");
            HttpResponse::Created().json(SimulationCreatedResponse {
                simulation_id,
                message: "Simulation created successfully".to_string(),
            })
        }
        Err(e) => {
            warn!(error = %e, "rejected simulation request");
            error_response(&e)
        }
    }
}

// GET /api/simulations/{id}
pub async fn get_simulation(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match data.manager.get_summary(&path.into_inner()) {
        Some(summary) => HttpResponse::Ok().json(summary),
        None => not_found(),
    }
}

// DELETE /api/simulations/{id}
pub async fn delete_simulation(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    if data.manager.delete(&path.into_inner()) {
        HttpResponse::Ok().json(serde_json::json!({ "message": "Simulation deleted successfully" }))
    } else {
        not_found()
    }
}

// POST /api/simulations/{id}/start
pub async fn start_simulation(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match data.manager.try_start(&path.into_inner()) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "message": "Simulation started successfully" })),
        Err(e) => error_response(&e),
    }
}

// POST /api/simulations/{id}/stop
pub async fn stop_simulation(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match data.manager.try_stop(&path.into_inner()) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "message": "Simulation stopped successfully" })),
        Err(e) => error_response(&e),
    }
}

// --- READ VIEWS ---

// GET /api/simulations/{id}/personas
pub async fn get_personas(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match data.manager.get_personas(&path.into_inner()) {
        Some(personas) => HttpResponse::Ok().json(serde_json::json!({ "personas": personas })),
        None => not_found(),
    }
}

// GET /api/simulations/{id}/conversations
pub async fn get_conversations(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match data.manager.get_conversations(&path.into_inner()) {
        Some(conversations) => HttpResponse::Ok().json(serde_json::json!({ "conversations": conversations })),
        None => not_found(),
    }
}

// GET /api/simulations/{id}/insights
pub async fn get_insights(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match data.manager.get_insights(&path.into_inner()) {
        Some(insights) => {
            let insights: Vec<AggregatedInsight> = insights.into_iter().map(for_display).collect();
            HttpResponse::Ok().json(serde_json::json!({ "insights": insights }))
        }
        None => not_found(),
    }
}

// GET /api/simulations/{id}/progress
pub async fn get_progress(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match data.manager.get_progress(&path.into_inner()) {
        Some(progress) => HttpResponse::Ok().json(serde_json::json!({ "progress": progress })),
        None => not_found(),
    }
}

// GET /api/simulations/{id}/export?format=csv|json
pub async fn export_simulation(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ExportQuery>,
) -> impl Responder {
    let Some(simulation) = data.manager.get_simulation(&path.into_inner()) else {
        return not_found();
    };

    let format = query.format.as_deref().unwrap_or("json").to_ascii_lowercase();
    let exported = match format.as_str() {
        "csv" => Reporter::export_transcripts_csv(&simulation.conversations, &simulation.personas)
            .map(|bytes| HttpResponse::Ok().content_type("text/csv").body(bytes)),
        "json" => Reporter::export_json(&simulation)
            .map(|body| HttpResponse::Ok().content_type("application/json").body(body)),
        other => Err(DiscoveryError::Validation(format!("unsupported export format: {other}"))),
    };

    exported.unwrap_or_else(|e| error_response(&e))
}

// --- UTILITIES ---

// POST /api/reflect_personas
pub async fn reflect_personas(data: web::Data<AppState>, req: web::Json<ReflectRequest>) -> impl Responder {
    let req = req.into_inner();
    let settings = data.manager.settings();
    let count = req.num_personas.unwrap_or(settings.default_personas);

    let context = match required_context(req.context) {
        Ok(context) => context,
        Err(e) => return error_response(&e),
    };
    if count == 0 || count > settings.max_personas {
        return error_response(&DiscoveryError::Validation(format!(
            "num_personas must be between 1 and {}",
            settings.max_personas
        )));
    }

    let outlines = data.manager.reflect(&context, count).await;
    HttpResponse::Ok().json(serde_json::json!({ "persona_outlines": outlines }))
}

// GET /status
pub async fn status() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "online",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn for_display(mut insight: AggregatedInsight) -> AggregatedInsight {
    for field in [
        &mut insight.theme,
        &mut insight.description,
        &mut insight.evidence,
        &mut insight.impact,
    ] {
        if field.chars().count() > DISPLAY_LIMIT {
            let kept: String = field.chars().take(DISPLAY_LIMIT - 3).collect();
            *field = format!("{kept}...");
        }
    }
    insight
}

/// Route table, shared by the binary and the HTTP tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/status", web::get().to(status)).service(
        web::scope("/api")
            .route("/simulations", web::get().to(list_simulations))
            .route("/simulations", web::post().to(create_simulation))
            .route("/simulations/{id}", web::get().to(get_simulation))
            .route("/simulations/{id}", web::delete().to(delete_simulation))
            .route("/simulations/{id}/start", web::post().to(start_simulation))
            .route("/simulations/{id}/stop", web::post().to(stop_simulation))
            .route("/simulations/{id}/personas", web::get().to(get_personas))
            .route("/simulations/{id}/conversations", web::get().to(get_conversations))
            .route("/simulations/{id}/insights", web::get().to(get_insights))
            .route("/simulations/{id}/progress", web::get().to(get_progress))
            .route("/simulations/{id}/export", web::get().to(export_simulation))
            .route("/reflect_personas", web::post().to(reflect_personas)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_fields_are_truncated_for_display() {
        let insight = AggregatedInsight {
            theme: "Trust".into(),
            description: "x".repeat(600),
            evidence: "é".repeat(500),
            impact: "short".into(),
            confidence: 3,
        };
        let shown = for_display(insight);
        assert_eq!(shown.theme, "Trust");
        assert_eq!(shown.description.chars().count(), 500);
        assert!(shown.description.ends_with("..."));
        assert_eq!(shown.evidence, "é".repeat(500));
    }

    #[test]
    fn errors_map_to_status_codes() {
        assert_eq!(error_response(&DiscoveryError::NotFound("x".into())).status(), 404);
        assert_eq!(error_response(&DiscoveryError::Validation("bad".into())).status(), 400);
        let invalid = DiscoveryError::InvalidState {
            id: "x".into(),
            expected: "ready".into(),
            actual: "running".into(),
        };
        assert_eq!(error_response(&invalid).status(), 400);
        assert_eq!(error_response(&DiscoveryError::Internal("boom".into())).status(), 500);
    }
}
