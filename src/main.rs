use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use dotenv::dotenv;
use std::sync::Arc;

mod alert;
mod config;
mod correlation;
mod enrich;
mod pipeline;
mod store;
mod stream;
mod tailer;

use pipeline::AlertPipeline;

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok", "service": "siem-backend" }))
}

// Push ingest. Always answers 200 so upstream shippers never retry-loop;
// failures are reported in the envelope instead.
#[post("/ingest")]
async fn ingest_alert(
    body: web::Bytes,
    pipeline: web::Data<Arc<AlertPipeline>>,
) -> impl Responder {
    let raw: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return HttpResponse::Ok().json(serde_json::json!({
                "status": "error",
                "message": format!("invalid JSON payload: {}", e),
            }))
        }
    };

    let mut alert = alert::normalize(raw);
    enrich::enrich(&mut alert);
    let id = alert.id.clone();

    if pipeline.submit(alert) {
        HttpResponse::Ok().json(serde_json::json!({ "status": "processed", "id": id }))
    } else {
        HttpResponse::Ok().json(serde_json::json!({
            "status": "error",
            "message": "alert pipeline is not accepting events",
        }))
    }
}

// Most recent alerts, oldest first, served from the in-memory ring.
#[get("/alerts")]
async fn recent_alerts(pipeline: web::Data<Arc<AlertPipeline>>) -> impl Responder {
    HttpResponse::Ok().json(pipeline.recent_snapshot().await)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = config::Config::from_env();

    let pool = match store::init_db(&config.db_file).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("[DATABASE] Failed to open alert store {}: {}", config.db_file, e);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e));
        }
    };

    let broadcaster = Arc::new(stream::Broadcaster::new());
    let pipeline = AlertPipeline::start(pool, broadcaster, &config).await;

    tokio::spawn(tailer::tail_alerts(config.alerts_file.clone(), pipeline.clone()));

    let pipeline_data = web::Data::new(pipeline);
    let listen_port = config.listen_port;
    println!("Starting SIEM backend on 0.0.0.0:{}", listen_port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(cors)
            .app_data(pipeline_data.clone())
            .service(health_check)
            .service(ingest_alert)
            .service(recent_alerts)
            .route("/ws", web::get().to(stream::ws_route))
    })
    .bind(("0.0.0.0", listen_port))?
    .run()
    .await
}
