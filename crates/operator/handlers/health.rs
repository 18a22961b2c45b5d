use actix_web::{get, web::Data, HttpRequest, HttpResponse, Responder};

use neon_cluster::controllers::State;

#[get("/health")]
pub async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/healthz")]
pub async fn healthz(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/readyz")]
pub async fn readyz(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("ready")
}

#[get("/")]
pub async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}
