use actix_web::{dev::Server, middleware, web, web::Data, App, HttpServer};

use neon_cluster::controllers::State;
use neon_cluster::util::config::OperatorConfig;
use neon_cluster::util::store::KubeStore;

use crate::handlers::{compute, health, metrics};

/// Configure the HTTP server. The returned future runs it until shutdown.
pub fn start_server(state: State, store: KubeStore, config: &OperatorConfig) -> std::io::Result<Server> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .app_data(Data::new(store.clone()))
            .wrap(
                middleware::Logger::default()
                    .exclude("/health")
                    .exclude("/healthz")
                    .exclude("/readyz"),
            )
            .service(health::index)
            .service(health::health)
            .service(health::healthz)
            .service(health::readyz)
            .service(metrics::metrics)
            .route(compute::SPEC_PATH, web::get().to(compute::compute_spec::<KubeStore>))
    })
    .bind((config.http_host.as_str(), config.http_port))?
    .shutdown_timeout(5)
    .run();
    Ok(server)
}
