use actix_web::{web::Data, web::Path, HttpResponse};
use tracing::{error, warn};

use neon_cluster::compute::spec::generate_compute_spec;
use neon_cluster::util::store::ResourceStore;

pub const SPEC_PATH: &str = "/compute/api/v2/computes/{compute_id}/spec";

/// Spec fetched by compute_ctl at startup. `compute_id` is the branch name.
pub async fn compute_spec<S: ResourceStore>(store: Data<S>, compute_id: Path<String>) -> HttpResponse {
    match generate_compute_spec(store.get_ref(), compute_id.as_str()).await {
        Ok(Some(spec)) => HttpResponse::Ok().json(spec),
        Ok(None) => {
            warn!(compute_id = %compute_id, "no compute with this id");
            HttpResponse::NotFound().json(format!("compute {compute_id} not found"))
        }
        Err(e) => {
            error!("Failed to generate compute spec: {}", e);
            HttpResponse::InternalServerError().json(format!("Failed to generate compute spec: {}", e))
        }
    }
}
