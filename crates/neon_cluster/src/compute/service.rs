use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{app_selector, compute_labels, storage_id_labels, COMPUTE_ADMIN_PORT, COMPUTE_POSTGRES_PORT};
use crate::api::v1::{neonbranch::NeonBranch, neonproject::NeonProject};
use crate::util::labels::COMPONENT_LABEL;

fn compute_service(
    branch: &NeonBranch,
    branch_name: &str,
    namespace: &str,
    project: &NeonProject,
    suffix: &str,
    component: &str,
    port: i32,
) -> Service {
    let mut labels = compute_labels(branch_name, project);
    labels.insert(COMPONENT_LABEL.to_string(), component.to_string());
    labels.extend(storage_id_labels(branch, project));

    Service {
        metadata: ObjectMeta {
            name: Some(format!("{branch_name}-{suffix}")),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(app_selector(branch_name)),
            ports: Some(vec![ServicePort {
                name: Some(suffix.to_string()),
                port,
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// compute_ctl HTTP API of the branch compute.
pub fn admin_service(branch: &NeonBranch, branch_name: &str, namespace: &str, project: &NeonProject) -> Service {
    compute_service(
        branch,
        branch_name,
        namespace,
        project,
        "admin",
        "compute-admin",
        COMPUTE_ADMIN_PORT,
    )
}

pub fn postgres_service(branch: &NeonBranch, branch_name: &str, namespace: &str, project: &NeonProject) -> Service {
    compute_service(
        branch,
        branch_name,
        namespace,
        project,
        "postgres",
        "compute-postgres",
        COMPUTE_POSTGRES_PORT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn services_select_the_compute_pods() {
        let project = fixtures::ready_project("p1", "c1");
        let branch = fixtures::branch_with_timeline("main", "p1");

        let admin = admin_service(&branch, "main", "default", &project);
        assert_eq!(admin.metadata.name.as_deref(), Some("main-admin"));
        let labels = admin.metadata.labels.clone().unwrap();
        assert_eq!(labels[COMPONENT_LABEL], "compute-admin");
        assert_eq!(labels["neon.timeline_id"], branch.spec.timeline_id.clone().unwrap());
        let spec = admin.spec.unwrap();
        assert_eq!(spec.selector.unwrap()["app"], "main-compute-node");
        assert_eq!(spec.ports.unwrap()[0].port, 3080);

        let postgres = postgres_service(&branch, "main", "default", &project);
        assert_eq!(postgres.metadata.name.as_deref(), Some("main-postgres"));
        assert_eq!(postgres.spec.unwrap().ports.unwrap()[0].port, 55433);
    }
}
