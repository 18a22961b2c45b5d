/// Wires a custom resource and its status type into the status synchronizer.
macro_rules! impl_status {
    ($resource:ty, $status:ty) => {
        impl $crate::util::status::StatusAccessor for $status {
            fn conditions(&self) -> &[k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition] {
                &self.conditions
            }

            fn set_conditions(
                &mut self,
                conditions: Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition>,
            ) {
                self.conditions = conditions;
            }

            fn phase(&self) -> &str {
                self.phase.as_deref().unwrap_or_default()
            }

            fn set_phase(&mut self, phase: &str) {
                self.phase = Some(phase.to_string());
            }
        }

        impl $crate::util::status::HasStatus for $resource {
            type Status = $status;

            fn status(&self) -> Option<&$status> {
                self.status.as_ref()
            }

            fn status_mut(&mut self) -> &mut Option<$status> {
                &mut self.status
            }
        }
    };
}

pub mod v1;
pub mod v1alpha1;

