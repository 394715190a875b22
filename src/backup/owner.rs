use crate::k8s::types::PodSnapshot;
use std::fmt;

/// Placeholder kind and name for pods without an owner reference
pub const NO_OWNER: &str = "none";

/// Grouping key for pods that share a controller.
///
/// Only the first owner reference counts. Kubernetes allows several owners,
/// but controller-managed pods carry exactly one in practice, and every
/// further reference is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerIdentity {
    pub namespace: String,
    pub kind: String,
    pub name: String,
}

impl OwnerIdentity {
    pub fn resolve(pod: &PodSnapshot) -> Self {
        let (kind, name) = match pod.owner_references.first() {
            Some(owner) => (owner.kind.clone(), owner.name.clone()),
            None => (NO_OWNER.to_string(), NO_OWNER.to_string()),
        };

        Self {
            namespace: pod.namespace.clone(),
            kind,
            name,
        }
    }
}

impl fmt::Display for OwnerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}
