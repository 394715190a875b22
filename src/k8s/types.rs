use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim, Pod};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Builds the cache key of an object: `namespace/name`, or just `name`
/// for cluster-scoped objects.
pub fn object_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodVolume {
    pub name: String,
    /// Claim name when the volume is backed by a PersistentVolumeClaim.
    pub claim_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSnapshot {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
    pub volumes: Vec<PodVolume>,
    pub owner_references: Vec<OwnerRef>,
}

impl PodSnapshot {
    pub fn key(&self) -> String {
        object_key(Some(&self.namespace), &self.name)
    }
}

impl From<&Pod> for PodSnapshot {
    fn from(pod: &Pod) -> Self {
        let metadata = &pod.metadata;

        let volumes = pod
            .spec
            .as_ref()
            .and_then(|s| s.volumes.as_ref())
            .map(|volumes| {
                volumes
                    .iter()
                    .map(|v| PodVolume {
                        name: v.name.clone(),
                        claim_name: v
                            .persistent_volume_claim
                            .as_ref()
                            .map(|pvc| pvc.claim_name.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let owner_references = metadata
            .owner_references
            .as_ref()
            .map(|owners| {
                owners
                    .iter()
                    .map(|o| OwnerRef {
                        kind: o.kind.clone(),
                        name: o.name.clone(),
                        uid: o.uid.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: metadata.name.clone().unwrap_or_default(),
            namespace: metadata.namespace.clone().unwrap_or_default(),
            annotations: metadata.annotations.clone().unwrap_or_default(),
            volumes,
            owner_references,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvcSnapshot {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
}

impl From<&PersistentVolumeClaim> for PvcSnapshot {
    fn from(pvc: &PersistentVolumeClaim) -> Self {
        let metadata = &pvc.metadata;
        Self {
            name: metadata.name.clone().unwrap_or_default(),
            namespace: metadata.namespace.clone().unwrap_or_default(),
            annotations: metadata.annotations.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSnapshot {
    pub name: String,
}

impl From<&Namespace> for NamespaceSnapshot {
    fn from(ns: &Namespace) -> Self {
        Self {
            name: ns.metadata.name.clone().unwrap_or_default(),
        }
    }
}

/// Last-known state of any watched object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackedObject {
    Pod(PodSnapshot),
    PersistentVolumeClaim(PvcSnapshot),
    Namespace(NamespaceSnapshot),
}

impl TrackedObject {
    pub fn key(&self) -> String {
        match self {
            TrackedObject::Pod(p) => p.key(),
            TrackedObject::PersistentVolumeClaim(p) => object_key(Some(&p.namespace), &p.name),
            TrackedObject::Namespace(n) => object_key(None, &n.name),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TrackedObject::Pod(_) => "Pod",
            TrackedObject::PersistentVolumeClaim(_) => "PersistentVolumeClaim",
            TrackedObject::Namespace(_) => "Namespace",
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            TrackedObject::Pod(p) => Some(&p.namespace),
            TrackedObject::PersistentVolumeClaim(p) => Some(&p.namespace),
            TrackedObject::Namespace(_) => None,
        }
    }
}

impl From<&Pod> for TrackedObject {
    fn from(pod: &Pod) -> Self {
        TrackedObject::Pod(pod.into())
    }
}

impl From<&PersistentVolumeClaim> for TrackedObject {
    fn from(pvc: &PersistentVolumeClaim) -> Self {
        TrackedObject::PersistentVolumeClaim(pvc.into())
    }
}

impl From<&Namespace> for TrackedObject {
    fn from(ns: &Namespace) -> Self {
        TrackedObject::Namespace(ns.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pod_snapshot_from_k8s_pod() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": {
                "name": "web-0",
                "namespace": "ns1",
                "annotations": { "backup.velero.io/backup-volumes": "data" },
                "ownerReferences": [{
                    "apiVersion": "apps/v1",
                    "kind": "StatefulSet",
                    "name": "web",
                    "uid": "uid-web"
                }]
            },
            "spec": {
                "containers": [{ "name": "web", "image": "nginx" }],
                "volumes": [
                    { "name": "data", "persistentVolumeClaim": { "claimName": "web-0-data" } },
                    { "name": "tmp", "emptyDir": {} }
                ]
            }
        }))
        .expect("valid pod");

        let snapshot = PodSnapshot::from(&pod);
        assert_eq!(snapshot.key(), "ns1/web-0");
        assert_eq!(snapshot.volumes.len(), 2);
        assert_eq!(snapshot.volumes[0].claim_name.as_deref(), Some("web-0-data"));
        assert_eq!(snapshot.volumes[1].claim_name, None);
        assert_eq!(snapshot.owner_references[0].kind, "StatefulSet");
        assert_eq!(snapshot.owner_references[0].uid, "uid-web");
    }

    #[test]
    fn test_object_keys() {
        assert_eq!(object_key(Some("default"), "nginx"), "default/nginx");
        assert_eq!(object_key(None, "kube-system"), "kube-system");
        assert_eq!(object_key(Some(""), "orphan"), "orphan");

        let ns = TrackedObject::Namespace(NamespaceSnapshot {
            name: "ns2".to_string(),
        });
        assert_eq!(ns.key(), "ns2");
        assert_eq!(ns.namespace(), None);
        assert_eq!(ns.kind(), "Namespace");
    }
}
