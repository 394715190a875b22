//! Coverage evaluation
//!
//! Two views of the same rule. Pod-centric: which PVC-backed volumes of a
//! pod are listed in neither the backup nor the exclude annotation.
//! PVC-centric: which claims of a namespace are not reached through such an
//! annotated volume of any pod, and do not opt out on their own.

use crate::backup::annotations::{AnnotationKeys, PVC_EXCLUDED_ANNOTATION};
use crate::k8s::types::{PodSnapshot, PvcSnapshot};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

const STATEFUL_SET_KIND: &str = "StatefulSet";

/// Names of the pod's PVC-backed volumes without backup or exclusion, in
/// declaration order. Volumes of other types are never reported.
pub fn missing_volumes(pod: &PodSnapshot, keys: &AnnotationKeys) -> Vec<String> {
    let backed_up = keys.backed_up(&pod.annotations);
    let excluded = keys.excluded(&pod.annotations);

    let mut missing = Vec::new();
    for volume in &pod.volumes {
        let Some(claim_name) = &volume.claim_name else {
            continue;
        };

        debug!(
            pod = %pod.name,
            volume = %volume.name,
            claim = %claim_name,
            "pod uses persistent volume claim"
        );

        if backed_up.contains(&volume.name.as_str()) {
            debug!(volume = %volume.name, "backup configured");
            continue;
        }
        if excluded.contains(&volume.name.as_str()) {
            debug!(volume = %volume.name, "backup exclusion configured");
            continue;
        }

        debug!(volume = %volume.name, "volume used but not backed up or excluded");
        missing.push(volume.name.clone());
    }

    missing
}

/// A claim nobody has configured a backup decision for
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MissingClaim {
    pub namespace: String,
    pub pvc_name: String,
}

/// Add the claim names the pod handles, through a volume listed in either
/// annotation, to `handled`.
pub fn handled_claims(pod: &PodSnapshot, keys: &AnnotationKeys, handled: &mut BTreeSet<String>) {
    let listed: HashSet<&str> = keys
        .backed_up(&pod.annotations)
        .into_iter()
        .chain(keys.excluded(&pod.annotations))
        .collect();

    for volume in &pod.volumes {
        if let Some(claim_name) = &volume.claim_name {
            if listed.contains(volume.name.as_str()) {
                handled.insert(claim_name.clone());
            }
        }
    }
}

pub fn is_claim_excluded(pvc: &PvcSnapshot) -> bool {
    pvc.annotations
        .get(PVC_EXCLUDED_ANNOTATION)
        .is_some_and(|v| v == "true")
}

/// Claims of `namespace` that are neither handled by a pod nor excluded.
///
/// Pods are expected in a stable order. Once a pod of some owner has been
/// looked at, further pods of the same owner are skipped since they share
/// its template; StatefulSet replicas are the exception because each one
/// mounts its own claim.
pub fn missing_claims(
    namespace: &str,
    pods: &[PodSnapshot],
    pvcs: &[PvcSnapshot],
    keys: &AnnotationKeys,
) -> Vec<MissingClaim> {
    let mut handled = BTreeSet::new();
    let mut known_parents: HashSet<&str> = HashSet::new();

    'pods: for pod in pods {
        for owner in &pod.owner_references {
            if known_parents.contains(owner.uid.as_str()) && owner.kind != STATEFUL_SET_KIND {
                continue 'pods;
            }
            known_parents.insert(owner.uid.as_str());
        }
        handled_claims(pod, keys, &mut handled);
    }

    let mut missing: Vec<MissingClaim> = pvcs
        .iter()
        .filter(|pvc| !is_claim_excluded(pvc))
        .filter(|pvc| !handled.contains(&pvc.name))
        .map(|pvc| MissingClaim {
            namespace: namespace.to_string(),
            pvc_name: pvc.name.clone(),
        })
        .collect();
    missing.sort();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::annotations::{DEFAULT_BACKUP_ANNOTATION, DEFAULT_EXCLUDE_ANNOTATION};
    use crate::k8s::types::{OwnerRef, PodVolume};
    use std::collections::BTreeMap;

    fn pvc_volume(name: &str, claim: &str) -> PodVolume {
        PodVolume {
            name: name.to_string(),
            claim_name: Some(claim.to_string()),
        }
    }

    fn pod(name: &str, annotations: &[(&str, &str)], volumes: Vec<PodVolume>) -> PodSnapshot {
        PodSnapshot {
            name: name.to_string(),
            namespace: "ns1".to_string(),
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            volumes,
            owner_references: vec![],
        }
    }

    fn pvc(name: &str, annotations: &[(&str, &str)]) -> PvcSnapshot {
        PvcSnapshot {
            name: name.to_string(),
            namespace: "ns1".to_string(),
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_missing_volumes_without_annotations() {
        let p = pod("web-0", &[], vec![pvc_volume("data", "web-0-data")]);

        assert_eq!(missing_volumes(&p, &AnnotationKeys::default()), vec!["data"]);
    }

    #[test]
    fn test_missing_volumes_backup_and_exclude() {
        let p = pod(
            "app",
            &[
                (DEFAULT_BACKUP_ANNOTATION, "data, logs"),
                (DEFAULT_EXCLUDE_ANNOTATION, "cache"),
            ],
            vec![
                pvc_volume("data", "app-data"),
                pvc_volume("cache", "app-cache"),
                pvc_volume("scratch", "app-scratch"),
                pvc_volume("logs", "app-logs"),
                pvc_volume("uploads", "app-uploads"),
            ],
        );

        assert_eq!(
            missing_volumes(&p, &AnnotationKeys::default()),
            vec!["scratch", "uploads"]
        );
    }

    #[test]
    fn test_missing_volumes_ignores_non_pvc_volumes() {
        let p = pod(
            "app",
            &[],
            vec![PodVolume {
                name: "tmp".to_string(),
                claim_name: None,
            }],
        );

        assert!(missing_volumes(&p, &AnnotationKeys::default()).is_empty());
    }

    #[test]
    fn test_volume_in_both_lists_is_covered() {
        let p = pod(
            "app",
            &[
                (DEFAULT_BACKUP_ANNOTATION, "data"),
                (DEFAULT_EXCLUDE_ANNOTATION, "data"),
            ],
            vec![pvc_volume("data", "app-data")],
        );

        assert!(missing_volumes(&p, &AnnotationKeys::default()).is_empty());
    }

    #[test]
    fn test_annotation_matches_volume_name_not_claim_name() {
        let p = pod(
            "app",
            &[(DEFAULT_BACKUP_ANNOTATION, "app-data")],
            vec![pvc_volume("data", "app-data")],
        );

        assert_eq!(missing_volumes(&p, &AnnotationKeys::default()), vec!["data"]);
    }

    #[test]
    fn test_missing_claims_through_mounting_pod() {
        let pods = vec![pod(
            "db-0",
            &[(DEFAULT_BACKUP_ANNOTATION, "data")],
            vec![pvc_volume("data", "db-data"), pvc_volume("wal", "db-wal")],
        )];
        let pvcs = vec![pvc("db-data", &[]), pvc("db-wal", &[]), pvc("orphan", &[])];

        let missing = missing_claims("ns1", &pods, &pvcs, &AnnotationKeys::default());
        let names: Vec<&str> = missing.iter().map(|m| m.pvc_name.as_str()).collect();
        assert_eq!(names, vec!["db-wal", "orphan"]);
    }

    #[test]
    fn test_excluded_claim_is_never_missing() {
        let pvcs = vec![
            pvc("logs-pvc", &[("backup.velero.io/backup-excluded", "true")]),
            pvc("other", &[("backup.velero.io/backup-excluded", "yes")]),
        ];

        let missing = missing_claims("ns1", &[], &pvcs, &AnnotationKeys::default());
        assert_eq!(
            missing,
            vec![MissingClaim {
                namespace: "ns1".to_string(),
                pvc_name: "other".to_string(),
            }]
        );
    }

    #[test]
    fn test_missing_claims_skips_sibling_replicas_but_not_statefulsets() {
        let owned = |mut p: PodSnapshot, kind: &str, uid: &str| {
            p.owner_references = vec![OwnerRef {
                kind: kind.to_string(),
                name: "owner".to_string(),
                uid: uid.to_string(),
            }];
            p
        };

        let pods = vec![
            owned(pod("rs-a", &[], vec![pvc_volume("data", "shared")]), "ReplicaSet", "rs"),
            owned(
                pod("rs-b", &[(DEFAULT_BACKUP_ANNOTATION, "data")], vec![pvc_volume("data", "shared")]),
                "ReplicaSet",
                "rs",
            ),
            owned(pod("sts-0", &[], vec![pvc_volume("data", "data-sts-0")]), "StatefulSet", "sts"),
            owned(
                pod("sts-1", &[(DEFAULT_BACKUP_ANNOTATION, "data")], vec![pvc_volume("data", "data-sts-1")]),
                "StatefulSet",
                "sts",
            ),
        ];
        let pvcs = vec![pvc("shared", &[]), pvc("data-sts-0", &[]), pvc("data-sts-1", &[])];

        let missing = missing_claims("ns1", &pods, &pvcs, &AnnotationKeys::default());
        let names: Vec<&str> = missing.iter().map(|m| m.pvc_name.as_str()).collect();
        assert_eq!(names, vec!["data-sts-0", "shared"]);
    }
}
