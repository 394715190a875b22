use std::collections::BTreeMap;

pub const DEFAULT_BACKUP_ANNOTATION: &str = "backup.velero.io/backup-volumes";
pub const DEFAULT_EXCLUDE_ANNOTATION: &str = "backup.velero.io/backup-volumes-excludes";

/// PVC-level opt-out, honoured only when the value is exactly `"true"`
pub const PVC_EXCLUDED_ANNOTATION: &str = "backup.velero.io/backup-excluded";

/// Pod annotation keys listing backed up and excluded volumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationKeys {
    pub backup: String,
    pub exclude: String,
}

impl Default for AnnotationKeys {
    fn default() -> Self {
        Self {
            backup: DEFAULT_BACKUP_ANNOTATION.to_string(),
            exclude: DEFAULT_EXCLUDE_ANNOTATION.to_string(),
        }
    }
}

impl AnnotationKeys {
    pub fn backed_up<'a>(&self, annotations: &'a BTreeMap<String, String>) -> Vec<&'a str> {
        volume_list(annotations, &self.backup)
    }

    pub fn excluded<'a>(&self, annotations: &'a BTreeMap<String, String>) -> Vec<&'a str> {
        volume_list(annotations, &self.exclude)
    }
}

/// Volume names listed under `key`, empty when the annotation is absent
pub fn volume_list<'a>(annotations: &'a BTreeMap<String, String>, key: &str) -> Vec<&'a str> {
    annotations
        .get(key)
        .map(|value| parse_volume_list(value))
        .unwrap_or_default()
}

/// Split an annotation value into volume names.
///
/// Commas and whitespace both separate names, empty tokens are dropped.
pub fn parse_volume_list(value: &str) -> Vec<&str> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .collect()
}
