use crate::{BackupMonitorError, Result};
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim, Pod};
use kube::{Api, Client};
use tracing::{debug, info};

/// Read-only cluster access for the watched kinds.
///
/// Credentials are resolved by kube: in-cluster service account first,
/// then the local kubeconfig.
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    pub async fn try_default() -> Result<Self> {
        debug!("Initializing Kubernetes client");

        let client = Client::try_default().await.map_err(|e| {
            BackupMonitorError::KubernetesError(format!("Failed to create K8s client: {}", e))
        })?;

        info!("Successfully connected to Kubernetes cluster");

        Ok(Self { client })
    }

    pub fn pods_all(&self) -> Api<Pod> {
        Api::all(self.client.clone())
    }

    pub fn pvcs_all(&self) -> Api<PersistentVolumeClaim> {
        Api::all(self.client.clone())
    }

    pub fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }
}
