//! Kubernetes control plane
//!
//! Pods are the unit of scaling and the first container of a pod is the
//! one resized. In-place resizes go through the pod `resize` subresource;
//! controller patches rewrite the owning Deployment, StatefulSet,
//! DaemonSet or bare ReplicaSet pod template.

use super::quantity::{format_cpu, format_memory, parse_cpu, parse_memory};
use super::{
    ContainerResources, ControlPlane, PatchOutcome, ResizeStatus, WorkloadInfo, WorkloadSpec,
};
use crate::error::{Result, ScalerError};
use crate::models::{ControllerRef, ResourceTarget, WorkloadRef};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Container, Pod, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::{debug, info, warn};

const FIELD_MANAGER: &str = "resource-scaler";

/// Control plane backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Walk owner references up to the controller that owns the pod template
    async fn resolve_owner(
        &self,
        namespace: &str,
        owners: &[OwnerReference],
    ) -> Result<Option<ControllerRef>> {
        let Some(owner) = controlling_owner(owners) else {
            return Ok(None);
        };

        match owner.kind.as_str() {
            "ReplicaSet" => {
                let replica_sets: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
                let rs = replica_sets.get(&owner.name).await?;
                let deployment = rs
                    .metadata
                    .owner_references
                    .as_deref()
                    .and_then(controlling_owner)
                    .filter(|o| o.kind == "Deployment");
                Ok(Some(match deployment {
                    Some(d) => ControllerRef {
                        kind: "Deployment".to_string(),
                        namespace: namespace.to_string(),
                        name: d.name.clone(),
                    },
                    None => ControllerRef {
                        kind: "ReplicaSet".to_string(),
                        namespace: namespace.to_string(),
                        name: owner.name.clone(),
                    },
                }))
            }
            "StatefulSet" | "DaemonSet" | "Deployment" => Ok(Some(ControllerRef {
                kind: owner.kind.clone(),
                namespace: namespace.to_string(),
                name: owner.name.clone(),
            })),
            other => {
                debug!(
                    kind = other,
                    name = %owner.name,
                    "Owner kind has no patchable pod template"
                );
                Ok(None)
            }
        }
    }

    async fn patch_template<K>(
        &self,
        controller: &ControllerRef,
        template_of: fn(&K) -> Option<&PodTemplateSpec>,
        target: &ResourceTarget,
    ) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug
            + Send
            + Sync
            + 'static,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &controller.namespace);
        let object = api.get(&controller.name).await?;
        let containers = template_of(&object)
            .and_then(|t| t.spec.as_ref())
            .map(|s| s.containers.as_slice())
            .unwrap_or_default();
        if containers.is_empty() {
            return Err(ScalerError::TransientControlPlane(format!(
                "{} has no containers in its pod template",
                controller
            )));
        }

        let containers = primary_container_patch(containers, target);
        let patch = json!({ "spec": { "template": { "spec": { "containers": containers } } } });
        api.patch(
            &controller.name,
            &patch_params(),
            &Patch::Strategic(&patch),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadInfo>> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default().fields("status.phase=Running"))
            .await?;

        let mut workloads = Vec::with_capacity(pods.items.len());
        for pod in pods.items {
            if pod.metadata.deletion_timestamp.is_some() {
                continue;
            }
            let Some(name) = pod.metadata.name.clone() else {
                continue;
            };
            let owners = pod.metadata.owner_references.clone().unwrap_or_default();
            let controller = match self.resolve_owner(namespace, &owners).await {
                Ok(c) => c.map(|c| c.name),
                Err(e) => {
                    debug!(pod = %name, error = %e, "Failed to resolve controller");
                    None
                }
            };
            workloads.push(WorkloadInfo {
                workload: WorkloadRef::new(namespace, name),
                labels: pod.metadata.labels.clone().unwrap_or_default(),
                controller,
            });
        }
        Ok(workloads)
    }

    async fn get_spec(&self, workload: &WorkloadRef) -> Result<WorkloadSpec> {
        let pod = self
            .pods(&workload.namespace)
            .get_opt(&workload.name)
            .await?
            .ok_or_else(|| ScalerError::WorkloadNotFound(workload.clone()))?;
        Ok(spec_from_pod(&pod))
    }

    async fn patch_in_place(
        &self,
        workload: &WorkloadRef,
        target: &ResourceTarget,
    ) -> Result<PatchOutcome> {
        let pods = self.pods(&workload.namespace);
        let pod = pods.get(&workload.name).await?;
        let containers = pod
            .spec
            .as_ref()
            .map(|s| s.containers.as_slice())
            .unwrap_or_default();

        let patch = json!({
            "spec": { "containers": primary_container_patch(containers, target) }
        });
        match pods
            .patch_subresource(
                "resize",
                &workload.name,
                &patch_params(),
                &Patch::Strategic(&patch),
            )
            .await
        {
            Ok(_) => {
                info!(workload = %workload, "In-place resize accepted");
                Ok(PatchOutcome::Accepted)
            }
            Err(kube::Error::Api(resp)) => classify_resize_rejection(resp.code, &resp.message),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_controller(&self, workload: &WorkloadRef) -> Result<Option<ControllerRef>> {
        let pod = self.pods(&workload.namespace).get(&workload.name).await?;
        let owners = pod.metadata.owner_references.unwrap_or_default();
        self.resolve_owner(&workload.namespace, &owners).await
    }

    async fn patch_controller(
        &self,
        controller: &ControllerRef,
        target: &ResourceTarget,
    ) -> Result<()> {
        match controller.kind.as_str() {
            "Deployment" => {
                self.patch_template::<Deployment>(
                    controller,
                    |d| d.spec.as_ref().map(|s| &s.template),
                    target,
                )
                .await
            }
            "StatefulSet" => {
                self.patch_template::<StatefulSet>(
                    controller,
                    |s| s.spec.as_ref().map(|s| &s.template),
                    target,
                )
                .await
            }
            "DaemonSet" => {
                self.patch_template::<DaemonSet>(
                    controller,
                    |d| d.spec.as_ref().map(|s| &s.template),
                    target,
                )
                .await
            }
            "ReplicaSet" => {
                self.patch_template::<ReplicaSet>(
                    controller,
                    |r| r.spec.as_ref().and_then(|s| s.template.as_ref()),
                    target,
                )
                .await
            }
            other => {
                warn!(kind = other, controller = %controller, "Unsupported controller kind");
                Err(ScalerError::ControllerNotFound(WorkloadRef::new(
                    controller.namespace.clone(),
                    controller.name.clone(),
                )))
            }
        }?;
        info!(controller = %controller, "Controller template patched");
        Ok(())
    }
}

fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

fn controlling_owner(owners: &[OwnerReference]) -> Option<&OwnerReference> {
    owners
        .iter()
        .find(|o| o.controller == Some(true))
        .or_else(|| owners.first())
}

/// Map a rejected resize request onto the scaler's error kinds
pub(crate) fn classify_resize_rejection(code: u16, message: &str) -> Result<PatchOutcome> {
    match code {
        422 => Ok(PatchOutcome::Infeasible(message.to_string())),
        403 if message.to_lowercase().contains("infeasible") => {
            Ok(PatchOutcome::Infeasible(message.to_string()))
        }
        400 | 404 | 405 => Err(ScalerError::CapabilityUnsupported(message.to_string())),
        _ => Err(ScalerError::TransientControlPlane(format!(
            "resize rejected with status {}: {}",
            code, message
        ))),
    }
}

/// Requests and limits with the target merged over what is already declared
fn merged_resources(
    existing: Option<&ResourceRequirements>,
    target: &ResourceTarget,
) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let to_strings = |m: Option<&BTreeMap<String, Quantity>>| {
        m.map(|m| {
            m.iter()
                .map(|(k, v)| (k.clone(), v.0.clone()))
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default()
    };

    let mut requests = to_strings(existing.and_then(|r| r.requests.as_ref()));
    let mut limits = to_strings(existing.and_then(|r| r.limits.as_ref()));

    requests.insert("cpu".to_string(), format_cpu(target.cpu_request_cores));
    requests.insert("memory".to_string(), format_memory(target.memory_request_mb));
    limits.insert("cpu".to_string(), format_cpu(target.cpu_limit_cores));
    limits.insert("memory".to_string(), format_memory(target.memory_limit_mb));
    (requests, limits)
}

/// Strategic-merge entry for the primary container; others are left as they are
fn primary_container_patch(containers: &[Container], target: &ResourceTarget) -> Vec<Value> {
    containers
        .iter()
        .take(1)
        .map(|c| {
            let (requests, limits) = merged_resources(c.resources.as_ref(), target);
            let mut resources = Map::new();
            resources.insert("requests".to_string(), json!(requests));
            resources.insert("limits".to_string(), json!(limits));
            json!({ "name": c.name, "resources": resources })
        })
        .collect()
}

fn spec_from_pod(pod: &Pod) -> WorkloadSpec {
    let status = pod.status.as_ref();
    let phase = status.and_then(|s| s.phase.clone()).unwrap_or_default();
    let statuses = status
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();

    let containers = pod
        .spec
        .as_ref()
        .map(|s| s.containers.as_slice())
        .unwrap_or_default()
        .iter()
        .map(|c| {
            let resources = c.resources.as_ref();
            let quantity = |limits: bool, key: &str| {
                resources
                    .and_then(|r| if limits { r.limits.as_ref() } else { r.requests.as_ref() })
                    .and_then(|m| m.get(key))
                    .map(|q| q.0.clone())
            };
            ContainerResources {
                name: c.name.clone(),
                ready: statuses.iter().any(|s| s.name == c.name && s.ready),
                cpu_request_cores: quantity(false, "cpu").as_deref().and_then(parse_cpu),
                cpu_limit_cores: quantity(true, "cpu").as_deref().and_then(parse_cpu),
                memory_request_mb: quantity(false, "memory").as_deref().and_then(parse_memory),
                memory_limit_mb: quantity(true, "memory").as_deref().and_then(parse_memory),
            }
        })
        .collect();

    // The resize field is read from the serialized status so clusters
    // without the feature simply report no resize in progress.
    let resize_status = status
        .and_then(|s| serde_json::to_value(s).ok())
        .and_then(|v| v.get("resize").and_then(|r| r.as_str()).map(ResizeStatus::parse))
        .unwrap_or_default();

    WorkloadSpec {
        phase,
        containers,
        resize_status,
    }
}
