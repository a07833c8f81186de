//! OpenTofu live state
//!
//! The live snapshot comes from `tofu show -json`, the desired one from a
//! saved plan rendered with `tofu show -json <plan>`.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::errors::{AgentError, ResultExt};
use crate::plugins::opentofu::{locate, OpenTofuPlugin, PLUGIN_NAME};
use crate::reconciler::{reconcile, Attributes, Resource};
use crate::sdk::{
    DeployTarget, GetLivestateInput, HealthStatus, LivestatePlugin, LivestateResponse,
    ResourceState, SyncState,
};

#[derive(Debug, Default, Deserialize)]
struct State {
    #[serde(default)]
    values: Option<Values>,
}

#[derive(Debug, Default, Deserialize)]
struct Plan {
    #[serde(default)]
    planned_values: Option<Values>,

    #[serde(default)]
    resource_changes: Vec<ResourceChange>,
}

#[derive(Debug, Default, Deserialize)]
struct Values {
    #[serde(default)]
    root_module: Module,
}

#[derive(Debug, Default, Deserialize)]
struct Module {
    #[serde(default)]
    resources: Vec<StateResource>,

    #[serde(default)]
    child_modules: Vec<Module>,
}

#[derive(Debug, Deserialize)]
struct StateResource {
    address: String,

    #[serde(default, rename = "type")]
    resource_type: String,

    #[serde(default)]
    name: String,

    #[serde(default)]
    values: Option<Attributes>,
}

#[derive(Debug, Deserialize)]
struct ResourceChange {
    address: String,
    change: ChangeBody,
}

#[derive(Debug, Deserialize)]
struct ChangeBody {
    #[serde(default)]
    actions: Vec<String>,
}

impl Module {
    fn collect<'a>(&'a self, out: &mut Vec<&'a StateResource>) {
        out.extend(self.resources.iter());
        for child in &self.child_modules {
            child.collect(out);
        }
    }
}

fn resources(values: Option<&Values>) -> Vec<&StateResource> {
    let mut out = Vec::new();
    if let Some(values) = values {
        values.root_module.collect(&mut out);
    }
    out
}

fn parse<T: serde::de::DeserializeOwned>(what: &str, json: &str) -> Result<T, AgentError> {
    serde_json::from_str(json)
        .map_err(|e| AgentError::StateFormatError(format!("failed to parse {}: {}", what, e)))
}

/// Actions tofu would take per address; no-ops and reads are not changes
fn pending_actions(plan: &Plan) -> HashMap<&str, Vec<String>> {
    plan.resource_changes
        .iter()
        .filter_map(|change| {
            let actions: Vec<String> = change
                .change
                .actions
                .iter()
                .filter(|a| *a != "no-op" && *a != "read")
                .cloned()
                .collect();
            (!actions.is_empty()).then_some((change.address.as_str(), actions))
        })
        .collect()
}

fn live_snapshot(state: &State) -> Vec<Resource> {
    resources(state.values.as_ref())
        .into_iter()
        .map(|r| Resource::new(r.address.clone(), r.values.clone().unwrap_or_default()))
        .collect()
}

/// Planned resources. Those without pending actions keep their live
/// attributes, since planned values omit what tofu only learns on apply.
fn desired_snapshot(live: &[Resource], plan: &Plan) -> Vec<Resource> {
    let live_index: HashMap<&str, &Resource> =
        live.iter().map(|r| (r.address.as_str(), r)).collect();
    let pending = pending_actions(plan);

    resources(plan.planned_values.as_ref())
        .into_iter()
        .map(|planned| {
            let address = planned.address.as_str();
            match (pending.get(address), live_index.get(address)) {
                (None, Some(current)) => (*current).clone(),
                (actions, _) => {
                    let mut resource =
                        Resource::new(address, planned.values.clone().unwrap_or_default());
                    resource.actions = actions.cloned().unwrap_or_default();
                    resource
                }
            }
        })
        .collect()
}

fn resource_states(state: &State, plan: &Plan) -> Vec<ResourceState> {
    let pending = pending_actions(plan);
    resources(state.values.as_ref())
        .into_iter()
        .map(|r| {
            let (health_status, health_description) = match pending.get(r.address.as_str()) {
                Some(actions) => (
                    HealthStatus::Degraded,
                    format!("Resource will be {}", actions.join(", ")),
                ),
                None => (HealthStatus::Healthy, String::new()),
            };
            let values = serde_json::Value::Object(r.values.clone().unwrap_or_default());
            ResourceState {
                id: r.address.clone(),
                name: if r.name.is_empty() { r.address.clone() } else { r.name.clone() },
                resource_type: r.resource_type.clone(),
                health_status,
                health_description,
                metadata: BTreeMap::from([("values".to_string(), values.to_string())]),
            }
        })
        .collect()
}

#[async_trait]
impl LivestatePlugin for OpenTofuPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn get_livestate(
        &self,
        deploy_targets: &[DeployTarget],
        input: GetLivestateInput,
    ) -> Result<LivestateResponse, AgentError> {
        if deploy_targets.len() != 1 {
            return Err(AgentError::ConfigError(format!(
                "only 1 deploy target is allowed but got {}",
                deploy_targets.len()
            )));
        }

        let workdir = locate(&input.source)
            .await
            .context("validate livestate preconditions")?;
        let version = self.tool_version(&workdir.spec, deploy_targets)?;
        let tofu = self.tofu(&input.client, &version).await?;
        tofu.init(&workdir.dir, &workdir.env, &input.cancel).await?;

        let state_json = tofu
            .show_json(&workdir.dir, &workdir.env, None, &input.cancel)
            .await?;
        let state: State = parse("live state", &state_json)?;

        let scratch = input.client.scratch("opentofu-livestate").await?;
        let plan_file = scratch.file("tfplan");
        let plan_json = async {
            tofu.plan(&workdir.dir, &workdir.env, plan_file.path(), &input.cancel)
                .await?;
            tofu.show_json(&workdir.dir, &workdir.env, Some(plan_file.path()), &input.cancel)
                .await
        }
        .await;
        if let Err(e) = scratch.delete().await {
            warn!("Failed to remove {}: {}", scratch.path().display(), e);
        }
        let plan: Plan = parse("plan", &plan_json?)?;

        let live = live_snapshot(&state);
        let desired = desired_snapshot(&live, &plan);
        let verdict = reconcile(&live, &desired);

        Ok(LivestateResponse {
            resources: resource_states(&state, &plan),
            health_status: HealthStatus::Unknown,
            sync_state: SyncState {
                reason: verdict.reason(),
                status: verdict.status,
                short_reason: verdict.short_reason,
            },
        })
    }
}
