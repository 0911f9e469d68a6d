//! Variable release manager: resolves the variable snapshot for a release
//! target.

use std::collections::{BTreeMap, HashMap};

use release_state::{ReleaseRecord, ReleaseStore, VariableSetReleaseId, VariableSnapshot};
use tracing::{debug, instrument};

use crate::catalog::Catalog;
use crate::domain::ReleaseTargetContext;
use crate::error::{ReleaseError, Result};
use crate::rules::{
    evaluate, variable_candidates, RejectionReasons, ResourceSelectorFilter, VariableRule,
};

#[derive(Debug, Clone, Default)]
pub struct VariableDecision {
    /// Resolved values, sorted by key. Keys without a surviving candidate
    /// are left out.
    pub values: Vec<VariableSnapshot>,
    pub rejection_reasons: BTreeMap<String, RejectionReasons<String>>,
    /// Set when the values were taken verbatim from a pinned release.
    pub pinned: Option<VariableSetReleaseId>,
}

pub struct VariableManager<'a> {
    catalog: &'a dyn Catalog,
    releases: &'a dyn ReleaseStore,
}

impl<'a> VariableManager<'a> {
    pub fn new(catalog: &'a dyn Catalog, releases: &'a dyn ReleaseStore) -> Self {
        Self { catalog, releases }
    }

    #[instrument(skip_all, fields(release_target_id = %ctx.target.id))]
    pub async fn evaluate(
        &self,
        ctx: &ReleaseTargetContext,
        pin: Option<&ReleaseRecord>,
    ) -> Result<VariableDecision> {
        if let Some(release) = pin {
            let pinned = self
                .releases
                .get_variable_release(&release.variable_release_id)
                .await?
                .ok_or_else(|| {
                    ReleaseError::not_found("variable set release", release.variable_release_id)
                })?;
            return Ok(VariableDecision {
                values: pinned.values,
                rejection_reasons: BTreeMap::new(),
                pinned: Some(pinned.id),
            });
        }

        let variables = self.catalog.variables_for_deployment(&ctx.deployment.id).await?;
        let overrides: HashMap<String, _> = self
            .catalog
            .resource_variables(&ctx.resource.id)
            .await?
            .into_iter()
            .map(|v| (v.key.clone(), v))
            .collect();

        let rules = [VariableRule::ResourceSelector(ResourceSelectorFilter {
            resource: ctx.resource.clone(),
        })];

        let mut decision = VariableDecision::default();
        for variable in &variables {
            let candidates = variable_candidates(variable, overrides.get(&variable.key));
            let result = evaluate(&rules, &candidates);
            match result.chosen {
                Some(chosen) => decision.values.push(VariableSnapshot {
                    key: chosen.key.clone(),
                    value: chosen.value.clone(),
                    sensitive: chosen.sensitive,
                }),
                None => debug!(key = %variable.key, "no value resolved for variable"),
            }
            if !result.rejection_reasons.is_empty() {
                decision
                    .rejection_reasons
                    .insert(variable.key.clone(), result.rejection_reasons);
            }
        }
        decision.values.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(decision)
    }
}
