use std::collections::HashMap;

use crate::models::{Candidate, ModelMapping, Provider, ProviderBinding, RuleContext};
use crate::rules::evaluate_ruleset;

/// Produce the ordered candidate list for a requested model.
///
/// Returning an empty list is a service-level failure (`no_available_provider`);
/// it is signalled, not treated as an error here.
pub fn select(
    mapping: &ModelMapping,
    bindings: &[ProviderBinding],
    providers: &HashMap<i64, Provider>,
    ctx: &RuleContext,
) -> Vec<Candidate> {
    if !evaluate_ruleset(mapping.matching_rules.as_ref(), ctx) {
        return Vec::new();
    }

    let mut candidates: Vec<Candidate> = bindings
        .iter()
        .filter(|b| b.active)
        .filter_map(|b| {
            let provider = providers.get(&b.provider_id)?;
            if !provider.active {
                return None;
            }
            if !evaluate_ruleset(b.provider_rules.as_ref(), ctx) {
                return None;
            }
            Some(Candidate {
                binding_id: b.id,
                provider_id: provider.id,
                provider_name: provider.name.clone(),
                base_url: provider.base_url.clone(),
                protocol: provider.protocol,
                api_key: provider.api_key.clone(),
                target_model: b.target_model.clone(),
                priority: b.priority,
                weight: b.weight,
            })
        })
        .collect();

    candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.binding_id.cmp(&b.binding_id)));
    candidates
}
