//! Normalization Engine (Component D): an ordered, condition-gated,
//! short-circuiting pipeline that rewrites stream/channel names.
//!
//! Grounded on `spec.md` §4.D; the rule/group CRUD shape mirrors
//! `original_source/backend/routers/normalization.py`.

mod action;
mod condition;

use crate::store::models::{NormalizationRule, NormalizationRuleGroup};
use crate::tags::TagIndex;

/// One step recorded while running the pipeline: which rule fired, and
/// the string before/after its action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformation {
    pub rule_id: i64,
    pub before: String,
    pub after: String,
}

/// Full pipeline result for a single input string.
#[derive(Debug, Clone)]
pub struct NormalizeResult {
    pub original: String,
    pub normalized: String,
    pub transformations: Vec<Transformation>,
    pub rules_applied: Vec<i64>,
}

/// Run every enabled rule, in ascending group priority then ascending
/// rule priority (ties broken by id), against `input`.
pub fn normalize(
    input: &str,
    groups: &[NormalizationRuleGroup],
    rules: &[NormalizationRule],
    tag_index: &TagIndex,
) -> NormalizeResult {
    let mut ordered_groups: Vec<&NormalizationRuleGroup> =
        groups.iter().filter(|g| g.enabled).collect();
    ordered_groups.sort_by_key(|g| (g.priority, g.id));

    let mut working = input.to_string();
    let mut transformations = Vec::new();
    let mut rules_applied = Vec::new();

    'groups: for group in ordered_groups {
        let mut group_rules: Vec<&NormalizationRule> = rules
            .iter()
            .filter(|r| r.group_id == group.id && r.enabled)
            .collect();
        group_rules.sort_by_key(|r| (r.priority, r.id));

        for rule in group_rules {
            let before = working.clone();
            let result = condition::evaluate(rule, &working, tag_index);

            let applied = if result.matched {
                Some((rule.action_type.as_str(), rule.action_value.as_deref()))
            } else if let Some(else_action_type) = rule.else_action_type.as_deref() {
                Some((else_action_type, rule.else_action_value.as_deref()))
            } else {
                None
            };

            let Some((action_type, action_value)) = applied else {
                continue;
            };

            let after = action::apply(action_type, action_value, &before);
            if after != before {
                working = after.clone();
                transformations.push(Transformation {
                    rule_id: rule.id,
                    before,
                    after,
                });
                rules_applied.push(rule.id);

                if rule.stop_processing {
                    break 'groups;
                }
            }
        }
    }

    NormalizeResult {
        original: input.to_string(),
        normalized: working,
        transformations,
        rules_applied,
    }
}

/// Run `normalize` over every input, in order.
pub fn normalize_batch(
    inputs: &[String],
    groups: &[NormalizationRuleGroup],
    rules: &[NormalizationRule],
    tag_index: &TagIndex,
) -> Vec<NormalizeResult> {
    inputs
        .iter()
        .map(|s| normalize(s, groups, rules, tag_index))
        .collect()
}
