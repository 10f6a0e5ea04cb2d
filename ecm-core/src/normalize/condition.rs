//! Condition evaluation for the Normalization Engine (`spec.md` §4.D).

use crate::regex_util;
use crate::store::models::{ConditionClause, ConditionLogic, NormalizationRule, TagMatchPosition};
use crate::tags::TagIndex;

/// Outcome of evaluating a rule's condition against an input string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub matched: bool,
}

/// Evaluate `rule`'s condition(s) against `input`. `conditions` is
/// authoritative when non-empty; otherwise the legacy single
/// `condition_type`/`condition_value` pair applies.
pub fn evaluate(rule: &NormalizationRule, input: &str, tag_index: &TagIndex) -> MatchResult {
    if !rule.conditions.is_empty() {
        let results: Vec<bool> = rule
            .conditions
            .iter()
            .map(|clause| evaluate_clause(clause, input, rule, tag_index))
            .collect();
        let matched = match rule.condition_logic {
            ConditionLogic::And => results.iter().all(|m| *m),
            ConditionLogic::Or => results.iter().any(|m| *m),
        };
        return MatchResult { matched };
    }

    let Some(condition_type) = rule.condition_type.as_deref() else {
        return MatchResult { matched: false };
    };
    let matched = evaluate_single(
        condition_type,
        rule.condition_value.as_deref(),
        input,
        rule.case_sensitive,
        rule.tag_group_id,
        rule.tag_match_position,
        tag_index,
    );
    MatchResult { matched }
}

fn evaluate_clause(
    clause: &ConditionClause,
    input: &str,
    rule: &NormalizationRule,
    tag_index: &TagIndex,
) -> bool {
    let case_sensitive = clause.case_sensitive.unwrap_or(rule.case_sensitive);
    let raw = evaluate_single(
        &clause.condition_type,
        clause.value.as_deref(),
        input,
        case_sensitive,
        rule.tag_group_id,
        rule.tag_match_position,
        tag_index,
    );
    if clause.negate {
        !raw
    } else {
        raw
    }
}

#[allow(clippy::too_many_arguments)]
fn evaluate_single(
    condition_type: &str,
    value: Option<&str>,
    input: &str,
    case_sensitive: bool,
    tag_group_id: Option<i64>,
    tag_match_position: Option<TagMatchPosition>,
    tag_index: &TagIndex,
) -> bool {
    match condition_type {
        "always" => true,
        "contains" | "starts_with" | "ends_with" => {
            let Some(value) = value else { return false };
            let (haystack, needle): (std::borrow::Cow<str>, std::borrow::Cow<str>) =
                if case_sensitive {
                    (input.into(), value.into())
                } else {
                    (input.to_lowercase().into(), value.to_lowercase().into())
                };
            match condition_type {
                "contains" => haystack.contains(needle.as_ref()),
                "starts_with" => haystack.starts_with(needle.as_ref()),
                "ends_with" => haystack.ends_with(needle.as_ref()),
                _ => unreachable!(),
            }
        }
        "regex" => {
            let Some(pattern) = value else { return false };
            match regex_util::compile(pattern) {
                Ok(re) => re.is_match(input),
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "invalid regex condition, treating as non-match");
                    false
                }
            }
        }
        "tag_group" => {
            let Some(group_id) = tag_group_id else {
                return false;
            };
            let position = tag_match_position.unwrap_or(TagMatchPosition::Contains);
            tag_index.matches(group_id, input, position)
        }
        other => {
            tracing::warn!(condition_type = other, "unknown condition type, treating as non-match");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::Tag;

    fn base_rule() -> NormalizationRule {
        NormalizationRule {
            id: 1,
            group_id: 1,
            name: "test".into(),
            enabled: true,
            priority: 0,
            condition_type: Some("contains".into()),
            condition_value: Some("HD".into()),
            case_sensitive: false,
            conditions: vec![],
            condition_logic: ConditionLogic::And,
            tag_group_id: None,
            tag_match_position: None,
            action_type: "remove".into(),
            action_value: None,
            else_action_type: None,
            else_action_value: None,
            stop_processing: false,
        }
    }

    #[test]
    fn test_contains_case_insensitive() {
        let rule = base_rule();
        let index = TagIndex::new();
        assert!(evaluate(&rule, "ESPN hd", &index).matched);
    }

    #[test]
    fn test_compound_and_requires_all() {
        let mut rule = base_rule();
        rule.conditions = vec![
            ConditionClause {
                condition_type: "contains".into(),
                value: Some("ESPN".into()),
                negate: false,
                case_sensitive: None,
            },
            ConditionClause {
                condition_type: "contains".into(),
                value: Some("4K".into()),
                negate: false,
                case_sensitive: None,
            },
        ];
        let index = TagIndex::new();
        assert!(!evaluate(&rule, "ESPN HD", &index).matched);
        assert!(evaluate(&rule, "ESPN 4K", &index).matched);
    }

    #[test]
    fn test_compound_or_requires_any() {
        let mut rule = base_rule();
        rule.condition_logic = ConditionLogic::Or;
        rule.conditions = vec![
            ConditionClause {
                condition_type: "contains".into(),
                value: Some("FOX".into()),
                negate: false,
                case_sensitive: None,
            },
            ConditionClause {
                condition_type: "contains".into(),
                value: Some("ESPN".into()),
                negate: false,
                case_sensitive: None,
            },
        ];
        let index = TagIndex::new();
        assert!(evaluate(&rule, "ESPN HD", &index).matched);
    }

    #[test]
    fn test_negate_flips_clause() {
        let mut rule = base_rule();
        rule.conditions = vec![ConditionClause {
            condition_type: "contains".into(),
            value: Some("HD".into()),
            negate: true,
            case_sensitive: None,
        }];
        let index = TagIndex::new();
        assert!(!evaluate(&rule, "ESPN HD", &index).matched);
        assert!(evaluate(&rule, "ESPN SD", &index).matched);
    }

    #[test]
    fn test_invalid_regex_is_non_match() {
        let mut rule = base_rule();
        rule.condition_type = Some("regex".into());
        rule.condition_value = Some("(unclosed".into());
        let index = TagIndex::new();
        assert!(!evaluate(&rule, "ESPN HD", &index).matched);
    }

    #[test]
    fn test_tag_group_condition() {
        let mut rule = base_rule();
        rule.condition_type = Some("tag_group".into());
        rule.condition_value = None;
        rule.tag_group_id = Some(5);
        rule.tag_match_position = Some(TagMatchPosition::Contains);
        let index = TagIndex::new();
        index.rebuild(
            5,
            &[Tag {
                id: 1,
                group_id: 5,
                value: "ESPN".into(),
                case_sensitive: false,
                enabled: true,
            }],
        );
        assert!(evaluate(&rule, "watch ESPN now", &index).matched);
    }

    #[test]
    fn test_unset_condition_type_is_non_match() {
        let mut rule = base_rule();
        rule.condition_type = None;
        let index = TagIndex::new();
        assert!(!evaluate(&rule, "anything", &index).matched);
    }
}
