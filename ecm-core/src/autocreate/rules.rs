//! Condition matching and action resolution for the Auto-Creation
//! Pipeline (`spec.md` §4.F). A rule matches a stream when every one of
//! its conditions matches (`AutoCreationRule.conditions` carries no
//! logic operator of its own, unlike the Normalization Engine's
//! compound conditions — so conjunction is the only sensible default).

use crate::regex_util;
use crate::store::models::{AutoCreationAction, AutoCreationCondition, AutoCreationRule};
use crate::tags::TagIndex;
use crate::upstream::Stream;

/// One step of the plan a rule resolves to for a single stream. The
/// plan is applied, not upstream state directly, so conflicts can be
/// detected before anything is created.
#[derive(Debug, Clone)]
pub enum PlanEntry {
    CreateGroup {
        name: String,
    },
    CreateChannel {
        channel_key: String,
        name: String,
        group_name: Option<String>,
        stream_id: i64,
    },
    AttachToExisting {
        channel_key: String,
        stream_id: i64,
    },
    SetChannelNumber {
        channel_key: String,
        number: f64,
    },
    Skip {
        stream_id: i64,
    },
}

/// Whether `rule`'s conditions all match `stream`.
pub fn matches(rule: &AutoCreationRule, stream: &Stream, tag_index: &TagIndex) -> bool {
    rule.conditions
        .iter()
        .all(|condition| matches_condition(condition, stream, tag_index))
}

fn matches_condition(condition: &AutoCreationCondition, stream: &Stream, tag_index: &TagIndex) -> bool {
    match condition {
        AutoCreationCondition::StreamNameContains {
            value,
            case_sensitive,
        } => {
            let (haystack, needle): (std::borrow::Cow<str>, std::borrow::Cow<str>) =
                if *case_sensitive {
                    (stream.name.as_str().into(), value.as_str().into())
                } else {
                    (
                        stream.name.to_lowercase().into(),
                        value.to_lowercase().into(),
                    )
                };
            haystack.contains(needle.as_ref())
        }
        AutoCreationCondition::StreamNameRegex { pattern } => match regex_util::compile(pattern) {
            Ok(re) => re.is_match(&stream.name),
            Err(e) => {
                tracing::warn!(pattern, error = %e, "invalid auto-creation regex, treating as non-match");
                false
            }
        },
        AutoCreationCondition::GroupNameEquals { value } => {
            stream.group_name.as_deref() == Some(value.as_str())
        }
        AutoCreationCondition::GroupNameContains {
            value,
            case_sensitive,
        } => {
            let Some(group_name) = stream.group_name.as_deref() else {
                return false;
            };
            if *case_sensitive {
                group_name.contains(value.as_str())
            } else {
                group_name.to_lowercase().contains(&value.to_lowercase())
            }
        }
        AutoCreationCondition::TagGroupMatch {
            tag_group_id,
            position,
        } => tag_index.matches(*tag_group_id, &stream.name, *position),
    }
}

/// Resolve `rule.actions` into plan entries for `stream`, given a
/// `channel_key` derived from the rule's `CreateChannel`/`AttachToExisting`
/// action (actions reference the same logical channel by that key).
pub fn resolve_actions(rule: &AutoCreationRule, stream: &Stream) -> Vec<PlanEntry> {
    let mut entries = Vec::new();
    for action in &rule.actions {
        match action {
            AutoCreationAction::CreateGroup { name } => {
                entries.push(PlanEntry::CreateGroup { name: name.clone() });
            }
            AutoCreationAction::CreateChannel {
                name_template,
                group_name,
            } => {
                let name = render_template(name_template, stream);
                entries.push(PlanEntry::CreateChannel {
                    channel_key: channel_key_for(&name, group_name.as_deref()),
                    name,
                    group_name: group_name.clone(),
                    stream_id: stream.id,
                });
            }
            AutoCreationAction::AttachToExisting { channel_key } => {
                entries.push(PlanEntry::AttachToExisting {
                    channel_key: channel_key.clone(),
                    stream_id: stream.id,
                });
            }
            AutoCreationAction::SetChannelNumber { number } => {
                entries.push(PlanEntry::SetChannelNumber {
                    channel_key: channel_key_for(&stream.name, stream.group_name.as_deref()),
                    number: *number,
                });
            }
            AutoCreationAction::SkipStream => {
                entries.push(PlanEntry::Skip {
                    stream_id: stream.id,
                });
            }
        }
    }
    entries
}

/// `{name}` is replaced with the stream's own name; any other
/// `{...}` token is left verbatim, matching the original's templating.
fn render_template(template: &str, stream: &Stream) -> String {
    template.replace("{name}", &stream.name)
}

/// Channels are keyed by `group_name/name` (case-normalized) so two
/// rules creating "ESPN" in the same group collide, but "ESPN" in
/// different groups don't.
pub fn channel_key_for(name: &str, group_name: Option<&str>) -> String {
    format!(
        "{}/{}",
        group_name.unwrap_or("").to_lowercase(),
        name.to_lowercase()
    )
}
