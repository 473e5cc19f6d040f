//! Event filter evaluation over arbitrary nested webhook payloads.
//!
//! Filters are configured per trigger as a map of filter-key to expected
//! value. The set of keys a provider/event pair understands is fixed by the
//! catalog below; unknown keys are ignored and an event with no applicable
//! configuration always matches.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::domain::trigger::ProviderType;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchMode {
    Equals,
    Contains,
    In,
}

/// A filter a tenant may configure for a given provider event: where to look
/// in the payload and how to compare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterDef {
    pub key: &'static str,
    pub label: &'static str,
    pub payload_path: &'static str,
    pub match_mode: MatchMode,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterVerdict {
    pub matches: bool,
    pub reason: Option<String>,
}

impl FilterVerdict {
    fn matched() -> Self {
        Self { matches: true, reason: None }
    }

    fn rejected(reason: String) -> Self {
        Self { matches: false, reason: Some(reason) }
    }
}

/// Extracts the value at a dotted path such as `current.stage_id` or
/// `items[0].name`. Traversal through missing keys, nulls, out-of-range
/// indexes, or non-structured nodes yields `None`; absence is a normal
/// outcome here, not an error.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        let (name, index) = parse_segment(segment)?;
        if !name.is_empty() {
            current = current.as_object()?.get(name)?;
        }
        if let Some(index) = index {
            current = current.as_array()?.get(index)?;
        }
        if current.is_null() {
            return None;
        }
    }
    Some(current)
}

fn parse_segment(segment: &str) -> Option<(&str, Option<usize>)> {
    match segment.find('[') {
        None => Some((segment, None)),
        Some(open) => {
            let close = segment.strip_suffix(']')?;
            let index = close[open + 1..].parse::<usize>().ok()?;
            Some((&segment[..open], Some(index)))
        }
    }
}

/// Decides whether a payload satisfies a trigger's configured filters.
/// Evaluation short-circuits on the first failing filter and reports an
/// operator-readable reason naming the filter and the compared values.
pub fn evaluate(
    provider: ProviderType,
    event: &str,
    filters: &BTreeMap<String, Value>,
    payload: &Value,
) -> FilterVerdict {
    if filters.is_empty() {
        return FilterVerdict::matched();
    }

    // No declared schema means there is nothing to filter on: fail open.
    let Some(schema) = catalog::filter_schema(provider, event) else {
        return FilterVerdict::matched();
    };

    for def in schema {
        let Some(expected) = filters.get(def.key) else {
            continue;
        };
        if is_unconstrained(expected) {
            continue;
        }

        let actual = resolve_path(payload, def.payload_path);
        if !compare(def.match_mode, expected, actual) {
            let actual_text = actual.map(stringify).unwrap_or_else(|| "nothing".to_string());
            return FilterVerdict::rejected(format!(
                "{} expected {} but payload had {}",
                def.label,
                render_expected(expected),
                actual_text
            ));
        }
    }

    FilterVerdict::matched()
}

fn is_unconstrained(expected: &Value) -> bool {
    match expected {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn compare(mode: MatchMode, expected: &Value, actual: Option<&Value>) -> bool {
    let Some(actual) = actual else {
        return false;
    };

    match mode {
        MatchMode::Equals | MatchMode::In => match expected {
            Value::Array(candidates) => {
                let actual_text = stringify(actual);
                candidates.iter().any(|candidate| stringify(candidate) == actual_text)
            }
            _ => stringify(expected) == stringify(actual),
        },
        MatchMode::Contains => {
            let needle = stringify(expected);
            match actual {
                Value::Array(items) => items.iter().any(|item| stringify(item).contains(&needle)),
                _ => stringify(actual).contains(&needle),
            }
        }
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn render_expected(expected: &Value) -> String {
    match expected {
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(stringify).collect();
            format!("one of [{}]", rendered.join(", "))
        }
        other => stringify(other),
    }
}

pub mod catalog {
    use super::{FilterDef, MatchMode};
    use crate::domain::trigger::ProviderType;

    const PIPEDRIVE_DEAL_UPDATED: &[FilterDef] = &[
        FilterDef {
            key: "stage_id",
            label: "deal stage",
            payload_path: "current.stage_id",
            match_mode: MatchMode::Equals,
        },
        FilterDef {
            key: "pipeline_id",
            label: "pipeline",
            payload_path: "current.pipeline_id",
            match_mode: MatchMode::Equals,
        },
        FilterDef {
            key: "status",
            label: "deal status",
            payload_path: "current.status",
            match_mode: MatchMode::Equals,
        },
    ];

    const PIPEDRIVE_DEAL_ADDED: &[FilterDef] = &[
        FilterDef {
            key: "pipeline_id",
            label: "pipeline",
            payload_path: "current.pipeline_id",
            match_mode: MatchMode::Equals,
        },
        FilterDef {
            key: "stage_id",
            label: "deal stage",
            payload_path: "current.stage_id",
            match_mode: MatchMode::Equals,
        },
    ];

    const HUBSPOT_DEAL_PROPERTY_CHANGE: &[FilterDef] = &[
        FilterDef {
            key: "property_name",
            label: "changed property",
            payload_path: "propertyName",
            match_mode: MatchMode::Equals,
        },
        FilterDef {
            key: "property_value",
            label: "property value",
            payload_path: "propertyValue",
            match_mode: MatchMode::Equals,
        },
        FilterDef {
            key: "pipeline",
            label: "pipeline",
            payload_path: "properties.pipeline",
            match_mode: MatchMode::Equals,
        },
    ];

    const HUBSPOT_CONTACT_CREATION: &[FilterDef] = &[FilterDef {
        key: "lifecycle_stage",
        label: "lifecycle stage",
        payload_path: "properties.lifecyclestage",
        match_mode: MatchMode::Equals,
    }];

    const CALENDLY_INVITEE_CREATED: &[FilterDef] = &[
        FilterDef {
            key: "event_type",
            label: "event type",
            payload_path: "payload.event_type.name",
            match_mode: MatchMode::Contains,
        },
        FilterDef {
            key: "status",
            label: "invitee status",
            payload_path: "payload.status",
            match_mode: MatchMode::Equals,
        },
    ];

    const WEBHOOK_LEAD_CREATED: &[FilterDef] = &[
        FilterDef {
            key: "pipeline",
            label: "pipeline",
            payload_path: "deal.pipeline",
            match_mode: MatchMode::Equals,
        },
        FilterDef {
            key: "source",
            label: "lead source",
            payload_path: "lead.source",
            match_mode: MatchMode::In,
        },
        FilterDef {
            key: "tags",
            label: "lead tags",
            payload_path: "lead.tags",
            match_mode: MatchMode::Contains,
        },
    ];

    /// The declared filters for a provider event, if any. `None` means the
    /// event carries no filterable fields and always matches.
    pub fn filter_schema(provider: ProviderType, event: &str) -> Option<&'static [FilterDef]> {
        match (provider, event) {
            (ProviderType::Pipedrive, "deal.updated") => Some(PIPEDRIVE_DEAL_UPDATED),
            (ProviderType::Pipedrive, "deal.added") => Some(PIPEDRIVE_DEAL_ADDED),
            (ProviderType::Hubspot, "deal.propertyChange") => Some(HUBSPOT_DEAL_PROPERTY_CHANGE),
            (ProviderType::Hubspot, "contact.creation") => Some(HUBSPOT_CONTACT_CREATION),
            (ProviderType::Calendly, "invitee.created") => Some(CALENDLY_INVITEE_CREATED),
            (ProviderType::Webhook, "lead.created") => Some(WEBHOOK_LEAD_CREATED),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::{json, Value};

    use crate::domain::trigger::ProviderType;

    use super::{evaluate, resolve_path};

    fn filters(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(key, value)| (key.to_string(), value.clone())).collect()
    }

    #[test]
    fn resolves_nested_object_paths() {
        let payload = json!({"current": {"stage_id": 42}});
        assert_eq!(resolve_path(&payload, "current.stage_id"), Some(&json!(42)));
    }

    #[test]
    fn resolves_indexed_array_segments() {
        let payload = json!({"items": [{"name": "first"}, {"name": "second"}]});
        assert_eq!(resolve_path(&payload, "items[1].name"), Some(&json!("second")));
    }

    #[test]
    fn absence_is_a_value_not_an_error() {
        let payload = json!({"a": {"b": null}, "list": [1]});
        assert_eq!(resolve_path(&payload, "a.b"), None);
        assert_eq!(resolve_path(&payload, "a.missing"), None);
        assert_eq!(resolve_path(&payload, "a.b.c"), None);
        assert_eq!(resolve_path(&payload, "list[5]"), None);
        assert_eq!(resolve_path(&payload, "a.b[0]"), None);
    }

    #[test]
    fn empty_filters_always_match() {
        let verdict = evaluate(
            ProviderType::Pipedrive,
            "deal.updated",
            &BTreeMap::new(),
            &json!({"anything": true}),
        );
        assert!(verdict.matches);
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn events_without_a_schema_fail_open() {
        let verdict = evaluate(
            ProviderType::Pipedrive,
            "note.added",
            &filters(&[("stage_id", json!(3))]),
            &json!({}),
        );
        assert!(verdict.matches);
    }

    #[test]
    fn unknown_filter_keys_are_ignored() {
        let verdict = evaluate(
            ProviderType::Pipedrive,
            "deal.updated",
            &filters(&[("made_up_key", json!("x"))]),
            &json!({"current": {"stage_id": 1}}),
        );
        assert!(verdict.matches);
    }

    #[test]
    fn equals_compares_stringified_values() {
        let payload = json!({"current": {"stage_id": 42}});
        let matching = evaluate(
            ProviderType::Pipedrive,
            "deal.updated",
            &filters(&[("stage_id", json!("42"))]),
            &payload,
        );
        assert!(matching.matches, "numeric 42 should equal configured \"42\"");

        let rejected = evaluate(
            ProviderType::Pipedrive,
            "deal.updated",
            &filters(&[("stage_id", json!("7"))]),
            &payload,
        );
        assert!(!rejected.matches);
    }

    #[test]
    fn equals_with_array_expected_is_membership() {
        let payload = json!({"current": {"stage_id": 5}});
        let verdict = evaluate(
            ProviderType::Pipedrive,
            "deal.updated",
            &filters(&[("stage_id", json!(["4", "5", "6"]))]),
            &payload,
        );
        assert!(verdict.matches);
    }

    #[test]
    fn contains_scans_array_elements() {
        let payload = json!({"lead": {"tags": ["vip-buyer", "newsletter"]}});
        let verdict = evaluate(
            ProviderType::Webhook,
            "lead.created",
            &filters(&[("tags", json!("vip"))]),
            &payload,
        );
        assert!(verdict.matches);
    }

    #[test]
    fn pipeline_scenario_matches_and_reports_mismatch() {
        let configured = filters(&[("pipeline", json!("parisien"))]);

        let matching = evaluate(
            ProviderType::Webhook,
            "lead.created",
            &configured,
            &json!({"deal": {"pipeline": "parisien"}}),
        );
        assert!(matching.matches);

        let rejected = evaluate(
            ProviderType::Webhook,
            "lead.created",
            &configured,
            &json!({"deal": {"pipeline": "other"}}),
        );
        assert!(!rejected.matches);
        let reason = rejected.reason.expect("mismatch should carry a reason");
        assert!(reason.contains("parisien"), "reason should name the expected value: {reason}");
        assert!(reason.contains("other"), "reason should name the actual value: {reason}");
    }

    #[test]
    fn absent_payload_field_rejects_with_reason() {
        let verdict = evaluate(
            ProviderType::Webhook,
            "lead.created",
            &filters(&[("pipeline", json!("parisien"))]),
            &json!({"deal": {}}),
        );
        assert!(!verdict.matches);
        assert!(verdict.reason.expect("reason").contains("nothing"));
    }

    #[test]
    fn empty_expected_value_is_no_constraint() {
        let payload = json!({"deal": {"pipeline": "anything"}});
        for unconstrained in [json!(null), json!(""), json!([])] {
            let verdict = evaluate(
                ProviderType::Webhook,
                "lead.created",
                &filters(&[("pipeline", unconstrained)]),
                &payload,
            );
            assert!(verdict.matches);
        }
    }

    #[test]
    fn evaluation_short_circuits_on_first_mismatch() {
        let verdict = evaluate(
            ProviderType::Pipedrive,
            "deal.updated",
            &filters(&[("stage_id", json!(1)), ("status", json!("open"))]),
            &json!({"current": {"stage_id": 2, "status": "open"}}),
        );
        assert!(!verdict.matches);
        assert!(verdict.reason.expect("reason").contains("deal stage"));
    }
}
