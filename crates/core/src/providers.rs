//! Provider-specific knowledge of webhook payload shapes.
//!
//! Each provider mapping is total: it always returns a best-effort
//! `ContactDetails` and never fails, falling back to a set of common
//! top-level keys for shapes it does not recognize.

use serde_json::Value;

use crate::domain::trigger::ProviderType;
use crate::filters::resolve_path;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContactDetails {
    /// Raw phone as found in the payload; normalize before storing.
    pub phone: Option<String>,
    pub name: Option<String>,
    pub external_id: Option<String>,
}

/// Strips a phone number down to its digits. `+33 6 12-34-56-78` and
/// `0612345678` both survive as digit strings; anything else is dropped.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

pub fn extract_contact(provider: ProviderType, payload: &Value) -> ContactDetails {
    let (name_paths, id_paths): (&[&str], &[&str]) = match provider {
        ProviderType::Pipedrive => {
            (&["current.person_name", "current.name", "person.name"], &["current.id", "meta.id"])
        }
        ProviderType::Hubspot => {
            (&["properties.firstname", "contact.name"], &["objectId", "vid"])
        }
        ProviderType::Calendly => (
            &["payload.name", "payload.invitee.name"],
            &["payload.invitee.uuid", "payload.event.uuid"],
        ),
        ProviderType::Webhook => (&[], &[]),
    };

    let name = match provider {
        // HubSpot splits the name over two properties.
        ProviderType::Hubspot => hubspot_full_name(payload)
            .or_else(|| first_string(payload, name_paths))
            .or_else(|| first_string(payload, COMMON_NAME_PATHS)),
        _ => first_string(payload, name_paths)
            .or_else(|| first_string(payload, COMMON_NAME_PATHS)),
    };

    let external_id =
        first_string(payload, id_paths).or_else(|| first_string(payload, COMMON_ID_PATHS));

    let phone = first_string(payload, &["phone"])
        .or_else(|| first_string(payload, &["contact_phone", "phone_number"]));

    ContactDetails { phone, name, external_id }
}

const COMMON_NAME_PATHS: &[&str] = &["name", "full_name", "contact_name"];
const COMMON_ID_PATHS: &[&str] = &["id", "lead_id", "external_id"];

fn hubspot_full_name(payload: &Value) -> Option<String> {
    let first = string_at(payload, "properties.firstname");
    let last = string_at(payload, "properties.lastname");
    match (first, last) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        (Some(only), None) | (None, Some(only)) => Some(only),
        (None, None) => None,
    }
}

fn first_string(payload: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|path| string_at(payload, path))
}

fn string_at(payload: &Value, path: &str) -> Option<String> {
    match resolve_path(payload, path)? {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
