use serde_json::Value;

use super::rules::Field;
use crate::store::IntegrationEvent;

const MISSING: &str = "unknown";

/// Fills `{field}` placeholders from the event. Placeholders that do not name
/// a field are kept verbatim; fields without a value render as `unknown`.
pub fn render(template: &str, event: &IntegrationEvent) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };

        let name = &after[..close];
        match name.parse::<Field>() {
            Ok(field) => out.push_str(&display(field.resolve(event))),
            Err(_) => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

fn display(value: Option<Value>) -> String {
    match value {
        None => MISSING.to_string(),
        Some(Value::String(text)) if text.trim().is_empty() => MISSING.to_string(),
        Some(Value::String(text)) => text,
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}
