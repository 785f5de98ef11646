//! Rule predicates: a tagged expression tree over event fields, evaluated by
//! a small interpreter. Rules deserialize from JSON so operators can ship
//! their own rule file.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::IntegrationEvent;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("failed to read rules file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid rules file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid rule set: {0}")]
    Invalid(String),
}

/// An addressable event field: a top-level column or `payload.<dot.path>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Field {
    Source,
    EventType,
    EntityType,
    EntityId,
    Action,
    Payload(Vec<String>),
}

impl Field {
    /// Resolves the field against an event. Array elements are addressed
    /// by numeric path segments.
    pub fn resolve(&self, event: &IntegrationEvent) -> Option<Value> {
        match self {
            Field::Source => Some(Value::String(event.source.as_str().to_string())),
            Field::EventType => Some(Value::String(event.event_type.clone())),
            Field::EntityType => Some(Value::String(event.entity_type.clone())),
            Field::EntityId => Some(Value::String(event.entity_id.clone())),
            Field::Action => Some(Value::String(event.action.as_str().to_string())),
            Field::Payload(path) => {
                let mut current = &event.payload;
                for segment in path {
                    current = match current {
                        Value::Object(map) => map.get(segment)?,
                        Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                        _ => return None,
                    };
                }
                match current {
                    Value::Null => None,
                    value => Some(value.clone()),
                }
            }
        }
    }
}

impl FromStr for Field {
    type Err = RuleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "source" => Ok(Field::Source),
            "event_type" => Ok(Field::EventType),
            "entity_type" => Ok(Field::EntityType),
            "entity_id" => Ok(Field::EntityId),
            "action" => Ok(Field::Action),
            other => {
                let path = other
                    .strip_prefix("payload.")
                    .ok_or_else(|| RuleError::Invalid(format!("unknown field: {other}")))?;
                let segments: Vec<String> = path.split('.').map(str::to_string).collect();
                if segments.iter().any(String::is_empty) {
                    return Err(RuleError::Invalid(format!("empty path segment in {other}")));
                }
                Ok(Field::Payload(segments))
            }
        }
    }
}

impl TryFrom<String> for Field {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Source => f.write_str("source"),
            Field::EventType => f.write_str("event_type"),
            Field::EntityType => f.write_str("entity_type"),
            Field::EntityId => f.write_str("entity_id"),
            Field::Action => f.write_str("action"),
            Field::Payload(path) => write!(f, "payload.{}", path.join(".")),
        }
    }
}

impl From<Field> for String {
    fn from(field: Field) -> Self {
        field.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Always,
    Eq { field: Field, value: Value },
    OneOf { field: Field, values: Vec<Value> },
    Gt { field: Field, value: f64 },
    Gte { field: Field, value: f64 },
    Lt { field: Field, value: f64 },
    Lte { field: Field, value: f64 },
    Exists { field: Field },
    /// Substring match on text, or membership in an array. Case-insensitive.
    Contains { field: Field, value: String },
    All { of: Vec<Predicate> },
    Any { of: Vec<Predicate> },
    Not { predicate: Box<Predicate> },
}

impl Predicate {
    pub fn eq(field: Field, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            field,
            value: value.into(),
        }
    }

    pub fn matches(&self, event: &IntegrationEvent) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Eq { field, value } => field
                .resolve(event)
                .is_some_and(|actual| loosely_equal(&actual, value)),
            Predicate::OneOf { field, values } => field.resolve(event).is_some_and(|actual| {
                values.iter().any(|value| loosely_equal(&actual, value))
            }),
            Predicate::Gt { field, value } => compare(field, event, |actual| actual > *value),
            Predicate::Gte { field, value } => compare(field, event, |actual| actual >= *value),
            Predicate::Lt { field, value } => compare(field, event, |actual| actual < *value),
            Predicate::Lte { field, value } => compare(field, event, |actual| actual <= *value),
            Predicate::Exists { field } => field.resolve(event).is_some(),
            Predicate::Contains { field, value } => field
                .resolve(event)
                .is_some_and(|actual| contains(&actual, value)),
            Predicate::All { of } => of.iter().all(|predicate| predicate.matches(event)),
            Predicate::Any { of } => of.iter().any(|predicate| predicate.matches(event)),
            Predicate::Not { predicate } => !predicate.matches(event),
        }
    }
}

fn compare(field: &Field, event: &IntegrationEvent, check: impl Fn(f64) -> bool) -> bool {
    field
        .resolve(event)
        .as_ref()
        .and_then(as_number)
        .is_some_and(check)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// JSON equality, plus numeric strings equal to the numbers they spell.
fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Value::String(_), Value::Number(_)) | (Value::Number(_), Value::String(_)) => {
            matches!((as_number(actual), as_number(expected)), (Some(a), Some(b)) if a == b)
        }
        _ => false,
    }
}

fn contains(actual: &Value, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    match actual {
        Value::String(text) => text.to_lowercase().contains(&needle),
        Value::Array(items) => items.iter().any(|item| match item {
            Value::String(text) => text.to_lowercase() == needle,
            other => other.to_string() == needle,
        }),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionRule {
    pub name: String,
    /// Lower runs first.
    pub priority: i64,
    pub predicate: Predicate,
    /// Per `(rule, entity)` suppression window; zero disables it.
    #[serde(default)]
    pub cooldown_secs: u64,
    pub template: String,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
}

/// Rules in evaluation order. Equal priorities keep their declared order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ReactionRule>,
}

impl RuleSet {
    pub fn new(mut rules: Vec<ReactionRule>) -> Result<Self, RuleError> {
        for (index, rule) in rules.iter().enumerate() {
            if rule.name.trim().is_empty() {
                return Err(RuleError::Invalid(format!("rule #{index} has no name")));
            }
            if rules[..index].iter().any(|other| other.name == rule.name) {
                return Err(RuleError::Invalid(format!("duplicate rule name: {}", rule.name)));
            }
        }
        rules.sort_by_key(|rule| rule.priority);
        Ok(Self { rules })
    }

    pub fn first_match(&self, event: &IntegrationEvent) -> Option<&ReactionRule> {
        self.rules.iter().find(|rule| rule.predicate.matches(event))
    }

    pub fn rules(&self) -> &[ReactionRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RulesFile {
    Wrapped { rules: Vec<ReactionRule> },
    Bare(Vec<ReactionRule>),
}

/// Loads rules from a JSON file: either an array of rules or `{"rules": [...]}`.
pub fn load_rules_file(path: &Path) -> Result<RuleSet, RuleError> {
    let contents = std::fs::read_to_string(path)?;
    let rules = match serde_json::from_str::<RulesFile>(&contents)? {
        RulesFile::Wrapped { rules } | RulesFile::Bare(rules) => rules,
    };
    RuleSet::new(rules)
}
