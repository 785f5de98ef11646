//! Rules used when no rules file is configured.

use serde_json::Value;

use super::rules::{Field, Predicate, ReactionRule, RuleError, RuleSet};

const HOUR: u64 = 60 * 60;

fn payload(path: &str) -> Field {
    Field::Payload(path.split('.').map(str::to_string).collect())
}

pub fn default_rules() -> Result<RuleSet, RuleError> {
    RuleSet::new(vec![
        ReactionRule {
            name: "cultural-review-contact".to_string(),
            priority: 10,
            predicate: Predicate::All {
                of: vec![
                    Predicate::eq(Field::Source, "crm"),
                    Predicate::eq(Field::EntityType, "contact"),
                    Predicate::eq(payload("review_required"), Value::Bool(true)),
                ],
            },
            cooldown_secs: 24 * HOUR,
            template: "Contact {entity_id} needs cultural review before follow-up: {payload.review_reason}"
                .to_string(),
            suggested_actions: vec![
                "Check consent with the community liaison".to_string(),
                "Hold automated outreach for this contact".to_string(),
            ],
        },
        ReactionRule {
            name: "opportunity-won".to_string(),
            priority: 20,
            predicate: Predicate::All {
                of: vec![
                    Predicate::eq(Field::Source, "crm"),
                    Predicate::eq(Field::EntityType, "opportunity"),
                    Predicate::OneOf {
                        field: payload("status"),
                        values: vec![Value::from("won"), Value::from("Won")],
                    },
                ],
            },
            cooldown_secs: 24 * HOUR,
            template: "Opportunity {payload.name} ({entity_id}) was won, value {payload.monetaryValue}"
                .to_string(),
            suggested_actions: vec![
                "Send a thank-you note".to_string(),
                "Raise the invoice in the ledger".to_string(),
            ],
        },
        ReactionRule {
            name: "ledger-invoice-created".to_string(),
            priority: 30,
            predicate: Predicate::All {
                of: vec![
                    Predicate::eq(Field::Source, "ledger"),
                    Predicate::OneOf {
                        field: Field::EntityType,
                        values: vec![Value::from("INVOICE"), Value::from("invoice")],
                    },
                    Predicate::eq(Field::Action, "created"),
                ],
            },
            cooldown_secs: HOUR,
            template: "New invoice {entity_id} recorded in the ledger".to_string(),
            suggested_actions: vec!["Match the invoice to its CRM opportunity".to_string()],
        },
        ReactionRule {
            name: "mailbox-burst".to_string(),
            priority: 40,
            predicate: Predicate::All {
                of: vec![
                    Predicate::eq(Field::Source, "email_push"),
                    Predicate::Gte {
                        field: payload("messages_processed"),
                        value: 10.0,
                    },
                ],
            },
            cooldown_secs: HOUR,
            template: "{entity_id} received {payload.messages_processed} messages in one push"
                .to_string(),
            suggested_actions: vec!["Triage the mailbox".to_string()],
        },
    ])
}
