//! The xAPI 1.0.3 data model expressed as schemas.
//!
//! Each function below returns the field list for one [`SchemaKind`]; the
//! registry builds them once and hands out `&'static` references.

use std::sync::OnceLock;

use crate::interaction::INTERACTION_TYPES;
use crate::rules::Rule;
use crate::schema::{DefaultValue, Field, Schema, SchemaKind};

/// Inverse functional identifiers of an Agent or Group.
pub const IDENTIFIERS: &[&str] = &["mbox", "mbox_sha1sum", "openid", "account"];

const OTHER_THAN_MBOX: &[&str] = &["mbox_sha1sum", "openid", "account"];
const OTHER_THAN_SHA1: &[&str] = &["mbox", "openid", "account"];
const OTHER_THAN_OPENID: &[&str] = &["mbox", "mbox_sha1sum", "account"];
const OTHER_THAN_ACCOUNT: &[&str] = &["mbox", "mbox_sha1sum", "openid"];

const GROUP_OTHER_THAN_MBOX: &[&str] = &["mbox_sha1sum", "openid", "account", "member"];
const GROUP_OTHER_THAN_SHA1: &[&str] = &["mbox", "openid", "account", "member"];
const GROUP_OTHER_THAN_OPENID: &[&str] = &["mbox", "mbox_sha1sum", "account", "member"];
const GROUP_OTHER_THAN_ACCOUNT: &[&str] = &["mbox", "mbox_sha1sum", "openid", "member"];

const ACTORS: &[(&str, SchemaKind)] = &[("Agent", SchemaKind::Agent), ("Group", SchemaKind::Group)];

const STATEMENT_OBJECTS: &[(&str, SchemaKind)] = &[
    ("Activity", SchemaKind::Activity),
    ("Agent", SchemaKind::Agent),
    ("Group", SchemaKind::Group),
    ("StatementRef", SchemaKind::StatementRef),
    ("SubStatement", SchemaKind::SubStatement),
];

const SUB_STATEMENT_OBJECTS: &[(&str, SchemaKind)] = &[
    ("Activity", SchemaKind::Activity),
    ("Agent", SchemaKind::Agent),
    ("Group", SchemaKind::Group),
    ("StatementRef", SchemaKind::StatementRef),
];

fn identifier_fields(others: [&'static [&'static str]; 4]) -> Vec<Field> {
    let [mbox, sha1, openid, account] = others;
    vec![
        Field::required_unless("mbox", mbox)
            .check(Rule::Mailto)
            .check(Rule::AtMostOneOf(IDENTIFIERS)),
        Field::required_unless("mbox_sha1sum", sha1)
            .check(Rule::Sha1Hex)
            .check(Rule::AtMostOneOf(IDENTIFIERS)),
        Field::required_unless("openid", openid)
            .check(Rule::Iri)
            .check(Rule::AtMostOneOf(IDENTIFIERS)),
        Field::required_unless("account", account)
            .check(Rule::Object)
            .check(Rule::AtMostOneOf(IDENTIFIERS))
            .nested(SchemaKind::Account),
    ]
}

fn agent() -> Vec<Field> {
    let mut fields = vec![
        Field::optional("objectType").check(Rule::OneOf(&["Agent"])),
        Field::optional("name").check(Rule::String),
    ];
    fields.extend(identifier_fields([
        OTHER_THAN_MBOX,
        OTHER_THAN_SHA1,
        OTHER_THAN_OPENID,
        OTHER_THAN_ACCOUNT,
    ]));
    fields
}

fn group() -> Vec<Field> {
    let mut fields = vec![
        Field::required("objectType").check(Rule::OneOf(&["Group"])),
        Field::optional("name").check(Rule::String),
        Field::optional("member")
            .check(Rule::Array)
            .nested(SchemaKind::Agent),
    ];
    fields.extend(identifier_fields([
        GROUP_OTHER_THAN_MBOX,
        GROUP_OTHER_THAN_SHA1,
        GROUP_OTHER_THAN_OPENID,
        GROUP_OTHER_THAN_ACCOUNT,
    ]));
    fields
}

fn account() -> Vec<Field> {
    vec![
        Field::required("homePage").check(Rule::Iri),
        Field::required("name").check(Rule::String),
    ]
}

fn verb() -> Vec<Field> {
    vec![
        Field::required("id").check(Rule::Iri),
        Field::optional("display").check(Rule::LanguageMap),
    ]
}

fn activity() -> Vec<Field> {
    vec![
        Field::optional("objectType").check(Rule::OneOf(&["Activity"])),
        Field::required("id").check(Rule::Iri),
        Field::optional("definition")
            .check(Rule::Object)
            .nested(SchemaKind::ActivityDefinition),
    ]
}

fn interaction_options(name: &'static str, types: &'static [&'static str]) -> Field {
    Field::optional(name)
        .check(Rule::Array)
        .check(Rule::InteractionTypeIn(types))
        .check(Rule::UniqueIds)
        .nested(SchemaKind::InteractionComponent)
}

fn activity_definition() -> Vec<Field> {
    vec![
        Field::optional("name").check(Rule::LanguageMap),
        Field::optional("description").check(Rule::LanguageMap),
        Field::optional("type").check(Rule::Iri),
        Field::optional("moreInfo").check(Rule::Iri),
        Field::optional("extensions").check(Rule::Extensions),
        Field::optional("interactionType").check(Rule::OneOf(INTERACTION_TYPES)),
        Field::optional("correctResponsesPattern")
            .check(Rule::StringArray)
            .check(Rule::RequiresSibling("interactionType"))
            .advise(Rule::ResponsePatterns),
        interaction_options("choices", &["choice", "sequencing"]),
        interaction_options("scale", &["likert"]),
        interaction_options("source", &["matching"]),
        interaction_options("target", &["matching"]),
        interaction_options("steps", &["performance"]),
    ]
}

fn interaction_component() -> Vec<Field> {
    vec![
        Field::required("id").check(Rule::String),
        Field::optional("description").check(Rule::LanguageMap),
    ]
}

fn statement_ref() -> Vec<Field> {
    vec![
        Field::required("objectType").check(Rule::OneOf(&["StatementRef"])),
        Field::required("id").check(Rule::Uuid),
    ]
}

fn score() -> Vec<Field> {
    vec![
        Field::optional("scaled")
            .check(Rule::Number)
            .check(Rule::Range { min: -1.0, max: 1.0 }),
        Field::optional("raw").check(Rule::Number).check(Rule::BetweenSiblings {
            lower: "min",
            upper: "max",
        }),
        Field::optional("min")
            .check(Rule::Number)
            .check(Rule::LessThanSibling("max")),
        Field::optional("max").check(Rule::Number),
    ]
}

fn result() -> Vec<Field> {
    vec![
        Field::optional("score").check(Rule::Object).nested(SchemaKind::Score),
        Field::optional("success").check(Rule::Boolean),
        Field::optional("completion").check(Rule::Boolean),
        Field::optional("response").check(Rule::String),
        Field::optional("duration").check(Rule::Duration),
        Field::optional("extensions").check(Rule::Extensions),
    ]
}

fn context_activity_list(name: &'static str) -> Field {
    Field::optional(name).nested(SchemaKind::Activity).wrap_single()
}

fn context_activities() -> Vec<Field> {
    vec![
        context_activity_list("parent"),
        context_activity_list("grouping"),
        context_activity_list("category"),
        context_activity_list("other"),
    ]
}

fn context() -> Vec<Field> {
    vec![
        Field::optional("registration").check(Rule::Uuid),
        Field::optional("instructor").by_object_type(SchemaKind::Agent, ACTORS),
        Field::optional("team").nested(SchemaKind::Group),
        Field::optional("contextActivities")
            .check(Rule::Object)
            .nested(SchemaKind::ContextActivities),
        Field::optional("revision").check(Rule::String),
        Field::optional("platform").check(Rule::String),
        Field::optional("language").check(Rule::LanguageTag),
        Field::optional("statement").nested(SchemaKind::StatementRef),
        Field::optional("extensions").check(Rule::Extensions),
    ]
}

fn attachment() -> Vec<Field> {
    vec![
        Field::required("usageType").check(Rule::Iri),
        Field::required("display").check(Rule::LanguageMap),
        Field::optional("description").check(Rule::LanguageMap),
        Field::required("contentType").check(Rule::String),
        Field::required("length").check(Rule::NonNegativeInteger),
        Field::required("sha2").check(Rule::String),
        Field::optional("fileUrl").check(Rule::Iri),
    ]
}

fn statement() -> Vec<Field> {
    vec![
        Field::optional("id")
            .check(Rule::Uuid)
            .default_to(DefaultValue::Uuid),
        Field::required("actor").by_object_type(SchemaKind::Agent, ACTORS),
        Field::required("verb").nested(SchemaKind::Verb),
        Field::required("object").by_object_type(SchemaKind::Activity, STATEMENT_OBJECTS),
        Field::optional("result").check(Rule::Object).nested(SchemaKind::Result),
        Field::optional("context")
            .check(Rule::Object)
            .check(Rule::ActivityOnlyContext)
            .nested(SchemaKind::Context),
        Field::optional("timestamp").check(Rule::Timestamp),
        Field::optional("stored").check(Rule::Timestamp),
        Field::optional("authority").by_object_type(SchemaKind::Agent, ACTORS),
        Field::optional("version")
            .check(Rule::Version)
            .default_to(DefaultValue::Version),
        Field::optional("attachments")
            .check(Rule::Array)
            .nested(SchemaKind::Attachment),
    ]
}

fn sub_statement() -> Vec<Field> {
    vec![
        Field::required("objectType").check(Rule::OneOf(&["SubStatement"])),
        Field::optional("id").check(Rule::Forbidden),
        Field::required("actor").by_object_type(SchemaKind::Agent, ACTORS),
        Field::required("verb").nested(SchemaKind::Verb),
        Field::required("object")
            .check(Rule::NotObjectType("SubStatement"))
            .by_object_type(SchemaKind::Activity, SUB_STATEMENT_OBJECTS),
        Field::optional("result").check(Rule::Object).nested(SchemaKind::Result),
        Field::optional("context")
            .check(Rule::Object)
            .check(Rule::ActivityOnlyContext)
            .nested(SchemaKind::Context),
        Field::optional("timestamp").check(Rule::Timestamp),
        Field::optional("stored").check(Rule::Forbidden),
        Field::optional("authority").check(Rule::Forbidden),
        Field::optional("version").check(Rule::Forbidden),
        Field::optional("attachments")
            .check(Rule::Array)
            .nested(SchemaKind::Attachment),
    ]
}

/// Every schema, built once.
pub struct SchemaRegistry {
    statement: Schema,
    sub_statement: Schema,
    agent: Schema,
    group: Schema,
    account: Schema,
    verb: Schema,
    activity: Schema,
    activity_definition: Schema,
    interaction_component: Schema,
    statement_ref: Schema,
    result: Schema,
    score: Schema,
    context: Schema,
    context_activities: Schema,
    attachment: Schema,
}

impl SchemaRegistry {
    fn build() -> Self {
        use SchemaKind as K;
        Self {
            statement: Schema::new(K::Statement, statement()),
            sub_statement: Schema::new(K::SubStatement, sub_statement()),
            agent: Schema::new(K::Agent, agent()),
            group: Schema::new(K::Group, group()),
            account: Schema::new(K::Account, account()),
            verb: Schema::new(K::Verb, verb()),
            activity: Schema::new(K::Activity, activity()),
            activity_definition: Schema::new(K::ActivityDefinition, activity_definition()),
            interaction_component: Schema::new(K::InteractionComponent, interaction_component()),
            statement_ref: Schema::new(K::StatementRef, statement_ref()),
            result: Schema::new(K::Result, result()),
            score: Schema::new(K::Score, score()),
            context: Schema::new(K::Context, context()),
            context_activities: Schema::new(K::ContextActivities, context_activities()),
            attachment: Schema::new(K::Attachment, attachment()),
        }
    }

    /// The schema for `kind`.
    pub fn get(&self, kind: SchemaKind) -> &Schema {
        match kind {
            SchemaKind::Statement => &self.statement,
            SchemaKind::SubStatement => &self.sub_statement,
            SchemaKind::Agent => &self.agent,
            SchemaKind::Group => &self.group,
            SchemaKind::Account => &self.account,
            SchemaKind::Verb => &self.verb,
            SchemaKind::Activity => &self.activity,
            SchemaKind::ActivityDefinition => &self.activity_definition,
            SchemaKind::InteractionComponent => &self.interaction_component,
            SchemaKind::StatementRef => &self.statement_ref,
            SchemaKind::Result => &self.result,
            SchemaKind::Score => &self.score,
            SchemaKind::Context => &self.context,
            SchemaKind::ContextActivities => &self.context_activities,
            SchemaKind::Attachment => &self.attachment,
        }
    }
}

/// The process-wide schema registry.
pub fn registry() -> &'static SchemaRegistry {
    static REGISTRY: OnceLock<SchemaRegistry> = OnceLock::new();
    REGISTRY.get_or_init(SchemaRegistry::build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_kind_is_registered() {
        let kinds = [
            SchemaKind::Statement,
            SchemaKind::SubStatement,
            SchemaKind::Agent,
            SchemaKind::Group,
            SchemaKind::Account,
            SchemaKind::Verb,
            SchemaKind::Activity,
            SchemaKind::ActivityDefinition,
            SchemaKind::InteractionComponent,
            SchemaKind::StatementRef,
            SchemaKind::Result,
            SchemaKind::Score,
            SchemaKind::Context,
            SchemaKind::ContextActivities,
            SchemaKind::Attachment,
        ];
        for kind in kinds {
            assert_eq!(registry().get(kind).kind(), kind);
        }
    }

    #[test]
    fn test_group_identifiers_optional_with_members() {
        let anonymous = json!({
            "objectType": "Group",
            "member": [{"mbox": "mailto:a@b.com"}]
        });
        assert!(SchemaKind::Group.clean(anonymous).is_ok());

        let err = SchemaKind::Group
            .clean(json!({"objectType": "Group"}))
            .unwrap_err();
        assert_eq!(err.message(), "mbox is required");
    }

    #[test]
    fn test_account_is_nested() {
        let err = SchemaKind::Agent
            .clean(json!({"account": {"homePage": "http://example.com"}}))
            .unwrap_err();
        assert_eq!(err.message(), "in account: name is required");
    }

    #[test]
    fn test_options_require_matching_interaction_type() {
        let err = SchemaKind::ActivityDefinition
            .clean(json!({
                "interactionType": "likert",
                "choices": [{"id": "a"}]
            }))
            .unwrap_err();
        assert!(err.message().starts_with("choices is only valid for interactionType"));
    }

    #[test]
    fn test_context_activities_wrapped() {
        let cleaned = SchemaKind::ContextActivities
            .clean(json!({"parent": {"id": "http://example.com/course"}}))
            .unwrap();
        assert_eq!(cleaned["parent"], json!([{"id": "http://example.com/course"}]));
    }
}
