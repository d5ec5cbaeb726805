//! Ticket lookups against third-party HTTP services.

use super::traits::{Action, ActionContext, ActionError, ActionSpec, Invocation};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

static JIRA: ActionSpec = ActionSpec {
    name: "jira",
    help: "display info about a jira ticket",
    how: "the Jira REST API, /rest/api/2/issue/<ticket>",
    usage: "!jira <ticket>",
    aliases: &[],
};

static CM: ActionSpec = ActionSpec {
    name: "cm",
    help: "link to a change management ticket",
    how: "the configured cm_url",
    usage: "!cm <number>",
    aliases: &["cmr"],
};

static SN: ActionSpec = ActionSpec {
    name: "sn",
    help: "link to an incident",
    how: "the configured sn_url",
    usage: "!sn <number>",
    aliases: &["inc"],
};

#[derive(Debug, Deserialize)]
struct JiraIssue {
    fields: Option<JiraFields>,
    #[serde(default, rename = "errorMessages")]
    error_messages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JiraFields {
    #[serde(default)]
    summary: String,
    status: Option<JiraNamed>,
    #[serde(default)]
    created: String,
    resolutiondate: Option<String>,
    assignee: Option<JiraUser>,
    reporter: Option<JiraUser>,
}

#[derive(Debug, Deserialize)]
struct JiraNamed {
    name: String,
}

#[derive(Debug, Deserialize)]
struct JiraUser {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    name: Option<String>,
}

impl JiraUser {
    fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("unknown")
    }
}

fn format_issue(base: &str, ticket: &str, fields: &JiraFields) -> String {
    let mut out = format!("```Summary : {}\n", fields.summary);
    let status = fields.status.as_ref().map_or("unknown", |s| s.name.as_str());
    out.push_str(&format!("Status  : {status}\n"));
    out.push_str(&format!("Created : {}\n", fields.created));
    if let Some(resolved) = &fields.resolutiondate {
        out.push_str(&format!("Resolved: {resolved}\n"));
    }
    if let Some(assignee) = &fields.assignee {
        out.push_str(&format!("Assignee: {}\n", assignee.label()));
    }
    let reporter = fields.reporter.as_ref().map_or("unknown", JiraUser::label);
    out.push_str(&format!("Reporter: {reporter}```\n"));
    out.push_str(&format!("{base}/browse/{ticket}"));
    out
}

pub struct JiraAction;

#[async_trait]
impl Action for JiraAction {
    fn spec(&self) -> &'static ActionSpec {
        &JIRA
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let Some(ticket) = inv.args.split_whitespace().next() else {
            return Err(ActionError::usage(&JIRA));
        };
        let ticket = ticket.to_uppercase();
        let base = ctx
            .config
            .jira_url
            .as_deref()
            .ok_or(ActionError::NotConfigured("jira_url"))?
            .trim_end_matches('/');

        let mut request = ctx
            .http
            .get(format!("{base}/rest/api/2/issue/{ticket}"))
            .timeout(Duration::from_secs(ctx.config.http_timeout_secs.max(1)));
        if let Some(user) = ctx.config.jira_user.as_deref() {
            request = request.basic_auth(user, ctx.config.jira_password.as_deref());
        }

        let issue: JiraIssue = request.send().await?.json().await?;
        match issue.fields {
            Some(fields) => Ok(format_issue(base, &ticket, &fields)),
            None => Ok(match issue.error_messages.first() {
                Some(message) => format!("Unable to fetch data for {ticket}: {message}"),
                None => format!("No data found for ticket {ticket}"),
            }),
        }
    }
}

/// Fill `{id}` in a configured URL template.
fn ticket_url(template: &str, id: &str) -> String {
    if template.contains("{id}") {
        template.replace("{id}", id)
    } else {
        format!("{template}{id}")
    }
}

fn numeric_id<'a>(args: &'a str, spec: &ActionSpec) -> Result<&'a str, ActionError> {
    let words: Vec<&str> = args.split_whitespace().collect();
    match words.as_slice() {
        [id] if id.chars().all(|c| c.is_ascii_digit()) => Ok(id),
        _ => Err(ActionError::usage(spec)),
    }
}

pub struct CmAction;

#[async_trait]
impl Action for CmAction {
    fn spec(&self) -> &'static ActionSpec {
        &CM
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let id = numeric_id(inv.args, &CM)?;
        let template = ctx
            .config
            .cm_url
            .as_deref()
            .ok_or(ActionError::NotConfigured("cm_url"))?;
        Ok(format!("CMR{id}: {}", ticket_url(template, id)))
    }
}

pub struct SnAction;

#[async_trait]
impl Action for SnAction {
    fn spec(&self) -> &'static ActionSpec {
        &SN
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let id = numeric_id(inv.args, &SN)?;
        let template = ctx
            .config
            .sn_url
            .as_deref()
            .ok_or(ActionError::NotConfigured("sn_url"))?;
        Ok(format!("INC{id}: {}", ticket_url(template, id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::Harness;

    #[test]
    fn issue_formatting_includes_optional_fields() {
        let issue: JiraIssue = serde_json::from_str(
            r#"{"fields": {
                "summary": "Disk full",
                "status": {"name": "Open"},
                "created": "2024-03-01T09:00:00.000+0000",
                "resolutiondate": null,
                "assignee": {"displayName": "Bob", "name": "bob"},
                "reporter": {"name": "alice"}
            }}"#,
        )
        .unwrap();
        let text = format_issue("https://jira.example.com", "OPS-1", &issue.fields.unwrap());
        assert_eq!(
            text,
            "```Summary : Disk full\nStatus  : Open\nCreated : 2024-03-01T09:00:00.000+0000\n\
             Assignee: Bob\nReporter: alice```\nhttps://jira.example.com/browse/OPS-1"
        );
    }

    #[test]
    fn error_payload_parses() {
        let issue: JiraIssue =
            serde_json::from_str(r#"{"errorMessages": ["Issue does not exist"]}"#).unwrap();
        assert!(issue.fields.is_none());
        assert_eq!(issue.error_messages, vec!["Issue does not exist"]);
    }

    #[tokio::test]
    async fn cm_and_sn_build_links() {
        let mut h = Harness::new();
        h.config.cm_url = Some("https://cm.example.com/change/{id}".into());
        h.config.sn_url = Some("https://sn.example.com/incident?number=INC".into());
        assert_eq!(
            h.run(&CmAction, "42").await.unwrap(),
            "CMR42: https://cm.example.com/change/42"
        );
        assert_eq!(
            h.run(&SnAction, "0099").await.unwrap(),
            "INC0099: https://sn.example.com/incident?number=INC0099"
        );
        assert!(matches!(
            h.run(&CmAction, "abc").await,
            Err(ActionError::Usage(_))
        ));
    }

    #[tokio::test]
    async fn unconfigured_lookups_say_so() {
        let h = Harness::new();
        assert!(matches!(
            h.run(&JiraAction, "OPS-1").await,
            Err(ActionError::NotConfigured("jira_url"))
        ));
        assert!(matches!(
            h.run(&SnAction, "1").await,
            Err(ActionError::NotConfigured("sn_url"))
        ));
        assert!(matches!(
            h.run(&JiraAction, "").await,
            Err(ActionError::Usage(_))
        ));
    }
}
