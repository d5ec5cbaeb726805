//! Commands that shell out to local utilities.
//!
//! Programs are spawned directly (no shell) with discrete arguments, must be
//! on the allow-list, and are killed when they outlive the command timeout.

use super::traits::{Action, ActionContext, ActionError, ActionSpec, Invocation};
use crate::agent::phrases;
use crate::security::SecurityPolicy;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;

static COWSAY: ActionSpec = ActionSpec {
    name: "cowsay",
    help: "moo!",
    how: "the local cowsay(1) binary",
    usage: "!cowsay <something>",
    aliases: &[],
};

static FORTUNE: ActionSpec = ActionSpec {
    name: "fortune",
    help: "print a random, hopefully interesting, adage",
    how: "the local fortune(6) binary, short fortunes only",
    usage: "!fortune",
    aliases: &["motd"],
};

static HOST: ActionSpec = ActionSpec {
    name: "host",
    help: "host lookup",
    how: "the local host(1) binary",
    usage: "!host <host>",
    aliases: &["nslookup"],
};

static PING: ActionSpec = ActionSpec {
    name: "ping",
    help: "try to ping hostname",
    how: "the local ping(8) binary, one probe with a one second deadline",
    usage: "!ping <hostname>",
    aliases: &[],
};

static WHOIS: ActionSpec = ActionSpec {
    name: "whois",
    help: "show whois information",
    how: "the local whois(1) binary, trimmed to the usual registry fields",
    usage: "!whois <domain>",
    aliases: &[],
};

/// What a finished local utility produced.
#[derive(Debug, Clone)]
pub struct ProgramOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run an allow-listed program with a hard wall-clock limit.
pub async fn run_program(
    ctx: &ActionContext<'_>,
    program: &str,
    args: &[&str],
) -> Result<ProgramOutput, ActionError> {
    if !ctx.policy.is_program_allowed(program) {
        return Err(ActionError::NotAllowed(program.to_string()));
    }

    let secs = ctx.config.command_timeout_secs.max(1);
    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(Duration::from_secs(secs), child).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(ActionError::Spawn {
                program: program.to_string(),
                source,
            })
        }
        Err(_) => {
            tracing::warn!("Killed '{program}' after {secs}s");
            return Err(ActionError::Timeout {
                program: program.to_string(),
                secs,
            });
        }
    };

    Ok(ProgramOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// The single host argument of `args`, or a usage error.
fn single_host(args: &str, spec: &ActionSpec) -> Result<String, ActionError> {
    let words: Vec<&str> = args.split_whitespace().collect();
    match words.as_slice() {
        [host] if SecurityPolicy::is_valid_host(host) => Ok((*host).to_string()),
        [host] => Err(ActionError::Usage(format!(
            "That does not look like a hostname: {host}"
        ))),
        _ => Err(ActionError::usage(spec)),
    }
}

pub struct CowsayAction;

#[async_trait]
impl Action for CowsayAction {
    fn spec(&self) -> &'static ActionSpec {
        &COWSAY
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let text = inv.args.trim();
        if text.is_empty() || text.starts_with('-') {
            return Err(ActionError::usage(&COWSAY));
        }
        let out = run_program(ctx, "cowsay", &[text]).await?;
        Ok(format!("```\n{}```\n", out.stdout))
    }
}

pub struct FortuneAction;

#[async_trait]
impl Action for FortuneAction {
    fn spec(&self) -> &'static ActionSpec {
        &FORTUNE
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        if !inv.args.trim().is_empty() {
            return Err(ActionError::usage(&FORTUNE));
        }
        Ok(run_program(ctx, "fortune", &["-s"]).await?.stdout)
    }
}

pub struct HostAction;

#[async_trait]
impl Action for HostAction {
    fn spec(&self) -> &'static ActionSpec {
        &HOST
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let host = single_host(inv.args, &HOST)?;
        let out = run_program(ctx, "host", &[&host]).await?;
        Ok(if out.stdout.trim().is_empty() {
            out.stderr
        } else {
            out.stdout
        })
    }
}

pub struct PingAction;

fn nudge(who: &str, asker: &str) -> String {
    let lines = [
        format!("YO, @{who}, WAKE UP!"),
        format!("@{who}, somebody needs you!"),
        format!("ECHO REQUEST -> @{who}"),
        format!("You there, @{who}?"),
        format!("Hey, @{who}, @{asker} is looking for you."),
        format!("_nudges {who}._"),
        format!("_pokes {who}._"),
    ];
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    phrases::pick(&mut rand::thread_rng(), &refs).to_string()
}

#[async_trait]
impl Action for PingAction {
    fn spec(&self) -> &'static ActionSpec {
        &PING
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let words: Vec<&str> = inv.args.split_whitespace().collect();
        let target = match words.as_slice() {
            [] => return Ok("pong".into()),
            [one] => *one,
            _ => return Err(ActionError::usage(&PING)),
        };
        if ctx.is_bot(target) {
            return Ok("I'm alive!".into());
        }
        if !target.contains('.') && !target.contains(':') {
            return Ok(nudge(target.trim_start_matches('@'), &inv.recipient.mention_name));
        }

        let host = single_host(target, &PING)?;
        let out = run_program(
            ctx,
            "ping",
            &["-q", "-w", "1", "-W", "0.5", "-i", "0.5", "-c", "1", &host],
        )
        .await?;
        Ok(if out.success {
            format!("{host} is alive.")
        } else {
            format!("Unable to ping {host}.")
        })
    }
}

pub struct WhoisAction;

const WHOIS_FIELDS: &[&str] = &[
    "Registrar",
    "Registrar URL",
    "Updated Date",
    "Creation Date",
    "Registry Expiry Date",
    "Registrant Name",
    "Registrant Organization",
    "Registrant Country",
    "Registrant Email",
    "Name Server",
    "DNSSEC",
];

/// Pull the common registry fields out of raw whois output.
///
/// Repeated keys are joined with `, `. Unrecognized formats are returned
/// untouched, minus comment lines.
pub fn summarize_whois(raw: &str) -> String {
    if let Some(line) = raw.lines().find(|l| l.contains("No match for")) {
        return line.trim().to_string();
    }

    let mut fields: Vec<(&str, String)> = Vec::new();
    for line in raw.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if value.is_empty() || !WHOIS_FIELDS.iter().any(|f| f.eq_ignore_ascii_case(key)) {
            continue;
        }
        match fields.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => fields.push((key, value.to_string())),
        }
    }

    if fields.is_empty() {
        return raw
            .lines()
            .filter(|l| !l.starts_with('%') && !l.starts_with('#') && !l.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n");
    }

    WHOIS_FIELDS
        .iter()
        .filter_map(|wanted| {
            fields
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(wanted))
                .map(|(k, v)| format!("{k}: {v}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Action for WhoisAction {
    fn spec(&self) -> &'static ActionSpec {
        &WHOIS
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let domain = single_host(inv.args, &WHOIS)?;
        let out = run_program(ctx, "whois", &[&domain]).await?;
        Ok(summarize_whois(&out.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::Harness;

    #[tokio::test]
    async fn ping_without_host_or_at_bot() {
        let h = Harness::new();
        assert_eq!(h.run(&PingAction, "").await.unwrap(), "pong");
        assert_eq!(h.run(&PingAction, "bot").await.unwrap(), "I'm alive!");
        assert!(matches!(
            h.run(&PingAction, "a b").await,
            Err(ActionError::Usage(_))
        ));
    }

    #[tokio::test]
    async fn ping_bare_word_nudges_user() {
        let h = Harness::new();
        let reply = h.run(&PingAction, "bob").await.unwrap();
        assert!(reply.contains("bob"));
    }

    #[tokio::test]
    async fn disallowed_program_is_refused() {
        let mut h = Harness::new();
        h.policy.allowed_programs.clear();
        assert!(matches!(
            h.run(&FortuneAction, "").await,
            Err(ActionError::NotAllowed(p)) if p == "fortune"
        ));
    }

    #[tokio::test]
    async fn hostile_arguments_are_rejected() {
        let h = Harness::new();
        assert!(matches!(
            h.run(&HostAction, "-v").await,
            Err(ActionError::Usage(_))
        ));
        assert!(matches!(
            h.run(&WhoisAction, "a;rm").await,
            Err(ActionError::Usage(_))
        ));
        assert!(matches!(
            h.run(&CowsayAction, "-f evil").await,
            Err(ActionError::Usage(_))
        ));
    }

    #[tokio::test]
    async fn long_running_program_is_killed() {
        let mut h = Harness::new();
        h.policy.allowed_programs.push("sleep".into());
        h.config.command_timeout_secs = 1;
        let ctx = h.context();
        let err = run_program(&ctx, "sleep", &["5"]).await.unwrap_err();
        assert!(matches!(err, ActionError::Timeout { secs: 1, .. }));
    }

    #[test]
    fn whois_summary_keeps_common_fields() {
        let raw = "% comment\n\
                   Domain Name: EXAMPLE.COM\n\
                   Registrar: Example Registrar, Inc.\n\
                   Creation Date: 1995-08-14T04:00:00Z\n\
                   Name Server: A.IANA-SERVERS.NET\n\
                   Name Server: B.IANA-SERVERS.NET\n";
        assert_eq!(
            summarize_whois(raw),
            "Registrar: Example Registrar, Inc.\n\
             Creation Date: 1995-08-14T04:00:00Z\n\
             Name Server: A.IANA-SERVERS.NET, B.IANA-SERVERS.NET"
        );
        assert_eq!(
            summarize_whois("No match for domain \"NOPE.COM\".\n"),
            "No match for domain \"NOPE.COM\"."
        );
    }
}
