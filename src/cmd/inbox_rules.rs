//! Inbox rules across mailboxes, with forwarding recipients resolved
//!
//! A mailbox whose rules cannot be read is reported as a warning and the
//! remaining mailboxes are still processed.

use crate::cmd::progress::{create_progress_bar, finish_success};
use crate::cmd::{
    OutputArgs, ReportSettings, console, export, load_report_defaults, print_skip_summary,
    target_mailboxes,
};
use crate::error::Result;
use crate::graph::GraphClient;
use crate::graph::mail::{MailUser, MailboxIdentity, MailboxResolver, MessageRule, Recipient, list_inbox_rules};
use crate::report::cache::LookupCache;
use crate::report::filter::{Filter, SkipTally};
use crate::report::{ReportRow, SortKey};
use clap::Args;
use serde::Serialize;

#[derive(Args, Debug)]
pub struct InboxRulesArgs {
    /// Only this mailbox (UPN or SMTP address)
    #[arg(long)]
    pub mailbox: Option<String>,

    /// Only rules that forward, redirect or forward as attachment
    #[arg(long)]
    pub forwarding_only: bool,

    /// Only enabled rules
    #[arg(long)]
    pub enabled_only: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone, Default)]
pub struct InboxRuleOptions {
    pub mailbox: Option<String>,
    pub forwarding_only: bool,
    pub enabled_only: bool,
}

impl From<&InboxRulesArgs> for InboxRuleOptions {
    fn from(args: &InboxRulesArgs) -> Self {
        Self {
            mailbox: args.mailbox.clone(),
            forwarding_only: args.forwarding_only,
            enabled_only: args.enabled_only,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InboxRuleRow {
    pub mailbox: String,
    pub mailbox_display_name: Option<String>,
    pub rule_name: Option<String>,
    pub is_enabled: Option<bool>,
    pub sequence: Option<i32>,
    pub forward_to: String,
    pub redirect_to: String,
    pub forward_as_attachment_to: String,
    pub move_to_folder: Option<String>,
    pub delete_message: bool,
    pub stop_processing_rules: Option<bool>,
    pub external_recipients: bool,
}

impl ReportRow for InboxRuleRow {
    const NAME: &'static str = "InboxRules";
    const COLUMNS: &'static [&'static str] = &[
        "Mailbox",
        "MailboxDisplayName",
        "RuleName",
        "IsEnabled",
        "Sequence",
        "ForwardTo",
        "RedirectTo",
        "ForwardAsAttachmentTo",
        "MoveToFolder",
        "DeleteMessage",
        "StopProcessingRules",
        "ExternalRecipients",
    ];
}

pub fn default_sort() -> Vec<SortKey> {
    vec![SortKey::asc("Mailbox"), SortKey::asc("Sequence")]
}

fn forwards(rule: &MessageRule) -> bool {
    rule.actions.as_ref().is_some_and(|a| {
        [&a.forward_to, &a.redirect_to, &a.forward_as_attachment_to]
            .iter()
            .any(|list| list.iter().any(|r| r.address().is_some()))
    })
}

pub fn rule_filter(opts: &InboxRuleOptions) -> Filter<MessageRule> {
    Filter::new()
        .guard_if(opts.enabled_only, "enabled", |r: &MessageRule| r.is_enabled == Some(true))
        .guard_if(opts.forwarding_only, "forwards", forwards)
}

/// Resolved recipients for each forwarding action of one rule
#[derive(Debug, Clone, Default)]
pub struct RuleRecipients {
    pub forward_to: Vec<MailboxIdentity>,
    pub redirect_to: Vec<MailboxIdentity>,
    pub forward_as_attachment_to: Vec<MailboxIdentity>,
}

impl RuleRecipients {
    fn all(&self) -> impl Iterator<Item = &MailboxIdentity> {
        self.forward_to
            .iter()
            .chain(&self.redirect_to)
            .chain(&self.forward_as_attachment_to)
    }
}

fn join_addresses(identities: &[MailboxIdentity]) -> String {
    identities
        .iter()
        .map(|i| i.primary_smtp.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn shape(mailbox: &MailUser, rule: &MessageRule, recipients: &RuleRecipients) -> InboxRuleRow {
    let actions = rule.actions.as_ref();

    InboxRuleRow {
        mailbox: mailbox.address(),
        mailbox_display_name: mailbox.display_name.clone(),
        rule_name: rule.display_name.clone(),
        is_enabled: rule.is_enabled,
        sequence: rule.sequence,
        forward_to: join_addresses(&recipients.forward_to),
        redirect_to: join_addresses(&recipients.redirect_to),
        forward_as_attachment_to: join_addresses(&recipients.forward_as_attachment_to),
        move_to_folder: actions.and_then(|a| a.move_to_folder.clone()),
        delete_message: actions
            .is_some_and(|a| a.delete == Some(true) || a.permanent_delete == Some(true)),
        stop_processing_rules: actions.and_then(|a| a.stop_processing_rules),
        external_recipients: recipients.all().any(|r| !r.resolved),
    }
}

async fn resolve_list(
    cache: &mut LookupCache<MailboxResolver<'_>>,
    recipients: &[Recipient],
) -> Vec<MailboxIdentity> {
    let mut resolved = Vec::with_capacity(recipients.len());
    for address in recipients.iter().filter_map(Recipient::address) {
        resolved.push(cache.resolve(address).await);
    }
    resolved
}

async fn resolve_recipients(
    cache: &mut LookupCache<MailboxResolver<'_>>,
    rule: &MessageRule,
) -> RuleRecipients {
    let Some(actions) = rule.actions.as_ref() else {
        return RuleRecipients::default();
    };

    RuleRecipients {
        forward_to: resolve_list(cache, &actions.forward_to).await,
        redirect_to: resolve_list(cache, &actions.redirect_to).await,
        forward_as_attachment_to: resolve_list(cache, &actions.forward_as_attachment_to).await,
    }
}

pub async fn generate(
    graph: &GraphClient,
    opts: &InboxRuleOptions,
    settings: &ReportSettings,
) -> Result<Vec<InboxRuleRow>> {
    let mailboxes = target_mailboxes(graph, opts.mailbox.as_deref(), settings.page_size).await?;

    let filter = rule_filter(opts);
    let mut tally = SkipTally::default();
    let mut cache = LookupCache::new(MailboxResolver::new(graph));
    let mut rows = Vec::new();
    let mut total_rules = 0;
    let mut failed = 0;

    let bar = create_progress_bar(mailboxes.len() as u64, "Inbox rules");
    for mailbox in &mailboxes {
        let rules = match list_inbox_rules(graph, &mailbox.id).await {
            Ok(rules) => rules,
            Err(e) => {
                failed += 1;
                bar.suspend(|| {
                    console::warn(format!("Skipping {}: {}", mailbox.address(), e));
                });
                bar.inc(1);
                continue;
            }
        };

        total_rules += rules.len();
        for rule in &rules {
            if let Err(guard) = filter.check(rule) {
                tally.record(guard);
                continue;
            }
            let recipients = resolve_recipients(&mut cache, rule).await;
            rows.push(shape(mailbox, rule, &recipients));
        }
        bar.inc(1);
    }
    finish_success(
        &bar,
        &format!("Read rules from {} mailboxes", mailboxes.len() - failed),
    );

    print_skip_summary(total_rules, &tally);
    tracing::debug!(
        entries = cache.len(),
        fetches = cache.fetch_count(),
        "recipient cache"
    );
    if failed > 0 {
        console::warn(format!("{} mailbox(es) could not be read", failed));
    }

    Ok(rows)
}

pub async fn run(args: InboxRulesArgs) -> Result<()> {
    let opts = InboxRuleOptions::from(&args);
    let settings = ReportSettings::resolve(&args.output, &load_report_defaults()?)?;
    settings.sort_keys::<InboxRuleRow>(default_sort())?;

    console::heading("Inbox rules");
    let (_, _, graph) = crate::cmd::connect(args.output.tenant.as_deref()).await?;

    let mut rows = generate(&graph, &opts, &settings).await?;
    export(&settings, &mut rows, default_sort())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::mail::{EmailAddress, MessageRuleActions};

    fn recipient(address: &str) -> Recipient {
        Recipient {
            email_address: Some(EmailAddress {
                name: None,
                address: Some(address.to_string()),
            }),
        }
    }

    fn identity(address: &str, resolved: bool) -> MailboxIdentity {
        MailboxIdentity {
            display_name: address.to_string(),
            primary_smtp: address.to_string(),
            resolved,
        }
    }

    fn mailbox() -> MailUser {
        MailUser {
            id: "u1".into(),
            display_name: Some("Adele Vance".into()),
            mail: Some("adele@contoso.com".into()),
            ..Default::default()
        }
    }

    fn rule(enabled: bool, forward: &[&str]) -> MessageRule {
        MessageRule {
            id: "r1".into(),
            display_name: Some("Rule".into()),
            sequence: Some(1),
            is_enabled: Some(enabled),
            actions: Some(MessageRuleActions {
                forward_to: forward.iter().map(|a| recipient(a)).collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_forwarding_and_enabled_guards() {
        let opts = InboxRuleOptions {
            forwarding_only: true,
            enabled_only: true,
            ..Default::default()
        };
        let filter = rule_filter(&opts);
        assert!(filter.accepts(&rule(true, &["x@fabrikam.com"])));
        assert_eq!(filter.check(&rule(false, &["x@fabrikam.com"])), Err("enabled"));
        assert_eq!(filter.check(&rule(true, &[])), Err("forwards"));

        let no_actions = MessageRule {
            is_enabled: Some(true),
            ..Default::default()
        };
        assert_eq!(filter.check(&no_actions), Err("forwards"));
    }

    #[test]
    fn test_no_guards_by_default() {
        let filter = rule_filter(&InboxRuleOptions::default());
        assert!(filter.guard_names().is_empty());
        assert!(filter.accepts(&rule(false, &[])));
    }

    #[test]
    fn test_unresolved_recipient_marks_external() {
        let r = rule(true, &["megan@contoso.com", "x@fabrikam.com"]);
        let recipients = RuleRecipients {
            forward_to: vec![
                identity("megan@contoso.com", true),
                identity("x@fabrikam.com", false),
            ],
            ..Default::default()
        };

        let row = shape(&mailbox(), &r, &recipients);
        assert_eq!(row.mailbox, "adele@contoso.com");
        assert_eq!(row.forward_to, "megan@contoso.com; x@fabrikam.com");
        assert_eq!(row.redirect_to, "");
        assert!(row.external_recipients);
        assert!(!row.delete_message);
    }

    #[test]
    fn test_internal_only_forwarding() {
        let r = rule(true, &["megan@contoso.com"]);
        let recipients = RuleRecipients {
            forward_to: vec![identity("megan@contoso.com", true)],
            ..Default::default()
        };
        let row = shape(&mailbox(), &r, &recipients);
        assert!(!row.external_recipients);
        assert_eq!(row, shape(&mailbox(), &r, &recipients));
    }
}
