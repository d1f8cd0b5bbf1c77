//! Statement import through an OpenAI-compatible chat-completions endpoint.
//!
//! The model only proposes transactions. Every proposal goes through the
//! regular journal validation and is created as an unposted draft.

use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerbook_core::{CreateJournalCommand, JournalDetail, LineCommand};

use crate::{api::parse_date, config::AgentConfig, error::LedgerError, ledger::Ledger};

pub const AGENT_SOURCE: &str = "agent";

const SYSTEM_PROMPT: &str = "You are a bookkeeping assistant. Read the bank or credit card statement \
and reply with a JSON array only. Each element is an object with the keys \
\"date\" (YYYY-MM-DD), \"description\" (string), \"amount\" (number, positive for money \
leaving the account, negative for money coming in) and \"counter_account\" (account code \
from the chart of accounts below). Skip opening and closing balance rows.";

pub struct StatementAgent {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    statement_account: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedTransaction {
    pub date: String,
    pub description: String,
    pub amount: Decimal,
    pub counter_account: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedProposal {
    pub proposal: ProposedTransaction,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatementImport {
    pub created: Vec<JournalDetail>,
    pub rejected: Vec<RejectedProposal>,
}

impl StatementAgent {
    /// Reads the API key from the environment variable named in the config.
    pub fn from_config(config: &AgentConfig) -> Result<Self, LedgerError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| LedgerError::Agent(format!("{} is not set", config.api_key_env)))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            statement_account: config.statement_account.clone(),
        })
    }

    pub fn statement_account(&self) -> &str {
        &self.statement_account
    }

    pub async fn propose(&self, statement: &str, chart: &str) -> Result<Vec<ProposedTransaction>, LedgerError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: String,
        }

        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: MsgOut,
        }

        #[derive(Deserialize)]
        struct MsgOut {
            content: Option<String>,
        }

        let body = Req {
            model: &self.model,
            messages: vec![
                Msg { role: "system", content: format!("{}\n\n{}", SYSTEM_PROMPT, chart) },
                Msg { role: "user", content: statement.to_string() },
            ],
            temperature: 0.0,
        };

        tracing::debug!(endpoint = %self.endpoint, model = %self.model, chars = statement.len(), "Requesting statement proposals");
        let resp = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Agent(format!("request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            return Err(LedgerError::Agent(format!("endpoint returned {}: {}", status, txt)));
        }

        let out: Resp = resp
            .json()
            .await
            .map_err(|e| LedgerError::Agent(format!("unreadable response: {}", e)))?;
        let content = out
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| LedgerError::Agent("response had no content".to_string()))?;

        parse_proposals(&content)
    }
}

/// Chart of accounts as prompt context, one `code name (type)` per line.
pub fn describe_chart(ledger: &Ledger) -> Result<String, LedgerError> {
    let accounts = ledger.list_accounts(&ledgerbook_core::AccountFilter {
        account_type: None,
        active_only: true,
    })?;
    Ok(accounts
        .iter()
        .map(|a| format!("{} {} ({})", a.code, a.name, a.account_type))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Parses the model reply, accepting a bare array or one inside a code fence.
pub fn parse_proposals(reply: &str) -> Result<Vec<ProposedTransaction>, LedgerError> {
    let text = reply.trim();
    let json = match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => return Err(LedgerError::Agent("reply did not contain a JSON array".to_string())),
    };
    serde_json::from_str(json).map_err(|e| LedgerError::Agent(format!("malformed proposals: {}", e)))
}

impl ProposedTransaction {
    /// Positive amounts are money out: debit the counter account, credit the
    /// statement account. Negative amounts reverse the sides.
    pub fn into_command(&self, statement_account: &str) -> Result<CreateJournalCommand, LedgerError> {
        let date = parse_date(&self.date)?;
        let amount = self.amount.round_dp(2);
        if amount.is_zero() {
            return Err(LedgerError::Validation("amount is zero".to_string()));
        }
        let description = self.description.trim();
        let memo = if description.is_empty() { "Statement line" } else { description };

        let lines = if amount.is_sign_positive() {
            vec![
                LineCommand::debit(&self.counter_account, amount).with_description(memo),
                LineCommand::credit(statement_account, amount).with_description(memo),
            ]
        } else {
            vec![
                LineCommand::debit(statement_account, -amount).with_description(memo),
                LineCommand::credit(&self.counter_account, -amount).with_description(memo),
            ]
        };

        Ok(CreateJournalCommand {
            date,
            memo: Arc::from(memo),
            source: Some(Arc::from(AGENT_SOURCE)),
            lines,
        })
    }
}

/// Creates one draft per proposal; failures are collected, not fatal.
pub fn import_proposals(ledger: &Ledger, proposals: Vec<ProposedTransaction>, statement_account: &str, actor: &str) -> StatementImport {
    let mut result = StatementImport::default();
    for proposal in proposals {
        match proposal
            .into_command(statement_account)
            .and_then(|cmd| ledger.create_journal(&cmd, actor))
        {
            Ok(detail) => result.created.push(detail),
            Err(e) => {
                tracing::info!(description = %proposal.description, error = %e, "Proposal rejected");
                result.rejected.push(RejectedProposal {
                    reason: e.to_string(),
                    proposal,
                });
            }
        }
    }
    result
}
