mod config;

use clap::{Parser, Subcommand};
use config::{load_dotenv, HitlSettings};
use hitl_audit_log::{read_events, verify_log, AuditLog};
use hitl_contracts::{Decision, HitlDecision, JsonMap};
use hitl_inbound::{tag_subject, InboundError, InboundMessage, Orchestrator};
use hitl_notify::{
    NotificationAgent, NullTransport, RetryPolicy, RetryingTransport, SmtpConfig, SmtpMailer,
    TemplateEngine,
};
use hitl_redaction::Redactor;
use hitl_replies::{parse_reply, ParseError};
use hitl_store::DecisionStore;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Debug, Error)]
enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("redaction error: {0}")]
    Redaction(#[from] hitl_redaction::RedactionError),
    #[error("reply parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("inbound error: {0}")]
    Inbound(#[from] InboundError),
    #[error("store error: {0}")]
    Store(#[from] hitl_store::StoreError),
    #[error("audit error: {0}")]
    Audit(#[from] hitl_audit_log::AuditLogError),
    #[error("notification error: {0}")]
    Agent(#[from] hitl_notify::AgentError),
    #[error("transport error: {0}")]
    Transport(#[from] hitl_notify::TransportError),
    #[error("no recipient: pass --to or set {0}")]
    MissingRecipient(&'static str),
    #[error("not an RFC 822 message: {0}")]
    InvalidMessage(PathBuf),
}

impl CliError {
    /// 2 = the operator's reply was unusable, 1 = everything else.
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Parse(_) | CliError::Inbound(InboundError::Parse(_)) => 2,
            _ => 1,
        }
    }
}

#[derive(Parser)]
#[command(name = "hitl-control", version, about = "Human-in-the-loop approval utilities")]
struct Args {
    /// Data directory holding audit.jsonl and hitl.jsonl (env HITL_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mask PII in a JSON document and print the MaskedPayload.
    Mask {
        #[arg(long)]
        run_id: String,

        /// JSON file with the context to mask
        #[arg(long)]
        input: PathBuf,
    },

    /// Parse a reply body and print the decision. Nothing is persisted.
    ParseReply {
        #[arg(long)]
        run_id: String,

        #[arg(long)]
        actor: String,

        /// Reply body file, or "-" for stdin
        #[arg(long, default_value = "-")]
        body: String,
    },

    /// Parse a reply, persist the decision and audit it.
    ApplyInbound {
        #[arg(long)]
        run_id: String,

        #[arg(long)]
        actor: String,

        /// Reply body file, or "-" for stdin
        #[arg(long, default_value = "-")]
        body: String,
    },

    /// Decode a raw RFC 822 reply, correlate it to its run and apply it.
    ApplyEml {
        #[arg(long)]
        eml: PathBuf,
    },

    /// Record a decision obtained outside email.
    RecordDecision {
        #[arg(long)]
        run_id: String,

        #[arg(long)]
        actor: String,

        /// APPROVED, DECLINED or CHANGE_REQUESTED
        #[arg(long)]
        decision: Decision,

        /// Requested change as key=value (repeatable)
        #[arg(long = "kv", value_parser = parse_kv_arg)]
        kv: Vec<(String, String)>,
    },

    /// Print the current status of a run.
    Status {
        #[arg(long)]
        run_id: String,
    },

    /// Email an approval request over SMTP and record it as pending.
    RequestApproval {
        #[arg(long)]
        run_id: String,

        /// Recipient (env HITL_OPERATOR_EMAIL)
        #[arg(long)]
        to: Option<String>,

        #[arg(long)]
        subject: String,

        /// JSON file with the decision context (masked before sending)
        #[arg(long)]
        context: PathBuf,
    },

    /// Send a reminder for a pending run.
    Remind {
        #[arg(long)]
        run_id: String,

        /// Recipient (env HITL_OPERATOR_EMAIL)
        #[arg(long)]
        to: Option<String>,
    },

    /// Escalate a pending run to an admin.
    Escalate {
        #[arg(long)]
        run_id: String,

        /// Recipient (env HITL_ADMIN_EMAIL)
        #[arg(long)]
        to: Option<String>,
    },

    /// Verify the audit hash chain end to end and print the tail hash.
    VerifyAudit,

    /// Print every audit record of a run, oldest first.
    AuditTrail {
        #[arg(long)]
        run_id: String,
    },
}

fn parse_kv_arg(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    let k = k.trim();
    if k.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((k.to_string(), v.trim().to_string()))
}

fn main() {
    let args = Args::parse();
    let env_file = load_dotenv(args.data_dir.as_deref());
    let _guard = init_logging();
    if let Some(p) = env_file {
        info!(path = %p.display(), "env_loaded");
    }

    if let Err(e) = run(args) {
        eprintln!("ERROR: {e}");
        std::process::exit(e.exit_code());
    }
}

/// stderr by default; a daily-rolling file under `HITL_LOG_DIR` when set.
fn init_logging() -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match std::env::var("HITL_LOG_DIR").ok().filter(|d| !d.trim().is_empty()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "hitl-control.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .try_init();
            None
        }
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let settings = HitlSettings::from_env(args.data_dir);

    match args.cmd {
        Command::Mask { run_id, input } => {
            let ctx: JsonValue = serde_json::from_slice(&fs::read(&input)?)?;
            emit(&Redactor::new().mask(&run_id, &ctx)?)
        }

        Command::ParseReply { run_id, actor, body } => {
            let dec = parse_reply(&run_id, &actor, &read_body(&body)?)?;
            emit(&dec)
        }

        Command::ApplyInbound { run_id, actor, body } => {
            let raw = read_body(&body)?;
            let (mut store, mut audit) = open_state(&settings)?;
            let dec =
                Orchestrator::new(&mut store, &mut audit).apply_inbound(&run_id, &actor, &raw)?;
            emit(&dec)
        }

        Command::ApplyEml { eml } => {
            let msg = InboundMessage::from_rfc822(&fs::read(&eml)?)
                .ok_or(CliError::InvalidMessage(eml))?;
            let (mut store, mut audit) = open_state(&settings)?;
            let dec = Orchestrator::new(&mut store, &mut audit).apply_message(&msg)?;
            emit(&dec)
        }

        Command::RecordDecision { run_id, actor, decision, kv } => {
            let kv: JsonMap = kv.into_iter().map(|(k, v)| (k, JsonValue::String(v))).collect();
            let dec = HitlDecision::new(run_id, decision, actor, kv);
            let (mut store, mut audit) = open_state(&settings)?;
            let templates = TemplateEngine::new();
            // nothing is sent, so SMTP settings are not consulted
            NotificationAgent::new(&NullTransport, &templates, &mut store, &mut audit)
                .record_decision(&dec)?;
            emit(&dec)
        }

        Command::Status { run_id } => {
            let status = DecisionStore::open(&settings.store_path)?.status(&run_id)?;
            emit(&json!({ "run_id": run_id, "status": status.map(|s| s.as_str()) }))
        }

        Command::RequestApproval { run_id, to, subject, context } => {
            let to = to
                .or_else(|| settings.operator_email.clone())
                .ok_or(CliError::MissingRecipient("HITL_OPERATOR_EMAIL"))?;
            let ctx: JsonValue = serde_json::from_slice(&fs::read(&context)?)?;
            let subject = tag_subject(&subject, &run_id);

            let (mut store, mut audit) = open_state(&settings)?;
            let templates = template_engine(&settings);
            let transport = smtp_transport(&settings)?;
            let msg_id = NotificationAgent::new(&transport, &templates, &mut store, &mut audit)
                .request_approval(&run_id, &to, &subject, &ctx)?;
            emit(&json!({ "run_id": run_id, "to": to, "subject": subject, "msg_id": msg_id }))
        }

        Command::Remind { run_id, to } => {
            let to = to
                .or_else(|| settings.operator_email.clone())
                .ok_or(CliError::MissingRecipient("HITL_OPERATOR_EMAIL"))?;
            let (mut store, mut audit) = open_state(&settings)?;
            let templates = template_engine(&settings);
            let transport = smtp_transport(&settings)?;
            let msg_id = NotificationAgent::new(&transport, &templates, &mut store, &mut audit)
                .send_reminder(&run_id, &to)?;
            emit(&json!({ "run_id": run_id, "to": to, "msg_id": msg_id }))
        }

        Command::Escalate { run_id, to } => {
            let to = to
                .or_else(|| settings.admin_email.clone())
                .ok_or(CliError::MissingRecipient("HITL_ADMIN_EMAIL"))?;
            let (mut store, mut audit) = open_state(&settings)?;
            let templates = template_engine(&settings);
            let transport = smtp_transport(&settings)?;
            let msg_id = NotificationAgent::new(&transport, &templates, &mut store, &mut audit)
                .send_escalation(&run_id, &to)?;
            emit(&json!({ "run_id": run_id, "to": to, "msg_id": msg_id }))
        }

        Command::VerifyAudit => {
            let tail = if settings.audit_path.exists() {
                verify_log(&settings.audit_path)?
            } else {
                None
            };
            emit(&json!({
                "ok": true,
                "path": settings.audit_path.display().to_string(),
                "tail": tail,
            }))
        }

        Command::AuditTrail { run_id } => {
            for rec in read_events(&settings.audit_path, &run_id)? {
                emit(&rec)?;
            }
            Ok(())
        }
    }
}

fn emit<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn read_body(arg: &str) -> Result<String, CliError> {
    if arg == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    Ok(fs::read_to_string(Path::new(arg))?)
}

fn open_state(settings: &HitlSettings) -> Result<(DecisionStore, AuditLog), CliError> {
    let store = DecisionStore::open(&settings.store_path)?;
    let audit = AuditLog::open(&settings.audit_path)?;
    Ok((store, audit))
}

fn template_engine(settings: &HitlSettings) -> TemplateEngine {
    match &settings.template_dir {
        Some(dir) => TemplateEngine::with_dir(dir),
        None => TemplateEngine::new(),
    }
}

/// SMTP from `SMTP_*` env, wrapped in the configured retry policy.
/// Building it does not connect.
fn smtp_transport(settings: &HitlSettings) -> Result<RetryingTransport<SmtpMailer>, CliError> {
    let mailer = SmtpMailer::new(SmtpConfig::from_env())?;
    let policy = RetryPolicy::exponential(
        settings.send_attempts,
        Duration::from_millis(500),
        Duration::from_secs(10),
    );
    Ok(RetryingTransport::new(mailer, policy))
}
