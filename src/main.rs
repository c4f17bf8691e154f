use clap::{Parser, Subcommand};
use reminder_core::config::Config;
use reminder_core::log;
use reminder_core::types::{clamp_priority, normalize_channels, now_unix, AuditEntry, LedgerOperation, Reminder, ReminderKind, ReminderStatus};
use reminder_scheduler::{Scheduler, SchedulerConfig as SchedulerRunConfig};
use reminder_store::{IdempotencyStore, LedgerStore, PendingStore, ReminderStore};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "remind", about = "Reminder and notification core")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "REMIND_CONFIG", default_value = "remind.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a reminder directly against the local store.
    Add {
        /// Free text, e.g. "call mom tomorrow at 6pm". Parsed the same way
        /// the HTTP ingest endpoint parses `message`, unless `--when` pins
        /// the time explicitly.
        message: String,
        #[arg(long)]
        when: Option<String>,
        #[arg(long, default_value = "remind")]
        kind: String,
        #[arg(long, value_delimiter = ',')]
        channels: Option<Vec<String>>,
        #[arg(long)]
        tz: Option<String>,
        #[arg(long, default_value_t = 5)]
        priority: i32,
    },
    /// List reminders.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Cancel a reminder by id.
    Cancel {
        id: i64,
    },
    /// Run the scheduler and callback server. Default when no subcommand is given.
    Run,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(Path::new(&cli.config)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: failed to load config: {e}");
            return ExitCode::from(3);
        }
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_service(config).await,
        Command::Add { message, when, kind, channels, tz, priority } => {
            cmd_add(config, message, when, kind, channels, tz, priority).await
        }
        Command::List { status, json } => cmd_list(config, status, json).await,
        Command::Cancel { id } => cmd_cancel(config, id).await,
    }
}

async fn open_reminder_store(config: &Config) -> Result<ReminderStore, ExitCode> {
    ReminderStore::new(&config.store.reminders_db).await.map_err(|e| {
        eprintln!("fatal: failed to open reminder store: {e}");
        ExitCode::from(3)
    })
}

async fn cmd_add(
    config: Config,
    message: String,
    when: Option<String>,
    kind: String,
    channels: Option<Vec<String>>,
    tz: Option<String>,
    priority: i32,
) -> ExitCode {
    let reminders = match open_reminder_store(&config).await {
        Ok(s) => s,
        Err(code) => return code,
    };
    let ledger = match LedgerStore::new(&config.store.ledger_db, config.ledger.undo_window_sec).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("fatal: failed to open ledger store: {e}");
            return ExitCode::from(3);
        }
    };

    let Some(kind) = ReminderKind::parse(&kind) else {
        eprintln!("error: unknown kind {kind:?}, expected \"remind\" or \"alarm\"");
        return ExitCode::from(2);
    };

    let tz_name = tz.unwrap_or_else(|| config.default_timezone.0.clone());
    let tz_parsed: chrono_tz::Tz = match tz_name.parse() {
        Ok(t) => t,
        Err(_) => {
            eprintln!("error: unknown timezone {tz_name:?}");
            return ExitCode::from(2);
        }
    };
    let now = chrono::Utc::now();

    let (due_at, resolved_message, resolved_channels, resolved_priority) = if let Some(when) = when {
        let due_at = match reminder_time::parse(&when, now, tz_parsed) {
            Ok(reminder_time::ParseOutcome::Absolute(at)) => at,
            Ok(reminder_time::ParseOutcome::Partial { .. }) => {
                eprintln!("error: {when:?} names a day with no time of day; be more specific");
                return ExitCode::from(2);
            }
            Err(e) => {
                eprintln!("error: could not parse --when: {e}");
                return ExitCode::from(2);
            }
        };
        (due_at, message, channels.unwrap_or_default(), priority)
    } else {
        match reminder_intent::normalize(&message, now, &tz_name) {
            Some(intent) if intent.needs_clarification => {
                eprintln!(
                    "error: could not resolve a time from {message:?}; pass --when explicitly ({})",
                    intent.clarifying_question.unwrap_or_default()
                );
                return ExitCode::from(2);
            }
            Some(intent) => {
                let due_at = match intent.due_at {
                    Some(at) => at,
                    None => {
                        eprintln!("error: normalized intent carried no due time");
                        return ExitCode::from(2);
                    }
                };
                let channels = if let Some(c) = channels { c } else { intent.channels };
                (due_at, intent.message, channels, priority)
            }
            None => {
                eprintln!("error: could not interpret {message:?} as a reminder");
                return ExitCode::from(2);
            }
        }
    };

    if reminder_time::is_in_past(due_at, now) {
        eprintln!("error: resolved time is in the past");
        return ExitCode::from(2);
    }

    let (clamped_priority, _) = clamp_priority(resolved_priority);
    let reminder = Reminder {
        id: 0,
        kind,
        message: resolved_message,
        due_at,
        created_at: now_unix(),
        sent_at: None,
        canceled_at: None,
        timezone: tz_name,
        channels: normalize_channels(resolved_channels),
        priority: clamped_priority,
        status: ReminderStatus::Scheduled,
        attempt_count: 0,
        last_error: None,
        context_ref: None,
        audit_log: Vec::new(),
    };

    let created = match reminders.create(reminder).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: failed to create reminder: {e}");
            return ExitCode::from(3);
        }
    };

    if let Err(e) = ledger
        .record(
            "cli",
            "reminder",
            &created.id.to_string(),
            LedgerOperation::Create,
            None,
            serde_json::json!({ "id": created.id, "message": created.message, "due_at": created.due_at }),
        )
        .await
    {
        eprintln!("warning: failed to record ledger entry: {e}");
    }

    println!("created reminder {} due at {}", created.id, created.due_at);
    ExitCode::SUCCESS
}

async fn cmd_list(config: Config, status: Option<String>, json: bool) -> ExitCode {
    let reminders = match open_reminder_store(&config).await {
        Ok(s) => s,
        Err(code) => return code,
    };

    let status = match status.as_deref() {
        None | Some("all") => None,
        Some(s) => match ReminderStatus::parse(s) {
            Some(s) => Some(s),
            None => {
                eprintln!("error: unknown status {s:?}");
                return ExitCode::from(2);
            }
        },
    };

    let rows = match reminders.list(status).await {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("error: failed to list reminders: {e}");
            return ExitCode::from(3);
        }
    };

    if json {
        match serde_json::to_string_pretty(&rows) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("error: failed to serialize: {e}");
                return ExitCode::from(3);
            }
        }
    } else if rows.is_empty() {
        println!("no reminders");
    } else {
        for r in &rows {
            println!(
                "{:>5}  {:<10}  {:<9}  due={:<12}  {}",
                r.id,
                r.status.as_str(),
                r.kind.as_str(),
                r.due_at,
                r.message
            );
        }
    }
    ExitCode::SUCCESS
}

async fn cmd_cancel(config: Config, id: i64) -> ExitCode {
    let reminders = match open_reminder_store(&config).await {
        Ok(s) => s,
        Err(code) => return code,
    };
    match reminders.cancel(id).await {
        Ok(r) => {
            println!("canceled reminder {}", r.id);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: failed to cancel reminder {id}: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run_service(config: Config) -> ExitCode {
    log!(" [main] starting, timezone={}", config.default_timezone.0);

    let reminders = Arc::new(match ReminderStore::new(&config.store.reminders_db).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("fatal: failed to open reminder store: {e}");
            return ExitCode::from(3);
        }
    });
    let ledger = Arc::new(match LedgerStore::new(&config.store.ledger_db, config.ledger.undo_window_sec).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("fatal: failed to open ledger store: {e}");
            return ExitCode::from(3);
        }
    });
    let pending = Arc::new(match PendingStore::new(&config.store.pending_db, config.ledger.draft_ttl_sec).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("fatal: failed to open pending store: {e}");
            return ExitCode::from(3);
        }
    });
    let idempotency = Arc::new(match IdempotencyStore::new(&config.store.idempotency_db).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("fatal: failed to open idempotency store: {e}");
            return ExitCode::from(3);
        }
    });

    let router = Arc::new(reminder_notify::default_router(
        &config.notify.ntfy_base_url,
        &config.notify.ntfy_topic,
        config.notify.dry_run,
    ));

    let scheduler = Scheduler::new(
        reminders.clone(),
        router.clone(),
        SchedulerRunConfig {
            poll_interval: Duration::from_secs(config.scheduler.poll_sec),
            max_batch: config.scheduler.max_batch,
            max_attempts: config.scheduler.max_attempts,
            app_name: "Remind".to_string(),
            public_base_url: non_empty(&config.server.public_base_url),
        },
    );

    let state = Arc::new(reminder_server::AppState {
        reminders: reminders.clone(),
        ledger: ledger.clone(),
        pending: pending.clone(),
        idempotency: idempotency.clone(),
        router: router.clone(),
        action_token: non_empty(&config.server.action_token),
        default_timezone: config.default_timezone.0.clone(),
        app_name: "Remind".to_string(),
        public_base_url: non_empty(&config.server.public_base_url),
        scheduler_poll_sec: config.scheduler.poll_sec,
    });

    let stop = CancellationToken::new();
    let scheduler_stop = stop.clone();
    let server_stop = stop.clone();
    let bind_addr = config.server.bind_addr.clone();

    // Both the scheduler and the server run on their own tasks so a ctrl-c
    // during the outer select can `stop.cancel()` them and then *await*
    // their exit, instead of either future being silently dropped by the
    // select itself. The server's graceful-shutdown future is the same
    // token, so ctrl-c drains in-flight HTTP requests rather than severing
    // them mid-response.
    let mut scheduler_handle = tokio::spawn(async move { scheduler.run(scheduler_stop).await });
    let mut server_handle =
        tokio::spawn(async move { reminder_server::serve(&bind_addr, state, server_stop.cancelled_owned()).await });

    tokio::select! {
        result = &mut scheduler_handle => {
            match result {
                Ok(Err(e)) => {
                    eprintln!("fatal: scheduler error: {e}");
                    return ExitCode::from(1);
                }
                Err(e) => {
                    eprintln!("fatal: scheduler task panicked: {e}");
                    return ExitCode::from(1);
                }
                Ok(Ok(())) => {}
            }
        }
        result = &mut server_handle => {
            match result {
                Ok(Err(e)) => {
                    eprintln!("fatal: server error: {e}");
                    return ExitCode::from(1);
                }
                Err(e) => {
                    eprintln!("fatal: server task panicked: {e}");
                    return ExitCode::from(1);
                }
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log!(" [main] shutdown signal received, waiting for the current tick and in-flight requests to finish");
            stop.cancel();
            match (&mut scheduler_handle).await {
                Ok(Err(e)) => {
                    eprintln!("fatal: scheduler error during shutdown: {e}");
                    return ExitCode::from(1);
                }
                Err(e) => {
                    eprintln!("fatal: scheduler task panicked during shutdown: {e}");
                    return ExitCode::from(1);
                }
                Ok(Ok(())) => {}
            }
            match (&mut server_handle).await {
                Ok(Err(e)) => {
                    eprintln!("fatal: server error during shutdown: {e}");
                    return ExitCode::from(1);
                }
                Err(e) => {
                    eprintln!("fatal: server task panicked during shutdown: {e}");
                    return ExitCode::from(1);
                }
                Ok(Ok(())) => {}
            }
        }
    }

    ExitCode::SUCCESS
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
