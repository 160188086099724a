use std::str::FromStr;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::core::shutdown::shutdown_signal;
use crate::core::time::{format_offset, format_remaining};
use crate::session::{
    CommitOutcome, ExamSession, LocalOutcome, NavOutcome, SessionError, SessionEvent,
    SessionSnapshot, SubmitOutcome, SubmitTrigger,
};

#[derive(Parser, Debug)]
#[command(version, about = "Take an online exam from the terminal", long_about = None)]
pub(crate) struct Args {
    /// Exam to take
    #[arg(long)]
    pub(crate) exam: String,
    /// Student taking the exam
    #[arg(long)]
    pub(crate) student: String,
    /// Attempt id to use instead of the stored or a fresh one
    #[arg(long)]
    pub(crate) session: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Next,
    Prev,
    Goto(usize),
    Answer(String),
    Save,
    Mark,
    Unmark,
    Submit,
    Leave,
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return Err("empty command".to_string());
        };
        let arg = parts.next();

        let command = match (verb.to_ascii_lowercase().as_str(), arg) {
            ("next" | "n", None) => Self::Next,
            ("prev" | "p", None) => Self::Prev,
            ("goto" | "g", Some(number)) => {
                let number: usize =
                    number.parse().map_err(|_| format!("not a question number: {number}"))?;
                // Questions are numbered from 1 on screen.
                let index =
                    number.checked_sub(1).ok_or_else(|| "questions start at 1".to_string())?;
                Self::Goto(index)
            }
            ("answer" | "a", Some(key)) => Self::Answer(key.to_ascii_uppercase()),
            ("save" | "s", None) => Self::Save,
            ("mark", None) => Self::Mark,
            ("unmark", None) => Self::Unmark,
            ("submit", None) => Self::Submit,
            ("leave", None) => Self::Leave,
            ("status", None) => Self::Status,
            ("help" | "?", None) => Self::Help,
            ("quit" | "q", None) => Self::Quit,
            _ => return Err(format!("unknown command: {}", line.trim())),
        };

        if parts.next().is_some() {
            return Err(format!("too many arguments: {}", line.trim()));
        }
        Ok(command)
    }
}

const HELP: &str = "\
commands:
  next | prev          save progress and move
  goto <n>             save progress and jump to question n
  answer <key>         select an option
  save                 save the selected answer and go to the next question
  mark | unmark        flag the current question for review
  status               show the question palette
  submit               finish the exam
  leave                abandon this attempt
  quit                 stop now and resume later";

/// Drives one mounted session from stdin until it is submitted, left or interrupted.
pub(crate) async fn run_session(session: ExamSession) -> anyhow::Result<()> {
    let mut events = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    println!("{HELP}\n");
    print_question(&session.snapshot());

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                session.unmount();
                tracing::info!(
                    signal = signal.as_str(),
                    session_id = %session.session_id(),
                    "Stopped; the attempt can be resumed"
                );
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Submitted(route)) => {
                    println!("Submitted attempt {} for exam {}.", route.session_id, route.exam_id);
                    show_result(&session).await;
                    return Ok(());
                }
                Ok(SessionEvent::Left) => return Ok(()),
                Ok(SessionEvent::Notice { level, message }) => {
                    println!("[{level:?}] {message}");
                }
                Ok(SessionEvent::Expired) => println!("Time is up. Submitting..."),
                Ok(SessionEvent::SubmitFailed { retry_required: true }) => {
                    println!("Type `submit` to retry.");
                }
                Ok(SessionEvent::Navigated { .. }) => print_question(&session.snapshot()),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event listener lagged behind");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    session.unmount();
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(Command::Quit) => {
                        session.unmount();
                        println!("Stopped. Run again with the same exam to resume.");
                        return Ok(());
                    }
                    Ok(command) => execute(&session, command).await?,
                    Err(message) => println!("{message} (type `help`)"),
                }
            }
        }
    }
}

async fn execute(session: &ExamSession, command: Command) -> Result<(), SessionError> {
    let result = match command {
        Command::Next => session.next().await.map(report_nav),
        Command::Prev => session.prev().await.map(report_nav),
        Command::Goto(index) => session.select_question(index).await.map(report_nav),
        Command::Answer(key) => {
            let snapshot = session.snapshot();
            let Some(current) = snapshot.current else {
                return Ok(());
            };
            if !current.options.iter().any(|option| option.key == key) {
                println!("No option {key} on this question.");
                return Ok(());
            }
            report_local(session.set_answer(current.sequence_number, &key));
            Ok(())
        }
        Command::Save => session.commit_and_advance().await.map(|outcome| match outcome {
            CommitOutcome::Committed { advanced_to: None, .. } => {
                println!("Saved.");
                print_question(&session.snapshot());
            }
            CommitOutcome::Committed { .. } => println!("Saved."),
            CommitOutcome::Ignored(reason) => println!("Nothing to save ({reason:?})."),
        }),
        Command::Mark => with_active(session, |q_id| session.mark_for_review(q_id)),
        Command::Unmark => with_active(session, |q_id| session.unmark_for_review(q_id)),
        Command::Submit => session.submit(SubmitTrigger::Manual).await.map(|outcome| {
            if let SubmitOutcome::Ignored(reason) = outcome {
                println!("Submission ignored ({reason:?}).");
            }
        }),
        Command::Leave => session.leave().await.map(|outcome| {
            if outcome.server_cleared {
                println!("Attempt abandoned.");
            } else {
                println!("Attempt abandoned locally; the server did not confirm.");
            }
        }),
        Command::Status => {
            print_palette(&session.snapshot());
            Ok(())
        }
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Quit => Ok(()),
    };

    match result {
        Err(err) if err.is_recoverable() => {
            // Notices already reached the student through the event stream.
            tracing::debug!(error = %err, "Command failed");
            if matches!(err, SessionError::Busy) {
                println!("Please wait, still saving.");
            }
            Ok(())
        }
        other => other,
    }
}

fn with_active(
    session: &ExamSession,
    apply: impl FnOnce(i64) -> LocalOutcome,
) -> Result<(), SessionError> {
    if let Some(current) = session.snapshot().current {
        report_local(apply(current.sequence_number));
    }
    Ok(())
}

fn report_nav(outcome: NavOutcome) {
    if let NavOutcome::Ignored(reason) = outcome {
        println!("Not moving ({reason:?}).");
    }
}

fn report_local(outcome: LocalOutcome) {
    if let LocalOutcome::Ignored(reason) = outcome {
        println!("Ignored ({reason:?}).");
    }
}

fn print_question(snapshot: &SessionSnapshot) {
    let Some(question) = &snapshot.current else {
        return;
    };
    let status = snapshot
        .questions
        .get(snapshot.active_index)
        .map(|view| view.status.as_str())
        .unwrap_or_default();

    println!(
        "\nQuestion {}/{} [{}]  time left {}",
        snapshot.active_index + 1,
        snapshot.questions.len(),
        status,
        format_remaining(snapshot.remaining_seconds)
    );
    println!("{}", question.text);
    for option in &question.options {
        let selected = snapshot.pending_selection.as_deref() == Some(option.key.as_str());
        let marker = if selected { '*' } else { ' ' };
        println!(" {marker} {}) {}", option.key, option.text);
    }
}

fn print_palette(snapshot: &SessionSnapshot) {
    println!(
        "Attempt {} started {}, time left {}",
        snapshot.session_id,
        format_offset(snapshot.mounted_at),
        format_remaining(snapshot.remaining_seconds)
    );
    if let Some(at) = snapshot.last_heartbeat_at {
        println!("Last autosave {}", format_offset(at));
    }
    for view in &snapshot.questions {
        let pointer = if view.index == snapshot.active_index { '>' } else { ' ' };
        println!(
            "{pointer} {:>3}  {:<16} {}s",
            view.index + 1,
            view.status.as_str(),
            view.time_spent_seconds
        );
    }
    let summary = &snapshot.summary;
    println!(
        "answered {}, not answered {}, marked {}, answered+marked {}, not visited {}",
        summary.answered,
        summary.not_answered,
        summary.mark_for_review,
        summary.save_mark_review,
        summary.not_visited
    );
}

async fn show_result(session: &ExamSession) {
    match session.fetch_result().await {
        Ok(result) => match serde_json::to_string_pretty(&result) {
            Ok(pretty) => println!("{pretty}"),
            Err(err) => tracing::warn!(error = %err, "Failed to render result"),
        },
        Err(err) => {
            tracing::warn!(error = %err, "Result is not available yet");
            println!("Your result is not available yet.");
        }
    }
}
