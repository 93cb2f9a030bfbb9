use std::fmt::Write as _;
use std::io;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use time::macros::format_description;
use time::Duration;

use crate::app::{DailySession, HomeView, ResetConfirmation};
use crate::catalog::{Message, MessageDate};
use crate::config::AppConfig;
use crate::notify::{self, NewMessageSignal, NotificationGate, Notifier, WatchOptions};
use crate::resolver::{FavoriteToggle, NotificationThreshold};
use crate::state::{StateError, StateStore};

#[derive(Args, Debug, Clone)]
pub struct OpenArgs {
    /// Date of a released message (YYYY-MM-DD); defaults to today's message
    #[arg()]
    pub date: Option<MessageDate>,
}

#[derive(Args, Debug, Clone)]
pub struct DateArgs {
    /// Message date (YYYY-MM-DD)
    #[arg()]
    pub date: MessageDate,
}

#[derive(Args, Debug, Clone)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: Option<SettingsCommand>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SettingsCommand {
    /// Change the time of day new messages unlock (HH:MM)
    SetTime(SetTimeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SetTimeArgs {
    pub time: NotificationThreshold,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Milliseconds between checks (defaults to notifications.poll_interval_ms)
    #[arg(long)]
    pub interval_ms: Option<u64>,
    /// Stop after this many checks
    #[arg(long)]
    pub ticks: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct ResetArgs {
    /// Skip the confirmation prompt
    #[arg(long)]
    pub yes: bool,
}

/// Renders the home view from the state loaded with the session.
pub fn today(session: &DailySession) -> Result<()> {
    print!("{}", render_home(&session.home()));
    Ok(())
}

pub fn open(session: &mut DailySession, args: OpenArgs) -> Result<()> {
    let outcome = match args.date {
        Some(date) => session.open_date(date)?.map(Some),
        None => session.open_current(),
    };
    report_unsaved(outcome.persist_error);
    match outcome.value {
        Some(opened) => print!("{}", render_message(&opened.message, opened.favorite)),
        None => println!("No message has been released yet."),
    }
    Ok(())
}

pub fn show(session: &mut DailySession, args: DateArgs) -> Result<()> {
    let outcome = session.show(args.date)?;
    report_unsaved(outcome.persist_error);
    let shown = outcome.value;
    print!("{}", render_message(&shown.message, shown.favorite));
    Ok(())
}

pub fn last(session: &DailySession) -> Result<()> {
    match session.last_shown()? {
        Some(shown) => print!("{}", render_message(&shown.message, shown.favorite)),
        None => println!("No message to show yet."),
    }
    Ok(())
}

pub fn missed(session: &DailySession) -> Result<()> {
    print!(
        "{}",
        render_list(
            "Missed messages",
            &session.missed(),
            "You have not missed anything so far."
        )
    );
    Ok(())
}

pub fn discovered(session: &DailySession) -> Result<()> {
    print!(
        "{}",
        render_list(
            "Discovered messages",
            &session.discovered(),
            "Nothing discovered yet."
        )
    );
    Ok(())
}

pub fn favorites(session: &DailySession) -> Result<()> {
    print!(
        "{}",
        render_list(
            "Favorite messages",
            &session.favorites(),
            "No favorite messages yet."
        )
    );
    Ok(())
}

pub fn favorite(session: &mut DailySession, args: DateArgs) -> Result<()> {
    let outcome = session
        .toggle_favorite(args.date)
        .with_context(|| format!("updating favorite {}", args.date))?;
    report_unsaved(outcome.persist_error);
    match outcome.value {
        FavoriteToggle::Added => println!("Added {} to favorites.", format_date(args.date)),
        FavoriteToggle::Removed => println!("Removed {} from favorites.", format_date(args.date)),
    }
    Ok(())
}

pub fn settings(session: &mut DailySession, args: SettingsArgs) -> Result<()> {
    match args.command {
        None => println!("Notification time: {}", session.threshold()),
        Some(SettingsCommand::SetTime(args)) => {
            let outcome = session.set_notification_time(args.time);
            report_unsaved(outcome.persist_error);
            println!("Notification time set to {}.", outcome.value);
        }
    }
    Ok(())
}

pub fn reset(session: &mut DailySession, args: ResetArgs) -> Result<()> {
    let confirmation = if args.yes {
        ResetConfirmation::Confirmed
    } else if atty::is(atty::Stream::Stdin) {
        let answer =
            prompt("Erase opened messages, favorites and notification history? Type 'yes' to confirm")?;
        parse_confirmation(&answer)
    } else {
        bail!("refusing to reset without --yes when stdin is not a terminal");
    };
    if confirmation == ResetConfirmation::Declined {
        println!("Reset cancelled.");
        return Ok(());
    }
    let outcome = session.reset(confirmation)?;
    report_unsaved(outcome.persist_error);
    println!("Opened messages, favorites and notification history erased.");
    Ok(())
}

pub fn watch(config: &AppConfig, gate: NotificationGate, args: WatchArgs) -> Result<()> {
    let interval = args
        .interval_ms
        .map(std::time::Duration::from_millis)
        .unwrap_or_else(|| config.notifications.poll_interval());
    let options = WatchOptions {
        interval,
        max_ticks: args.ticks,
    };
    // Held for the whole loop; the process is normally stopped with Ctrl-C.
    let (_cancel, token) = notify::cancellation();
    eprintln!("Watching for new messages every {}ms.", interval.as_millis());
    let summary = notify::run_until_cancelled(&gate, &StdoutNotifier, options, &token);
    if args.ticks.is_some() {
        eprintln!(
            "Stopped after {} check{} ({} new message{}).",
            summary.ticks,
            if summary.ticks == 1 { "" } else { "s" },
            summary.delivered,
            if summary.delivered == 1 { "" } else { "s" }
        );
    }
    Ok(())
}

pub fn dump(state: &StateStore) -> Result<()> {
    let entries = state.entries().context("reading saved state")?;
    if entries.is_empty() {
        println!("(no saved state)");
    }
    for (key, value) in entries {
        println!("{key} = {value}");
    }
    Ok(())
}

struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    fn deliver(&self, signal: &NewMessageSignal) -> Result<()> {
        println!("{}", render_signal(signal));
        Ok(())
    }
}

fn render_signal(signal: &NewMessageSignal) -> String {
    match &signal.message {
        Some(message) if message.date == signal.day => {
            "A new message has arrived! Open it with `dailymsg open`.".to_string()
        }
        _ => format!(
            "It is {} but there is no new message today.",
            format_date(signal.day)
        ),
    }
}

fn report_unsaved(error: Option<StateError>) {
    if let Some(err) = error {
        eprintln!("warning: change not saved: {:#}", anyhow::Error::from(err));
    }
}

fn parse_confirmation(answer: &str) -> ResetConfirmation {
    if answer.trim().eq_ignore_ascii_case("yes") {
        ResetConfirmation::Confirmed
    } else {
        ResetConfirmation::Declined
    }
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

pub fn render_home(home: &HomeView) -> String {
    let mut out = String::new();
    let _ = writeln!(
        &mut out,
        "Next message in {} (at {})",
        format_countdown(home.countdown),
        home.threshold
    );
    out.push('\n');
    match &home.current {
        Some(current) => {
            let star = if current.favorite { "  [FAVORITE]" } else { "" };
            let _ = writeln!(
                &mut out,
                "Message of the day, {}{star}",
                format_date(current.message.date)
            );
            if current.opened {
                let _ = writeln!(&mut out, "    {}", current.message.content);
            } else {
                let _ = writeln!(&mut out, "    Not opened yet. Run `dailymsg open` to read it.");
            }
        }
        None => {
            let _ = writeln!(&mut out, "No message for today.");
        }
    }
    if !home.missed.is_empty() {
        let count = home.missed.len();
        let _ = writeln!(
            &mut out,
            "\n{count} unopened message{} waiting. See `dailymsg missed`.",
            if count == 1 { "" } else { "s" }
        );
    }
    out.push('\n');
    if home.favorites_preview.is_empty() {
        let _ = writeln!(&mut out, "No favorites yet.");
    } else {
        let _ = writeln!(&mut out, "Recent favorites");
        for message in &home.favorites_preview {
            let _ = writeln!(&mut out, "  {}  {}", message.date, message.content);
        }
    }
    out
}

pub fn render_message(message: &Message, favorite: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(&mut out, "{}", format_date(message.date));
    let _ = writeln!(&mut out, "\n    {}\n", message.content);
    if favorite {
        let _ = writeln!(&mut out, "[FAVORITE]");
    } else {
        let _ = writeln!(
            &mut out,
            "Add it to favorites with `dailymsg favorite {}`.",
            message.date
        );
    }
    out
}

pub fn render_list(title: &str, messages: &[Message], empty: &str) -> String {
    if messages.is_empty() {
        return format!("{empty}\n");
    }
    let mut out = String::new();
    let _ = writeln!(&mut out, "{title} ({})", messages.len());
    for message in messages {
        let _ = writeln!(&mut out, "  {}  {}", message.date, message.content);
    }
    out
}

pub fn format_countdown(remaining: Duration) -> String {
    let total = remaining.whole_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total / 60) % 60;
    let seconds = total % 60;
    format!("{hours}h {minutes}m {seconds}s")
}

fn format_date(date: MessageDate) -> String {
    date.date()
        .format(format_description!(
            "[day padding:none] [month repr:long] [year]"
        ))
        .unwrap_or_else(|_| date.to_string())
}
