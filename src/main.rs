use std::collections::BTreeMap;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use prepdeck::models::{
    Category, Completion, ItemFilter, ItemWithProgress, JsonOutput, NewItem, ProgressStatus,
    SessionItem, Stats, TestSession,
};
use prepdeck::{Config, Database, Error, Result};

#[derive(Parser)]
#[command(name = "prepdeck")]
#[command(about = "Work through an interview-prep catalog one item at a time")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Act as this user (overrides config and PREPDECK_USER)
    #[arg(long, short, global = true)]
    user: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage catalog items
    #[command(subcommand)]
    Item(ItemCommands),

    /// Start a random pending item
    Next,

    /// Put the current item back and start a different pending one
    Skip,

    /// Start a specific pending item
    Start {
        /// Item ID
        id: i64,
    },

    /// Finish an in-progress item
    Complete {
        /// Item ID
        id: i64,
    },

    /// Flip an item between done and pending
    Toggle {
        /// Item ID
        id: i64,
    },

    /// Force an item's status: pending/in_progress/done
    SetStatus {
        /// Item ID
        id: i64,

        #[arg(value_parser = parse_status)]
        status: ProgressStatus,
    },

    /// Star or unstar an item
    Star {
        /// Item ID
        id: i64,
    },

    /// Replace the notes on an item
    Note {
        /// Item ID
        id: i64,

        text: String,
    },

    /// Return every item to pending
    Reset,

    /// Zero the completed-cycle counter
    ResetCycles,

    /// Show progress statistics
    Stats {
        /// Break down by category and subcategory
        #[arg(long, short)]
        detailed: bool,
    },

    /// Review sessions over completed items
    #[command(subcommand)]
    Session(SessionCommands),
}

#[derive(Subcommand)]
enum ItemCommands {
    /// List items with your progress
    List {
        /// Filter by category
        #[arg(long, short, value_parser = parse_category)]
        category: Option<Category>,

        /// Filter by status
        #[arg(long, short, value_parser = parse_status)]
        status: Option<ProgressStatus>,

        /// Only starred items
        #[arg(long)]
        starred: bool,
    },

    /// Add an item to the catalog
    Add {
        /// Item title
        title: String,

        /// algorithmic, design_low_level, design_high_level or miscellaneous
        #[arg(long, short, value_parser = parse_category)]
        category: Category,

        #[arg(long, short = 'S')]
        subcategory: String,

        /// Attachment as name=url, repeatable
        #[arg(long = "link", short, value_parser = parse_link)]
        links: Vec<(String, String)>,
    },

    /// Show an item and your progress on it
    Show {
        /// Item ID
        id: i64,
    },

    /// Delete an item for everyone
    Delete {
        /// Item ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Explain whether a new review session can be created
    Check,

    /// Sample a new review session from completed items
    Create,

    /// Show one session
    Show { session_id: String },

    /// List your sessions, newest first
    List,

    /// Mark a session item as reviewed
    Complete { session_id: String, item_id: i64 },

    /// Give up on a session item
    Abandon { session_id: String, item_id: i64 },

    /// Delete a session
    Delete { session_id: String },
}

fn parse_category(s: &str) -> std::result::Result<Category, String> {
    Category::from_str(s).ok_or_else(|| {
        format!(
            "invalid category '{}'. Use: {}",
            s,
            Category::ALL.map(|c| c.as_str()).join(", ")
        )
    })
}

fn parse_status(s: &str) -> std::result::Result<ProgressStatus, String> {
    ProgressStatus::from_str(s)
        .ok_or_else(|| format!("invalid status '{}'. Use: pending, in_progress, done", s))
}

fn parse_link(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
            Ok((name.trim().to_string(), url.trim().to_string()))
        }
        _ => Err(format!("invalid link '{}'. Use: name=url", s)),
    }
}

fn init_tracing() {
    // Logs go to stderr so --json output stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("prepdeck=warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = run(cli) {
        match serde_json::to_string(&JsonOutput::<()>::err(e.to_string())) {
            Ok(out) if json => println!("{}", out),
            _ => eprintln!("Error: {}", e),
        }
        std::process::exit(1);
    }
}

fn print_json<T: Serialize>(data: T) -> Result<()> {
    println!("{}", serde_json::to_string(&JsonOutput::ok(data))?);
    Ok(())
}

/// Running out of items to sample is an ordinary state, reported on stdout.
fn caught_up(json: bool, e: &Error) -> Result<()> {
    if json {
        print_json(serde_json::json!({ "empty": true, "message": e.to_string() }))
    } else {
        match e {
            Error::NoPendingItems => println!("Nothing pending. You're all caught up!"),
            _ => println!("{}.", e),
        }
        Ok(())
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(user) = cli.user {
        config.user_id = user;
    }
    config.ensure_db_dir()?;

    let db = Database::open(&config.db_path)?.with_composition(config.composition.clone());
    db.init()?;
    let user = config.user_id;

    match cli.command {
        Commands::Init => {
            if cli.json {
                print_json(serde_json::json!({ "db_path": config.db_path }))?;
            } else {
                println!("Database initialized at: {}", config.db_path.display());
            }
        }

        Commands::Item(item_cmd) => match item_cmd {
            ItemCommands::List {
                category,
                status,
                starred,
            } => {
                let filter = ItemFilter {
                    category,
                    status,
                    starred_only: starred,
                };
                let items = db.list_with_progress(user, &filter)?;
                if cli.json {
                    print_json(&items)?;
                } else if items.is_empty() {
                    println!("No items found.");
                } else {
                    println!(
                        "{:<5} {:<40} {:<18} {:<18} STATUS",
                        "ID", "TITLE", "CATEGORY", "SUBCATEGORY"
                    );
                    println!("{}", "-".repeat(95));
                    for iwp in items {
                        println!(
                            "{:<5} {:<40} {:<18} {:<18} {}{}",
                            iwp.item.id,
                            truncate(&iwp.item.title, 38),
                            iwp.item.category.label(),
                            truncate(&iwp.item.subcategory, 16),
                            iwp.progress.status.label(),
                            if iwp.progress.starred { " *" } else { "" }
                        );
                    }
                }
            }

            ItemCommands::Add {
                title,
                category,
                subcategory,
                links,
            } => {
                let item = db.add_item(&NewItem {
                    title,
                    category,
                    subcategory,
                    attachments: links.into_iter().collect::<BTreeMap<_, _>>(),
                })?;
                if cli.json {
                    print_json(&item)?;
                } else {
                    println!("Added item '{}' with ID: {}", item.title, item.id);
                }
            }

            ItemCommands::Show { id } => {
                let iwp = db.get_progress(user, id)?;
                if cli.json {
                    print_json(&iwp)?;
                } else {
                    print_item(&iwp);
                }
            }

            ItemCommands::Delete { id } => {
                if db.delete_item(id)? {
                    if cli.json {
                        print_json(())?;
                    } else {
                        println!("Item {} deleted.", id);
                    }
                } else {
                    return Err(Error::NotFound(format!("item {id}")));
                }
            }
        },

        Commands::Next => match db.start_next(user) {
            Ok(iwp) => report_started(cli.json, "Next item", &iwp)?,
            Err(e) if e.is_empty_pool() => caught_up(cli.json, &e)?,
            Err(e) => return Err(e),
        },

        Commands::Skip => match db.skip(user) {
            Ok(iwp) => report_started(cli.json, "Skipped. Next item", &iwp)?,
            Err(e) if e.is_empty_pool() => caught_up(cli.json, &e)?,
            Err(e) => return Err(e),
        },

        Commands::Start { id } => {
            let iwp = db.start(user, id)?;
            report_started(cli.json, "Started", &iwp)?;
        }

        Commands::Complete { id } => {
            let completion = db.complete(user, id)?;
            if cli.json {
                print_json(&completion)?;
            } else {
                print_completion(&completion);
            }
        }

        Commands::Toggle { id } => {
            let iwp = db.toggle_status(user, id)?;
            report_status(cli.json, &iwp)?;
        }

        Commands::SetStatus { id, status } => {
            let iwp = db.set_status(user, id, status)?;
            report_status(cli.json, &iwp)?;
        }

        Commands::Star { id } => {
            let iwp = db.toggle_star(user, id)?;
            if cli.json {
                print_json(&iwp)?;
            } else if iwp.progress.starred {
                println!("Starred '{}'.", iwp.item.title);
            } else {
                println!("Unstarred '{}'.", iwp.item.title);
            }
        }

        Commands::Note { id, text } => {
            let iwp = db.set_notes(user, id, &text)?;
            if cli.json {
                print_json(&iwp)?;
            } else {
                println!("Notes updated for '{}'.", iwp.item.title);
            }
        }

        Commands::Reset => {
            let reset = db.reset_all(user)?;
            if cli.json {
                print_json(serde_json::json!({ "reset": reset }))?;
            } else {
                println!("Reset {} item(s) to pending.", reset);
            }
        }

        Commands::ResetCycles => {
            db.reset_cycle_count(user)?;
            if cli.json {
                print_json(())?;
            } else {
                println!("Cycle counter reset.");
            }
        }

        Commands::Stats { detailed } => {
            if detailed {
                let stats = db.get_detailed_stats(user)?;
                if cli.json {
                    print_json(&stats)?;
                } else {
                    print_stats(&stats.summary);
                    println!();
                    println!("{:<20} {:>6} {:>8} {:>6} {:>7}", "CATEGORY", "DONE", "ACTIVE", "TOTAL", "RATE");
                    println!("{}", "-".repeat(51));
                    for (category, counts) in &stats.by_category {
                        println!(
                            "{:<20} {:>6} {:>8} {:>6} {:>6.0}%",
                            category.label(),
                            counts.done,
                            counts.in_progress,
                            counts.total,
                            counts.completion_rate()
                        );
                    }
                    println!();
                    for sub in &stats.by_subcategory {
                        println!(
                            "  {:<18} {:<24} {}/{}",
                            sub.category.as_str(),
                            truncate(&sub.subcategory, 22),
                            sub.counts.done,
                            sub.counts.total
                        );
                    }
                }
            } else {
                let stats = db.get_stats(user)?;
                if cli.json {
                    print_json(&stats)?;
                } else {
                    print_stats(&stats);
                }
            }
        }

        Commands::Session(session_cmd) => match session_cmd {
            SessionCommands::Check => {
                let verdict = db.can_create_session(user)?;
                if cli.json {
                    print_json(&verdict)?;
                } else if verdict.eligible {
                    println!("Ready for a review session: {}", verdict.reason);
                } else {
                    println!("Not yet: {}", verdict.reason);
                }
            }

            SessionCommands::Create => match db.create_session(user) {
                Ok(session) => {
                    if cli.json {
                        print_json(&session)?;
                    } else {
                        print_session(&session);
                    }
                }
                Err(e) if e.is_empty_pool() => caught_up(cli.json, &e)?,
                Err(e) => return Err(e),
            },

            SessionCommands::Show { session_id } => {
                let session = db.get_session(&session_id)?;
                if cli.json {
                    print_json(&session)?;
                } else {
                    print_session(&session);
                }
            }

            SessionCommands::List => {
                let sessions = db.list_sessions(user)?;
                if cli.json {
                    print_json(&sessions)?;
                } else if sessions.is_empty() {
                    println!("No review sessions yet.");
                } else {
                    println!("{:<38} {:<22} {:>7} STATE", "SESSION", "CREATED", "PENDING");
                    println!("{}", "-".repeat(80));
                    for s in sessions {
                        println!(
                            "{:<38} {:<22} {:>7} {}",
                            s.session_id,
                            s.created_at.format("%Y-%m-%d %H:%M"),
                            s.pending_count(),
                            if s.is_closed() { "closed" } else { "open" }
                        );
                    }
                }
            }

            SessionCommands::Complete {
                session_id,
                item_id,
            } => {
                let item = db.complete_session_item(&session_id, item_id)?;
                report_session_item(cli.json, &item)?;
            }

            SessionCommands::Abandon {
                session_id,
                item_id,
            } => {
                let item = db.abandon_session_item(&session_id, item_id)?;
                report_session_item(cli.json, &item)?;
            }

            SessionCommands::Delete { session_id } => {
                if db.delete_session(&session_id)? {
                    if cli.json {
                        print_json(())?;
                    } else {
                        println!("Session {} deleted.", session_id);
                    }
                } else {
                    return Err(Error::NotFound(format!("session {session_id}")));
                }
            }
        },
    }

    Ok(())
}

fn print_item(iwp: &ItemWithProgress) {
    let item = &iwp.item;
    let p = &iwp.progress;
    println!("Item: {}", item.title);
    println!("ID: {}", item.id);
    println!("Category: {} / {}", item.category.label(), item.subcategory);
    for (name, url) in &item.attachments {
        println!("  {}: {}", name, url);
    }
    println!();
    println!("Status: {}{}", p.status.label(), if p.starred { " (starred)" } else { "" });
    if let Some(started) = &p.started_at {
        println!("Started: {}", started);
    }
    if let Some(completed) = &p.completed_at {
        println!("Completed: {}", completed);
    }
    if !p.notes.is_empty() {
        println!("Notes: {}", p.notes);
    }
}

fn report_started(json: bool, heading: &str, iwp: &ItemWithProgress) -> Result<()> {
    if json {
        return print_json(iwp);
    }
    println!("=== {} ===", heading);
    println!();
    print_item(iwp);
    println!();
    println!("When you're done, record it with:");
    println!("  prepdeck complete {}", iwp.item.id);
    Ok(())
}

fn report_status(json: bool, iwp: &ItemWithProgress) -> Result<()> {
    if json {
        print_json(iwp)
    } else {
        println!("'{}' is now {}.", iwp.item.title, iwp.progress.status.label());
        Ok(())
    }
}

fn print_completion(c: &Completion) {
    println!("Completed '{}'.", c.item.item.title);
    println!(
        "Streak: {} day(s) (longest {})",
        c.stats.current_streak, c.stats.longest_streak
    );
    if c.cycle_completed {
        println!();
        println!(
            "You finished the whole catalog! Cycles completed: {}",
            c.stats.completed_all_count
        );
        println!("Run `prepdeck reset` to go around again.");
    } else {
        println!("{} item(s) left.", c.stats.total_items - c.stats.completed_items);
    }
}

fn print_stats(stats: &Stats) {
    let rate = if stats.total_items == 0 {
        0.0
    } else {
        stats.completed_items as f64 / stats.total_items as f64 * 100.0
    };
    println!("=== Progress Statistics ===");
    println!("Total items: {}", stats.total_items);
    println!("Completed: {} ({:.0}%)", stats.completed_items, rate);
    println!("In progress: {}", stats.in_progress_items);
    println!("Pending: {}", stats.pending_items);
    println!("Starred: {}", stats.starred_items);
    println!("Cycles completed: {}", stats.completed_all_count);
    println!(
        "Streak: {} day(s) (longest {})",
        stats.current_streak, stats.longest_streak
    );
    if let Some(last) = &stats.last_activity_date {
        println!("Last active: {}", last);
    }
}

fn print_session(session: &TestSession) {
    println!("=== Review Session {} ===", session.session_id);
    println!("Created: {}", session.created_at.format("%Y-%m-%d %H:%M"));
    println!();
    println!("{:<7} {:<20} {}", "ITEM", "CATEGORY", "STATUS");
    for item in &session.items {
        println!(
            "{:<7} {:<20} {}",
            item.item_id,
            item.category.label(),
            item.status.as_str()
        );
    }
    if session.is_closed() {
        println!();
        println!("Session closed.");
    }
}

fn report_session_item(json: bool, item: &SessionItem) -> Result<()> {
    if json {
        print_json(item)
    } else {
        println!(
            "Item {} in session {} marked {}.",
            item.item_id,
            item.session_id,
            item.status.as_str()
        );
        Ok(())
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
