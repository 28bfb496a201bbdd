pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "coachline",
    about = "Coachline operator CLI",
    long_about = "Inspect configuration, apply migrations, and manage per-user CRM profiles and stored conversation context.",
    after_help = "Examples:\n  coachline config\n  coachline profile set u-1 --api-key KEY --api-secret SECRET\n  coachline context show u-1"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(subcommand, about = "Manage a user's CRM connection")]
    Profile(ProfileCommand),
    #[command(subcommand, about = "Inspect or reset a user's stored conversation context")]
    Context(ContextCommand),
}

#[derive(Debug, Subcommand)]
enum ProfileCommand {
    #[command(about = "Create or replace a user's CRM credentials and enable them")]
    Set {
        user_id: String,
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        api_secret: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    #[command(about = "Keep a user's credentials but stop using them")]
    Disable { user_id: String },
    #[command(about = "Show a user's CRM connection with credentials redacted")]
    Show { user_id: String },
}

#[derive(Debug, Subcommand)]
enum ContextCommand {
    #[command(about = "Print the stored topic list")]
    Show { user_id: String },
    #[command(about = "Delete the stored topic list")]
    Clear { user_id: String },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Profile(ProfileCommand::Set { user_id, api_key, api_secret, display_name }) => {
            commands::profile::set(&user_id, &api_key, &api_secret, display_name.as_deref())
        }
        Command::Profile(ProfileCommand::Disable { user_id }) => {
            commands::profile::disable(&user_id)
        }
        Command::Profile(ProfileCommand::Show { user_id }) => commands::profile::show(&user_id),
        Command::Context(ContextCommand::Show { user_id }) => commands::context::show(&user_id),
        Command::Context(ContextCommand::Clear { user_id }) => commands::context::clear(&user_id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
