//! CMS administration CLI
//!
//! Runs migrations, health checks, reports and hit-log maintenance against
//! the database named in the application configuration.

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use cms_cli::commands::{categories, database, hits, stats, CommandContext};
use cms_cli::output::OutputFormat;
use cms_common::{config::AppConfig, pagination::DateRange, telemetry::init_tracing};
use cms_domain::{hit::TargetKind, EventId, SurveyId};

/// Upper bound for every `--days` style argument
const MAX_DAYS: i64 = DateRange::MAX_DAYS as i64;

#[derive(Parser, Debug)]
#[command(name = "cms-admin")]
#[command(author, version, about = "CMS backend administration")]
#[command(long_about = "Administration tool for the CMS backend.\n\n\
    Reads database settings from config/default, config/$CMS_ENV and CMS__* environment variables.")]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(short = 'o', long, global = true, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Check database connectivity
    Health,

    /// Category commands
    #[command(alias = "cat")]
    Categories {
        #[command(subcommand)]
        command: CategoryCommands,
    },

    /// Statistics and reports
    Stats {
        #[command(subcommand)]
        command: StatsCommands,
    },

    /// Hit log maintenance
    Hits {
        #[command(subcommand)]
        command: HitCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
enum CategoryCommands {
    /// Show the category tree
    Tree,

    /// Show a category and its parents
    Path {
        /// Category slug
        slug: String,
    },
}

#[derive(Subcommand, Debug)]
enum StatsCommands {
    /// Content totals across the site
    Overview,

    /// Hits per day
    Traffic {
        /// Content kind (article, news, video, event, survey)
        #[arg(short, long, default_value = "article")]
        kind: TargetKind,

        /// Narrow to a single item
        #[arg(short, long)]
        target: Option<Uuid>,

        /// Number of days up to today
        #[arg(short, long, default_value = "7", value_parser = clap::value_parser!(u32).range(1..=MAX_DAYS))]
        days: u32,
    },

    /// Most visited items
    Top {
        #[arg(short, long, default_value = "article")]
        kind: TargetKind,

        #[arg(short, long, default_value = "30", value_parser = clap::value_parser!(u32).range(1..=MAX_DAYS))]
        days: u32,

        /// Maximum number of results
        #[arg(short, long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..=100))]
        limit: u32,
    },

    /// New WeChat followers per day
    Subscriptions {
        #[arg(short, long, default_value = "30", value_parser = clap::value_parser!(u32).range(1..=MAX_DAYS))]
        days: u32,
    },

    /// Results of a survey
    Survey {
        #[arg(value_name = "SURVEY_ID")]
        id: SurveyId,
    },

    /// Registrations of an event
    Event {
        #[arg(value_name = "EVENT_ID")]
        id: EventId,
    },
}

#[derive(Subcommand, Debug)]
enum HitCommands {
    /// Delete old hits
    Purge {
        /// Keep this many days of hits
        #[arg(long, value_name = "DAYS", default_value = "180", value_parser = clap::value_parser!(u32).range(1..=MAX_DAYS))]
        older_than: u32,
    },
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "cms-admin", &mut std::io::stdout());
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load()?;
    let log_level = if cli.verbose {
        "debug"
    } else {
        config.telemetry.log_level.as_str()
    };
    init_tracing(&config.telemetry.service_name, config.telemetry.json_logging, log_level)?;

    let ctx = CommandContext::connect(&config, cli.format).await?;

    match cli.command {
        Commands::Migrate => database::migrate(&ctx).await,
        Commands::Health => database::health(&ctx).await,

        Commands::Categories { command } => match command {
            CategoryCommands::Tree => categories::tree(&ctx).await,
            CategoryCommands::Path { slug } => categories::path(&ctx, &slug).await,
        },

        Commands::Stats { command } => match command {
            StatsCommands::Overview => stats::overview(&ctx).await,
            StatsCommands::Traffic { kind, target, days } => stats::traffic(&ctx, kind, target, days).await,
            StatsCommands::Top { kind, days, limit } => stats::top(&ctx, kind, days, limit).await,
            StatsCommands::Subscriptions { days } => stats::subscriptions(&ctx, days).await,
            StatsCommands::Survey { id } => stats::survey(&ctx, id).await,
            StatsCommands::Event { id } => stats::event(&ctx, id).await,
        },

        Commands::Hits { command } => match command {
            HitCommands::Purge { older_than } => hits::purge(&ctx, older_than).await,
        },

        // Handled before configuration is loaded
        Commands::Completions { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Commands::Completions { shell } = cli.command {
        generate_completions(shell);
        return;
    }

    let verbose = cli.verbose;
    if let Err(e) = run(cli).await {
        use colored::Colorize;
        eprintln!("{} {}", "Error:".red().bold(), e);
        if verbose {
            eprintln!("\n{:?}", e);
        }
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_traffic() {
        let cli = Cli::parse_from(["cms-admin", "-o", "json", "stats", "traffic", "--kind", "video", "--days", "14"]);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Stats {
                command: StatsCommands::Traffic { kind, target, days },
            } => {
                assert_eq!(kind, TargetKind::Video);
                assert!(target.is_none());
                assert_eq!(days, 14);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_out_of_range_days() {
        assert!(Cli::try_parse_from(["cms-admin", "stats", "traffic", "--days", "200000000"]).is_err());
        assert!(Cli::try_parse_from(["cms-admin", "stats", "subscriptions", "--days", "0"]).is_err());
        assert!(Cli::try_parse_from(["cms-admin", "hits", "purge", "--older-than", "4000000000"]).is_err());
        assert!(Cli::try_parse_from(["cms-admin", "stats", "top", "--days", "3650"]).is_ok());
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        assert!(Cli::try_parse_from(["cms-admin", "stats", "top", "--kind", "podcast"]).is_err());
    }
}
