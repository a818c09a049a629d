//! Merge queue operator CLI.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::QueueRulesConfig;
use mergequeue_core::{
    MergeQueueEngine, PrNumber, QueueConfig, QueueRule, RefreshOrchestrator, Sha, SqlitePersistence,
    UnexpectedChange, UpdateStrategy,
};
use mergequeue_github::{GitHubHost, MergeableConditionEvaluator};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Mirrors `orchestrate-cli`'s verbosity ladder: `-v` for info, `-vv` for
/// debug, `-vvv` for trace, with `--quiet` overriding everything to errors.
fn init_logging(verbose: u8, quiet: bool, json: bool) -> Result<()> {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env().add_directive(format!("mergequeue={}", level).parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .with_file(verbose >= 3)
        .with_line_number(verbose >= 3);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "mergequeue")]
#[command(about = "Operator CLI for the merge-train scheduler")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database path backing the train store
    #[arg(long, env = "MERGEQUEUE_DB_PATH", default_value = "~/.mergequeue/mergequeue.db", global = true)]
    db_path: String,

    /// GitHub token used for every host-facing operation
    #[arg(long, env = "GITHUB_TOKEN", global = true)]
    github_token: Option<String>,

    /// Increase verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output logs as JSON (for machine parsing)
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and operate on individual trains
    Train {
        #[command(subcommand)]
        action: TrainAction,
    },
    /// Validate a queue-rules configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Sweep every train of an installation
    Sweep {
        /// Installation owner id whose trains should be refreshed
        #[arg(long)]
        installation_owner_id: i64,
        /// Repository owner login, e.g. "acme"
        #[arg(long)]
        owner: String,
        /// Repository name, e.g. "widgets"
        #[arg(long)]
        repo: String,
        /// Path to a YAML or TOML queue-rules file
        #[arg(long)]
        queue_rules: String,
    },
    /// Start the webhook/metrics HTTP server
    Serve {
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Path to a YAML or TOML queue-rules file
        #[arg(long)]
        queue_rules: String,
    },
}

#[derive(Subcommand)]
enum TrainAction {
    /// Print a train's persisted state
    Show {
        #[arg(long)]
        repo_id: i64,
        #[arg(long)]
        target_ref: String,
        /// Print the raw JSON document instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List every non-empty train for an installation
    List {
        #[arg(long)]
        installation_owner_id: i64,
    },
    /// Force a `refresh` of one train
    Refresh {
        #[arg(long)]
        repo_id: i64,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        #[arg(long)]
        target_ref: String,
        /// Path to a YAML or TOML queue-rules file
        #[arg(long)]
        queue_rules: String,
    },
    /// Force a `reset` of one train because the target branch moved
    /// unexpectedly
    Reset {
        #[arg(long)]
        repo_id: i64,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        #[arg(long)]
        target_ref: String,
        /// SHA the train expected the target branch to be at
        #[arg(long)]
        expected_sha: String,
        /// SHA the target branch was actually observed at
        #[arg(long)]
        actual_sha: String,
    },
    /// Embark a pull request onto a train
    AddPull {
        #[arg(long)]
        installation_owner_id: i64,
        #[arg(long)]
        repo_id: i64,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        #[arg(long)]
        target_ref: String,
        #[arg(long)]
        pr_number: PrNumber,
        /// Path to a YAML or TOML queue-rules file
        #[arg(long)]
        queue_rules: String,
        /// Which queue rule in the file this pull should use
        #[arg(long)]
        queue_name: String,
        #[arg(long, default_value_t = 0)]
        priority: i32,
        #[arg(long, value_enum, default_value_t = UpdateStrategyArg::Merge)]
        update_strategy: UpdateStrategyArg,
    },
    /// Remove a pull request from a train, without merging it
    RemovePull {
        #[arg(long)]
        repo_id: i64,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        #[arg(long)]
        target_ref: String,
        #[arg(long)]
        pr_number: PrNumber,
        /// Merge commit SHA, if the pull was in fact merged
        #[arg(long)]
        merge_commit_sha: Option<Sha>,
    },
    /// Remove a pull request from every train of the installation
    ForceRemovePull {
        #[arg(long)]
        installation_owner_id: i64,
        #[arg(long)]
        repo_id: i64,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        #[arg(long)]
        pr_number: PrNumber,
        /// Branch whose train should be left untouched
        #[arg(long)]
        exclude_ref: Option<String>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum UpdateStrategyArg {
    Merge,
    Rebase,
}

impl From<UpdateStrategyArg> for UpdateStrategy {
    fn from(value: UpdateStrategyArg) -> Self {
        match value {
            UpdateStrategyArg::Merge => UpdateStrategy::Merge,
            UpdateStrategyArg::Rebase => UpdateStrategy::Rebase,
        }
    }
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Parse a queue-rules file and print the resolved rules
    Validate {
        #[arg(long)]
        path: String,
    },
}

fn require_token(token: Option<String>) -> Result<String> {
    token.context("a GitHub token is required (pass --github-token or set GITHUB_TOKEN)")
}

async fn open_persistence(db_path: &str) -> Result<SqlitePersistence> {
    let expanded = shellexpand::tilde(db_path).into_owned();
    SqlitePersistence::new(&expanded)
        .await
        .with_context(|| format!("opening database at {expanded}"))
}

fn print_signals(signals: &[mergequeue_core::RefreshSignal]) {
    if signals.is_empty() {
        println!("No refresh signals emitted.");
        return;
    }
    println!("{:<10} {:<10} {:<10} {}", "REPO", "PR", "ACTION", "SOURCE");
    for signal in signals {
        println!(
            "{:<10} {:<10} {:<10} {}",
            signal.repo_id,
            signal.pr_number,
            format!("{:?}", signal.action),
            signal.source
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet, cli.log_json)?;

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let config = QueueRulesConfig::load(&path).with_context(|| format!("loading {path}"))?;
                if config.rules.is_empty() {
                    println!("{path} parsed successfully but defines no queues.");
                }
                for (name, rule) in &config.rules {
                    println!(
                        "{:<20} batch_size={:<4} speculative_checks={:<4} wait={:<6?} interruptible={:<5} inplace={}",
                        name,
                        rule.batch_size,
                        rule.speculative_checks,
                        rule.batch_max_wait_time,
                        rule.allow_checks_interruption,
                        rule.allow_inplace_checks
                    );
                }
            }
        },
        Commands::Sweep {
            installation_owner_id,
            owner,
            repo,
            queue_rules,
        } => {
            let persistence = Arc::new(open_persistence(&cli.db_path).await?);
            let host = Arc::new(GitHubHost::new(require_token(cli.github_token)?));
            let evaluator = Arc::new(MergeableConditionEvaluator);
            let orchestrator = RefreshOrchestrator::new(persistence, host, evaluator);
            let rules = load_rules(&queue_rules)?;

            let report = orchestrator
                .refresh_trains(installation_owner_id, &owner, &repo, &rules, chrono::Utc::now())
                .await?;
            println!(
                "Refreshed {} train(s), {} delayed refresh(es) scheduled.",
                report.trains_refreshed,
                report.delayed_refreshes.len()
            );
            print_signals(&report.signals);
        }
        Commands::Serve { port, queue_rules } => {
            let rules = load_rules(&queue_rules)?;
            let expanded = shellexpand::tilde(&cli.db_path).into_owned();
            let state = mergequeue_web::AppState::production(
                &expanded,
                require_token(cli.github_token)?,
                Arc::new(mergequeue_web::auth::AllowAll),
                rules,
            )
            .await?;
            let app = mergequeue_web::build_router(state);

            let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
            println!("mergequeue listening on http://0.0.0.0:{port}");
            println!("  webhook: POST /webhooks/merge-queue");
            println!("  metrics: GET  /metrics");
            axum::serve(listener, app).await?;
        }
        Commands::Train { action } => match action {
            TrainAction::Show { repo_id, target_ref, json } => {
                let persistence = open_persistence(&cli.db_path).await?;
                let Some(train) = persistence.load(repo_id, &target_ref).await? else {
                    println!("No train recorded for repo {repo_id} / {target_ref}.");
                    return Ok(());
                };

                if json {
                    println!("{}", serde_json::to_string_pretty(&train)?);
                    return Ok(());
                }

                println!("Train for repo {repo_id} / {target_ref}");
                println!("  base sha: {}", train.current_base_sha.as_deref().unwrap_or("(unknown)"));
                println!("  cars: {}", train.cars.len());
                for (i, car) in train.cars.iter().enumerate() {
                    let numbers: Vec<String> = car
                        .still_queued_embarked_pulls
                        .iter()
                        .map(|p| format!("#{}", p.pr_number))
                        .collect();
                    println!("    [{i}] state={:?} checks={:?} pulls={}", car.creation_state, car.checks_conclusion, numbers.join(", "));
                }
                println!("  waiting: {}", train.waiting_pulls.len());
                for pull in &train.waiting_pulls {
                    println!("    #{} queue={} priority={}", pull.pr_number, pull.queue_name(), pull.effective_priority());
                }
            }
            TrainAction::List { installation_owner_id } => {
                let persistence = open_persistence(&cli.db_path).await?;
                let trains = persistence.list_for_installation(installation_owner_id).await?;
                if trains.is_empty() {
                    println!("No trains recorded for installation {installation_owner_id}.");
                    return Ok(());
                }
                println!("{:<12} {:<24} {:<6} {:<8}", "REPO_ID", "TARGET_REF", "CARS", "WAITING");
                for train in &trains {
                    println!(
                        "{:<12} {:<24} {:<6} {:<8}",
                        train.repo_id,
                        train.target_ref,
                        train.cars.len(),
                        train.waiting_pulls.len()
                    );
                }
            }
            TrainAction::Refresh {
                repo_id,
                owner,
                repo,
                target_ref,
                queue_rules,
            } => {
                let persistence = Arc::new(open_persistence(&cli.db_path).await?);
                let host = Arc::new(GitHubHost::new(require_token(cli.github_token)?));
                let evaluator = Arc::new(MergeableConditionEvaluator);
                let engine = MergeQueueEngine::new(persistence, host, evaluator);
                let rules = load_rules(&queue_rules)?;

                let signals = engine
                    .refresh(repo_id, &owner, &repo, &target_ref, &rules, chrono::Utc::now())
                    .await?;
                println!("Refreshed repo {repo_id} / {target_ref}.");
                print_signals(&signals);
            }
            TrainAction::Reset {
                repo_id,
                owner,
                repo,
                target_ref,
                expected_sha,
                actual_sha,
            } => {
                let persistence = Arc::new(open_persistence(&cli.db_path).await?);
                let host = Arc::new(GitHubHost::new(require_token(cli.github_token)?));
                let evaluator = Arc::new(MergeableConditionEvaluator);
                let engine = MergeQueueEngine::new(persistence, host, evaluator);

                let change = UnexpectedChange::BaseBranchChanged {
                    expected_sha,
                    actual_sha,
                };
                let signals = engine.reset(repo_id, &owner, &repo, &target_ref, change).await?;
                println!("Reset repo {repo_id} / {target_ref}.");
                print_signals(&signals);
            }
            TrainAction::AddPull {
                installation_owner_id,
                repo_id,
                owner,
                repo,
                target_ref,
                pr_number,
                queue_rules,
                queue_name,
                priority,
                update_strategy,
            } => {
                let persistence = Arc::new(open_persistence(&cli.db_path).await?);
                let host = Arc::new(GitHubHost::new(require_token(cli.github_token)?));
                let evaluator = Arc::new(MergeableConditionEvaluator);
                let engine = MergeQueueEngine::new(persistence, host, evaluator);
                let rules = load_rules(&queue_rules)?;

                let Some(rule) = rules.get(&queue_name) else {
                    bail!("queue \"{queue_name}\" is not defined in {queue_rules}");
                };
                let config = QueueConfig::new(rule.clone(), priority).with_update_strategy(update_strategy.into());

                let signals = engine
                    .add_pull(
                        installation_owner_id,
                        repo_id,
                        &owner,
                        &repo,
                        &target_ref,
                        pr_number,
                        config,
                        chrono::Utc::now(),
                    )
                    .await?;
                println!("Embarked #{pr_number} onto repo {repo_id} / {target_ref}.");
                print_signals(&signals);
            }
            TrainAction::RemovePull {
                repo_id,
                owner,
                repo,
                target_ref,
                pr_number,
                merge_commit_sha,
            } => {
                let persistence = Arc::new(open_persistence(&cli.db_path).await?);
                let host = Arc::new(GitHubHost::new(require_token(cli.github_token)?));
                let evaluator = Arc::new(MergeableConditionEvaluator);
                let engine = MergeQueueEngine::new(persistence, host, evaluator);

                let signals = engine
                    .remove_pull(repo_id, &owner, &repo, &target_ref, pr_number, merge_commit_sha)
                    .await?;
                println!("Removed #{pr_number} from repo {repo_id} / {target_ref}.");
                print_signals(&signals);
            }
            TrainAction::ForceRemovePull {
                installation_owner_id,
                repo_id,
                owner,
                repo,
                pr_number,
                exclude_ref,
            } => {
                let persistence = Arc::new(open_persistence(&cli.db_path).await?);
                let host = Arc::new(GitHubHost::new(require_token(cli.github_token)?));
                let evaluator = Arc::new(MergeableConditionEvaluator);
                let engine = MergeQueueEngine::new(persistence, host, evaluator);

                let signals = engine
                    .force_remove_pull(installation_owner_id, repo_id, &owner, &repo, pr_number, exclude_ref.as_deref())
                    .await?;
                println!("Force-removed #{pr_number} from every train of installation {installation_owner_id}.");
                print_signals(&signals);
            }
        },
    }

    Ok(())
}

fn load_rules(path: &str) -> Result<HashMap<String, QueueRule>> {
    Ok(QueueRulesConfig::load(path).with_context(|| format!("loading {path}"))?.rules)
}
