//! Job command handlers
//!
//! Handles all job-related CLI commands: the saved-job catalogue, starting
//! and stopping runs, and reading logs and run history.

use anyhow::{Result, anyhow, bail};
use clap::Subcommand;
use colored::*;
use foreman_client::OrchestratorClient;
use foreman_core::domain::job::{GroupStatus, Job, JobStatus};
use foreman_core::domain::outcome::RunOutcome;
use foreman_core::dto::job::{CloneJob, CreateJob};
use foreman_core::dto::log::{JobLog, LogChunk, LogOverview};
use foreman_core::dto::run::{GroupSpec, RunHistory, RunJobRequest, RunLaunched};
use std::io::Write;

use crate::config::Config;
use crate::id_resolver::resolve_job_id;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// List all jobs
    List,
    /// Get job details
    Get {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Create a saved job
    Create {
        /// Display name
        name: String,

        /// Workflow to run (defaults to configbuild)
        #[arg(short, long)]
        workflow: Option<String>,

        /// Server class for configbuild (J or I)
        #[arg(long)]
        server_class: Option<String>,

        /// Default host scope
        #[arg(long)]
        hosts: Option<String>,

        /// Inventory file
        #[arg(long)]
        inventory: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },
    /// Start a run
    Run {
        /// Job ID or unambiguous prefix
        id: String,

        /// Task tags, comma separated
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Run a different workflow than the job's own
        #[arg(short, long)]
        workflow: Option<String>,

        /// Host scope for this run
        #[arg(long)]
        hosts: Option<String>,

        /// Parallel group as ID[:TAGS[:HOSTS]], repeat for each group
        #[arg(short, long = "group", value_parser = parse_group_spec)]
        groups: Vec<GroupSpec>,
    },
    /// Stop a running job
    Stop {
        /// Job ID or unambiguous prefix
        id: String,

        /// Stop only this group
        #[arg(short, long)]
        group: Option<String>,
    },
    /// Show the job log
    Log {
        /// Job ID or unambiguous prefix
        id: String,

        /// Group to show when the run has several
        #[arg(short, long)]
        group: Option<String>,

        /// Keep printing new output until the run ends
        #[arg(short, long)]
        follow: bool,
    },
    /// List past runs
    Runs {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Delete a job and its files
    Delete {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Copy a job into a new saved job
    Clone {
        /// Job ID or unambiguous prefix
        id: String,

        /// Name of the copy
        #[arg(short, long)]
        name: Option<String>,
    },
}

/// Routes job subcommands to their respective handlers.
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        JobCommands::List => list_jobs(&client).await,
        JobCommands::Get { id } => get_job(&client, &id).await,
        JobCommands::Create {
            name,
            workflow,
            server_class,
            hosts,
            inventory,
            notes,
        } => {
            let req = CreateJob {
                job_name: name,
                workflow,
                server_class,
                host_limit: hosts,
                inventory_path: inventory,
                notes,
            };
            create_job(&client, req).await
        }
        JobCommands::Run {
            id,
            tags,
            workflow,
            hosts,
            groups,
        } => {
            let req = RunJobRequest {
                tags,
                workflow_override: workflow,
                hosts,
                groups,
            };
            run_job(&client, &id, req).await
        }
        JobCommands::Stop { id, group } => stop_job(&client, &id, group.as_deref()).await,
        JobCommands::Log { id, group, follow } => {
            show_log(&client, config, &id, group.as_deref(), follow).await
        }
        JobCommands::Runs { id } => list_runs(&client, &id).await,
        JobCommands::Delete { id } => delete_job(&client, &id).await,
        JobCommands::Clone { id, name } => clone_job(&client, &id, name).await,
    }
}

/// Parses `ID[:TAGS[:HOSTS]]` into a group spec
///
/// `g1:powerup,lldp:10.0.0.1,10.0.0.2` runs tags `powerup` and `lldp`
/// against two hosts.
fn parse_group_spec(raw: &str) -> std::result::Result<GroupSpec, String> {
    let mut parts = raw.splitn(3, ':');
    let group_id = parts.next().unwrap_or_default().trim();
    if group_id.is_empty() {
        return Err(format!("group '{}' has no id", raw));
    }

    let tags = parts
        .next()
        .map(|t| {
            t.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let hosts = parts.next().unwrap_or_default().trim().to_string();

    Ok(GroupSpec {
        group_id: group_id.to_string(),
        tags,
        hosts,
        ..Default::default()
    })
}

async fn list_jobs(client: &OrchestratorClient) -> Result<()> {
    let jobs = client.list_jobs().await?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

async fn get_job(client: &OrchestratorClient, id: &str) -> Result<()> {
    let job_id = resolve_job_id(client, id).await?;
    let job = client.get_job(&job_id).await?;

    print_job_details(&job);

    Ok(())
}

async fn create_job(client: &OrchestratorClient, req: CreateJob) -> Result<()> {
    let job = client.create_job(req).await?;

    println!("{} Created job {}", "✓".green(), job.job_id.cyan());
    println!("  Workflow: {}", job.workflow);

    Ok(())
}

async fn run_job(client: &OrchestratorClient, id: &str, req: RunJobRequest) -> Result<()> {
    if req.groups.len() == 1 && !req.tags.is_empty() {
        bail!("Use either --tags or a single --group, not both");
    }

    let job_id = resolve_job_id(client, id).await?;

    let launched = match client.run_job(&job_id, req).await {
        Ok(launched) => launched,
        Err(err) if err.is_retryable() => {
            println!("{}", "⚠ Run queue is full, try again later.".yellow());
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    match launched {
        RunLaunched::Single(run) => {
            println!(
                "{} Started run {} of {} (pid {})",
                "✓".green(),
                run.run_id.cyan(),
                run.job_id,
                run.pid
            );
            if !run.tags.is_empty() {
                println!("  Tags: {}", run.tags.join(", "));
            }
            println!("  Log:  {}", run.log_path.dimmed());
        }
        RunLaunched::Groups(run) => {
            println!(
                "{} Started run {} of {} with {} group(s)",
                "✓".green(),
                run.run_id.cyan(),
                run.job_id,
                run.groups.len()
            );
            for (group_id, group) in &run.groups {
                println!(
                    "  {} {} ({}) pid {}",
                    "▸".cyan(),
                    group_id,
                    group.label,
                    group.pid
                );
                if !group.hosts.is_empty() {
                    println!("    Hosts: {}", group.hosts);
                }
            }
        }
    }

    Ok(())
}

async fn stop_job(client: &OrchestratorClient, id: &str, group: Option<&str>) -> Result<()> {
    let job_id = resolve_job_id(client, id).await?;
    let outcome = client.stop_job(&job_id, group).await?;

    if outcome.stopped.is_empty() {
        let note = outcome.note.as_deref().unwrap_or("nothing to stop");
        println!("{} {}", "•".dimmed(), note);
    } else {
        let pids: Vec<String> = outcome.stopped.iter().map(u32::to_string).collect();
        println!(
            "{} Stopped {} (pid {})",
            "✓".green(),
            outcome.job_id,
            pids.join(", ")
        );
    }

    Ok(())
}

async fn show_log(
    client: &OrchestratorClient,
    config: &Config,
    id: &str,
    group: Option<&str>,
    follow: bool,
) -> Result<()> {
    let job_id = resolve_job_id(client, id).await?;
    let mut offset = 0;

    loop {
        let chunk = match client.get_job_log(&job_id, offset, group).await? {
            JobLog::Overview(overview) => {
                print_log_overview(&overview);
                return Ok(());
            }
            JobLog::Chunk(chunk) => chunk,
        };

        if let Some(note) = &chunk.note {
            eprintln!("{}", note.dimmed());
        }
        print!("{}", chunk.text);
        std::io::stdout().flush()?;
        offset = chunk.offset;

        if !follow || !still_writing(&chunk) {
            return Ok(());
        }
        tokio::time::sleep(config.follow_interval).await;
    }
}

/// Whether more output can still arrive for the log being read
fn still_writing(chunk: &LogChunk) -> bool {
    match chunk.group_status {
        Some(status) => status == GroupStatus::Running,
        None => chunk.status.is_running(),
    }
}

async fn list_runs(client: &OrchestratorClient, id: &str) -> Result<()> {
    let job_id = resolve_job_id(client, id).await?;
    let history = client.list_runs(&job_id).await?;

    print_run_history(&history);

    Ok(())
}

async fn delete_job(client: &OrchestratorClient, id: &str) -> Result<()> {
    let job_id = resolve_job_id(client, id).await?;

    client.delete_job(&job_id).await.map_err(|err| {
        if err.is_client_error() {
            anyhow!("Cannot delete {}: {}", job_id, err)
        } else {
            err.into()
        }
    })?;

    println!("{} Deleted job {}", "✓".green(), job_id);
    Ok(())
}

async fn clone_job(client: &OrchestratorClient, id: &str, name: Option<String>) -> Result<()> {
    let job_id = resolve_job_id(client, id).await?;
    let overrides = CloneJob {
        job_name: name,
        ..Default::default()
    };
    let job = client.clone_job(&job_id, overrides).await?;

    println!(
        "{} Cloned {} into {} ({})",
        "✓".green(),
        job_id,
        job.job_id.cyan(),
        job.job_name
    );
    Ok(())
}

// =============================================================================
// Output
// =============================================================================

fn print_job_summary(job: &Job) {
    println!("  {} {} {}", "▸".cyan(), job.job_name.bold(), job.job_id.dimmed());
    println!("    Status:   {}", colorize_status(job.status));
    println!("    Workflow: {}", job.workflow);
    println!(
        "    Created:  {}",
        job.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_job_details(job: &Job) {
    println!("{}", "Job Details:".bold());
    println!("  ID:        {}", job.job_id.cyan());
    println!("  Name:      {}", job.job_name);
    println!("  Status:    {}", colorize_status(job.status));
    println!("  Workflow:  {}", job.workflow);
    if !job.server_class.is_empty() {
        println!("  Class:     {}", job.server_class);
    }
    if !job.host_limit.is_empty() {
        println!("  Hosts:     {}", job.host_limit);
    }
    println!("  Created:   {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(updated) = job.updated_at {
        println!("  Updated:   {}", updated.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(count) = job.host_count {
        println!("  Inventory: {} host(s)", count);
    }
    if let Some(count) = job.artifact_count {
        println!("  Artifacts: {}", count);
    }
    if let Some(result) = job.last_run_result.as_deref().filter(|r| !r.is_empty()) {
        println!("  Last run:  {}", result);
    }
    if !job.notes.is_empty() {
        println!("\n{}", "Notes:".bold());
        println!("  {}", job.notes);
    }

    if !job.active_runs.is_empty() {
        println!("\n{}", format!("Run {}:", job.last_run_id).bold());
        for (group_id, group) in &job.active_runs {
            let pid = group.pid().map(|p| format!(" pid {}", p)).unwrap_or_default();
            println!(
                "  {} {} ({}) {}{}",
                "▸".cyan(),
                group_id,
                group.label,
                colorize_group_status(group.status),
                pid.dimmed()
            );
            if !group.tags.is_empty() {
                println!("    Tags:  {}", group.tags.join(", "));
            }
            if !group.hosts.is_empty() {
                println!("    Hosts: {}", group.hosts);
            }
        }
    }
}

fn print_log_overview(overview: &LogOverview) {
    println!(
        "{} {}",
        "Job status:".bold(),
        colorize_status(overview.status)
    );
    println!("{}", "Select a group with --group:".dimmed());
    for group in &overview.groups {
        println!(
            "  {} {} ({}) {} {} bytes",
            "▸".cyan(),
            group.group_id,
            group.label,
            colorize_group_status(group.status),
            group.log_size
        );
    }
}

fn print_run_history(history: &RunHistory) {
    if history.runs.is_empty() {
        println!("{}", "No runs yet.".yellow());
        return;
    }

    println!(
        "{}",
        format!("{} run(s) of {}:", history.runs.len(), history.job_id).bold()
    );
    for run in &history.runs {
        let tags = if run.tags.is_empty() {
            "all tasks".to_string()
        } else {
            run.tags.join(", ")
        };
        println!(
            "  {} {} {} {} {}s [{}]",
            "▸".cyan(),
            run.run_id,
            colorize_outcome(run.result),
            run.workflow,
            run.duration_secs,
            tags.dimmed()
        );
        if run.groups.len() > 1 {
            for group in &run.groups {
                println!(
                    "      {} ({}) {}",
                    group.group_id,
                    group.label,
                    colorize_outcome(group.result)
                );
            }
        }
    }
}

fn colorize_status(status: JobStatus) -> ColoredString {
    let text = status.as_str();
    match status {
        JobStatus::Saved => text.normal(),
        JobStatus::Running => text.cyan(),
        JobStatus::Completed => text.green(),
        JobStatus::Failed => text.red(),
        JobStatus::Stopped => text.yellow(),
    }
}

fn colorize_group_status(status: GroupStatus) -> ColoredString {
    let text = status.as_str();
    match status {
        GroupStatus::Running => text.cyan(),
        GroupStatus::Completed => text.green(),
        GroupStatus::Failed => text.red(),
        GroupStatus::Stopped => text.yellow(),
    }
}

fn colorize_outcome(outcome: RunOutcome) -> ColoredString {
    match outcome {
        RunOutcome::Passed => "passed".green(),
        RunOutcome::Failed => "failed".red(),
        RunOutcome::Unknown => "unknown".dimmed(),
    }
}
