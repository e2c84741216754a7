use std::sync::Arc;

use clap::{Parser, Subcommand};

use taskweave::config::Config;
use taskweave::core::{AgentId, EdgeKind, Task, TaskId, TaskStatus};
use taskweave::engine::{GraphEngine, ResolveOutcome};
use taskweave::notify::{ChannelSink, Fanout, Notification, TracingSink};
use taskweave::orchestration::{
    DriveReport, KeywordDecomposer, NewTask, Orchestrator, SimulatedWork,
};
use taskweave::store::{JsonFileStore, Scope};
use taskweave::{Error, Result};

/// taskweave - agent task graphs with human-in-the-loop orchestration
#[derive(Parser, Debug)]
#[command(name = "taskweave")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    TASKWEAVE_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.taskweave/taskweave.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Workspace to operate on (defaults to the configured one)
    #[arg(short = 'w', long)]
    pub workspace: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Create an agent for a goal and run its autonomous tasks
    Start {
        /// The goal in natural language
        goal: String,
    },

    /// Show agents and their tasks
    Status {
        /// Agent id (or unique prefix); all agents when omitted
        agent: Option<String>,
    },

    /// Mark a human-gated task as done and resume its agent
    Resolve {
        /// Task id (or unique prefix)
        task: String,
    },

    /// Stop an agent from starting new tasks
    Pause { agent: String },

    /// Resume a paused agent
    Resume { agent: String },

    /// Add a task to an existing agent
    Add {
        agent: String,
        title: String,

        /// Make the task human-gated with this reason
        #[arg(long)]
        human: Option<String>,

        /// Task this one waits on
        #[arg(long)]
        after: Option<String>,
    },

    /// Drive every agent in the workspace
    Run,

    /// Show the dependency graph, critical path and metrics
    Graph,

    /// Add a dependency edge: TARGET waits on SOURCE
    Link {
        source: String,
        target: String,

        /// fs, ss, ff or sf
        #[arg(long, default_value = "fs")]
        kind: EdgeKind,
    },

    /// Delete a task that nothing depends on
    Delete { task: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    taskweave::log::init_with_debug(cli.debug);

    let config = Config::load()?;
    config.ensure_dirs()?;

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(run(cli, config));
    if let Err(e) = &result {
        tracing::error!(error = %e, "command failed");
    }
    result
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let workspace = cli.workspace.unwrap_or_else(|| config.workspace.clone());
    let store = Arc::new(JsonFileStore::open(&config.data_dir()?).await?);

    let (channel, mut rx) = ChannelSink::new(config.notification_buffer);
    let sink = Fanout::new()
        .with(Arc::new(TracingSink))
        .with(Arc::new(channel));
    let printer = tokio::spawn(async move {
        while let Some(n) = rx.recv().await {
            print_notification(&n);
        }
    });

    let engine = Arc::new(GraphEngine::new(
        Scope::workspace(&workspace),
        store,
        Arc::new(sink),
    ));
    engine.load().await?;

    let orchestrator = Orchestrator::new(
        engine.clone(),
        Arc::new(KeywordDecomposer::new()?),
        Arc::new(SimulatedWork::from_config(&config)),
    )?
    .with_decompose_timeout(config.decompose_timeout());

    let result = dispatch(cli.command, &orchestrator).await;

    drop(orchestrator);
    drop(engine);
    let _ = printer.await;
    result
}

async fn dispatch(command: Command, orch: &Orchestrator) -> Result<()> {
    match command {
        Command::Start { goal } => {
            let (plan, report) = orch.start_agent(&goal).await?;
            println!("Agent {} started for: {}", plan.agent.id.short(), plan.agent.goal);
            if plan.used_fallback {
                println!("  (decomposition failed, using the minimal plan)");
            }
            print_report(&report);
            print_agent_tasks(orch, &plan.agent.id).await
        }
        Command::Status { agent } => match agent {
            Some(prefix) => {
                let id = find_agent(orch, &prefix).await?;
                print_agent_tasks(orch, &id).await
            }
            None => {
                let agents = orch.agents().await?;
                if agents.is_empty() {
                    println!("No agents");
                }
                for agent in agents {
                    let summary = orch.engine().summary_for_agent(&agent.id).await;
                    println!(
                        "{}  {:<9}  {}/{} done  {}",
                        agent.id.short(),
                        agent.status,
                        summary.done,
                        summary.total,
                        agent.goal
                    );
                }
                Ok(())
            }
        },
        Command::Resolve { task } => {
            let id = find_task(orch, &task).await?;
            match orch.resolve(&id).await? {
                ResolveOutcome::Resolved(done) => {
                    println!("Resolved: {}", done.task.title);
                    for ready in done.newly_ready {
                        println!("  now ready: {}", ready.short());
                    }
                }
                ResolveOutcome::AlreadyDone => println!("Task {} is already done", id.short()),
            }
            Ok(())
        }
        Command::Pause { agent } => {
            let id = find_agent(orch, &agent).await?;
            let agent = orch.pause_agent(&id).await?;
            println!("Agent {} is {}", agent.id.short(), agent.status);
            Ok(())
        }
        Command::Resume { agent } => {
            let id = find_agent(orch, &agent).await?;
            let report = orch.resume_agent(&id).await?;
            print_report(&report);
            Ok(())
        }
        Command::Add {
            agent,
            title,
            human,
            after,
        } => {
            let agent_id = find_agent(orch, &agent).await?;
            let mut new = NewTask::new(&title);
            new.human_reason = human;
            if let Some(prefix) = after {
                new.depends_on = Some(find_task(orch, &prefix).await?);
            }
            let task = orch.create_task(&agent_id, new).await?;
            println!("Created {} ({})", task.id.short(), task.status);
            Ok(())
        }
        Command::Run => {
            for (id, report) in orch.drive_all().await? {
                println!("Agent {}", id.short());
                print_report(&report);
            }
            Ok(())
        }
        Command::Graph => print_graph(orch.engine()).await,
        Command::Link {
            source,
            target,
            kind,
        } => {
            let source = find_task(orch, &source).await?;
            let target = find_task(orch, &target).await?;
            let readiness = orch.engine().add_edge(&source, &target, kind).await?;
            println!("Linked {} -> {} ({:?})", source.short(), target.short(), readiness);
            Ok(())
        }
        Command::Delete { task } => {
            let id = find_task(orch, &task).await?;
            let removed = orch.engine().delete_task(&id).await?;
            println!("Deleted: {}", removed.title);
            Ok(())
        }
    }
}

async fn find_task(orch: &Orchestrator, prefix: &str) -> Result<TaskId> {
    let matches: Vec<TaskId> = orch
        .engine()
        .snapshot()
        .await
        .all_tasks()
        .into_iter()
        .map(|t| t.id)
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(Error::Validation(format!("no task matches '{}'", prefix))),
        _ => Err(Error::Validation(format!("'{}' matches several tasks", prefix))),
    }
}

async fn find_agent(orch: &Orchestrator, prefix: &str) -> Result<AgentId> {
    let matches: Vec<AgentId> = orch
        .agents()
        .await?
        .into_iter()
        .map(|a| a.id)
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(Error::Validation(format!("no agent matches '{}'", prefix))),
        _ => Err(Error::Validation(format!("'{}' matches several agents", prefix))),
    }
}

async fn print_agent_tasks(orch: &Orchestrator, id: &AgentId) -> Result<()> {
    let agent = orch.agent(id).await?;
    println!("Agent {} [{}]: {}", agent.id.short(), agent.status, agent.goal);
    for task in orch.engine().tasks_for_agent(id).await {
        print_task(&task);
    }
    Ok(())
}

fn print_task(task: &Task) {
    let marker = match task.status {
        TaskStatus::Done => "x",
        TaskStatus::InProgress => ">",
        TaskStatus::Blocked if task.is_dependency => "!",
        TaskStatus::Blocked => "-",
        TaskStatus::Todo => " ",
    };
    print!("  [{}] {}  {}", marker, task.id.short(), task.title);
    if let Some(reason) = &task.blocked_reason {
        print!("  ({})", reason);
    }
    println!();
}

fn print_report(report: &DriveReport) {
    println!(
        "  completed {}, escalated {}, status {}",
        report.completed.len(),
        report.escalated.len(),
        report.status
    );
    if let Some(failed) = report.failed {
        println!("  stopped after failure of {}", failed.short());
    }
}

async fn print_graph(engine: &GraphEngine) -> Result<()> {
    let graph = engine.snapshot().await;
    for task in graph.topological_order()? {
        print_task(task);
        for blocker in graph.blockers(&task.id) {
            let kind = graph
                .edge_kind(&blocker.id, &task.id)
                .unwrap_or_default();
            println!("        after {} ({})", blocker.id.short(), kind);
        }
    }

    let path: Vec<String> = graph.critical_path().iter().map(|id| id.short()).collect();
    println!("Critical path: {}", path.join(" -> "));

    let m = graph.metrics();
    println!(
        "Nodes {}, edges {}, critical path {}, blocked {}, ready {}",
        m.total_nodes, m.total_edges, m.critical_path_length, m.blocked_count, m.ready_count
    );
    Ok(())
}

fn print_notification(n: &Notification) {
    let task = n.task_id.map(|t| t.short()).unwrap_or_default();
    println!("  * {:<22} {:<8} {}", n.kind.to_string(), task, n.message);
}
