//! `snre history` - show recorded evolution steps and snapshots.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use snre_core::{EvolutionStep, SessionId};

use super::{print_json, Cli};
use crate::context::AppContext;

#[derive(Args)]
pub struct HistoryArgs {
    /// Session id
    pub id: SessionId,

    /// Print the code snapshot stored for this iteration
    #[arg(long)]
    pub snapshot: Option<u32>,
}

#[derive(Serialize)]
struct HistoryReport {
    session_id: SessionId,
    steps: Vec<EvolutionStep>,
    snapshots: Vec<u32>,
}

pub async fn execute(cli: &Cli, args: &HistoryArgs) -> Result<()> {
    let ctx = AppContext::from_cli(cli).await?;

    if let Some(iteration) = args.snapshot {
        let code = ctx.recorder.snapshot(args.id, iteration).await?;
        if cli.json {
            return print_json(&serde_json::json!({
                "session_id": args.id,
                "iteration": iteration,
                "code": code,
            }));
        }
        println!("{}", code);
        return Ok(());
    }

    let report = HistoryReport {
        session_id: args.id,
        steps: ctx.recorder.history(args.id).await?,
        snapshots: ctx.recorder.snapshots(args.id).await?,
    };
    if cli.json {
        return print_json(&report);
    }

    println!("🧬 Evolution of {} ({} steps)", report.session_id, report.steps.len());
    for step in &report.steps {
        let when = step
            .timestamp
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S");
        match &step.applied {
            Some(change) => {
                let lines = change.lines();
                println!(
                    "   #{:<3} {}  {} {} lines {}-{} score {:.2}",
                    step.iteration,
                    when,
                    change.agent_id(),
                    change.kind(),
                    lines.start + 1,
                    lines.end,
                    step.decision.score
                );
                println!("         {}", change.rationale());
            }
            None => println!(
                "   #{:<3} {}  nothing accepted ({} candidates)",
                step.iteration, when, step.candidates
            ),
        }
        for rejection in &step.rejections {
            println!(
                "         rejected {} by {}",
                rejection.change_id,
                rejection.rejected_by.join(", ")
            );
        }
        for failure in &step.agent_failures {
            println!(
                "         ⚠️  {} failed during {}: {}",
                failure.agent_id, failure.phase, failure.message
            );
        }
    }

    if report.snapshots.is_empty() {
        println!("   No snapshots retained");
    } else {
        let list: Vec<String> = report.snapshots.iter().map(u32::to_string).collect();
        println!("   Snapshots at iterations: {}", list.join(", "));
    }
    Ok(())
}
