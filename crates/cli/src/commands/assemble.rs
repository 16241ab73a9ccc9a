//! `avs assemble` — Resolve the context manifest and write the briefcase.

use anyhow::Context;
use avs_assembler::{AssemblyState, ContextAssembler, write_briefcase};
use avs_config::AppConfig;
use avs_core::{AssemblyEvent, EventBus};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::{Receiver, error::RecvError};

pub async fn run(path: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    if !config.has_research_credentials() {
        tracing::warn!("No research credentials configured; search entries will record errors");
    }

    let events = Arc::new(EventBus::default());
    let progress = tokio::spawn(render_progress(events.subscribe()));
    let assembler = ContextAssembler::from_config(&config, events);

    println!("📦 Assembling briefcase for {}", path.display());
    let result = assembler.assemble_file(path).await;

    // Dropping the assembler closes the bus, so the renderer always ends.
    drop(assembler);
    let _ = progress.await;

    let assembly = result.with_context(|| format!("assembly of {} failed", path.display()))?;
    let briefcase = write_briefcase(&assembly.story, path).await?;

    println!();
    match assembly.report.state {
        AssemblyState::Assembled => println!("  🎉 Assembly complete"),
        AssemblyState::PartiallyAssembled => println!(
            "  ⚠️  Assembly complete with {} failed asset(s)",
            assembly.report.failures()
        ),
    }
    println!("  Briefcase: {}", briefcase.display());

    Ok(())
}

/// Print one line per event until the run completes or the bus closes.
async fn render_progress(mut rx: Receiver<Arc<AssemblyEvent>>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                tracing::debug!(missed, "Progress renderer fell behind");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        match event.as_ref() {
            AssemblyEvent::Started { entries, .. } => {
                println!("  {entries} context asset(s) to resolve");
            }
            AssemblyEvent::EntryResolved {
                label,
                strategy,
                success,
                detail,
                duration_ms,
                ..
            } => match (success, detail) {
                (true, None) => println!("  ✅ [{strategy}] {label} ({duration_ms}ms)"),
                (true, Some(reason)) => println!("  ⏭️  [{strategy}] {label} ({reason})"),
                (false, detail) => {
                    println!("  ⚠️  [{strategy}] {label}");
                    if let Some(detail) = detail {
                        println!("      {detail}");
                    }
                }
            },
            AssemblyEvent::SessionsClosed { count, .. } => {
                if *count > 0 {
                    println!("  🔌 Closed {count} MCP session(s)");
                }
            }
            AssemblyEvent::Completed { .. } => return,
        }
    }
}
