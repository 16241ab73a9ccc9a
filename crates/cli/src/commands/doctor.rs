//! `avs doctor` — Diagnose runtimes, credentials and MCP servers.

use avs_config::AppConfig;
use avs_research::ResearchDispatcher;
use avs_tools::{ConnectionManager, StdioLauncher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Runtimes MCP servers and local execution commonly depend on.
const RUNTIMES: [(&str, &str); 5] = [
    ("node", "MCP tools written for Node (e.g. Firecrawl)"),
    ("npx", "ephemeral Node MCP servers"),
    ("uv", "Python story tooling"),
    ("uvx", "ephemeral Python MCP servers"),
    ("ollama", "local execution"),
];

pub async fn run(story: Option<&Path>) -> anyhow::Result<()> {
    println!("🩺 AVS Doctor — Infrastructure Diagnostics");
    println!("==========================================\n");

    let mut issues = 0;

    // Runtimes
    for (cmd, purpose) in RUNTIMES {
        match find_on_path(cmd) {
            Some(_) => {
                let version = version_of(cmd).await;
                println!("  ✅ {cmd:<7} {version}");
            }
            None => {
                println!("  ⚠️  {cmd:<7} missing (needed for {purpose})");
                if matches!(cmd, "node" | "npx") {
                    issues += 1;
                }
            }
        }
    }
    println!();

    // Config and credentials
    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config file invalid: {e}");
            issues += 1;
            AppConfig::default()
        }
    };

    for (name, present) in [
        ("GEMINI_API_KEY", config.research.gemini_api_key.is_some()),
        ("TAVILY_API_KEY", config.research.tavily_api_key.is_some()),
        (
            "FIRECRAWL_API_KEY",
            std::env::var("FIRECRAWL_API_KEY").is_ok_and(|v| !v.trim().is_empty()),
        ),
    ] {
        if present {
            println!("  ✅ {name} set");
        } else {
            println!("  ⚠️  {name} not set");
        }
    }

    let research = ResearchDispatcher::from_config(&config.research);
    if research.has_configured_backend() {
        println!("  ✅ Research chain: {}", research.backend_names().join(" → "));
    } else {
        println!("  ❌ No research backend configured; web research entries will fail");
        issues += 1;
    }

    // MCP servers declared by a story
    if let Some(path) = story {
        println!();
        issues += check_servers(path, &config).await;
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed! Your workstation is AVS-ready.");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

/// Launch every server the story declares, list its tools, then shut down.
async fn check_servers(path: &Path, config: &AppConfig) -> usize {
    let story = match avs_core::load_story(path).await {
        Ok(story) => story,
        Err(e) => {
            println!("  ❌ {}: {e}", path.display());
            return 1;
        }
    };
    if story.mcp_servers.is_empty() {
        println!("  ✅ {} declares no MCP servers", story.metadata.story_id);
        return 0;
    }

    let launcher = Arc::new(StdioLauncher::new(config.tools.handshake_timeout()));
    let names: Vec<String> = story.mcp_servers.iter().map(|s| s.name.clone()).collect();
    let manager = ConnectionManager::new(story.mcp_servers, launcher);

    let mut issues = 0;
    for name in &names {
        let listed = match manager.obtain(name).await {
            Ok(session) => session.list_tools().await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match listed {
            Ok(tools) => {
                let tool_names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
                println!("  ✅ MCP server '{name}': {}", tool_names.join(", "));
            }
            Err(e) => {
                println!("  ❌ MCP server '{name}': {e}");
                issues += 1;
            }
        }
    }
    manager.shutdown().await;
    issues
}

fn find_on_path(cmd: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(cmd);
        if candidate.is_file() {
            return Some(candidate);
        }
        #[cfg(target_os = "windows")]
        for ext in ["exe", "cmd", "bat"] {
            let candidate = dir.join(format!("{cmd}.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    })
}

async fn version_of(cmd: &str) -> String {
    let output = tokio::time::timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(cmd)
            .arg("--version")
            .kill_on_drop(true)
            .output(),
    )
    .await;
    match output {
        Ok(Ok(out)) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .next()
            .unwrap_or("unknown")
            .trim()
            .to_string(),
        _ => "version unknown".to_string(),
    }
}
