use std::path::Path;

use coderoom_config::{CoderoomConfig, SandboxConfig};
use coderoom_core::tree::codec::to_nested;
use coderoom_core::wire::Handshake;
use coderoom_core::FlatTree;
use coderoom_sandbox::{follow as follow_room, MountReport, Sandbox};

type CmdResult = Result<(), Box<dyn std::error::Error>>;

fn sandbox_config(config: &CoderoomConfig, root: Option<String>) -> SandboxConfig {
    let mut sandbox = config.sandbox.clone();
    if let Some(root) = root {
        sandbox.root = root;
    }
    sandbox
}

/// `ws://host:port/ws` for the configured server.
fn default_url(config: &CoderoomConfig) -> String {
    let host = match config.server.host.as_str() {
        "0.0.0.0" => "127.0.0.1",
        "::" => "[::1]",
        host => host,
    };
    format!("ws://{}:{}/ws", host, config.server.port)
}

fn print_report(report: &MountReport) {
    println!(
        "{} directories, {} files written",
        report.dirs_created, report.files_written
    );
    for failure in &report.failures {
        eprintln!("failed: {}: {}", failure.path, failure.error);
    }
}

pub async fn mount(config: &CoderoomConfig, tree: &Path, root: Option<String>) -> CmdResult {
    let flat: FlatTree = serde_json::from_str(&std::fs::read_to_string(tree)?)?;
    let sandbox = Sandbox::from_config(&sandbox_config(config, root))?;

    let report = sandbox.mount(&to_nested(&flat)).await;
    print_report(&report);
    if !report.is_clean() {
        return Err(format!("{} entries could not be written", report.failures.len()).into());
    }
    Ok(())
}

pub async fn run(config: &CoderoomConfig, root: Option<String>) -> CmdResult {
    let sandbox = Sandbox::from_config(&sandbox_config(config, root))?;
    let mut ready = sandbox.subscribe_ready();

    let build = sandbox.build_command();
    eprintln!("Running {} {}", build.program, build.args.join(" "));
    let mut process = sandbox.run_default().await?;

    loop {
        tokio::select! {
            line = process.next_line() => match line {
                Some(line) => println!("{}", line.line),
                None => break,
            },
            Ok(server) = ready.recv() => {
                eprintln!("Server ready at {}", server.url);
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stopping {}", process.program());
                process.kill();
                break;
            }
        }
    }

    match process.wait().await {
        Some(0) | None => Ok(()),
        Some(code) => Err(format!("{} exited with code {}", process.program(), code).into()),
    }
}

pub async fn follow(
    config: &CoderoomConfig,
    url: Option<String>,
    token: &str,
    project: &str,
    run_commands: bool,
    root: Option<String>,
) -> CmdResult {
    let sandbox = Sandbox::from_config(&sandbox_config(config, root))?;
    let url = url.unwrap_or_else(|| default_url(config));
    let handshake = Handshake::new(token, project);

    eprintln!("Following project {} at {}", project, url);
    tokio::select! {
        result = follow_room(&sandbox, &url, &handshake, run_commands) => {
            let stats = result?;
            eprintln!(
                "Session ended: {} updates, {} files written, {} failures, {} runs ({} requested)",
                stats.deltas, stats.files_written, stats.failures, stats.runs, stats.run_requests
            );
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted");
        }
    }
    Ok(())
}
