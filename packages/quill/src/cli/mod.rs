pub mod edit;

use std::fmt::Write as _;

use agent_edit::{FileInfo, GatewayError, HttpGateway, Snapshot, VersionGateway};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Local};

use crate::config::ServerConfig;

/// Turn a store error into something a person can act on.
fn store_error(err: GatewayError, server: &ServerConfig) -> anyhow::Error {
    match err {
        GatewayError::Unavailable => anyhow!(
            "Document store at {} is not reachable. Is the backend running?",
            server.api_base
        ),
        other => other.into(),
    }
}

fn gateway(server: &ServerConfig) -> HttpGateway {
    HttpGateway::new(server.api_base.clone())
}

pub async fn history_command(server: &ServerConfig, path: &str, json: bool) -> Result<()> {
    let list = gateway(server)
        .list_snapshots(path)
        .await
        .map_err(|e| store_error(e, server))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
    } else if list.snapshots.is_empty() {
        println!("No snapshots for {path}.");
    } else {
        print!("{}", render_history(&list.snapshots));
    }
    Ok(())
}

pub async fn revert_command(server: &ServerConfig, path: &str, snapshot_id: &str) -> Result<()> {
    let receipt = gateway(server)
        .revert(path, snapshot_id)
        .await
        .map_err(|e| store_error(e, server))?;
    println!(
        "Reverted {} to {} (new snapshot {})",
        receipt.path,
        short_id(snapshot_id),
        receipt.snapshot_id
    );
    Ok(())
}

pub async fn files_command(server: &ServerConfig, json: bool) -> Result<()> {
    let files = gateway(server)
        .list_files()
        .await
        .map_err(|e| store_error(e, server))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
    } else if files.is_empty() {
        println!("No documents.");
    } else {
        print!("{}", render_files(&files));
    }
    Ok(())
}

pub async fn new_command(server: &ServerConfig, path: &str, template: Option<&str>) -> Result<()> {
    gateway(server)
        .create_file(path, template)
        .await
        .map_err(|e| store_error(e, server))?;
    println!("Created {path}");
    Ok(())
}

pub async fn show_command(server: &ServerConfig, path: &str) -> Result<()> {
    let file = gateway(server)
        .read_file(path)
        .await
        .map_err(|e| store_error(e, server))?;
    print!("{}", file.content);
    if !file.content.ends_with('\n') {
        println!();
    }
    Ok(())
}

fn render_history(snapshots: &[Snapshot]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<10} {:<19} {:<7} {:>9}  {}",
        "ID", "CREATED", "ACTOR", "SIZE", "REASON"
    );
    let _ = writeln!(out, "{}", "-".repeat(72));
    for snap in snapshots {
        let _ = writeln!(
            out,
            "{:<10} {:<19} {:<7} {:>9}  {}",
            short_id(&snap.id),
            format_timestamp(&snap.created_at),
            snap.actor.as_str(),
            format_size(snap.size_bytes),
            snap.reason
        );
    }
    let _ = writeln!(out, "\n{} snapshot(s)", snapshots.len());
    out
}

fn render_files(files: &[FileInfo]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<40} {:>9}  {}", "PATH", "SIZE", "UPDATED");
    let _ = writeln!(out, "{}", "-".repeat(72));
    for file in files {
        let _ = writeln!(
            out,
            "{:<40} {:>9}  {}",
            file.path,
            format_size(file.size_bytes),
            format_timestamp(&file.updated_at)
        );
    }
    let _ = writeln!(out, "\n{} document(s)", files.len());
    out
}

/// First 8 chars of an id.
fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((at, _)) => &id[..at],
        None => id,
    }
}

/// RFC 3339 timestamps in local time; anything else is shown as-is.
fn format_timestamp(ts: &str) -> String {
    match DateTime::parse_from_rfc3339(ts) {
        Ok(dt) => dt
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        Err(_) => ts.to_string(),
    }
}

fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / (KB * KB))
    }
}
