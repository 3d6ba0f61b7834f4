//! CLI command implementations

use crate::output::{format_bytes, print_json, short_token};
use crate::OutputFormat;
use anyhow::Result;
use console::style;
use std::path::Path;
use stemdrop_core::{Stemdrop, StemdropError};
use stemdrop_types::DownloadRecord;

// ============================================================================
// Packaging Commands
// ============================================================================

pub async fn package(
    core: &Stemdrop,
    model: &str,
    song: &str,
    issue: bool,
    format: OutputFormat,
) -> Result<()> {
    if issue {
        let issued = core.prepare_download(model, song).await?;
        match format {
            OutputFormat::Json => print_json(&issued)?,
            OutputFormat::Human | OutputFormat::Table => {
                println!(
                    "{} Packaged {}",
                    style("✓").green().bold(),
                    style(&issued.file_name).cyan()
                );
                println!("  Link: {}", issued.url);
            }
        }
        return Ok(());
    }

    let archive = core.package(model, song).await?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "archive": archive }))?,
        OutputFormat::Human | OutputFormat::Table => {
            println!(
                "{} Packaged {}",
                style("✓").green().bold(),
                style(archive.display()).cyan()
            );
        }
    }

    Ok(())
}

pub async fn issue(core: &Stemdrop, archive: &Path, format: OutputFormat) -> Result<()> {
    let issued = core.issue(archive).await?;

    match format {
        OutputFormat::Json => print_json(&issued)?,
        OutputFormat::Human | OutputFormat::Table => {
            println!(
                "{} Issued link for {}",
                style("✓").green().bold(),
                style(&issued.file_name).cyan()
            );
            println!("  Token: {}", issued.token);
            println!("  Link: {}", issued.url);
        }
    }

    Ok(())
}

// ============================================================================
// Ledger Commands
// ============================================================================

pub async fn list_records(core: &Stemdrop, pending_only: bool, format: OutputFormat) -> Result<()> {
    let records: Vec<DownloadRecord> = core
        .ledger()
        .records()
        .await?
        .into_iter()
        .filter(|r| !pending_only || !r.consumed)
        .collect();

    match format {
        OutputFormat::Json => print_json(&records)?,
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct RecordRow {
                token: String,
                file: String,
                status: String,
                created: String,
            }

            let rows: Vec<RecordRow> = records
                .iter()
                .map(|r| RecordRow {
                    token: short_token(&r.token),
                    file: r.file_name(),
                    status: status_label(r).to_string(),
                    created: r.created_at.format("%Y-%m-%d %H:%M").to_string(),
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            if records.is_empty() {
                println!("{}", style("No download links found").dim());
                return Ok(());
            }

            for record in &records {
                print_record_summary(record, false);
            }
            println!();
            println!("{} link(s) total", style(records.len()).bold());
        }
    }

    Ok(())
}

pub async fn show_info(core: &Stemdrop, token: &str, format: OutputFormat) -> Result<()> {
    let record = core
        .ledger()
        .record(token)
        .await?
        .ok_or_else(|| StemdropError::RecordNotFound(token.to_string()))?;

    match format {
        OutputFormat::Json => print_json(&record)?,
        _ => print_record_summary(&record, true),
    }

    Ok(())
}

fn status_label(record: &DownloadRecord) -> &'static str {
    if record.consumed {
        "used"
    } else if record.song_path.exists() {
        "pending"
    } else {
        "missing"
    }
}

fn print_record_summary(record: &DownloadRecord, detailed: bool) {
    let label = status_label(record);
    let icon = match label {
        "used" => style("✓").green(),
        "pending" => style("↓").cyan(),
        _ => style("✗").red(),
    };

    println!(
        "{} {} {} [{}]",
        icon,
        style(record.file_name()).bold(),
        style(short_token(&record.token)).dim(),
        style(label).dim()
    );

    if detailed {
        println!("    Token: {}", record.token);
        println!("    Archive: {}", record.song_path.display());
        if let Ok(meta) = std::fs::metadata(&record.song_path) {
            println!("    Size: {}", format_bytes(meta.len()));
        }
        println!("    Issued: {}", record.created_at.to_rfc3339());
        if let Some(consumed_at) = record.consumed_at {
            println!("    Used: {}", consumed_at.to_rfc3339());
        }
        println!();
    }
}

// ============================================================================
// Library Commands
// ============================================================================

pub async fn list_songs(core: &Stemdrop, format: OutputFormat) -> Result<()> {
    let songs = core.library().list_songs().await?;
    print_names(&songs, "No songs found", format)
}

pub async fn list_separated(
    core: &Stemdrop,
    model: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let model = model.unwrap_or_else(|| core.settings().default_model.clone());
    let songs = core.library().list_separated(&model).await?;
    print_names(&songs, "No separated songs found", format)
}

fn print_names(names: &[String], empty: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(names)?,
        OutputFormat::Human | OutputFormat::Table => {
            if names.is_empty() {
                println!("{}", style(empty).dim());
            }
            for name in names {
                println!("{} {}", style("•").cyan(), name);
            }
        }
    }
    Ok(())
}
