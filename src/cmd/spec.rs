//! Spec lifecycle commands: create, phase, sync, show, list and delete.

use anyhow::Result;
use console::style;

use specflow::App;
use specflow::coordinator::NewSpec;
use specflow::sync::{LinkageOutcome, SyncOutcome, SyncRequest};
use specflow::vcs::BranchOutcome;
use specflow_common::{EntityType, Phase, SyncRecord, SyncStatus, TransitionKind};

fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("  {} {}", style("warning:").yellow(), warning);
    }
}

fn styled_phase(phase: Phase) -> console::StyledObject<&'static str> {
    match phase {
        Phase::Requirements => style(phase.as_str()).cyan(),
        Phase::Design => style(phase.as_str()).blue(),
        Phase::Implementation => style(phase.as_str()).yellow(),
        Phase::Review => style(phase.as_str()).magenta(),
        Phase::Completed => style(phase.as_str()).green(),
    }
}

fn sync_summary(record: &SyncRecord) -> String {
    let status = match record.sync_status {
        SyncStatus::Pending => style("pending").yellow(),
        SyncStatus::Success | SyncStatus::Synced => style("success").green(),
        SyncStatus::Failed => style("failed").red(),
    };
    match (record.github_number, &record.error_message) {
        (Some(number), None) => format!("#{} ({})", number, status),
        (Some(number), Some(err)) => format!("#{} ({}, last error: {})", number, status, err),
        (None, Some(err)) => format!("{}: {}", status, err),
        (None, None) => status.to_string(),
    }
}

pub async fn cmd_create(
    app: &App,
    name: &str,
    description: Option<&str>,
    branch_name: Option<&str>,
    no_branch: bool,
) -> Result<()> {
    let mut new = NewSpec::new(name);
    if let Some(description) = description {
        new = new.with_description(description);
    }
    if let Some(branch_name) = branch_name {
        new = new.with_branch_name(branch_name);
    }
    if no_branch {
        new = new.without_branch();
    }

    let outcome = app.coordinator.create_spec(new).await?;
    let spec = &outcome.spec;

    println!(
        "{} Created spec {} {}",
        style("✓").green(),
        style(spec.short_id()).bold(),
        spec.name
    );
    println!("  Id:       {}", spec.id);
    println!("  Phase:    {}", styled_phase(spec.phase));
    match &outcome.branch {
        Some(BranchOutcome::Created { name, from }) => {
            println!("  Branch:   {} (from {})", style(name).cyan(), from)
        }
        Some(BranchOutcome::Skipped { reason }) => {
            println!("  Branch:   {}", style(format!("skipped ({})", reason)).dim())
        }
        None => {}
    }
    println!("  Document: {}", outcome.document_path.display());
    print_warnings(&outcome.warnings);

    Ok(())
}

pub async fn cmd_phase(app: &App, id: &str, phase: &str) -> Result<()> {
    let outcome = app.coordinator.transition_phase(id, phase).await?;
    let spec = &outcome.spec;

    if !outcome.changed {
        println!(
            "Spec {} is already in {}",
            style(spec.short_id()).bold(),
            styled_phase(spec.phase)
        );
        return Ok(());
    }

    let kind = match outcome.kind {
        TransitionKind::Advance | TransitionKind::Unchanged => None,
        TransitionKind::Skip => Some(style("skipped ahead").yellow()),
        TransitionKind::Revert => Some(style("moved backward").yellow()),
    };
    print!(
        "{} {} {} → {}",
        style("✓").green(),
        style(spec.short_id()).bold(),
        styled_phase(outcome.old_phase),
        styled_phase(outcome.new_phase)
    );
    match kind {
        Some(kind) => println!(" ({})", kind),
        None => println!(),
    }

    match &outcome.linkage {
        Some(LinkageOutcome::Created { number, html_url }) => {
            println!("  Linked to issue #{} {}", number, style(html_url).dim())
        }
        Some(LinkageOutcome::AlreadyLinked { record }) => {
            println!("  Issue: {}", sync_summary(record))
        }
        Some(LinkageOutcome::Failed { .. }) | None => {}
    }
    print_warnings(&outcome.warnings);

    Ok(())
}

pub async fn cmd_sync(app: &App, id: &str, create: bool) -> Result<()> {
    let Some(service) = app.coordinator.sync_service() else {
        anyhow::bail!(
            "GitHub sync is not configured. Set {} and github.repo (or an origin remote) to enable it.",
            app.config.toml.github.token_env
        );
    };

    let spec = app.coordinator.resolve_spec(id).await?;
    if !create && let Some(record) = service.get_record(&spec.id).await? {
        let state = if record.is_linked() {
            "linked to"
        } else {
            "has an unlinked sync record"
        };
        println!(
            "Spec {} {} {}",
            style(spec.short_id()).bold(),
            state,
            sync_summary(&record)
        );
        return Ok(());
    }

    let request = SyncRequest {
        spec_id: spec.id.clone(),
        create_if_not_exists: create,
    };

    match service.sync_spec_to_issue(request).await? {
        SyncOutcome::Created { issue, .. } => {
            println!(
                "{} Created issue #{} for {} {}",
                style("✓").green(),
                issue.number,
                style(spec.short_id()).bold(),
                style(&issue.html_url).dim()
            );
        }
        SyncOutcome::NotLinked => {
            println!(
                "Spec {} is not linked to an issue",
                style(spec.short_id()).bold()
            );
        }
    }

    Ok(())
}

pub async fn cmd_show(app: &App, id: &str) -> Result<()> {
    let spec = app.coordinator.get_spec(id).await?;
    let record = {
        let spec_id = spec.id.clone();
        app.db
            .call(move |db| db.get_sync_record(EntityType::Spec, &spec_id))
            .await?
    };

    println!("{}", style(&spec.name).bold());
    println!("  Id:       {}", spec.id);
    match spec.phase.next() {
        Some(next) => println!(
            "  Phase:    {} (next: {})",
            styled_phase(spec.phase),
            next
        ),
        None => println!("  Phase:    {}", styled_phase(spec.phase)),
    }
    if let Some(branch) = &spec.branch_name {
        println!("  Branch:   {}", style(branch).cyan());
    }
    println!("  Created:  {}", spec.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Updated:  {}", spec.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!(
        "  Document: {}",
        app.coordinator.document_path(&spec).display()
    );
    match &record {
        Some(record) => println!("  Issue:    {}", sync_summary(record)),
        None => println!("  Issue:    {}", style("not linked").dim()),
    }
    if let Some(description) = &spec.description {
        println!();
        println!("{}", description);
    }

    Ok(())
}

pub async fn cmd_list(app: &App) -> Result<()> {
    let specs = app.coordinator.list_specs().await?;

    if specs.is_empty() {
        println!("No specs yet. Run `specflow create \"<name>\"` to add one.");
        return Ok(());
    }

    println!("{:<10} {:<16} NAME", "ID", "PHASE");
    for spec in &specs {
        println!(
            "{:<10} {} {}",
            spec.short_id(),
            styled_phase_padded(spec.phase),
            spec.name
        );
    }

    Ok(())
}

/// Pads before styling; escape codes would otherwise count toward the width.
fn styled_phase_padded(phase: Phase) -> String {
    let padded = format!("{:<16}", phase.as_str());
    match phase {
        Phase::Requirements => style(padded).cyan().to_string(),
        Phase::Design => style(padded).blue().to_string(),
        Phase::Implementation => style(padded).yellow().to_string(),
        Phase::Review => style(padded).magenta().to_string(),
        Phase::Completed => style(padded).green().to_string(),
    }
}

pub async fn cmd_delete(app: &App, id: &str, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    let spec = app.coordinator.resolve_spec(id).await?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "Delete spec {} '{}' and its sync records?",
                spec.short_id(),
                spec.name
            ))
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Delete cancelled");
            return Ok(());
        }
    }

    let outcome = app.coordinator.delete_spec(&spec.id).await?;
    println!(
        "{} Deleted spec {} {}",
        style("✓").green(),
        style(outcome.spec.short_id()).bold(),
        outcome.spec.name
    );
    if outcome.sync_records_removed > 0 {
        println!(
            "  Removed {} sync record(s); the remote issue is left untouched",
            outcome.sync_records_removed
        );
    }
    if !outcome.document_removed {
        println!("  {}", style("No document found to remove").dim());
    }
    print_warnings(&outcome.warnings);

    Ok(())
}
