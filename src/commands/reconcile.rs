use crate::Context;
use crate::commands::{connect, load_manifest};
use crate::resources::build_provisioner;
use crate::ui;
use anyhow::{Context as _, Result};
use dialoguer::Confirm;
use provisioner::{DiffSummary, GroupPlan, Provisioner, ResourceDiff};
use serde::Serialize;

// ============================================================================
// Plan
// ============================================================================

pub fn plan(ctx: &Context, json: bool) -> Result<()> {
    let manifest = load_manifest(ctx)?;
    let vault = connect(ctx, &manifest)?;
    let provisioner = build_provisioner(&manifest, vault)?;

    let plans = provisioner.plan().context("Could not compute plan")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&planned_changes(&plans))?);
        return Ok(());
    }

    ui::header("Plan");
    let summary = print_plans(ctx, &plans);
    println!();
    ui::summary(&summary);

    if !summary.has_changes() {
        ui::success("No changes - Vault matches the manifest");
    }

    Ok(())
}

/// One resource in `plan --json` output
#[derive(Debug, Serialize)]
struct PlannedChange {
    group: String,
    resource: String,
    missing: bool,
    recreate: bool,
    changes: Vec<String>,
}

fn planned_changes(plans: &[GroupPlan]) -> Vec<PlannedChange> {
    plans
        .iter()
        .flat_map(|plan| {
            collapse(&plan.diffs).into_iter().map(move |diff| PlannedChange {
                group: plan.group.clone(),
                resource: diff.resource.id().to_string(),
                missing: diff.is_missing(),
                recreate: diff.needs_recreate(),
                changes: diff
                    .changed_attributes()
                    .into_iter()
                    .map(ToString::to_string)
                    .collect(),
            })
        })
        .collect()
}

/// One diff per resource, in first-seen order
///
/// A group plan can list a resource twice: once from its own diff and once
/// as a parent-change entry. The entry that triggers work wins.
fn collapse(diffs: &[ResourceDiff]) -> Vec<ResourceDiff> {
    let mut shown: Vec<ResourceDiff> = Vec::with_capacity(diffs.len());

    for diff in diffs {
        let id = diff.resource.id();
        match shown.iter_mut().find(|existing| existing.resource.id() == id) {
            Some(existing) => {
                if !existing.has_changes_or_missing() && diff.has_changes_or_missing() {
                    *existing = diff.clone();
                }
            }
            None => shown.push(diff.clone()),
        }
    }

    shown
}

/// Print every group's diffs and return the totals
fn print_plans(ctx: &Context, plans: &[GroupPlan]) -> DiffSummary {
    let mut shown = Vec::new();

    for plan in plans {
        let diffs = collapse(&plan.diffs);
        ui::section(&format!("Group: {}", plan.group));

        if diffs.is_empty() {
            ui::dim("no resources");
        }
        for diff in &diffs {
            if diff.has_changes_or_missing() || ctx.verbose > 0 {
                ui::diff(diff);
            }
        }
        if ctx.verbose == 0 && diffs.iter().all(|d| !d.has_changes_or_missing()) && !diffs.is_empty() {
            ui::dim("up to date");
        }

        shown.extend(diffs);
    }

    DiffSummary::from_diffs(&shown)
}

// ============================================================================
// Apply
// ============================================================================

pub fn apply(ctx: &Context, yes: bool) -> Result<()> {
    let manifest = load_manifest(ctx)?;
    let vault = connect(ctx, &manifest)?;
    let mut provisioner = build_provisioner(&manifest, vault)?;

    converge(ctx, &mut provisioner, yes)
}

fn converge(ctx: &Context, provisioner: &mut Provisioner, yes: bool) -> Result<()> {
    let plans = provisioner.plan().context("Could not compute plan")?;
    let all: Vec<ResourceDiff> = plans.iter().flat_map(|plan| collapse(&plan.diffs)).collect();
    let summary = DiffSummary::from_diffs(&all);

    if !summary.has_changes() {
        ui::success("Nothing to do - Vault matches the manifest");
        return Ok(());
    }

    if !ctx.quiet {
        ui::header("Applying Manifest");
        print_plans(ctx, &plans);
        println!();
        ui::summary(&summary);
        println!();
    }

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt("Continue?")
            .default(true)
            .interact()
            .context("Failed to read confirmation")?;

        if !confirmed {
            ui::info("Aborted. No changes made.");
            return Ok(());
        }
    }

    provisioner.try_apply().context("Apply failed")?;

    ui::success(&format!(
        "Applied {} resources",
        provisioner.applied_resources().len()
    ));
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
