//! `stackward plan`: diff-only view of what an apply would change.

use super::report_error;
use colored::Colorize;
use stackward_core::plan::{ActionVerb, Plan, ResourceAction};
use stackward_core::{
    ComposeConverter, ComposeParser, ConvertOptions, DockerAdapter, Planner, StackNamespace,
    StateReader,
};
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

pub async fn run(name: &str, file: &str, allow_latest: bool) -> u8 {
    let manifest = match ComposeParser::parse_file(file) {
        Ok(manifest) => manifest,
        Err(e) => {
            report_error(&e);
            return 1;
        }
    };

    let ns = StackNamespace::new(name);
    let desired = match ComposeConverter::convert(
        &manifest,
        &ns,
        &ConvertOptions::from_env(allow_latest),
    ) {
        Ok(desired) => desired,
        Err(e) => {
            report_error(&e);
            return 1;
        }
    };

    let adapter = match DockerAdapter::from_env() {
        Ok(adapter) => Arc::new(adapter),
        Err(e) => {
            report_error(&e);
            return 1;
        }
    };

    let current = match StateReader::new(adapter, ns.clone()).read().await {
        Ok(current) => current,
        Err(e) => {
            report_error(&e);
            return 1;
        }
    };

    let plan = Planner::new(ns.name()).plan(&current, &desired);
    render(&plan);
    0
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "ACTION")]
    action: String,
    #[tabled(rename = "CHANGES")]
    changes: String,
}

fn render(plan: &Plan) {
    println!("{} Plan for stack {}", "→".cyan().bold(), plan.stack_name.bold());
    println!();

    if plan.is_empty() {
        println!("{} No changes; the stack matches the manifest", "✓".green().bold());
        return;
    }

    let mut rows = Vec::new();
    push_resources(&mut rows, "network", &plan.networks);
    push_resources(&mut rows, "volume", &plan.volumes);
    push_resources(&mut rows, "config", &plan.configs);
    push_resources(&mut rows, "secret", &plan.secrets);
    for action in &plan.services {
        rows.push(PlanRow {
            kind: "service".to_string(),
            name: action.local.clone(),
            action: colorize_verb(action.verb),
            changes: action.changes.join(", "),
        });
    }

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);

    if !plan.orphans.is_empty() {
        println!();
        println!("{} Orphans (deleted only with --prune):", "!".yellow().bold());
        for orphan in &plan.orphans.services {
            println!("  {} service {}", "•".dimmed(), orphan.local);
        }
        for orphan in &plan.orphans.networks {
            println!("  {} network {}", "•".dimmed(), orphan.local);
        }
        for orphan in &plan.orphans.volumes {
            println!("  {} volume {}", "•".dimmed(), orphan.local);
        }
        for orphan in &plan.orphans.configs {
            println!("  {} config {}", "•".dimmed(), orphan.local);
        }
        for orphan in &plan.orphans.secrets {
            println!("  {} secret {}", "•".dimmed(), orphan.local);
        }
    }

    for warning in &plan.warnings {
        println!();
        println!("{} {}", "!".yellow().bold(), warning);
    }
}

fn push_resources(rows: &mut Vec<PlanRow>, kind: &str, actions: &[ResourceAction]) {
    for action in actions {
        rows.push(PlanRow {
            kind: kind.to_string(),
            name: action.local.clone(),
            action: colorize_verb(action.verb),
            changes: String::new(),
        });
    }
}

fn colorize_verb(verb: ActionVerb) -> String {
    match verb {
        ActionVerb::Create => verb.as_str().green().to_string(),
        ActionVerb::Update => verb.as_str().yellow().to_string(),
        ActionVerb::Delete => verb.as_str().red().to_string(),
        ActionVerb::None => verb.as_str().dimmed().to_string(),
    }
}
