//! Validate command: load, check and build every flow.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use engine::{validate_flows, Dependencies, FlowForest, ObjectStore};
use nodes::{EnvStore, NodeStatus};

use crate::config::Config;

pub fn run(config: &Config) -> Result<()> {
    let dir = &config.dir;
    let mut store = ObjectStore::with_default_kinds();
    store
        .load_all(dir)
        .with_context(|| format!("cannot load descriptions from {}", dir.display()))?;
    let forest =
        FlowForest::load_all(dir).with_context(|| format!("cannot load flows from {}", dir.display()))?;

    println!(
        "{} triggerer(s), {} triggerable(s), {} flow(s) in {}",
        store.triggerer_ids().len(),
        store.triggerable_ids().len(),
        forest.len(),
        dir.display()
    );

    let problems = validate_flows(&forest, &store);
    for problem in &problems {
        println!("invalid: {problem}");
    }

    // Jobs look their secret up while building; keep that off the keyring.
    let deps = Dependencies::new(Arc::new(EnvStore)).with_secret_env(&config.secret_env);
    let report = forest.build_all(&store, &deps);
    for (name, built) in &report.built {
        println!("flow '{name}':");
        print_tree(&built.status(), 1);
    }
    for (name, e) in &report.failed {
        println!("flow '{name}' failed to build: {e}");
    }

    if !problems.is_empty() || !report.failed.is_empty() {
        bail!(
            "{} problem(s), {} flow(s) failed to build",
            problems.len(),
            report.failed.len()
        );
    }
    Ok(())
}

fn print_tree(status: &NodeStatus, depth: usize) {
    println!("{}{} ({})", "  ".repeat(depth), status.id, status.kind);
    for target in &status.targets {
        print_tree(target, depth + 1);
    }
}
