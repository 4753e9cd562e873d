use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use minimerge_core::{Engine, MergeOptions, Reporter};

use crate::ui::TerminalReporter;
use crate::ui::table::{ListRow, list_table};

/// List every minibuild of every minilay, first minilay wins.
pub fn list(config: Option<&Path>, installed_only: bool) -> Result<()> {
    let reporter = Arc::new(TerminalReporter::new());
    let mut engine = super::engine(config, |_| MergeOptions::default(), Arc::clone(&reporter))?;

    let rows = collect_rows(&mut engine, &*reporter)?;
    let rows: Vec<ListRow> = rows
        .into_iter()
        .filter(|row| !installed_only || row.installed)
        .collect();

    if rows.is_empty() {
        println!();
        if installed_only {
            println!("  No packages installed.");
        } else {
            println!("  No minibuild found.");
            println!("  Add a minilay under <prefix>/minilays or to the `minilays` setting.");
        }
        return Ok(());
    }

    println!("{}", list_table(&rows));
    Ok(())
}

fn collect_rows(engine: &mut Engine, reporter: &dyn Reporter) -> Result<Vec<ListRow>> {
    let mut minibuilds = Vec::new();
    for minilay in engine.minilays_mut().iter_mut() {
        match minilay.minibuilds() {
            Ok(found) => minibuilds.extend(found),
            Err(e) => reporter.warning(&format!("Skipping {}: {e}", minilay.path().display())),
        }
    }

    let mut rows: Vec<ListRow> = Vec::with_capacity(minibuilds.len());
    for mb in minibuilds {
        if rows.iter().any(|row| row.name == mb.name.as_str()) {
            continue;
        }
        rows.push(ListRow {
            name: mb.name.to_string(),
            category: mb.category.clone().unwrap_or_else(|| "-".to_string()),
            revision: mb.revision,
            installed: engine.is_installed(&mb)?,
            description: mb.description.clone(),
        });
    }
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(rows)
}
