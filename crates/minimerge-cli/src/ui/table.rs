//! Table rendering for plans and catalog listings.

use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use minimerge_core::engine::{LEGEND, Plan};
use minimerge_schema::VariantTag;

/// One catalog entry as shown by `minimerge list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRow {
    pub name: String,
    pub category: String,
    pub revision: u32,
    pub installed: bool,
    pub description: String,
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.iter().map(|h| Cell::new(h).fg(Color::DarkGrey)));
    table
}

fn join_variants(variants: &[VariantTag]) -> String {
    variants
        .iter()
        .map(VariantTag::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The work list of `plan`, one row per package.
pub fn plan_table(plan: &Plan) -> Table {
    let mut table = new_table(&["flags", "package", "revision", "variants"]);
    for entry in &plan.entries {
        table.add_row(vec![
            Cell::new(entry.flags.letters()).fg(Color::Magenta),
            Cell::new(&entry.name).fg(Color::Cyan),
            Cell::new(entry.revision_change()).fg(Color::DarkGrey),
            Cell::new(join_variants(&entry.variants)).fg(Color::DarkGrey),
        ]);
    }
    table
}

/// Meaning of the flag letters, one per line.
pub fn legend() -> String {
    LEGEND
        .iter()
        .map(|(letter, meaning)| format!("  {letter}  {meaning}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Catalog rows, with their install status.
pub fn list_table(rows: &[ListRow]) -> Table {
    let mut table = new_table(&["package", "category", "revision", "status", "description"]);
    for row in rows {
        let status = if row.installed {
            Cell::new("installed").fg(Color::Green)
        } else {
            Cell::new("-").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(&row.name).fg(Color::Cyan),
            Cell::new(&row.category),
            Cell::new(row.revision),
            status,
            Cell::new(&row.description).fg(Color::DarkGrey),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use minimerge_core::engine::{PlanEntry, PlanFlags};
    use minimerge_schema::{Action, PackageName};

    #[test]
    fn test_plan_table() {
        let plan = Plan {
            action: Action::Install,
            entries: vec![PlanEntry {
                name: PackageName::from("lxml-2.2"),
                flags: PlanFlags {
                    fetch: true,
                    install: true,
                    ..PlanFlags::default()
                },
                installed_revision: None,
                revision: 0,
                variants: vec![VariantTag::from("2.5"), VariantTag::from("2.6")],
            }],
            ..Plan::default()
        };
        let text = plan_table(&plan).to_string();
        assert!(text.contains("package"));
        assert!(text.contains("lxml-2.2"));
        assert!(text.contains("2.5, 2.6"));
        assert!(text.contains("f I"));
    }

    #[test]
    fn test_list_table() {
        let rows = vec![
            ListRow {
                name: "zlib-1.2".to_string(),
                category: "dependencies".to_string(),
                revision: 3,
                installed: true,
                description: "compression library".to_string(),
            },
            ListRow {
                name: "lxml-2.2".to_string(),
                category: "eggs".to_string(),
                revision: 0,
                installed: false,
                description: String::new(),
            },
        ];
        let text = list_table(&rows).to_string();
        let zlib = text.lines().find(|l| l.contains("zlib-1.2")).unwrap();
        assert!(zlib.contains("installed"));
        assert!(zlib.contains("compression library"));
        let lxml = text.lines().find(|l| l.contains("lxml-2.2")).unwrap();
        assert!(!lxml.contains("installed"));
    }

    #[test]
    fn test_legend() {
        let legend = legend();
        assert_eq!(legend.lines().count(), LEGEND.len());
        assert!(legend.contains("D  delete the package"));
    }
}
