use std::fmt;

use minimerge_schema::{Action, PackageName, VariantTag};

/// What the engine is going to do with one package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanFlags {
    /// `f`: the sources are fetched.
    pub fetch: bool,
    /// `F`: the working copy is updated.
    pub update_code: bool,
    /// `I`: the package is built for the first time.
    pub install: bool,
    /// `R`: the package is rebuilt.
    pub reinstall: bool,
    /// `D`: the package is removed.
    pub delete: bool,
    /// `U`: the package has a new revision.
    pub upgrade: bool,
    /// `u`: the installed package is built again.
    pub update: bool,
}

impl PlanFlags {
    /// One column per flag, a space when unset.
    pub fn letters(&self) -> String {
        [
            (self.fetch, 'f'),
            (self.update_code, 'F'),
            (self.install, 'I'),
            (self.reinstall, 'R'),
            (self.delete, 'D'),
            (self.upgrade, 'U'),
            (self.update, 'u'),
        ]
        .iter()
        .map(|&(set, letter)| if set { letter } else { ' ' })
        .collect()
    }

    /// Whether the package takes part in the run at all.
    pub fn any_work(&self) -> bool {
        self.install || self.reinstall || self.upgrade || self.update || self.delete
    }
}

/// One line of a [`Plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    /// Package.
    pub name: PackageName,
    /// What happens to it.
    pub flags: PlanFlags,
    /// Revision recorded at install time, for upgrades.
    pub installed_revision: Option<u32>,
    /// Revision of the minibuild.
    pub revision: u32,
    /// Variants that will be built, for variant consumers.
    pub variants: Vec<VariantTag>,
}

impl PlanEntry {
    /// `[1 => 2]` for upgrades, empty otherwise.
    pub fn revision_change(&self) -> String {
        match (self.flags.upgrade, self.installed_revision) {
            (true, Some(old)) => format!("[{old} => {}]", self.revision),
            _ => String::new(),
        }
    }
}

/// The work list of a merge, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Action of the merge.
    pub action: Action,
    /// Packages with work to do, dependencies first.
    pub entries: Vec<PlanEntry>,
    /// Variants selected for the whole merge.
    pub variants: Vec<VariantTag>,
    /// Why the plan could not be computed, in pretend mode.
    pub error: Option<String>,
}

/// Meaning of the flag columns.
pub const LEGEND: &[(char, &str)] = &[
    ('f', "fetch"),
    ('F', "update the code from repository"),
    ('I', "install the package"),
    ('R', "reinstall the package"),
    ('D', "delete the package"),
    ('U', "upgrade the package to the latest revision"),
    ('u', "update the package (for example, re-run buildout)"),
];

impl Plan {
    /// Whether no package has work to do.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of planned packages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Names of the planned packages, in order.
    pub fn names(&self) -> impl Iterator<Item = &PackageName> {
        self.entries.iter().map(|e| &e.name)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Action:\t{}", self.action)?;
        writeln!(f)?;
        if let Some(error) = &self.error {
            writeln!(f, "\tcannot compute the plan: {error}")?;
        }
        for entry in &self.entries {
            write!(f, "\t{} * {}", entry.flags.letters(), entry.name)?;
            let revision = entry.revision_change();
            if !revision.is_empty() {
                write!(f, " {revision}")?;
            }
            if !entry.variants.is_empty() {
                let tags: Vec<&str> = entry.variants.iter().map(VariantTag::as_str).collect();
                write!(f, " ({})", tags.join(", "))?;
            }
            writeln!(f)?;
        }
        writeln!(f)?;
        writeln!(f, "\tFLAGS * PACKAGE_NAME [OLD_REVISION => NEW_REVISION] (variants)")?;
        for (letter, meaning) in LEGEND {
            writeln!(f, "\t{letter} : {meaning}")?;
        }
        Ok(())
    }
}
