//! Minibuild naming grammar.
//!
//! A minibuild file name is a package name optionally followed by a
//! `-major.minor` version and `_`-separated suffixes:
//!
//! ```text
//! libxml2-2.7            plain version
//! foo-1.0_rc1            pre-release suffix
//! bar-2.0_rHEAD          scm revision
//! baz-1_tagRELEASE1.2    scm tag or branch
//! egg-0.4_py2.4          python flavour
//! ```

use std::sync::LazyLock;

use regex::Regex;

const PYTHON_SUFFIX: &str = r"(py(2\.4|2\.5))";
const PRE_SUFFIX: &str = r"((pre|p|beta|alpha|rc)\d*)";
const SCM_SUFFIX: &str = r"((tag|branch)([A-Z]|\d)(\.|[A-Z]|\d)*)";
const REVISION_SUFFIX: &str = r"(r(HEAD|TIP|\d+))";
const VERSION_SUFFIX: &str = r"((-\d+((\.\d+)*([a-z]?))*)?)";
const BASE_NAME: &str = r"(([a-zA-Z]|\d)+((-|\.)([a-zA-Z]|\d)+)*)";

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    let suffix = format!(
        "(({VERSION_SUFFIX}(_({PYTHON_SUFFIX}|{REVISION_SUFFIX}|{SCM_SUFFIX}|{PRE_SUFFIX}))*)*)"
    );
    Regex::new(&format!("^({BASE_NAME}{suffix})$")).expect("minibuild name grammar is valid")
});

/// Whether `name` is an acceptable minibuild file name.
pub fn is_valid_minibuild_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in [
            "python-2.6",
            "meta-python",
            "libxml2-2.7",
            "foo-1.0_rc1",
            "bar-2.0_rHEAD",
            "baz-1_tagRELEASE1.2",
            "egg-0.4_py2.4",
            "a",
            "zope.interface-3.5",
        ] {
            assert!(is_valid_minibuild_name(name), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "-foo", "foo-", "foo bar", "foo~", "foo..bar", "foo/bar"] {
            assert!(!is_valid_minibuild_name(name), "{name:?} should be invalid");
        }
    }
}
