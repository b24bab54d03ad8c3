//! Operator-defined PKGBUILD patches
//!
//! A patch sets one PKGBUILD variable or function for a base (or for every
//! base when no base is named). Patches are appended to the PKGBUILD in the
//! build root, so later definitions override those of the build description.
//!
//! ```toml
//! [[build.patches]]
//! base = "foo"
//! key = "arch"
//! value = ["x86_64", "aarch64"]
//! ```

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Name of the build description file patched in the build root
pub const PKGBUILD: &str = "PKGBUILD";

/// Value of a patched variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatchValue {
    /// Scalar variable or function body
    Single(String),
    /// Array variable
    List(Vec<String>),
}

/// One PKGBUILD override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkgbuildPatch {
    /// Base the patch applies to, every base when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    /// Variable name, or function name ending in `()`
    pub key: String,
    /// New value
    pub value: PatchValue,
    /// Write values without shell quoting
    #[serde(default, rename = "unsafe")]
    pub raw: bool,
}

impl PkgbuildPatch {
    /// Create a patch for every base
    pub fn new(key: impl Into<String>, value: PatchValue) -> Self {
        Self {
            base: None,
            key: key.into(),
            value,
            raw: false,
        }
    }

    /// Restrict the patch to one base
    #[must_use]
    pub fn for_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Check if the key names a function
    pub fn is_function(&self) -> bool {
        self.key.ends_with("()")
    }

    /// Check if the patch applies to `base`
    pub fn applies_to(&self, base: &str) -> bool {
        self.base.as_deref().map_or(true, |only| only == base)
    }

    /// Check that the key is a shell identifier
    pub fn has_valid_key(&self) -> bool {
        let name = self.key.strip_suffix("()").unwrap_or(&self.key);
        let mut chars = name.chars();
        chars
            .next()
            .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// PKGBUILD line for this patch
    pub fn serialize(&self) -> String {
        match &self.value {
            PatchValue::List(values) => {
                let values: Vec<String> = values.iter().map(|value| self.quote(value)).collect();
                format!("{}=({})", self.key, values.join(" "))
            }
            // function bodies are never quoted
            PatchValue::Single(value) if self.is_function() => format!("{} {value}", self.key),
            PatchValue::Single(value) => format!("{}={}", self.key, self.quote(value)),
        }
    }

    /// Append the patch to the PKGBUILD at `path`
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let mut pkgbuild = OpenOptions::new().create(true).append(true).open(path)?;
        // the file may not end with a newline
        writeln!(pkgbuild)?;
        writeln!(pkgbuild, "{}", self.serialize())
    }

    fn quote(&self, value: &str) -> String {
        if self.raw {
            value.to_string()
        } else {
            shell_quote(value)
        }
    }
}

/// Quote `value` for POSIX shells, leaving safe words untouched
pub fn shell_quote(value: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c);
    if !value.is_empty() && value.chars().all(safe) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}
