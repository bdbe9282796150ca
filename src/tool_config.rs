//! Per-flow tool options
//!
//! Open (tool, key) -> ordered values mapping. Values become command-line
//! arguments, so order is preserved exactly as appended.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::ValidationError;

/// Key under which a tool's extra command-line flags are stored
pub const OPTION_KEY: &str = "option";
/// Key under which a tool declares `kind=filename` outputs
pub const OUTPUT_KEY: &str = "output";

/// Tool options for a single flow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolConfig {
    flow: String,
    options: BTreeMap<(String, String), Vec<String>>,
}

impl ToolConfig {
    pub fn new(flow: impl Into<String>) -> Self {
        Self {
            flow: flow.into(),
            options: BTreeMap::new(),
        }
    }

    pub fn flow(&self) -> &str {
        &self.flow
    }

    /// Replace any prior values for `tool/key`
    pub fn set_option<I, S>(&mut self, tool: &str, key: &str, values: I) -> Result<(), ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        validate_key(tool, key)?;
        self.options.insert(
            (tool.to_string(), key.to_string()),
            values.into_iter().map(Into::into).collect(),
        );
        Ok(())
    }

    /// Append values after any existing ones for `tool/key`
    pub fn append_option<I, S>(&mut self, tool: &str, key: &str, values: I) -> Result<(), ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        validate_key(tool, key)?;
        self.options
            .entry((tool.to_string(), key.to_string()))
            .or_default()
            .extend(values.into_iter().map(Into::into));
        Ok(())
    }

    /// Values for `tool/key` in insertion order, empty if unset
    pub fn get_options(&self, tool: &str, key: &str) -> &[String] {
        self.options
            .get(&(tool.to_string(), key.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Iterate `(tool, key, values)`
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &[String])> {
        self.options
            .iter()
            .map(|((tool, key), values)| (tool.as_str(), key.as_str(), values.as_slice()))
    }

    /// Merge options from a manifest section, appending to what is already set
    pub fn extend_from(&mut self, section: &ToolOptions) -> Result<(), ValidationError> {
        for (tool, keys) in &section.0 {
            for (key, values) in keys {
                self.append_option(tool, key, values.iter().cloned())?;
            }
        }
        Ok(())
    }
}

/// Manifest form: `tool: { key: [values] }`
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ToolOptions(pub BTreeMap<String, BTreeMap<String, Vec<String>>>);

/// Structural check only: non-empty, no whitespace, no '/' separator
fn validate_key(tool: &str, key: &str) -> Result<(), ValidationError> {
    let ok = |s: &str| !s.is_empty() && !s.chars().any(|c| c.is_whitespace() || c == '/');
    if ok(tool) && ok(key) {
        Ok(())
    } else {
        Err(ValidationError::InvalidOptionKey {
            tool: tool.to_string(),
            key: key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_append_extends() {
        let mut cfg = ToolConfig::new("verilator_sim");
        cfg.set_option("verilator", OPTION_KEY, ["-CFLAGS", "-std=gnu++14"]).unwrap();
        cfg.append_option("verilator", OPTION_KEY, ["-LDFLAGS", "-lgtest"]).unwrap();
        assert_eq!(
            cfg.get_options("verilator", OPTION_KEY),
            ["-CFLAGS", "-std=gnu++14", "-LDFLAGS", "-lgtest"]
        );

        cfg.set_option("verilator", OPTION_KEY, ["--x-assign", "0"]).unwrap();
        assert_eq!(cfg.get_options("verilator", OPTION_KEY), ["--x-assign", "0"]);
    }

    #[test]
    fn missing_key_is_empty() {
        let cfg = ToolConfig::new("f");
        assert!(cfg.get_options("surelog", OPTION_KEY).is_empty());
    }

    #[test]
    fn tools_are_independent() {
        let mut cfg = ToolConfig::new("f");
        cfg.set_option("surelog", OPTION_KEY, ["-sverilog"]).unwrap();
        cfg.set_option("verilator", OPTION_KEY, ["-Wall"]).unwrap();
        assert_eq!(cfg.get_options("surelog", OPTION_KEY), ["-sverilog"]);
        assert_eq!(cfg.get_options("verilator", OPTION_KEY), ["-Wall"]);
    }

    #[test]
    fn invalid_keys_rejected() {
        let mut cfg = ToolConfig::new("f");
        assert!(cfg.set_option("", OPTION_KEY, ["x"]).is_err());
        assert!(cfg.append_option("verilator", "bad key", ["x"]).is_err());
        assert!(cfg.append_option("a/b", OPTION_KEY, ["x"]).is_err());
        assert!(cfg.get_options("a/b", OPTION_KEY).is_empty());
    }

    #[test]
    fn extend_from_manifest_section() {
        let yaml = r#"
verilator:
  option: ["-Wno-fatal"]
surelog:
  option: ["-nobuiltin"]
"#;
        let section: ToolOptions = serde_yaml::from_str(yaml).unwrap();
        let mut cfg = ToolConfig::new("verilator_sim");
        cfg.set_option("verilator", OPTION_KEY, ["-CFLAGS", "-O2"]).unwrap();
        cfg.extend_from(&section).unwrap();
        assert_eq!(
            cfg.get_options("verilator", OPTION_KEY),
            ["-CFLAGS", "-O2", "-Wno-fatal"]
        );
        assert_eq!(cfg.get_options("surelog", OPTION_KEY), ["-nobuiltin"]);
    }
}
