//! Launch configuration management
//!
//! This crate handles parsing VS Code style launch configurations for text scripts. Both
//! `launch.json` files and `.code-workspace` files (with a `launch` section) are supported, and
//! comments and trailing commas are allowed.

use std::path::{Path, PathBuf};

use eyre::Context;
use serde::Deserialize;

/// Value of the `type` field of configurations handled here
pub const CONFIGURATION_TYPE: &str = "textdbg";

const WORKSPACE_FOLDER: &str = "${workspaceFolder}";

/// Handle choosing a specific launch configuration, or if the user has not specified one, then
/// present a list of launch configurations they can choose from
#[derive(Debug)]
pub enum ChosenLaunchConfiguration {
    /// A specific launch configuration is available
    Specific(LaunchConfiguration),
    /// The specified launch configuration was not found
    NotFound,
    /// The user did not request a specific launch configuration, so present available options
    ToBeChosen(Vec<String>),
}

#[derive(Deserialize)]
struct VsCodeLaunchConfiguration {
    #[serde(rename = "version", default)]
    _version: Option<String>,
    // other debugger types may share the file, so entries stay untyped until chosen
    configurations: Vec<serde_json::Value>,
}

/// Deserializable model for the launch configuration
#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigFormat {
    VsCode(VsCodeLaunchConfiguration),
    VsCodeWorkspace { launch: VsCodeLaunchConfiguration },
}

impl ConfigFormat {
    fn into_configurations(self) -> Vec<serde_json::Value> {
        match self {
            ConfigFormat::VsCode(config) | ConfigFormat::VsCodeWorkspace { launch: config } => {
                config.configurations
            }
        }
    }
}

/// A launch configuration for running a script under the debugger
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfiguration {
    pub name: String,
    pub request: String,
    pub program: PathBuf,
    /// Lines to break on when the program starts
    #[serde(default)]
    pub breakpoints: Vec<usize>,
    #[serde(default)]
    pub stop_on_entry: bool,
    pub cwd: Option<PathBuf>,
}

impl LaunchConfiguration {
    /// Make paths absolute, relative to the directory containing the configuration
    pub fn resolve(&mut self, root: impl AsRef<Path>) {
        let root = root.as_ref();
        self.program = resolve_path(&self.program, root);
        if let Some(cwd) = &self.cwd {
            self.cwd = Some(resolve_path(cwd, root));
        }
    }
}

fn resolve_path(path: &Path, root: &Path) -> PathBuf {
    let path = match path.to_str() {
        Some(s) if s.starts_with(WORKSPACE_FOLDER) => {
            let rest = s[WORKSPACE_FOLDER.len()..].trim_start_matches(['/', '\\']);
            PathBuf::from(rest)
        }
        _ => path.to_path_buf(),
    };
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

fn configuration_type(value: &serde_json::Value) -> Option<&str> {
    value.get("type").and_then(serde_json::Value::as_str)
}

fn configuration_name(value: &serde_json::Value) -> Option<&str> {
    value.get("name").and_then(serde_json::Value::as_str)
}

pub fn load(
    name: Option<&str>,
    mut r: impl std::io::Read,
) -> eyre::Result<ChosenLaunchConfiguration> {
    let mut contents = String::new();
    r.read_to_string(&mut contents)
        .wrap_err("reading configuration contents")?;
    let configuration = from_str(name, &contents).wrap_err("parsing launch configuration")?;
    Ok(configuration)
}

fn from_str(name: Option<&str>, contents: &str) -> eyre::Result<ChosenLaunchConfiguration> {
    let config = jsonc_to_serde(contents).wrap_err("parsing jsonc configuration")?;
    let configurations = config
        .into_configurations()
        .into_iter()
        .filter(|value| configuration_type(value) == Some(CONFIGURATION_TYPE));

    let Some(name) = name else {
        let configuration_names = configurations
            .filter_map(|value| configuration_name(&value).map(ToString::to_string))
            .collect();
        return Ok(ChosenLaunchConfiguration::ToBeChosen(configuration_names));
    };

    for value in configurations {
        if configuration_name(&value) != Some(name) {
            continue;
        }

        let configuration: LaunchConfiguration = serde_json::from_value(value)
            .wrap_err_with(|| format!("deserializing launch configuration {name:?}"))?;
        eyre::ensure!(
            configuration.request == "launch",
            "unsupported request {:?} in launch configuration {name:?}",
            configuration.request
        );
        return Ok(ChosenLaunchConfiguration::Specific(configuration));
    }
    Ok(ChosenLaunchConfiguration::NotFound)
}

fn jsonc_to_serde(input: &str) -> eyre::Result<ConfigFormat> {
    let value = jsonc_parser::parse_to_serde_value(input, &Default::default())
        .wrap_err("parsing jsonc configuration")?;
    let Some(config_format_value) = value else {
        eyre::bail!("no configuration found");
    };

    let config_format =
        serde_json::from_value(config_format_value).wrap_err("deserializing jsonc::Value value")?;
    Ok(config_format)
}

/// Load a configuration file, resolving a chosen configuration against the file's directory
pub fn load_from_path(
    name: Option<&str>,
    path: impl AsRef<Path>,
) -> eyre::Result<ChosenLaunchConfiguration> {
    let path = path.as_ref();
    let f = std::fs::File::open(path)
        .wrap_err_with(|| format!("opening input path {}", path.display()))?;
    let mut config = crate::load(name, f).context("loading file from given path")?;

    if let ChosenLaunchConfiguration::Specific(configuration) = &mut config {
        let root = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        configuration.resolve(root);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::resolve_path;

    #[test]
    fn resolves_relative_paths() {
        let root = Path::new("/work/project");
        assert_eq!(
            resolve_path(Path::new("scripts/a.txt"), root),
            PathBuf::from("/work/project/scripts/a.txt")
        );
        assert_eq!(
            resolve_path(Path::new("/abs/a.txt"), root),
            PathBuf::from("/abs/a.txt")
        );
    }

    #[test]
    fn resolves_workspace_folder() {
        let root = Path::new("/work/project");
        assert_eq!(
            resolve_path(Path::new("${workspaceFolder}/a.txt"), root),
            PathBuf::from("/work/project/a.txt")
        );
        assert_eq!(
            resolve_path(Path::new("${workspaceFolder}"), root),
            PathBuf::from("/work/project")
        );
    }
}
