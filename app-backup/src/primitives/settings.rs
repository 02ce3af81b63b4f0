//! Input method and accessibility toggles through the Android `settings` tool.

use super::{run_command, EnvironmentToggles, Toggle};
use crate::utils::errors::Result;

const NAMESPACE: &str = "secure";

#[derive(Debug, Clone)]
pub struct SettingsToggles {
    program: String,
}

impl SettingsToggles {
    pub fn new() -> Self {
        Self {
            program: "settings".to_string(),
        }
    }

    fn key(toggle: Toggle) -> &'static str {
        match toggle {
            Toggle::InputMethod => "default_input_method",
            Toggle::Accessibility => "enabled_accessibility_services",
        }
    }
}

impl Default for SettingsToggles {
    fn default() -> Self {
        Self::new()
    }
}

/// `settings get` prints `null` for unset keys
fn parse_value(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() || value == "null" {
        None
    } else {
        Some(value.to_string())
    }
}

impl EnvironmentToggles for SettingsToggles {
    async fn get(&self, toggle: Toggle) -> Result<Option<String>> {
        let raw = run_command(&self.program, ["get", NAMESPACE, Self::key(toggle)]).await?;
        Ok(parse_value(&raw))
    }

    async fn set(&self, toggle: Toggle, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) => {
                run_command(&self.program, ["put", NAMESPACE, Self::key(toggle), value]).await?;
            }
            None => {
                run_command(&self.program, ["delete", NAMESPACE, Self::key(toggle)]).await?;
            }
        }
        Ok(())
    }
}
