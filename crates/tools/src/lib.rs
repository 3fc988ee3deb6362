//! Built-in tool implementations for toolweave.
//!
//! - `weather_lookup`: deterministic mock weather, with an executor
//! - `ask_user`: declaration only, so its calls are deferred to the caller

pub mod ask_user;
pub mod weather_lookup;

use toolweave_core::{ToolError, ToolRegistry};

/// Create a registry holding every built-in tool.
pub fn default_registry() -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register_tool(weather_lookup::WeatherLookupTool)?;
    registry.register(ask_user::definition())?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_holds_builtins() {
        let registry = default_registry().unwrap();
        let names: Vec<_> = registry
            .declarations(None)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec![ask_user::NAME, weather_lookup::NAME]);
        assert!(registry.get(weather_lookup::NAME).unwrap().has_executor());
    }
}
