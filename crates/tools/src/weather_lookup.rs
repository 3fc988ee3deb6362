//! Weather lookup tool: stub that returns mock weather data.
//!
//! Results are derived from a hash of the location, so the same question
//! always gets the same answer and runs can be replayed without network
//! access.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use toolweave_core::{Tool, ToolContext, ToolError, ToolExecutor};

pub const NAME: &str = "weather_lookup";

pub struct WeatherLookupTool;

#[derive(Debug, Deserialize)]
struct WeatherArgs {
    location: String,
    #[serde(default)]
    units: Units,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Units {
    #[default]
    Metric,
    Imperial,
}

#[async_trait]
impl ToolExecutor for WeatherLookupTool {
    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        if ctx.abort.is_aborted() {
            return Err(ToolError::Aborted {
                tool_name: NAME.into(),
            });
        }

        let args: WeatherArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let weather = generate_mock_weather(&args.location, args.units);
        debug!(location = %weather.location, step = ctx.step, "Weather looked up");

        ctx.data.append(json!({
            "source": NAME,
            "toolCallId": ctx.tool_call_id,
            "provider": "mock",
        }));

        serde_json::to_value(&weather).map_err(|e| ToolError::ExecutionFailed {
            tool_name: NAME.into(),
            reason: e.to_string(),
        })
    }
}

impl Tool for WeatherLookupTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Look up current weather conditions for a location. Returns temperature, conditions, humidity, and wind speed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "minLength": 1,
                    "description": "The city name or location to look up weather for"
                },
                "units": {
                    "type": "string",
                    "enum": ["metric", "imperial"],
                    "description": "Temperature units (default: metric)",
                    "default": "metric"
                }
            },
            "required": ["location"],
            "additionalProperties": false
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WeatherData {
    location: String,
    temperature: f64,
    units: String,
    conditions: String,
    humidity: u32,
    wind_speed: f64,
    wind_direction: String,
}

/// Generate deterministic mock weather based on location name hash.
fn generate_mock_weather(location: &str, units: Units) -> WeatherData {
    let hash: u32 = location
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));

    let conditions_list = [
        "Clear skies",
        "Partly cloudy",
        "Overcast",
        "Light rain",
        "Heavy rain",
        "Thunderstorms",
        "Snow",
        "Foggy",
    ];
    let wind_dirs = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

    let base_temp_c = ((hash % 40) as f64) - 5.0; // -5 to 35°C
    let (temperature, unit_label) = match units {
        Units::Imperial => (base_temp_c * 9.0 / 5.0 + 32.0, "°F"),
        Units::Metric => (base_temp_c, "°C"),
    };

    WeatherData {
        location: location.to_string(),
        temperature: (temperature * 10.0).round() / 10.0,
        units: unit_label.to_string(),
        conditions: conditions_list[(hash as usize / 7) % conditions_list.len()].to_string(),
        humidity: 30 + (hash % 60),
        wind_speed: ((hash % 30) as f64) + 5.0,
        wind_direction: wind_dirs[(hash as usize / 3) % wind_dirs.len()].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use toolweave_core::{AbortSignal, Message, ParameterSchema, SideChannelEvent, StreamData};

    fn ctx() -> ToolContext {
        ToolContext {
            tool_call_id: "call_1".into(),
            step: 0,
            history: Arc::from(Vec::<Message>::new()),
            abort: AbortSignal::new(),
            data: StreamData::new(),
        }
    }

    #[tokio::test]
    async fn lookup_returns_weather() {
        let ctx = ctx();
        let value = WeatherLookupTool
            .execute(json!({"location": "Tokyo"}), &ctx)
            .await
            .unwrap();

        assert_eq!(value["location"], "Tokyo");
        assert!(value["temperature"].is_number());
        assert_eq!(value["units"], "°C");
        assert!(matches!(
            ctx.data.events().as_slice(),
            [SideChannelEvent::Data(v)] if v["toolCallId"] == "call_1"
        ));
    }

    #[tokio::test]
    async fn imperial_units() {
        let value = WeatherLookupTool
            .execute(json!({"location": "New York", "units": "imperial"}), &ctx())
            .await
            .unwrap();
        assert_eq!(value["units"], "°F");
    }

    #[tokio::test]
    async fn deterministic_results() {
        let r1 = WeatherLookupTool
            .execute(json!({"location": "London"}), &ctx())
            .await
            .unwrap();
        let r2 = WeatherLookupTool
            .execute(json!({"location": "London"}), &ctx())
            .await
            .unwrap();
        assert_eq!(r1, r2);
    }

    #[tokio::test]
    async fn aborted_run_is_not_looked_up() {
        let ctx = ctx();
        ctx.abort.abort("test");
        let err = WeatherLookupTool
            .execute(json!({"location": "SF"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Aborted { .. }));
        assert!(ctx.data.is_empty());
    }

    #[test]
    fn schema_rejects_missing_location() {
        let schema = ParameterSchema::json(WeatherLookupTool.parameters_schema()).unwrap();
        let err = schema.validate(r#"{"units": "kelvin"}"#).unwrap_err();
        // Both the missing field and the bad enum value are reported
        assert!(err.issues.len() >= 2, "{err}");
    }
}
