//! Built-in tool implementations for the agentic runtime.
//!
//! - `get_weather`: current conditions from the Open-Meteo API
//! - `suggest_actions`: hidden tool that records follow-up suggestions

pub mod suggest;
pub mod weather;

pub use suggest::SuggestActionsTool;
pub use weather::GetWeatherTool;
