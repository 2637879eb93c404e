use quorum_models::forecast::AgentForecast;
use quorum_models::portfolio::PortfolioSnapshot;
use serde::de::DeserializeOwned;

use crate::error::AgentError;

/// Extract the first JSON object from text that may surround it with prose
/// or a markdown code fence.
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    if let Some(fenced) = extract_from_fence(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&fenced).is_ok() {
            return Ok(fenced);
        }
    }

    if let Some(object) = extract_first_object(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&object).is_ok() {
            return Ok(object);
        }
    }

    Err(AgentError::Parse(format!(
        "No JSON object found in agent result (length={})",
        text.len()
    )))
}

fn extract_from_fence(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim().to_string())
}

/// First balanced `{ ... }`, ignoring braces inside string literals.
fn extract_first_object(text: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|s| text[s..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Agents may answer with camelCase field names (`entryPrice`). Only
/// top-level keys are rewritten; nested maps keyed by symbol are left alone.
fn normalize_top_level(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (camel_to_snake(&k), v))
                .collect(),
        ),
        other => other,
    }
}

/// Accept either a JSON object or a string that contains one.
fn result_object(result: &serde_json::Value) -> Result<serde_json::Value, AgentError> {
    match result {
        serde_json::Value::Object(_) => Ok(normalize_top_level(result.clone())),
        serde_json::Value::String(text) => {
            let json = extract_json(text)?;
            Ok(normalize_top_level(serde_json::from_str(&json)?))
        }
        other => Err(AgentError::Parse(format!(
            "Expected an object, got {}",
            kind_name(other)
        ))),
    }
}

fn kind_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn parse_as<T: DeserializeOwned>(value: serde_json::Value, what: &str) -> Result<T, AgentError> {
    serde_json::from_value(value).map_err(|e| AgentError::Parse(format!("{what}: {e}")))
}

/// Parse a forecast from a response result. Signals are matched case-insensitively.
pub fn parse_forecast(result: &serde_json::Value) -> Result<AgentForecast, AgentError> {
    let mut value = result_object(result)?;
    if let Some(signal) = value.get_mut("signal") {
        if let Some(raw) = signal.as_str() {
            *signal = serde_json::Value::String(raw.trim().to_ascii_uppercase());
        }
    }
    let forecast: AgentForecast = parse_as(value, "forecast")?;
    if !(0.0..=1.0).contains(&forecast.confidence) {
        return Err(AgentError::Parse(format!(
            "forecast: confidence {} outside [0, 1]",
            forecast.confidence
        )));
    }
    Ok(forecast)
}

pub fn parse_portfolio(result: &serde_json::Value) -> Result<PortfolioSnapshot, AgentError> {
    parse_as(result_object(result)?, "portfolio")
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_models::forecast::Signal;
    use rust_decimal_macros::dec;

    #[test]
    fn extract_clean_json() {
        let input = r#"{"confidence": 0.75}"#;
        assert_eq!(extract_json(input).unwrap(), input);
    }

    #[test]
    fn extract_from_fenced_block() {
        let input = "Forecast:\n```json\n{\"confidence\": 0.75}\n```\nend";
        assert_eq!(extract_json(input).unwrap(), r#"{"confidence": 0.75}"#);
    }

    #[test]
    fn extract_with_braces_in_strings() {
        let input = r#"note {"reason": "range {low} to {high}", "confidence": 0.5} trailing"#;
        let parsed: serde_json::Value = serde_json::from_str(&extract_json(input).unwrap()).unwrap();
        assert_eq!(parsed["confidence"], 0.5);
    }

    #[test]
    fn extract_nothing() {
        assert!(extract_json("no json here }").is_err());
    }

    #[test]
    fn forecast_from_object() {
        let result = serde_json::json!({
            "signal": "BUY",
            "confidence": 0.82,
            "entry_price": "64250.5",
            "stop_loss": "63000",
            "take_profit": "67000",
            "risk_ratio": 2.2,
            "position_size": 0.1
        });
        let forecast = parse_forecast(&result).unwrap();
        assert_eq!(forecast.signal, Signal::Buy);
        assert_eq!(forecast.entry_price, dec!(64250.5));
    }

    #[test]
    fn forecast_from_camel_case_string() {
        let result = serde_json::Value::String(
            r#"{"signal": "sell", "confidence": 0.6, "entryPrice": 100.5, "stopLoss": 103,
                "takeProfit": 94, "riskRatio": 2.1, "positionSize": 0.05}"#
                .to_string(),
        );
        let forecast = parse_forecast(&result).unwrap();
        assert_eq!(forecast.signal, Signal::Sell);
        assert_eq!(forecast.stop_loss, dec!(103));
        assert!((forecast.risk_ratio - 2.1).abs() < 1e-12);
    }

    #[test]
    fn forecast_rejects_bad_confidence_and_shape() {
        let result = serde_json::json!({
            "signal": "BUY", "confidence": 1.4, "entry_price": "1", "stop_loss": "1",
            "take_profit": "1", "risk_ratio": 1.0, "position_size": 0.1
        });
        assert!(matches!(parse_forecast(&result), Err(AgentError::Parse(_))));
        assert!(matches!(parse_forecast(&serde_json::json!(42)), Err(AgentError::Parse(_))));
        assert!(parse_forecast(&serde_json::json!({"signal": "BUY"})).is_err());
    }

    #[test]
    fn portfolio_keeps_symbol_keys() {
        let result = serde_json::json!({
            "totalValue": "25000",
            "positions": {"BTCUSDT": {"size": "0.2", "value": "12800", "pnl": "-40"}},
            "leverage": 1.2,
            "marginUsed": "9000",
            "dailyPnl": "310.25",
            "maxDrawdown": 0.07
        });
        let portfolio = parse_portfolio(&result).unwrap();
        assert!(portfolio.positions.contains_key("BTCUSDT"));
        assert_eq!(portfolio.daily_pnl, dec!(310.25));
    }
}
