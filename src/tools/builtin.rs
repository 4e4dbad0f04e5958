//! Tools shipped with the engine

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::expr::{evaluate_expression, format_number};
use super::{ParamSpec, ParamType, Tool, ToolArgs, ToolCategory, ToolRegistry, ToolSchema};
use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};

/// Names accepted by [`ToolRegistry::register_batch_tools`].
pub const BUILTIN_TOOL_NAMES: &[&str] = &["calculator", "timezone_converter", "file_read", "web_search"];

const MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Backend for the `web_search` tool.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, ctx: &RequestContext, query: &str) -> EngineResult<Value>;
}

/// Environment the builtin tools run against.
#[derive(Clone, Default)]
pub struct BuiltinOptions {
    /// Root directory `file_read` is confined to. `None` disables the tool.
    pub file_base_path: Option<PathBuf>,
    /// Backend for `web_search`. Without one the tool fails when called.
    pub search: Option<Arc<dyn SearchBackend>>,
}

struct UnconfiguredSearch;

#[async_trait]
impl SearchBackend for UnconfiguredSearch {
    async fn search(&self, _ctx: &RequestContext, _query: &str) -> EngineResult<Value> {
        Err(EngineError::Configuration(
            "no web search backend configured".to_string(),
        ))
    }
}

#[derive(Deserialize)]
struct CalculatorInput {
    expression: String,
}

#[derive(Serialize)]
struct CalculatorOutput {
    expression: String,
    result: String,
}

async fn calculator(_ctx: RequestContext, args: ToolArgs) -> EngineResult<CalculatorOutput> {
    let input: CalculatorInput = args.parse()?;
    let value = evaluate_expression(&input.expression)?;
    Ok(CalculatorOutput {
        expression: input.expression,
        result: format_number(value),
    })
}

fn calculator_tool() -> Tool {
    Tool::new(
        "calculator",
        "Evaluate an arithmetic expression (+ - * / % ^ and parentheses)",
        ToolSchema::new().param(ParamSpec::required(
            "expression",
            ParamType::String,
            "Expression to evaluate, e.g. (2 + 3) * 4",
        )),
        calculator,
    )
    .builtin()
}

#[derive(Deserialize)]
struct TimezoneInput {
    time: String,
    from_timezone: String,
    to_timezone: String,
}

#[derive(Serialize)]
struct TimezoneOutput {
    original: String,
    converted: String,
    from_timezone: String,
    to_timezone: String,
    day_offset: i64,
}

/// Parse `UTC`, `GMT`, `Z`, `UTC+8`, `UTC-05:30`, `+0800` style zones.
fn parse_offset(zone: &str) -> EngineResult<FixedOffset> {
    let trimmed = zone.trim();
    let upper = trimmed.to_ascii_uppercase();
    let rest = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(&upper);
    if rest.is_empty() || rest == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(|| bad_zone(zone));
    }

    let (sign, digits) = match rest.as_bytes()[0] {
        b'+' => (1, &rest[1..]),
        b'-' => (-1, &rest[1..]),
        _ => return Err(bad_zone(zone)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit() || b == b':') {
        return Err(bad_zone(zone));
    }
    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() == 4 => digits.split_at(2),
        None => (digits, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| bad_zone(zone))?;
    let minutes: i32 = minutes.parse().map_err(|_| bad_zone(zone))?;
    if hours > 14 || minutes >= 60 {
        return Err(bad_zone(zone));
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(|| bad_zone(zone))
}

fn bad_zone(zone: &str) -> EngineError {
    EngineError::InvalidArguments(format!(
        "unsupported timezone '{}', expected UTC offsets such as UTC+8",
        zone
    ))
}

async fn timezone_converter(_ctx: RequestContext, args: ToolArgs) -> EngineResult<TimezoneOutput> {
    let input: TimezoneInput = args.parse()?;
    let from = parse_offset(&input.from_timezone)?;
    let to = parse_offset(&input.to_timezone)?;
    let shift = ChronoDuration::seconds(i64::from(
        to.local_minus_utc() - from.local_minus_utc(),
    ));

    let text = input.time.trim();
    let converted = if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M"))
    {
        let out = dt + shift;
        TimezoneOutput {
            original: input.time.clone(),
            converted: out.format("%Y-%m-%d %H:%M:%S").to_string(),
            from_timezone: input.from_timezone,
            to_timezone: input.to_timezone,
            day_offset: (out.date() - dt.date()).num_days(),
        }
    } else {
        let time = NaiveTime::parse_from_str(text, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
            .map_err(|_| {
                EngineError::InvalidArguments(format!(
                    "unsupported time '{}', expected HH:MM or YYYY-MM-DD HH:MM[:SS]",
                    text
                ))
            })?;
        let anchor = NaiveDate::from_ymd_opt(2000, 1, 2)
            .map(|d| d.and_time(time))
            .ok_or_else(|| EngineError::InvalidArguments("invalid time".to_string()))?;
        let out = anchor + shift;
        TimezoneOutput {
            original: input.time.clone(),
            converted: out.format("%H:%M").to_string(),
            from_timezone: input.from_timezone,
            to_timezone: input.to_timezone,
            day_offset: (out.date() - anchor.date()).num_days(),
        }
    };
    Ok(converted)
}

fn timezone_tool() -> Tool {
    Tool::new(
        "timezone_converter",
        "Convert a time between UTC offsets",
        ToolSchema::new()
            .param(ParamSpec::required(
                "time",
                ParamType::String,
                "HH:MM or YYYY-MM-DD HH:MM[:SS]",
            ))
            .param(ParamSpec::required(
                "from_timezone",
                ParamType::String,
                "Source zone, e.g. UTC+8",
            ))
            .param(ParamSpec::required(
                "to_timezone",
                ParamType::String,
                "Target zone, e.g. UTC-5",
            )),
        timezone_converter,
    )
    .builtin()
}

/// Resolve `relative` under `base`, refusing absolute paths, `..` and
/// symlinks that lead outside `base`.
pub(crate) async fn resolve_under(base: &Path, relative: &str) -> EngineResult<PathBuf> {
    let candidate = Path::new(relative);
    let escapes = candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if relative.is_empty() || escapes {
        return Err(EngineError::InvalidArguments(format!(
            "path '{}' is outside the allowed directory",
            relative
        )));
    }

    let base = tokio::fs::canonicalize(base).await?;
    let full = tokio::fs::canonicalize(base.join(candidate)).await?;
    if !full.starts_with(&base) {
        return Err(EngineError::InvalidArguments(format!(
            "path '{}' is outside the allowed directory",
            relative
        )));
    }
    Ok(full)
}

#[derive(Serialize)]
struct FileReadOutput {
    path: String,
    size: u64,
    content: String,
}

fn file_read_tool(base: PathBuf) -> Tool {
    Tool::new(
        "file_read",
        "Read a text file below the configured base directory",
        ToolSchema::new().param(ParamSpec::required(
            "path",
            ParamType::String,
            "Path relative to the base directory",
        )),
        move |_ctx, args| {
            let base = base.clone();
            async move {
                let relative = args.str("path")?.to_string();
                let full = resolve_under(&base, &relative).await?;
                let size = tokio::fs::metadata(&full).await?.len();
                if size > MAX_FILE_BYTES {
                    return Err(EngineError::InvalidArguments(format!(
                        "file '{}' is larger than {} bytes",
                        relative, MAX_FILE_BYTES
                    )));
                }
                let bytes = tokio::fs::read(&full).await?;
                Ok(FileReadOutput {
                    path: relative,
                    size,
                    content: String::from_utf8_lossy(&bytes).into_owned(),
                })
            }
        },
    )
    .with_category(ToolCategory::Developer)
    .builtin()
}

fn web_search_tool(backend: Arc<dyn SearchBackend>) -> Tool {
    Tool::new(
        "web_search",
        "Search the web for up-to-date information",
        ToolSchema::new().param(ParamSpec::required("query", ParamType::String, "Search query")),
        move |ctx, args| {
            let backend = Arc::clone(&backend);
            async move {
                let query = args.str("query")?.to_string();
                let results = backend.search(&ctx, &query).await?;
                Ok::<_, EngineError>(json!({ "query": query, "results": results }))
            }
        },
    )
    .with_category(ToolCategory::Connector)
    .builtin()
}

/// Build a builtin tool by name. `None` for unknown names and for tools
/// whose backing resource is not configured.
fn builtin_tool(name: &str, options: &BuiltinOptions) -> Option<Tool> {
    match name {
        "calculator" => Some(calculator_tool()),
        "timezone_converter" => Some(timezone_tool()),
        "file_read" => options.file_base_path.clone().map(file_read_tool),
        "web_search" => Some(web_search_tool(
            options
                .search
                .clone()
                .unwrap_or_else(|| Arc::new(UnconfiguredSearch)),
        )),
        _ => None,
    }
}

impl ToolRegistry {
    /// Register the named builtins. Unknown or unconfigured names are
    /// skipped with a warning; returns how many were registered.
    pub fn register_batch_tools(&self, names: &[&str], options: &BuiltinOptions) -> EngineResult<usize> {
        let mut registered = 0;
        for name in names {
            match builtin_tool(name, options) {
                Some(tool) => {
                    self.register_tool(tool)?;
                    registered += 1;
                }
                None => tracing::warn!(tool = %name, "Unknown or unconfigured builtin tool, skipping"),
            }
        }
        Ok(registered)
    }

    pub fn register_all_builtin_tools(&self, options: &BuiltinOptions) -> EngineResult<usize> {
        let available: Vec<&str> = BUILTIN_TOOL_NAMES
            .iter()
            .copied()
            .filter(|name| builtin_tool(name, options).is_some())
            .collect();
        self.register_batch_tools(&available, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSearch;

    #[async_trait]
    impl SearchBackend for FixedSearch {
        async fn search(&self, _ctx: &RequestContext, query: &str) -> EngineResult<Value> {
            Ok(json!([{ "title": format!("About {}", query) }]))
        }
    }

    #[tokio::test]
    async fn test_calculator() {
        let ctx = RequestContext::new();
        let out = calculator_tool()
            .invoke(&ctx, r#"{"expression":"2+2"}"#)
            .await
            .unwrap();
        assert_eq!(out, json!({"expression": "2+2", "result": "4"}));

        let err = calculator_tool()
            .invoke(&ctx, r#"{"expression":"1/0"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("UTC").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_offset("utc+8").unwrap().local_minus_utc(), 8 * 3600);
        assert_eq!(parse_offset("UTC-05:30").unwrap().local_minus_utc(), -(5 * 3600 + 1800));
        assert_eq!(parse_offset("+0545").unwrap().local_minus_utc(), 5 * 3600 + 45 * 60);
        assert!(parse_offset("America/New_York").is_err());
        assert!(parse_offset("UTC+25").is_err());
        assert!(parse_offset("UTC+1é1").is_err());
        assert!(parse_offset("UTC+é").is_err());
        assert!(parse_offset("UTC++5").is_err());
        assert!(parse_offset("UTC+").is_err());
    }

    #[tokio::test]
    async fn test_timezone_conversion() {
        let ctx = RequestContext::new();
        let tool = timezone_tool();
        let out = tool
            .invoke(
                &ctx,
                r#"{"time":"2024-03-01 23:30","from_timezone":"UTC","to_timezone":"UTC+8"}"#,
            )
            .await
            .unwrap();
        assert_eq!(out["converted"], "2024-03-02 07:30:00");
        assert_eq!(out["day_offset"], 1);

        let out = tool
            .invoke(&ctx, r#"{"time":"01:00","from_timezone":"UTC+2","to_timezone":"UTC"}"#)
            .await
            .unwrap();
        assert_eq!(out["converted"], "23:00");
        assert_eq!(out["day_offset"], -1);
    }

    #[tokio::test]
    async fn test_file_read_confined_to_base() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let tool = file_read_tool(dir.path().to_path_buf());
        let ctx = RequestContext::new();

        let out = tool.invoke(&ctx, r#"{"path":"notes.txt"}"#).await.unwrap();
        assert_eq!(out["content"], "hello");
        assert_eq!(out["size"], 5);

        for bad in [r#"{"path":"../etc/passwd"}"#, r#"{"path":"/etc/passwd"}"#] {
            let err = tool.invoke(&ctx, bad).await.unwrap_err();
            assert!(err.to_string().contains("outside the allowed directory"));
        }
        assert!(tool.invoke(&ctx, r#"{"path":"missing.txt"}"#).await.is_err());
    }

    #[tokio::test]
    async fn test_batch_registration_skips_unavailable() {
        let registry = ToolRegistry::new();
        let count = registry
            .register_batch_tools(&["calculator", "file_read", "nope"], &BuiltinOptions::default())
            .unwrap();
        assert_eq!(count, 1);
        assert!(registry.has_tool("calculator"));
        assert!(!registry.has_tool("file_read"));

        let options = BuiltinOptions {
            search: Some(Arc::new(FixedSearch)),
            ..Default::default()
        };
        let registry = ToolRegistry::new();
        assert_eq!(registry.register_all_builtin_tools(&options).unwrap(), 3);
        let tool = registry.get_tool("web_search").unwrap();
        assert!(tool.is_builtin);
        assert_eq!(tool.category, ToolCategory::Connector);
        let out = tool
            .invoke(&RequestContext::new(), r#"{"query":"rust"}"#)
            .await
            .unwrap();
        assert_eq!(out["results"][0]["title"], "About rust");
    }

    #[tokio::test]
    async fn test_web_search_without_backend_fails_on_call() {
        let registry = ToolRegistry::new();
        registry
            .register_all_builtin_tools(&BuiltinOptions::default())
            .unwrap();
        let tool = registry.get_tool("web_search").unwrap();
        let err = tool
            .invoke(&RequestContext::new(), r#"{"query":"rust"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no web search backend configured"));
    }
}
