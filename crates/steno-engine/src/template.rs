//! Placeholder resolution for step parameters.
//!
//! Step parameters may embed `{{ path }}` placeholders that are resolved
//! against the workflow inputs and the records of earlier steps just before
//! each step runs. Paths are parsed into typed [`PathSegment`]s, and every
//! lookup produces an explicit [`Resolution`] so "this path is undefined" is
//! a first-class answer rather than a sentinel string.
//!
//! Resolution is best-effort by design: an undefined path leaves the
//! placeholder text verbatim in the output so a capability (or a human
//! reading the run log) can see exactly what failed to bind. It never
//! aborts a run.
//!
//! # Path grammar
//!
//! A path is dot-separated keys with optional `[n]` indexes:
//!
//! - `input.attendees[0].email` -- workflow inputs
//! - `steps[1].result.summary` -- the Ok payload of step 1
//! - `steps[1].error` -- the Err message of step 1
//! - `steps[1].capability`, `steps[1].params` -- step metadata
//!
//! A string leaf that is exactly one placeholder substitutes the resolved
//! JSON value with its type intact; a placeholder inside a longer string
//! renders inline (strings raw, everything else as compact JSON).

use serde_json::Value;
use steno_store::StepRecord;

// ---------------------------------------------------------------------------
// Path parsing
// ---------------------------------------------------------------------------

/// One parsed segment of a placeholder path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// An object key, e.g. `input` or `summary`.
    Key(String),
    /// An array index, e.g. the `[2]` in `attendees[2]`.
    Index(usize),
}

/// Parse a placeholder expression into path segments.
///
/// Returns `None` for malformed expressions (empty, leading/trailing dots,
/// unclosed brackets, non-numeric indexes); the caller treats those as
/// unresolved.
pub fn parse_path(expr: &str) -> Option<Vec<PathSegment>> {
    let expr = expr.trim();
    if expr.is_empty() {
        return None;
    }

    let mut segments = Vec::new();
    let mut rest = expr;
    let mut expect_key = true;

    while !rest.is_empty() {
        if expect_key {
            let end = rest.find(['.', '[', ']']).unwrap_or(rest.len());
            if end == 0 || rest[end..].starts_with(']') {
                return None;
            }
            segments.push(PathSegment::Key(rest[..end].to_string()));
            rest = &rest[end..];
            expect_key = false;
        } else if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']')?;
            let index = after[..close].trim().parse::<usize>().ok()?;
            segments.push(PathSegment::Index(index));
            rest = &after[close + 1..];
        } else if let Some(after) = rest.strip_prefix('.') {
            if after.is_empty() {
                return None;
            }
            rest = after;
            expect_key = true;
        } else {
            return None;
        }
    }

    Some(segments)
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// The answer to one placeholder lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The path resolved to this value.
    Resolved(Value),
    /// Some segment was undefined; the placeholder stays verbatim.
    Unresolved,
}

/// Everything a placeholder path can address during a run.
pub struct ResolveContext<'a> {
    /// Workflow inputs, addressed under the `input` root.
    pub input: &'a serde_json::Map<String, Value>,
    /// Records of the steps executed so far, addressed under `steps[N]`.
    pub steps: &'a [StepRecord],
}

impl<'a> ResolveContext<'a> {
    /// Build a context over the given inputs and step records.
    pub fn new(input: &'a serde_json::Map<String, Value>, steps: &'a [StepRecord]) -> Self {
        Self { input, steps }
    }
}

/// Look up a parsed path against the context.
pub fn lookup(ctx: &ResolveContext<'_>, segments: &[PathSegment]) -> Resolution {
    let Some((first, rest)) = segments.split_first() else {
        return Resolution::Unresolved;
    };
    let PathSegment::Key(root) = first else {
        return Resolution::Unresolved;
    };

    match root.as_str() {
        "input" => match rest.split_first() {
            // Bare `{{input}}` yields the whole input object.
            None => Resolution::Resolved(Value::Object(ctx.input.clone())),
            Some((PathSegment::Key(key), tail)) => match ctx.input.get(key) {
                Some(v) => descend(v, tail),
                None => Resolution::Unresolved,
            },
            Some((PathSegment::Index(_), _)) => Resolution::Unresolved,
        },
        "steps" => {
            let Some((PathSegment::Index(i), tail)) = rest.split_first() else {
                return Resolution::Unresolved;
            };
            match ctx.steps.get(*i) {
                Some(record) => step_field(record, tail),
                None => Resolution::Unresolved,
            }
        }
        _ => Resolution::Unresolved,
    }
}

/// Resolve the field segment addressing into a [`StepRecord`].
///
/// `result` binds only on Ok outcomes and `error` only on Err outcomes, so a
/// template that assumes success stays visibly unresolved when the step
/// failed instead of silently substituting nothing.
fn step_field(record: &StepRecord, segments: &[PathSegment]) -> Resolution {
    let Some((PathSegment::Key(field), tail)) = segments.split_first() else {
        return Resolution::Unresolved;
    };

    match field.as_str() {
        "capability" => descend(&Value::String(record.capability.clone()), tail),
        "params" => descend(&record.resolved_params, tail),
        "result" => match record.outcome.value() {
            Some(v) => descend(v, tail),
            None => Resolution::Unresolved,
        },
        "error" => match record.outcome.error() {
            Some(message) => descend(&Value::String(message.to_string()), tail),
            None => Resolution::Unresolved,
        },
        _ => Resolution::Unresolved,
    }
}

/// Walk the remaining segments down through a JSON value.
fn descend(value: &Value, segments: &[PathSegment]) -> Resolution {
    let mut current = value;
    for segment in segments {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => match map.get(key) {
                Some(v) => v,
                None => return Resolution::Unresolved,
            },
            (PathSegment::Index(i), Value::Array(items)) => match items.get(*i) {
                Some(v) => v,
                None => return Resolution::Unresolved,
            },
            _ => return Resolution::Unresolved,
        };
    }
    Resolution::Resolved(current.clone())
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

/// Resolve every placeholder in a parameter tree.
///
/// Pure and total: objects and arrays recurse, non-string scalars pass
/// through, and undefined paths leave their placeholder text untouched.
/// Idempotent on fully-resolved trees.
pub fn resolve(params: &Value, ctx: &ResolveContext<'_>) -> Value {
    match params {
        Value::String(s) => resolve_string(s, ctx),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, ctx)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, ctx)).collect()),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, ctx: &ResolveContext<'_>) -> Value {
    if !s.contains("{{") {
        return Value::String(s.to_string());
    }

    // A string that is exactly one placeholder keeps the value's JSON type.
    if let Some(expr) = single_placeholder(s) {
        return match lookup_expr(expr, ctx) {
            Resolution::Resolved(value) => value,
            Resolution::Unresolved => Value::String(s.to_string()),
        };
    }

    // Otherwise render each placeholder inline.
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start..];
        match after_open[2..].find("}}") {
            Some(end) => {
                let expr = &after_open[2..2 + end];
                match lookup_expr(expr, ctx) {
                    Resolution::Resolved(Value::String(text)) => out.push_str(&text),
                    Resolution::Resolved(value) => out.push_str(&value.to_string()),
                    Resolution::Unresolved => out.push_str(&after_open[..end + 4]),
                }
                rest = &after_open[end + 4..];
            }
            None => {
                // Unterminated opener; emit the remainder untouched.
                out.push_str(after_open);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

/// If `s` is exactly one `{{ ... }}` placeholder, return its inner expression.
fn single_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner)
}

fn lookup_expr(expr: &str, ctx: &ResolveContext<'_>) -> Resolution {
    match parse_path(expr) {
        Some(segments) => lookup(ctx, &segments),
        None => Resolution::Unresolved,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use steno_capability::InvokeOutcome;

    fn input_map(value: Value) -> serde_json::Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test input must be an object"),
        }
    }

    fn ok_step(index: usize, value: Value) -> StepRecord {
        StepRecord {
            step_index: index,
            capability: "echo".to_string(),
            resolved_params: json!({"message": "hi"}),
            outcome: InvokeOutcome::ok(value),
        }
    }

    fn err_step(index: usize, message: &str) -> StepRecord {
        StepRecord {
            step_index: index,
            capability: "flaky".to_string(),
            resolved_params: json!({}),
            outcome: InvokeOutcome::err(message),
        }
    }

    #[test]
    fn parse_simple_and_indexed_paths() {
        assert_eq!(
            parse_path("input.user.name"),
            Some(vec![
                PathSegment::Key("input".into()),
                PathSegment::Key("user".into()),
                PathSegment::Key("name".into()),
            ])
        );
        assert_eq!(
            parse_path(" steps[2].result "),
            Some(vec![
                PathSegment::Key("steps".into()),
                PathSegment::Index(2),
                PathSegment::Key("result".into()),
            ])
        );
        assert_eq!(
            parse_path("matrix[0][1]"),
            Some(vec![
                PathSegment::Key("matrix".into()),
                PathSegment::Index(0),
                PathSegment::Index(1),
            ])
        );
    }

    #[test]
    fn parse_rejects_malformed_paths() {
        assert_eq!(parse_path(""), None);
        assert_eq!(parse_path("."), None);
        assert_eq!(parse_path(".input"), None);
        assert_eq!(parse_path("input."), None);
        assert_eq!(parse_path("a..b"), None);
        assert_eq!(parse_path("a[x]"), None);
        assert_eq!(parse_path("a[1"), None);
        assert_eq!(parse_path("a]b"), None);
    }

    #[test]
    fn whole_string_placeholder_keeps_json_type() {
        let input = input_map(json!({"count": 3, "tags": ["a", "b"]}));
        let ctx = ResolveContext::new(&input, &[]);

        let resolved = resolve(&json!({"n": "{{input.count}}"}), &ctx);
        assert_eq!(resolved, json!({"n": 3}));

        let resolved = resolve(&json!("{{input.tags}}"), &ctx);
        assert_eq!(resolved, json!(["a", "b"]));
    }

    #[test]
    fn embedded_placeholder_renders_inline() {
        let input = input_map(json!({"name": "standup", "count": 4}));
        let ctx = ResolveContext::new(&input, &[]);

        let resolved = resolve(
            &json!("meeting {{input.name}} had {{input.count}} attendees"),
            &ctx,
        );
        assert_eq!(resolved, json!("meeting standup had 4 attendees"));
    }

    #[test]
    fn embedded_non_string_renders_compact_json() {
        let input = input_map(json!({"meta": {"room": "4a"}}));
        let ctx = ResolveContext::new(&input, &[]);

        let resolved = resolve(&json!("ctx: {{input.meta}}"), &ctx);
        assert_eq!(resolved, json!(r#"ctx: {"room":"4a"}"#));
    }

    #[test]
    fn unresolved_placeholder_stays_verbatim() {
        let input = input_map(json!({}));
        let ctx = ResolveContext::new(&input, &[]);

        let params = json!({
            "whole": "{{input.missing}}",
            "mixed": "value: {{steps[9].result}}",
            "malformed": "{{not a valid path!}}",
        });
        let resolved = resolve(&params, &ctx);
        assert_eq!(resolved, params);
    }

    #[test]
    fn step_result_and_metadata_paths() {
        let input = input_map(json!({}));
        let steps = vec![ok_step(0, json!({"summary": "short", "items": [10, 20]}))];
        let ctx = ResolveContext::new(&input, &steps);

        let resolved = resolve(
            &json!({
                "text": "{{steps[0].result.summary}}",
                "second": "{{steps[0].result.items[1]}}",
                "who": "{{steps[0].capability}}",
                "sent": "{{steps[0].params.message}}",
            }),
            &ctx,
        );
        assert_eq!(
            resolved,
            json!({"text": "short", "second": 20, "who": "echo", "sent": "hi"})
        );
    }

    #[test]
    fn result_unresolved_on_failed_step_and_vice_versa() {
        let input = input_map(json!({}));
        let steps = vec![ok_step(0, json!("fine")), err_step(1, "smtp refused")];
        let ctx = ResolveContext::new(&input, &steps);

        // `error` on a succeeded step stays verbatim.
        let resolved = resolve(&json!("{{steps[0].error}}"), &ctx);
        assert_eq!(resolved, json!("{{steps[0].error}}"));

        // `result` on a failed step stays verbatim.
        let resolved = resolve(&json!("{{steps[1].result}}"), &ctx);
        assert_eq!(resolved, json!("{{steps[1].result}}"));

        // But `error` on the failed step binds.
        let resolved = resolve(&json!("{{steps[1].error}}"), &ctx);
        assert_eq!(resolved, json!("smtp refused"));
    }

    #[test]
    fn non_string_scalars_pass_through() {
        let input = input_map(json!({}));
        let ctx = ResolveContext::new(&input, &[]);

        let params = json!({"n": 7, "flag": true, "nothing": null});
        assert_eq!(resolve(&params, &ctx), params);
    }

    #[test]
    fn whole_input_object_substitution() {
        let input = input_map(json!({"a": 1}));
        let ctx = ResolveContext::new(&input, &[]);

        let resolved = resolve(&json!("{{input}}"), &ctx);
        assert_eq!(resolved, json!({"a": 1}));
    }

    #[test]
    fn resolution_is_idempotent_when_fully_resolved() {
        let input = input_map(json!({"name": "retro"}));
        let steps = vec![ok_step(0, json!({"summary": "done"}))];
        let ctx = ResolveContext::new(&input, &steps);

        let params = json!({
            "title": "{{input.name}}",
            "body": "summary: {{steps[0].result.summary}}",
            "nested": {"list": ["{{input.name}}", 1, false]},
        });
        let once = resolve(&params, &ctx);
        let twice = resolve(&once, &ctx);
        assert_eq!(once, twice);
    }

    #[test]
    fn unterminated_opener_left_alone() {
        let input = input_map(json!({"x": "y"}));
        let ctx = ResolveContext::new(&input, &[]);

        let resolved = resolve(&json!("broken {{input.x"), &ctx);
        assert_eq!(resolved, json!("broken {{input.x"));
    }
}
