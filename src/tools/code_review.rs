//! Code review workflow tools
//!
//! Pure rule-based tools for extracting functions from Python source text,
//! checking complexity, detecting issues, suggesting improvements, and
//! evaluating overall code quality. They operate on `context["code"]` and
//! write their findings back into the context, so they compose into review
//! workflows with branch and loop edges over keys like `issue_count` and
//! `meets_threshold`.

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::state::{Context, WorkflowState};
use crate::tools::ToolRegistry;

/// Register the five code review tools under their canonical names.
///
/// Names that are already taken are left untouched.
pub fn register_code_review_tools(registry: &ToolRegistry) {
    let tools: [(&str, fn(WorkflowState) -> anyhow::Result<WorkflowState>); 5] = [
        ("extract_functions", extract_functions),
        ("check_complexity", check_complexity),
        ("detect_basic_issues", detect_basic_issues),
        ("suggest_improvements", suggest_improvements),
        ("evaluate_quality", evaluate_quality),
    ];
    for (name, tool) in tools {
        if !registry.has(name) {
            let _ = registry.register_fn(name, tool);
        }
    }
}

fn context_str(state: &WorkflowState, key: &str) -> String {
    state
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn context_array(state: &WorkflowState, key: &str) -> Vec<Value> {
    state
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn context_i64(state: &WorkflowState, key: &str, default: i64) -> i64 {
    state.get(key).and_then(Value::as_i64).unwrap_or(default)
}

/// Extract function definitions from the source code.
///
/// Expects `context["code"]` to contain the source text. Sets
/// `context["functions"]` with extracted function metadata and
/// `context["function_count"]`.
pub fn extract_functions(mut state: WorkflowState) -> anyhow::Result<WorkflowState> {
    let code = context_str(&state, "code");

    // Matches `def name(params):` and `async def name(params) -> ret:`
    let def_re = Regex::new(
        r"(?P<async>async\s+)?def\s+(?P<name>\w+)\s*\((?P<params>[^)]*)\)\s*(?:->\s*(?P<ret>[^:]+))?\s*:",
    )?;
    let doc_re = Regex::new(r#"(?m)^\s*"""[^"]*""""#)?;

    let lines: Vec<&str> = code.split('\n').collect();
    let mut functions = Vec::new();

    for caps in def_re.captures_iter(&code) {
        let name = caps["name"].to_string();
        let start_pos = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let line_num = code[..start_pos].matches('\n').count() + 1;

        // Collect the body until a new top-level def/class begins
        let func_start_line = line_num - 1;
        let mut func_lines: Vec<&str> = Vec::new();
        let mut indent_level: Option<usize> = None;

        for (i, line) in lines.iter().copied().enumerate().skip(func_start_line) {
            if i == func_start_line {
                func_lines.push(line);
                continue;
            }
            let stripped = line.trim_start();
            if !stripped.is_empty() && indent_level.is_none() {
                indent_level = Some(line.len() - stripped.len());
            }
            if !stripped.is_empty() && !line.starts_with(&" ".repeat(indent_level.unwrap_or(4))) {
                if stripped.starts_with("def ")
                    || stripped.starts_with("async def ")
                    || stripped.starts_with("class ")
                {
                    break;
                }
            }
            func_lines.push(line);
        }
        while func_lines.last().is_some_and(|l| l.trim().is_empty()) {
            func_lines.pop();
        }

        let body = func_lines.join("\n");
        let after_signature = body.find(':').map(|i| &body[i + 1..]).unwrap_or("");
        let has_docstring = doc_re.is_match(after_signature);

        let params: Vec<String> = caps["params"]
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != "self" && *p != "cls")
            .map(String::from)
            .collect();
        let param_count = params.len();

        let return_type = caps
            .name("ret")
            .map(|m| Value::String(m.as_str().trim().to_string()))
            .unwrap_or(Value::Null);

        functions.push(json!({
            "name": name,
            "line": line_num,
            "params": params,
            "param_count": param_count,
            "is_async": caps.name("async").is_some(),
            "return_type": return_type,
            "has_docstring": has_docstring,
            "body": body,
            "line_count": func_lines.len(),
        }));
    }

    let names: Vec<Value> = functions
        .iter()
        .filter_map(|f| f.get("name").cloned())
        .collect();
    let count = functions.len();

    state.set("functions", Value::Array(functions));
    state.set("function_count", json!(count));

    let mut data = Context::new();
    data.insert("function_names".to_string(), Value::Array(names));
    state.record(
        "extract_functions",
        Some(format!("Extracted {count} function(s) from source code")),
        data,
    );

    Ok(state)
}

/// Calculate a simplified cyclomatic complexity for extracted functions.
///
/// Counts branching keywords, loops, exception handling, boolean operators,
/// and extra return points in each function body.
pub fn check_complexity(mut state: WorkflowState) -> anyhow::Result<WorkflowState> {
    let functions = context_array(&state, "functions");

    let patterns = [
        r"\bif\b", r"\belif\b", r"\belse\b", r"\bfor\b", r"\bwhile\b", r"\btry\b",
        r"\bexcept\b", r"\band\b", r"\bor\b", r"\breturn\b",
    ];
    let compiled: Vec<(String, Regex)> = patterns
        .iter()
        .map(|p| Ok((p.replace(r"\b", "").trim().to_string(), Regex::new(p)?)))
        .collect::<anyhow::Result<_>>()?;

    let mut results = Vec::new();
    let mut total_complexity: i64 = 0;

    for func in &functions {
        let body = func.get("body").and_then(Value::as_str).unwrap_or_default();
        let mut complexity: i64 = 1;
        let mut breakdown = Map::new();

        for (name, re) in &compiled {
            let count = re.find_iter(body).count() as i64;
            if count > 0 {
                complexity += count;
                breakdown.insert(name.clone(), json!(count));
            }
        }

        // A single return is expected; only extra returns indicate branching
        if breakdown.get("return").and_then(Value::as_i64).unwrap_or(0) > 1 {
            complexity -= 1;
        }

        results.push(json!({
            "name": func.get("name").cloned().unwrap_or(Value::Null),
            "complexity": complexity,
            "breakdown": breakdown,
            "rating": complexity_rating(complexity),
        }));
        total_complexity += complexity;
    }

    let avg_complexity = if functions.is_empty() {
        0.0
    } else {
        let avg = total_complexity as f64 / functions.len() as f64;
        (avg * 100.0).round() / 100.0
    };

    let high: Vec<Value> = results
        .iter()
        .filter(|r| r.get("complexity").and_then(Value::as_i64).unwrap_or(0) > 10)
        .filter_map(|r| r.get("name").cloned())
        .collect();
    let analyzed = functions.len();

    state.set("complexity", Value::Array(results));
    state.set("total_complexity", json!(total_complexity));
    state.set("avg_complexity", json!(avg_complexity));

    let mut data = Context::new();
    data.insert("total_complexity".to_string(), json!(total_complexity));
    data.insert("avg_complexity".to_string(), json!(avg_complexity));
    data.insert("high_complexity_functions".to_string(), Value::Array(high));
    state.record(
        "check_complexity",
        Some(format!(
            "Analyzed complexity for {analyzed} function(s). Average: {avg_complexity:.2}"
        )),
        data,
    );

    Ok(state)
}

fn complexity_rating(complexity: i64) -> &'static str {
    match complexity {
        c if c <= 5 => "low",
        c if c <= 10 => "moderate",
        c if c <= 20 => "high",
        _ => "very_high",
    }
}

/// Detect common code issues.
///
/// Checks for missing docstrings, long lines, too many parameters, long
/// functions, high complexity, missing return type hints, and TODO markers.
pub fn detect_basic_issues(mut state: WorkflowState) -> anyhow::Result<WorkflowState> {
    let functions = context_array(&state, "functions");
    let code = context_str(&state, "code");
    let complexity_results = context_array(&state, "complexity");

    let mut issues = Vec::new();

    let complexity_of = |name: &str| -> i64 {
        complexity_results
            .iter()
            .find(|c| c.get("name").and_then(Value::as_str) == Some(name))
            .and_then(|c| c.get("complexity"))
            .and_then(Value::as_i64)
            .unwrap_or(0)
    };

    for func in &functions {
        let name = func.get("name").and_then(Value::as_str).unwrap_or_default();
        let line = func.get("line").cloned().unwrap_or(Value::Null);

        if !func
            .get("has_docstring")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            issues.push(json!({
                "type": "missing_docstring",
                "function": name,
                "line": line.clone(),
                "severity": "warning",
                "message": format!("Function '{name}' is missing a docstring"),
            }));
        }

        let param_count = func.get("param_count").and_then(Value::as_i64).unwrap_or(0);
        if param_count > 5 {
            issues.push(json!({
                "type": "too_many_params",
                "function": name,
                "line": line.clone(),
                "severity": "warning",
                "message": format!(
                    "Function '{name}' has {param_count} parameters (recommended: <= 5)"
                ),
            }));
        }

        let line_count = func.get("line_count").and_then(Value::as_i64).unwrap_or(0);
        if line_count > 50 {
            issues.push(json!({
                "type": "long_function",
                "function": name,
                "line": line.clone(),
                "severity": "warning",
                "message": format!(
                    "Function '{name}' is {line_count} lines long (recommended: <= 50)"
                ),
            }));
        }

        let complexity = complexity_of(name);
        if complexity > 10 {
            issues.push(json!({
                "type": "high_complexity",
                "function": name,
                "line": line.clone(),
                "severity": "error",
                "message": format!(
                    "Function '{name}' has complexity {complexity} (recommended: <= 10)"
                ),
            }));
        }

        if func.get("return_type").map_or(true, Value::is_null) {
            issues.push(json!({
                "type": "missing_return_type",
                "function": name,
                "line": line,
                "severity": "info",
                "message": format!("Function '{name}' is missing return type annotation"),
            }));
        }
    }

    // Long lines across the whole source; cap the reported count
    let mut long_lines = 0usize;
    for (i, line) in code.split('\n').enumerate() {
        if line.len() > 88 {
            long_lines += 1;
            if long_lines <= 5 {
                let line_num = i + 1;
                let chars = line.len();
                issues.push(json!({
                    "type": "long_line",
                    "line": line_num,
                    "severity": "info",
                    "message": format!("Line {line_num} exceeds 88 characters ({chars} chars)"),
                }));
            }
        }
    }

    let todo_re = Regex::new(r"(?i)#\s*(TODO|FIXME|XXX|HACK)[\s:]+(.+)")?;
    for caps in todo_re.captures_iter(&code) {
        let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let line_num = code[..start].matches('\n').count() + 1;
        let tag = caps[1].to_uppercase();
        let text: String = caps[2].trim().chars().take(50).collect();
        issues.push(json!({
            "type": "todo_comment",
            "line": line_num,
            "severity": "info",
            "message": format!("{tag} found at line {line_num}: {text}"),
        }));
    }

    let count_severity = |severity: &str| -> i64 {
        issues
            .iter()
            .filter(|i| i.get("severity").and_then(Value::as_str) == Some(severity))
            .count() as i64
    };
    let issue_counts = json!({
        "error": count_severity("error"),
        "warning": count_severity("warning"),
        "info": count_severity("info"),
    });

    let total = issues.len();
    state.set("issues", Value::Array(issues.clone()));
    state.set("issue_count", json!(total));
    state.set("issue_counts", issue_counts.clone());

    if state.get("improvement_iteration").is_none() {
        state.set("improvement_iteration", json!(0));
    }
    if state.get("applied_suggestions").is_none() {
        state.set("applied_suggestions", json!([]));
    }
    if state.get("threshold").is_none() {
        state.set("threshold", json!(70));
    }

    let errors = issue_counts["error"].clone();
    let warnings = issue_counts["warning"].clone();
    let infos = issue_counts["info"].clone();

    let mut data = Context::new();
    data.insert("issue_counts".to_string(), issue_counts);
    data.insert("issues".to_string(), Value::Array(issues));
    state.record(
        "detect_basic_issues",
        Some(format!(
            "Detected {total} issue(s): {errors} errors, {warnings} warnings, {infos} info"
        )),
        data,
    );

    Ok(state)
}

fn suggestion_key(issue_type: &str, issue: &Value) -> String {
    let function = issue
        .get("function")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let line = issue
        .get("line")
        .and_then(Value::as_i64)
        .map(|n| n.to_string())
        .unwrap_or_default();
    format!("{issue_type}:{function}:{line}")
}

/// Generate improvement suggestions based on detected issues.
///
/// Each iteration marks a growing prefix of suggestions as applied, modelling
/// gradual improvement across loop traversals.
pub fn suggest_improvements(mut state: WorkflowState) -> anyhow::Result<WorkflowState> {
    let issues = context_array(&state, "issues");
    let iteration = context_i64(&state, "improvement_iteration", 0);
    let applied: Vec<String> = context_array(&state, "applied_suggestions")
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();

    let template_for = |issue_type: &str| -> (String, i64, &'static str) {
        match issue_type {
            "missing_docstring" => (
                "Add a docstring describing the function's purpose, parameters, and return value"
                    .to_string(),
                5,
                "documentation",
            ),
            "too_many_params" => (
                "Consider using a configuration object or breaking down the function".to_string(),
                8,
                "design",
            ),
            "long_function" => (
                "Refactor into smaller, focused functions with single responsibilities"
                    .to_string(),
                10,
                "design",
            ),
            "high_complexity" => (
                "Simplify control flow, extract helper methods, or use early returns".to_string(),
                12,
                "design",
            ),
            "missing_return_type" => (
                "Add return type annotation for better code clarity".to_string(),
                3,
                "typing",
            ),
            "long_line" => (
                "Break long lines using proper line continuation or reformatting".to_string(),
                2,
                "style",
            ),
            "todo_comment" => (
                "Address the TODO item or create a tracked issue".to_string(),
                4,
                "maintenance",
            ),
            other => (
                format!("Review and address the {} issue", other.replace('_', " ")),
                3,
                "general",
            ),
        }
    };

    let mut suggestions = Vec::new();
    let mut seen_types = std::collections::HashSet::new();

    for issue in &issues {
        let issue_type = issue
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // One suggestion per issue type per iteration; already-applied
        // suggestions are not re-issued
        if applied.contains(&suggestion_key(&issue_type, issue)) {
            continue;
        }
        if !seen_types.insert(issue_type.clone()) {
            continue;
        }

        let (action, impact, category) = template_for(&issue_type);
        let id = format!("suggestion_{}_{}", suggestions.len() + 1, iteration);
        suggestions.push(json!({
            "id": id,
            "issue_type": issue_type,
            "function": issue.get("function").cloned().unwrap_or(Value::Null),
            "line": issue.get("line").cloned().unwrap_or(Value::Null),
            "action": action,
            "impact": impact,
            "category": category,
            "original_issue": issue.get("message").cloned().unwrap_or(Value::Null),
        }));
    }

    // Apply a growing prefix each iteration
    let to_apply = suggestions.len().min((2 + iteration).max(0) as usize);
    let mut newly_applied = Vec::new();

    for suggestion in suggestions.iter_mut().take(to_apply) {
        let issue_type = suggestion
            .get("issue_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let key = suggestion_key(&issue_type, suggestion);
        let is_new = !applied.contains(&key);
        if is_new {
            newly_applied.push(key);
        }
        suggestion["applied"] = json!(is_new);
    }

    let total_impact: i64 = suggestions
        .iter()
        .filter(|s| s.get("applied").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|s| s.get("impact").and_then(Value::as_i64))
        .sum();

    let mut all_applied: Vec<Value> = applied.iter().map(|k| json!(k)).collect();
    all_applied.extend(newly_applied.iter().map(|k| json!(k)));

    let generated = suggestions.len();
    let applied_now = newly_applied.len();

    state.set("suggestions", Value::Array(suggestions.clone()));
    state.set("suggestion_count", json!(generated));
    state.set("applied_suggestions", Value::Array(all_applied));
    state.set("improvement_iteration", json!(iteration + 1));
    state.set("newly_applied_count", json!(applied_now));
    state.set("iteration_impact", json!(total_impact));

    let mut data = Context::new();
    data.insert("iteration".to_string(), json!(iteration + 1));
    data.insert("suggestions".to_string(), Value::Array(suggestions));
    data.insert(
        "newly_applied".to_string(),
        Value::Array(newly_applied.iter().map(|k| json!(k)).collect()),
    );
    data.insert("total_impact".to_string(), json!(total_impact));
    state.record(
        "suggest_improvements",
        Some(format!(
            "Iteration {}: Generated {generated} suggestion(s), applied {applied_now}",
            iteration + 1
        )),
        data,
    );

    Ok(state)
}

/// Evaluate overall code quality and compute a 0-100 quality score.
///
/// Starts from a base of 100, deducts per issue severity and excess
/// complexity, and credits applied improvements and completed iterations.
pub fn evaluate_quality(mut state: WorkflowState) -> anyhow::Result<WorkflowState> {
    let issue_counts = state
        .get("issue_counts")
        .cloned()
        .unwrap_or_else(|| json!({"error": 0, "warning": 0, "info": 0}));
    let issues = context_array(&state, "issues");
    let applied = context_array(&state, "applied_suggestions");
    let functions = context_array(&state, "functions");
    let avg_complexity = state
        .get("avg_complexity")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let iteration = context_i64(&state, "improvement_iteration", 1);
    let threshold = context_i64(&state, "threshold", 70);

    let base_score: i64 = 100;
    let error_penalty = issue_counts["error"].as_i64().unwrap_or(0) * 10;
    let warning_penalty = issue_counts["warning"].as_i64().unwrap_or(0) * 5;
    let info_penalty = issue_counts["info"].as_i64().unwrap_or(0) * 2;
    let total_penalty = error_penalty + warning_penalty + info_penalty;

    let improvement_bonus = applied.len() as i64 * 5;
    let iteration_bonus = iteration * 8;

    let complexity_penalty = if avg_complexity > 10.0 {
        ((avg_complexity - 10.0) * 2.0) as i64
    } else {
        0
    };

    let raw_score =
        base_score - total_penalty + improvement_bonus + iteration_bonus - complexity_penalty;
    let quality_score = raw_score.clamp(0, 100);

    let grade = match quality_score {
        s if s >= 90 => "A",
        s if s >= 80 => "B",
        s if s >= 70 => "C",
        s if s >= 60 => "D",
        _ => "F",
    };

    let meets_threshold = quality_score >= threshold;

    let quality_report = json!({
        "score": quality_score,
        "grade": grade,
        "threshold": threshold,
        "meets_threshold": meets_threshold,
        "breakdown": {
            "base_score": base_score,
            "error_penalty": -error_penalty,
            "warning_penalty": -warning_penalty,
            "info_penalty": -info_penalty,
            "complexity_penalty": -complexity_penalty,
            "improvement_bonus": improvement_bonus,
            "iteration_bonus": iteration_bonus,
        },
        "metrics": {
            "function_count": functions.len(),
            "total_issues": issues.len(),
            "applied_improvements": applied.len(),
            "iterations": iteration,
            "avg_complexity": avg_complexity,
        },
    });

    state.set("quality_score", json!(quality_score));
    state.set("quality_grade", json!(grade));
    state.set("quality_report", quality_report.clone());
    state.set("meets_threshold", json!(meets_threshold));

    let status_msg = if meets_threshold {
        "PASSED".to_string()
    } else {
        format!("NEEDS IMPROVEMENT (target: {threshold})")
    };

    let data = match quality_report {
        Value::Object(map) => map,
        _ => Context::new(),
    };
    state.record(
        "evaluate_quality",
        Some(format!(
            "Quality score: {quality_score}/100 (Grade: {grade}) - {status_msg}"
        )),
        data,
    );

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_SIMPLE: &str = r#"
def greet(name: str) -> str:
    """Return a greeting message."""
    return f"Hello, {name}!"


def add(a: int, b: int) -> int:
    """Add two numbers."""
    return a + b
"#;

    fn state_with_code(code: &str) -> WorkflowState {
        let mut state = WorkflowState::new();
        state.set("code", json!(code));
        state
    }

    #[test]
    fn test_extract_simple_functions() {
        let state = extract_functions(state_with_code(SAMPLE_SIMPLE)).unwrap();

        assert_eq!(state.get("function_count"), Some(&json!(2)));
        let functions = state.get("functions").unwrap().as_array().unwrap();
        let names: Vec<&str> = functions
            .iter()
            .map(|f| f["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["greet", "add"]);
        for func in functions {
            assert_eq!(func["has_docstring"], json!(true));
            assert!(func["return_type"].is_string());
        }
    }

    #[test]
    fn test_extract_records_history() {
        let state = extract_functions(state_with_code(SAMPLE_SIMPLE)).unwrap();
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].node_id, "extract_functions");
    }

    #[test]
    fn test_complexity_of_trivial_functions_is_low() {
        let state = extract_functions(state_with_code(SAMPLE_SIMPLE)).unwrap();
        let state = check_complexity(state).unwrap();

        let results = state.get("complexity").unwrap().as_array().unwrap();
        assert_eq!(results.len(), 2);
        for result in results {
            assert_eq!(result["rating"], json!("low"));
        }
        assert!(state.get("total_complexity").unwrap().as_i64().unwrap() > 0);
    }

    #[test]
    fn test_detect_flags_missing_docstring() {
        let code = "\ndef undocumented(x):\n    return x\n";
        let state = extract_functions(state_with_code(code)).unwrap();
        let state = check_complexity(state).unwrap();
        let state = detect_basic_issues(state).unwrap();

        let issues = state.get("issues").unwrap().as_array().unwrap();
        assert!(issues
            .iter()
            .any(|i| i["type"] == json!("missing_docstring")));
        assert!(issues
            .iter()
            .any(|i| i["type"] == json!("missing_return_type")));
        // Defaults initialised for the improvement loop
        assert_eq!(state.get("improvement_iteration"), Some(&json!(0)));
        assert_eq!(state.get("threshold"), Some(&json!(70)));
    }

    #[test]
    fn test_detect_flags_todo_comments() {
        let code = "# TODO: fix this later\ndef f(x):\n    return x\n";
        let state = extract_functions(state_with_code(code)).unwrap();
        let state = check_complexity(state).unwrap();
        let state = detect_basic_issues(state).unwrap();

        let issues = state.get("issues").unwrap().as_array().unwrap();
        let todo = issues
            .iter()
            .find(|i| i["type"] == json!("todo_comment"))
            .unwrap();
        assert!(todo["message"]
            .as_str()
            .unwrap()
            .contains("TODO found at line 1"));
    }

    #[test]
    fn test_suggestions_accumulate_across_iterations() {
        let code = "\ndef undocumented(x):\n    return x\n";
        let state = extract_functions(state_with_code(code)).unwrap();
        let state = check_complexity(state).unwrap();
        let state = detect_basic_issues(state).unwrap();

        let state = suggest_improvements(state).unwrap();
        assert_eq!(state.get("improvement_iteration"), Some(&json!(1)));
        let first_applied = state
            .get("applied_suggestions")
            .unwrap()
            .as_array()
            .unwrap()
            .len();
        assert!(first_applied > 0);

        let state = suggest_improvements(state).unwrap();
        assert_eq!(state.get("improvement_iteration"), Some(&json!(2)));
        let second_applied = state
            .get("applied_suggestions")
            .unwrap()
            .as_array()
            .unwrap()
            .len();
        assert!(second_applied >= first_applied);
    }

    #[test]
    fn test_quality_score_is_clamped_and_graded() {
        let state = extract_functions(state_with_code(SAMPLE_SIMPLE)).unwrap();
        let state = check_complexity(state).unwrap();
        let state = detect_basic_issues(state).unwrap();
        let state = suggest_improvements(state).unwrap();
        let state = evaluate_quality(state).unwrap();

        let score = state.get("quality_score").unwrap().as_i64().unwrap();
        assert!((0..=100).contains(&score));
        assert!(state.get("quality_grade").unwrap().is_string());
        assert!(state.get("quality_report").unwrap().is_object());
        assert!(state.get("meets_threshold").unwrap().is_boolean());
    }

    #[test]
    fn test_clean_code_meets_default_threshold() {
        let state = extract_functions(state_with_code(SAMPLE_SIMPLE)).unwrap();
        let state = check_complexity(state).unwrap();
        let state = detect_basic_issues(state).unwrap();
        let state = suggest_improvements(state).unwrap();
        let state = evaluate_quality(state).unwrap();

        assert_eq!(state.get("meets_threshold"), Some(&json!(true)));
    }
}
