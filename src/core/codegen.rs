//! DS-011: Rendering compiled graphs.
//!
//! Three outputs:
//! - JSON and YAML dumps of the [`CompiledGraph`]
//! - an Airflow DAG module: one assignment per operator, one list per family,
//!   and `a >> b` lines for every edge

use super::error::{CompileError, Result};
use super::types::*;
use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use serde_yaml_ng::Value;

const IDENTIFIER_RE: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";
const MODULE_RE: &str = r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$";

const PY_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// Serialize a compiled graph as pretty JSON.
pub fn render_json(graph: &CompiledGraph) -> Result<String> {
    serde_json::to_string_pretty(graph)
        .map_err(|e| CompileError::Parse(format!("cannot serialize graph: {}", e)))
}

/// Serialize a compiled graph as YAML.
pub fn render_yaml(graph: &CompiledGraph) -> Result<String> {
    serde_yaml_ng::to_string(graph)
        .map_err(|e| CompileError::Parse(format!("cannot serialize graph: {}", e)))
}

struct Identifiers {
    name: Regex,
    module: Regex,
}

impl Identifiers {
    fn new() -> Result<Self> {
        let compile = |re: &str| Regex::new(re).map_err(|e| CompileError::Parse(e.to_string()));
        Ok(Self {
            name: compile(IDENTIFIER_RE)?,
            module: compile(MODULE_RE)?,
        })
    }

    fn check_name(&self, id: &str) -> Result<()> {
        if self.name.is_match(id) && !PY_KEYWORDS.contains(&id) {
            Ok(())
        } else {
            Err(CompileError::InvalidIdentifier(id.to_string()))
        }
    }

    fn check_module(&self, path: &str) -> Result<()> {
        let keyword = path.split('.').any(|p| PY_KEYWORDS.contains(&p));
        if self.module.is_match(path) && !keyword {
            Ok(())
        } else {
            Err(CompileError::InvalidIdentifier(path.to_string()))
        }
    }
}

/// Render an Airflow DAG module.
pub fn render_airflow(graph: &CompiledGraph, dag: &DagSettings) -> Result<String> {
    let ids = Identifiers::new()?;
    ids.check_module(&dag.converter_module)?;

    let mut modules: IndexSet<String> = IndexSet::new();
    for layer in &graph.layers {
        for sublayer in &layer.sublayers {
            for family in &sublayer.families {
                ids.check_name(&family.id)?;
                for op in &family.operators {
                    ids.check_name(&op.task_id)?;
                    for value in op.args().values() {
                        if let ArgValue::Transform(OpRef::Direct(t)) = value {
                            ids.check_module(&t.module)?;
                            modules.insert(t.module.clone());
                        }
                    }
                }
            }
        }
    }

    let list_names = family_list_names(graph);

    let mut lines = vec![
        format!("# Generated by dagsmith from pipeline '{}'", graph.name),
        format!("# fingerprint: {}", graph.fingerprint),
        "from datetime import datetime".to_string(),
        String::new(),
        "from airflow import DAG".to_string(),
        format!("from {} import *", dag.converter_module),
    ];
    for module in &modules {
        lines.push(format!("import {}", module));
    }
    lines.push(String::new());
    lines.extend(dag_preamble(graph, dag)?);

    for layer in &graph.layers {
        lines.push(String::new());
        lines.push(format!("# {}", "-".repeat(75)));
        lines.push(format!(
            "# Operators pertaining to {} dag layer with tag {}",
            layer.stage, layer.tag
        ));
        lines.push(format!("# {}", "-".repeat(75)));
        for sublayer in &layer.sublayers {
            for family in &sublayer.families {
                for op in &family.operators {
                    lines.push(format!("{} = {}(", op.task_id, op.template));
                    lines.push(format!("    task_id={},", py_str(&op.task_id)));
                    for (name, value) in op.args() {
                        lines.push(format!("    {}={},", name, py_arg(value)));
                    }
                    lines.push("    dag=dag,".to_string());
                    lines.push(")".to_string());
                }
                let members: Vec<&str> = family.task_ids().collect();
                let name = list_names
                    .get(&family.id)
                    .map_or(family.id.as_str(), String::as_str);
                lines.push(format!("{} = [{}]", name, members.join(", ")));
            }
        }
        if !layer.edges.is_empty() {
            lines.push(String::new());
            lines.extend(layer.edges.iter().map(Edge::to_string));
        }
    }

    if !graph.edges.is_empty() {
        lines.push(String::new());
        lines.push("# Layer connections".to_string());
        lines.extend(graph.edges.iter().map(Edge::to_string));
    }

    lines.push(String::new());
    Ok(lines.join("\n"))
}

/// Python names for family lists whose id is also a task id. Tasks and
/// families share one module namespace, so those lists get a `_family` suffix.
fn family_list_names(graph: &CompiledGraph) -> IndexMap<String, String> {
    let tasks: IndexSet<&str> = graph.task_ids().into_iter().collect();
    let mut taken: IndexSet<String> = tasks.iter().map(|t| t.to_string()).collect();
    taken.extend(graph.family_ids().into_iter().map(str::to_string));

    let mut names = IndexMap::new();
    for id in graph.family_ids() {
        if !tasks.contains(id) {
            continue;
        }
        let mut name = format!("{}_family", id);
        while taken.contains(&name) {
            name.push_str("_family");
        }
        taken.insert(name.clone());
        names.insert(id.to_string(), name);
    }
    names
}

fn dag_preamble(graph: &CompiledGraph, dag: &DagSettings) -> Result<Vec<String>> {
    let mut lines = vec![
        "default_args = {".to_string(),
        format!("    'owner': {},", py_str(&dag.owner)),
        format!("    'retries': {},", dag.retries),
    ];
    if let Some(ref date) = dag.start_date {
        lines.push(format!("    'start_date': {},", py_datetime(date)?));
    }
    lines.push("}".to_string());
    lines.push(String::new());

    let dag_id = dag.dag_id.as_deref().unwrap_or(&graph.name);
    let schedule = dag
        .schedule_interval
        .as_deref()
        .map_or_else(|| "None".to_string(), py_str);
    lines.push("dag = DAG(".to_string());
    lines.push(format!("    {},", py_str(dag_id)));
    lines.push("    default_args=default_args,".to_string());
    lines.push(format!("    schedule_interval={},", schedule));
    lines.push(")".to_string());
    Ok(lines)
}

/// `YYYY-MM-DD` as a `datetime(...)` call.
fn py_datetime(date: &str) -> Result<String> {
    let parts: Vec<&str> = date.trim().split('-').collect();
    let parsed: Option<Vec<u32>> = parts.iter().map(|p| p.parse().ok()).collect();
    match parsed.as_deref() {
        Some([y, m, d]) if (1..=days_in_month(*y, *m)).contains(d) => {
            Ok(format!("datetime({}, {}, {})", y, m, d))
        }
        _ => Err(CompileError::structure(
            "dag.start_date",
            format!("expected YYYY-MM-DD, got '{}'", date),
        )),
    }
}

/// Zero for a month outside 1..=12.
fn days_in_month(year: u32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 => 29,
        2 => 28,
        _ => 0,
    }
}

fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn py_arg(value: &ArgValue) -> String {
    match value {
        ArgValue::Transform(OpRef::Direct(t)) => t.path(),
        ArgValue::Transform(OpRef::Symbolic(name)) => py_str(name),
        ArgValue::Params(params) => {
            let items: Vec<String> = params
                .iter()
                .map(|(k, v)| format!("{}: {}", py_str(k), py_value(v)))
                .collect();
            format!("{{{}}}", items.join(", "))
        }
        ArgValue::Task(s) | ArgValue::Text(s) => py_str(s),
        ArgValue::Tasks(items) => {
            let items: Vec<String> = items.iter().map(|s| py_str(s)).collect();
            format!("[{}]", items.join(", "))
        }
        ArgValue::Flag(b) => py_bool(*b).to_string(),
        ArgValue::Null => "None".to_string(),
    }
}

fn py_bool(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

/// Python literal for a YAML parameter value.
fn py_value(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(b) => py_bool(*b).to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.is_nan() => "float('nan')".to_string(),
            Some(f) if f.is_infinite() && f > 0.0 => "float('inf')".to_string(),
            Some(f) if f.is_infinite() => "float('-inf')".to_string(),
            _ => n.to_string(),
        },
        Value::String(s) => py_str(s),
        Value::Sequence(items) => {
            let items: Vec<String> = items.iter().map(py_value).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Mapping(m) => {
            let items: Vec<String> = m
                .iter()
                .map(|(k, v)| format!("{}: {}", py_value(k), py_value(v)))
                .collect();
            format!("{{{}}}", items.join(", "))
        }
        Value::Tagged(t) => py_value(&t.value),
    }
}
