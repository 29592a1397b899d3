//! Raw model output fixtures.

use serde_json::{json, Value};

use crate::core::RawModelOutput;

/// Wraps a JSON value the way the generation service usually answers.
#[must_use]
pub fn fenced(value: &Value) -> RawModelOutput {
    RawModelOutput::new(format!(
        "Here is the result.\n\n```json\n{}\n```\n",
        serde_json::to_string_pretty(value).unwrap_or_default()
    ))
}

fn file_items(files: &[(&str, &str)]) -> Vec<Value> {
    files
        .iter()
        .map(|(path, content)| json!({"path": path, "content": content}))
        .collect()
}

/// Generation output with `structure` and `files`.
#[must_use]
pub fn generation_output(structure: Value, files: &[(&str, &str)]) -> RawModelOutput {
    fenced(&json!({
        "structure": structure,
        "files": file_items(files),
    }))
}

/// The two-file todo app used across scenario tests.
#[must_use]
pub fn todo_app_output() -> RawModelOutput {
    generation_output(
        json!({
            "name": "todo-app",
            "files": ["index.html", "src/App.jsx"],
            "components": ["App", "TodoList"],
        }),
        &[
            ("index.html", "<!doctype html><div id=\"root\"></div>"),
            (
                "src/App.jsx",
                "export default function App() { return <TodoList />; }",
            ),
        ],
    )
}

/// Analysis output naming files to modify and create.
#[must_use]
pub fn analysis_output(modify: &[&str], create: &[&str]) -> RawModelOutput {
    fenced(&json!({
        "modify": modify,
        "create": create,
        "notes": "Keep the existing component names.",
    }))
}

/// Rewrite output as a bare array of file items.
#[must_use]
pub fn rewrite_output(files: &[(&str, &str)]) -> RawModelOutput {
    fenced(&Value::Array(file_items(files)))
}
