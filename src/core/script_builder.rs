use crate::domain::model::{EtlConfig, GeneratedScript};
use crate::domain::ports::ScriptStore;
use crate::utils::error::{EtlError, Result};
use minijinja::{context, AutoEscape, Environment, ErrorKind, State, UndefinedBehavior, Value};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_TEMPLATE: &str = "etl_template.j2";

/// What happens when the template reads a config field the caller did not send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedPolicy {
    /// Missing values print as empty text and are falsy in conditions.
    #[default]
    Lenient,
    /// Like lenient, and attribute lookups on missing values stay missing.
    Chainable,
    /// Missing values may be tested in conditions but fail when printed.
    SemiStrict,
    /// Any use of a missing value fails the render.
    Strict,
}

impl From<UndefinedPolicy> for UndefinedBehavior {
    fn from(policy: UndefinedPolicy) -> Self {
        match policy {
            UndefinedPolicy::Lenient => UndefinedBehavior::Lenient,
            UndefinedPolicy::Chainable => UndefinedBehavior::Chainable,
            UndefinedPolicy::SemiStrict => UndefinedBehavior::SemiStrict,
            UndefinedPolicy::Strict => UndefinedBehavior::Strict,
        }
    }
}

/// Renders the ETL script template. Built once at startup and shared by
/// handle; the template environment is not global state.
pub struct ScriptRenderer {
    env: Environment<'static>,
    template_name: String,
    templates_dir: PathBuf,
}

impl ScriptRenderer {
    pub fn new(
        templates_dir: impl Into<PathBuf>,
        template_name: impl Into<String>,
        policy: UndefinedPolicy,
    ) -> Self {
        let templates_dir = templates_dir.into();
        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(&templates_dir));
        env.set_undefined_behavior(policy.into());
        // 產生的是程式碼，不做 HTML 跳脫
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        env.add_filter("pyrepr", pyrepr);

        Self {
            env,
            template_name: template_name.into(),
            templates_dir,
        }
    }

    pub fn template_name(&self) -> &str {
        &self.template_name
    }

    pub fn templates_dir(&self) -> &Path {
        &self.templates_dir
    }

    /// Loads and compiles the template without rendering it.
    pub fn check(&self) -> Result<()> {
        self.env
            .get_template(&self.template_name)
            .map(|_| ())
            .map_err(|e| self.classify(e))
    }

    pub fn render(&self, config: &EtlConfig) -> Result<String> {
        let template = self
            .env
            .get_template(&self.template_name)
            .map_err(|e| self.classify(e))?;

        template
            .render(context! { config => config })
            .map_err(|e| self.classify(e))
    }

    fn classify(&self, err: minijinja::Error) -> EtlError {
        match err.kind() {
            minijinja::ErrorKind::TemplateNotFound => EtlError::TemplateNotFound {
                name: self.template_name.clone(),
            },
            _ => err.into(),
        }
    }
}

/// Template filter writing a value as a Python literal: `None`, `True`,
/// `False`, numbers, double-quoted strings, lists and dicts.
///
/// A missing value renders as `None` unless the undefined policy forbids
/// printing it.
fn pyrepr(state: &State, value: &Value) -> std::result::Result<String, minijinja::Error> {
    if value.is_undefined() {
        return match state.undefined_behavior() {
            UndefinedBehavior::Strict | UndefinedBehavior::SemiStrict => {
                Err(minijinja::Error::from(ErrorKind::UndefinedError))
            }
            _ => Ok("None".to_string()),
        };
    }

    let json = serde_json::to_value(value).map_err(|e| {
        minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("value has no Python literal form: {}", e),
        )
    })?;
    let mut out = String::new();
    write_python_literal(&json, &mut out);
    Ok(out)
}

fn write_python_literal(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value as Json;

    match value {
        Json::Null => out.push_str("None"),
        Json::Bool(true) => out.push_str("True"),
        Json::Bool(false) => out.push_str("False"),
        Json::Number(n) => out.push_str(&n.to_string()),
        Json::String(s) => write_python_string(s, out),
        Json::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                write_python_literal(item, out);
            }
            out.push(']');
        }
        Json::Object(map) => {
            out.push('{');
            for (index, (key, item)) in map.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                write_python_string(key, out);
                out.push_str(": ");
                write_python_literal(item, out);
            }
            out.push('}');
        }
    }
}

fn write_python_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Renders the script and hands it to the store. The stored path, if any, is
/// returned alongside the code.
pub async fn build_etl_script(
    renderer: &ScriptRenderer,
    store: &dyn ScriptStore,
    config: &EtlConfig,
) -> Result<GeneratedScript> {
    tracing::debug!(
        "🛠️ Rendering '{}' with {} config keys",
        renderer.template_name(),
        config.len()
    );
    let code = renderer.render(config)?;

    let path = store.persist(&code).await?;
    if let Some(path) = &path {
        tracing::debug!("💾 Script saved to {}", path.display());
    }

    Ok(GeneratedScript { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct MemoryStore {
        saved: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ScriptStore for MemoryStore {
        async fn persist(&self, code: &str) -> Result<Option<PathBuf>> {
            let mut saved = self.saved.lock().unwrap();
            saved.push(code.to_string());
            Ok(Some(PathBuf::from(format!("memory/{}.py", saved.len()))))
        }

        async fn sweep(&self) -> Result<usize> {
            Ok(0)
        }
    }

    fn config(value: serde_json::Value) -> EtlConfig {
        value.as_object().cloned().unwrap()
    }

    fn renderer_with(template: &str, policy: UndefinedPolicy) -> (TempDir, ScriptRenderer) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("etl.j2"), template).unwrap();
        let renderer = ScriptRenderer::new(dir.path(), "etl.j2", policy);
        (dir, renderer)
    }

    #[test]
    fn test_render_substitutes_config() {
        let (_dir, renderer) = renderer_with(
            "extract({{ config.source }}) -> load({{ config.target }})\n",
            UndefinedPolicy::Lenient,
        );

        let code = renderer
            .render(&config(json!({"source": "db1", "target": "db2"})))
            .unwrap();
        assert_eq!(code, "extract(db1) -> load(db2)\n");
    }

    #[test]
    fn test_loops_and_conditionals() {
        let (_dir, renderer) = renderer_with(
            "{% for col in config.columns %}{{ col }};{% endfor %}{% if config.dedupe %}dedupe{% endif %}",
            UndefinedPolicy::Lenient,
        );

        let code = renderer
            .render(&config(json!({"columns": ["a", "b"], "dedupe": true})))
            .unwrap();
        assert_eq!(code, "a;b;dedupe");
    }

    #[test]
    fn test_no_html_escaping() {
        let (_dir, renderer) = renderer_with("{{ config.filter }}", UndefinedPolicy::Lenient);
        let code = renderer
            .render(&config(json!({"filter": "df[\"age\"] > 3 & x < 'y'"})))
            .unwrap();
        assert_eq!(code, "df[\"age\"] > 3 & x < 'y'");
    }

    #[test]
    fn test_lenient_policy_renders_missing_as_empty() {
        let (_dir, renderer) = renderer_with("[{{ config.missing }}]", UndefinedPolicy::Lenient);
        assert_eq!(renderer.render(&EtlConfig::new()).unwrap(), "[]");
    }

    #[test]
    fn test_strict_policy_rejects_missing() {
        let (_dir, renderer) = renderer_with("[{{ config.missing }}]", UndefinedPolicy::Strict);
        let err = renderer.render(&EtlConfig::new()).unwrap_err();
        assert!(matches!(err, EtlError::UndefinedReference { .. }));
    }

    #[test]
    fn test_semi_strict_allows_conditions() {
        let (_dir, renderer) = renderer_with(
            "{% if config.missing %}yes{% else %}no{% endif %}",
            UndefinedPolicy::SemiStrict,
        );
        assert_eq!(renderer.render(&EtlConfig::new()).unwrap(), "no");
    }

    #[test]
    fn test_missing_template() {
        let dir = TempDir::new().unwrap();
        let renderer = ScriptRenderer::new(dir.path(), "etl_template.j2", UndefinedPolicy::Lenient);

        let err = renderer.check().unwrap_err();
        assert!(matches!(err, EtlError::TemplateNotFound { ref name } if name == "etl_template.j2"));
        assert!(matches!(
            renderer.render(&EtlConfig::new()).unwrap_err(),
            EtlError::TemplateNotFound { .. }
        ));
    }

    #[test]
    fn test_syntax_error_is_render_error() {
        let (_dir, renderer) = renderer_with("{% if %}", UndefinedPolicy::Lenient);
        assert!(matches!(renderer.check().unwrap_err(), EtlError::TemplateRender(_)));
    }

    fn shipped_renderer(policy: UndefinedPolicy) -> ScriptRenderer {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates");
        ScriptRenderer::new(dir, DEFAULT_TEMPLATE, policy)
    }

    #[test]
    fn test_pyrepr_writes_python_literals() {
        let (_dir, renderer) = renderer_with("{{ config.v | pyrepr }}", UndefinedPolicy::Lenient);
        let render = |v: serde_json::Value| renderer.render(&config(json!({ "v": v }))).unwrap();

        assert_eq!(render(json!(null)), "None");
        assert_eq!(render(json!(true)), "True");
        assert_eq!(render(json!(false)), "False");
        assert_eq!(render(json!(42)), "42");
        assert_eq!(render(json!(2.5)), "2.5");
        assert_eq!(render(json!("say \"hi\"\n\\")), r#""say \"hi\"\n\\""#);
        assert_eq!(render(json!("\u{1}")), r#""\u0001""#);
        assert_eq!(
            render(json!({"b": [1, null], "a": {"ok": true}})),
            r#"{"b": [1, None], "a": {"ok": True}}"#
        );
        assert_eq!(renderer.render(&EtlConfig::new()).unwrap(), "None");
    }

    #[test]
    fn test_pyrepr_rejects_missing_under_strict() {
        let (_dir, renderer) = renderer_with("{{ config.v | pyrepr }}", UndefinedPolicy::Strict);
        assert!(matches!(
            renderer.render(&EtlConfig::new()).unwrap_err(),
            EtlError::UndefinedReference { .. }
        ));
    }

    #[test]
    fn test_shipped_template_renders_minimal_config() {
        for policy in [
            UndefinedPolicy::Lenient,
            UndefinedPolicy::Chainable,
            UndefinedPolicy::SemiStrict,
            UndefinedPolicy::Strict,
        ] {
            let renderer = shipped_renderer(policy);
            renderer.check().unwrap();

            let code = renderer
                .render(&config(json!({"source": "db1", "target": "db2"})))
                .unwrap_or_else(|e| panic!("{:?} failed: {:?}", policy, e));
            assert!(code.starts_with("#!/usr/bin/env python3\n"));
            assert!(code.contains("SOURCE = \"db1\"\n"));
            assert!(code.contains("TARGET = \"db2\"\n"));
            assert!(code.contains("    query = \"SELECT * FROM source_table\"\n"));
            assert!(code.contains("        \"target_table\",\n"));
            assert!(code.contains("        if_exists=\"append\",\n"));
        }
    }

    #[test]
    fn test_shipped_template_strict_requires_source() {
        let renderer = shipped_renderer(UndefinedPolicy::Strict);
        let err = renderer
            .render(&config(json!({"target": "db2"})))
            .unwrap_err();
        assert!(matches!(err, EtlError::UndefinedReference { .. }));
    }

    #[test]
    fn test_shipped_template_emits_valid_python_values() {
        let renderer = shipped_renderer(UndefinedPolicy::Lenient);
        let code = renderer
            .render(&config(json!({
                "source": "postgresql://localhost/app",
                "target": "out.csv",
                "target_type": "csv",
                "table": "my\"table",
                "transformations": [
                    {"type": "fillna", "value": null},
                    {"type": "fillna", "value": {"active": true, "score": 0}},
                    {"type": "rename", "mapping": {"b": "B", "a": "A"}}
                ]
            })))
            .unwrap();

        assert!(code.contains(r#"    query = "SELECT * FROM my\"table""#));
        assert!(code.contains("    df = df.fillna(None)\n"));
        assert!(code.contains(r#"    df = df.fillna({"active": True, "score": 0})"#));
        assert!(code.contains(r#"    df = df.rename(columns={"b": "B", "a": "A"})"#));
        assert!(!code.contains("null"));
        assert!(!code.contains("true"));
    }

    #[tokio::test]
    async fn test_build_etl_script_persists_rendered_code() {
        let (_dir, renderer) = renderer_with("load {{ config.target }}", UndefinedPolicy::Lenient);
        let store = MemoryStore {
            saved: Mutex::new(Vec::new()),
        };

        let script = build_etl_script(&renderer, &store, &config(json!({"target": "warehouse"})))
            .await
            .unwrap();

        assert_eq!(script.code, "load warehouse");
        assert_eq!(script.path, Some(PathBuf::from("memory/1.py")));
        assert_eq!(*store.saved.lock().unwrap(), vec!["load warehouse".to_string()]);
    }
}
