//! Template engine (C2, §4.2): variable substitution and `when:` predicate
//! evaluation over playbook variables and built-in environment facts.
//!
//! Deliberately not a general Jinja2-style engine — three fixed syntactic
//! forms, plus a small `when:` grammar. An explicit, hand-written parser is
//! easier to audit than nested regex substitution chains.

use crate::facts::Facts;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").unwrap());

/// Resolves `{{ ... }}` placeholders and `when:` predicates against a
/// variable map and a fixed set of built-in facts.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    facts: Facts,
}

impl TemplateEngine {
    /// Builds an engine with facts gathered from the current host.
    pub fn new() -> Self {
        Self {
            facts: Facts::gather_local(),
        }
    }

    /// Builds an engine over an explicit fact set (used by tests and
    /// container/virt contexts where facts differ from the host).
    pub fn with_facts(facts: Facts) -> Self {
        Self { facts }
    }

    /// Renders all placeholders in `s`. Unknown identifiers are left
    /// verbatim, including their `{{ }}` wrapper. Deterministic and
    /// idempotent on strings with no placeholders (§4.2 contract).
    pub fn render(&self, s: &str, vars: &IndexMap<String, Value>) -> String {
        PLACEHOLDER
            .replace_all(s, |caps: &regex::Captures| {
                let inner = caps[1].trim();
                self.render_expr(inner, vars, &caps[0])
            })
            .into_owned()
    }

    fn render_expr(&self, inner: &str, vars: &IndexMap<String, Value>, verbatim: &str) -> String {
        if let Some(if_idx) = inner.find(" if ") {
            let true_part = inner[..if_idx].trim();
            let rest = &inner[if_idx + 4..];
            let (cond_part, false_part) = match rest.find(" else ") {
                Some(else_idx) => (rest[..else_idx].trim(), Some(rest[else_idx + 6..].trim())),
                None => (rest.trim(), None),
            };
            if self.evaluate_condition(cond_part, vars) {
                self.resolve_atom(true_part, vars).unwrap_or_default()
            } else {
                false_part
                    .and_then(|b| self.resolve_atom(b, vars))
                    .unwrap_or_default()
            }
        } else {
            self.lookup(inner, vars)
                .unwrap_or_else(|| verbatim.to_string())
        }
    }

    /// Evaluates the `when:` grammar: `LHS op RHS` (`==`/`!=`), or a bare
    /// identifier tested for truthiness. Unparseable predicates evaluate
    /// to false rather than failing the run.
    pub fn evaluate_condition(&self, cond: &str, vars: &IndexMap<String, Value>) -> bool {
        let cond = cond.trim();
        if cond.is_empty() {
            return false;
        }
        for op in ["==", "!="] {
            if let Some(idx) = cond.find(op) {
                let lhs = cond[..idx].trim();
                let rhs = cond[idx + op.len()..].trim();
                let lhs_val = self.resolve_atom(lhs, vars).unwrap_or_default();
                let rhs_val = self.resolve_atom(rhs, vars).unwrap_or_default();
                return if op == "==" {
                    lhs_val == rhs_val
                } else {
                    lhs_val != rhs_val
                };
            }
        }
        match self.lookup(cond, vars) {
            Some(v) => is_truthy(&v),
            None => false,
        }
    }

    /// Resolves a single atom: a quoted literal, or a variable/fact lookup.
    fn resolve_atom(&self, token: &str, vars: &IndexMap<String, Value>) -> Option<String> {
        let t = token.trim();
        if t.len() >= 2 {
            let bytes = t.as_bytes();
            if (bytes[0] == b'\'' && bytes[t.len() - 1] == b'\'')
                || (bytes[0] == b'"' && bytes[t.len() - 1] == b'"')
            {
                return Some(t[1..t.len() - 1].to_string());
            }
        }
        self.lookup(t, vars)
    }

    fn lookup(&self, name: &str, vars: &IndexMap<String, Value>) -> Option<String> {
        if let Some(v) = vars.get(name) {
            return Some(value_to_string(v));
        }
        self.facts.get_str(name)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_truthy(s: &str) -> bool {
    !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn renders_plain_variable() {
        let engine = TemplateEngine::with_facts(Facts::new());
        let v = vars(&[("name", json!("alice"))]);
        assert_eq!(engine.render("hello {{ name }}", &v), "hello alice");
    }

    #[test]
    fn leaves_unknown_variable_verbatim() {
        let engine = TemplateEngine::with_facts(Facts::new());
        let v = IndexMap::new();
        assert_eq!(engine.render("hello {{ missing }}", &v), "hello {{ missing }}");
    }

    #[test]
    fn renders_conditional_literal() {
        let engine = TemplateEngine::with_facts(Facts::new());
        let v = vars(&[("os", json!("linux"))]);
        assert_eq!(
            engine.render("{{ '--flag' if os == 'linux' }}", &v),
            "--flag"
        );
        assert_eq!(engine.render("{{ '--flag' if os == 'darwin' }}", &v), "");
    }

    #[test]
    fn renders_if_else_expression() {
        let engine = TemplateEngine::with_facts(Facts::new());
        let v = vars(&[("env", json!("prod"))]);
        assert_eq!(
            engine.render("{{ 'strict' if env == 'prod' else 'lenient' }}", &v),
            "strict"
        );
        let v2 = vars(&[("env", json!("dev"))]);
        assert_eq!(
            engine.render("{{ 'strict' if env == 'prod' else 'lenient' }}", &v2),
            "lenient"
        );
    }

    #[test]
    fn bare_identifier_is_truthy_check() {
        let engine = TemplateEngine::with_facts(Facts::new());
        let v = vars(&[("enabled", json!(true)), ("disabled", json!(false))]);
        assert!(engine.evaluate_condition("enabled", &v));
        assert!(!engine.evaluate_condition("disabled", &v));
        assert!(!engine.evaluate_condition("unknown", &v));
    }

    #[test]
    fn unparseable_predicate_is_false_not_fatal() {
        let engine = TemplateEngine::with_facts(Facts::new());
        let v = IndexMap::new();
        assert!(!engine.evaluate_condition("", &v));
    }

    #[test]
    fn render_is_deterministic_and_idempotent_without_placeholders() {
        let engine = TemplateEngine::with_facts(Facts::new());
        let v = IndexMap::new();
        let plain = "no placeholders here";
        assert_eq!(engine.render(plain, &v), engine.render(plain, &v));
        assert_eq!(engine.render(plain, &v), plain);
    }
}
