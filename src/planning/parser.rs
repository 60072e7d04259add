//! Plan text parsing.
//!
//! Reads the model's answer into raw steps. Two formats are understood:
//!
//! - a JSON array of step objects, possibly inside a fenced code block or
//!   wrapped as `{"steps": [...]}`, with surrounding prose ignored;
//! - the XML convention `<plan><function.ns.Name p="v" setContextVariable="VAR"/></plan>`.
//!
//! Parsing only checks shape. Whether the named capabilities exist and the
//! variables line up is decided by the planner.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static FENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("Invalid regex")
});

static XML_FUNCTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<function\.([A-Za-z0-9_]+)[.\-]([A-Za-z0-9_]+)((?:\s+[A-Za-z_][A-Za-z0-9_]*\s*=\s*(?:"[^"]*"|'[^']*'))*)\s*/?>"#)
        .expect("Invalid regex")
});

static XML_ATTRIBUTE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("Invalid regex")
});

/// XML attributes that bind the step's output rather than pass an argument.
const XML_OUTPUT_ATTRIBUTES: [&str; 2] = ["setContextVariable", "appendToResult"];

/// A step as written by the model, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStep {
    pub capability: String,
    pub description: Option<String>,
    pub arguments: Map<String, Value>,
    pub output: Option<String>,
}

/// Parse a model answer into raw steps.
pub fn parse_plan(text: &str) -> Result<Vec<RawStep>, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty response".to_string());
    }

    if text.contains("<plan") || text.contains("<function.") {
        return parse_xml_plan(text);
    }

    let body = FENCE_PATTERN
        .captures(text)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(text);

    let value = first_json_value(body)?;
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut object) => match object.remove("steps") {
            Some(Value::Array(entries)) => entries,
            _ => return Err("expected a JSON array of steps or an object with \"steps\"".to_string()),
        },
        other => return Err(format!("expected a JSON array of steps, got {}", other)),
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| raw_step_from_json(i, entry))
        .collect()
}

/// Deserialize the first JSON array or object in `text`, ignoring what follows it.
fn first_json_value(text: &str) -> Result<Value, String> {
    let start = text
        .find(|c: char| c == '[' || c == '{')
        .ok_or_else(|| "no JSON found in response".to_string())?;

    serde_json::Deserializer::from_str(&text[start..])
        .into_iter::<Value>()
        .next()
        .ok_or_else(|| "no JSON found in response".to_string())?
        .map_err(|e| format!("invalid JSON: {}", e))
}

fn raw_step_from_json(index: usize, entry: Value) -> Result<RawStep, String> {
    let mut object = match entry {
        Value::Object(object) => object,
        other => return Err(format!("step {} is not an object: {}", index + 1, other)),
    };

    let capability = take_first(&mut object, &["capability", "function", "name"])
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| format!("step {} has no \"capability\"", index + 1))?;

    let description = take_first(&mut object, &["description"])
        .and_then(|v| v.as_str().map(str::to_string));

    let arguments = match take_first(&mut object, &["arguments", "parameters", "args"]) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(arguments)) => arguments,
        Some(other) => {
            return Err(format!("arguments of step {} are not an object: {}", index + 1, other))
        }
    };

    let output = take_first(&mut object, &["output", "output_variable", "setContextVariable"])
        .and_then(|v| v.as_str().map(normalize_variable))
        .filter(|v| !v.is_empty());

    Ok(RawStep {
        capability,
        description,
        arguments,
        output,
    })
}

fn take_first(object: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|key| object.remove(*key))
}

fn parse_xml_plan(text: &str) -> Result<Vec<RawStep>, String> {
    let tags = text.matches("<function.").count();
    let steps: Vec<RawStep> = XML_FUNCTION_PATTERN
        .captures_iter(text)
        .map(|cap| {
            let mut arguments = Map::new();
            let mut output = None;
            for attr in XML_ATTRIBUTE_PATTERN.captures_iter(&cap[3]) {
                let raw = attr.get(2).or_else(|| attr.get(3)).map_or("", |m| m.as_str());
                let value = unescape_xml(raw);
                if XML_OUTPUT_ATTRIBUTES.contains(&&attr[1]) {
                    output = Some(normalize_variable(&value));
                } else {
                    arguments.insert(attr[1].to_string(), Value::String(value));
                }
            }
            RawStep {
                capability: format!("{}.{}", &cap[1], &cap[2]),
                description: None,
                arguments,
                output,
            }
        })
        .collect();

    if steps.len() < tags {
        return Err(format!(
            "{} of {} <function.*> tag(s) could not be read",
            tags - steps.len(),
            tags
        ));
    }
    Ok(steps)
}

fn normalize_variable(name: &str) -> String {
    name.trim().trim_start_matches('$').to_string()
}

fn unescape_xml(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_json_array() {
        let steps = parse_plan(
            r#"[
                {"capability": "MathPlugin.Add", "description": "Add", "arguments": {"number1": 2, "number2": 3}, "output": "SUM"},
                {"capability": "MathPlugin.Multiply", "arguments": {"number1": "$SUM", "number2": 4}}
            ]"#,
        )
        .unwrap();

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].capability, "MathPlugin.Add");
        assert_eq!(steps[0].output.as_deref(), Some("SUM"));
        assert_eq!(steps[1].arguments["number1"], json!("$SUM"));
        assert_eq!(steps[1].description, None);
    }

    #[test]
    fn test_parse_fenced_with_prose() {
        let text = "Here is the plan:\n```json\n{\"steps\": [{\"function\": \"MathPlugin-Sqrt\", \"parameters\": {\"number1\": 16}, \"output_variable\": \"$ROOT\"}]}\n```\nLet me know!";
        let steps = parse_plan(text).unwrap();
        assert_eq!(steps[0].capability, "MathPlugin-Sqrt");
        assert_eq!(steps[0].output.as_deref(), Some("ROOT"));
    }

    #[test]
    fn test_parse_trailing_text_after_json() {
        let steps = parse_plan(r#"[{"capability": "a.B"}] That's all."#).unwrap();
        assert_eq!(steps.len(), 1);
        assert!(steps[0].arguments.is_empty());
    }

    #[test]
    fn test_parse_xml_plan() {
        let text = r#"<plan>
  <function.basic_plugin.greeting name="kuljot" age="18" setContextVariable="GREETING"/>
  <function.basic_plugin.contact_information name="kuljot" address="New York &amp; Co" email_id="$EMAIL"/>
</plan>"#;
        let steps = parse_plan(text).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].capability, "basic_plugin.greeting");
        assert_eq!(steps[0].output.as_deref(), Some("GREETING"));
        assert_eq!(steps[0].arguments.len(), 2);
        assert_eq!(steps[1].arguments["address"], json!("New York & Co"));
        assert_eq!(steps[1].arguments["email_id"], json!("$EMAIL"));
    }

    #[test]
    fn test_parse_xml_single_quoted_attributes() {
        let steps = parse_plan("<plan><function.MathPlugin.Add number1='2' number2=\"3\" setContextVariable='SUM'/></plan>").unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].arguments["number1"], json!("2"));
        assert_eq!(steps[0].arguments["number2"], json!("3"));
        assert_eq!(steps[0].output.as_deref(), Some("SUM"));
    }

    #[test]
    fn test_parse_xml_unreadable_tag_is_error() {
        let text = r#"<plan>
  <function.MathPlugin.Sqrt number1="16"/>
  <function.MathPlugin.Add number1=2 number2=3/>
</plan>"#;
        let err = parse_plan(text).unwrap_err();
        assert!(err.contains("1 of 2"));
        assert!(parse_plan("<plan><function.MathPlugin></plan>").is_err());
    }

    #[test]
    fn test_parse_empty_array_is_ok() {
        assert!(parse_plan("[]").unwrap().is_empty());
        assert!(parse_plan("<plan></plan>").unwrap().is_empty());
    }

    #[test]
    fn test_parse_malformed() {
        assert!(parse_plan("").is_err());
        assert!(parse_plan("I cannot help with that.").is_err());
        assert!(parse_plan(r#"[{"capability": "a.B""#).is_err());
        assert!(parse_plan(r#"[{"description": "no target"}]"#).is_err());
        assert!(parse_plan(r#"[{"capability": "a.B", "arguments": [1]}]"#).is_err());
        assert!(parse_plan(r#"{"plan": []}"#).is_err());
    }
}
