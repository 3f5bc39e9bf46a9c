//! Plain text rendering of serializable values

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

/// Indented `key: value` lines, arrays as `- item`
pub struct PlainFormatter;

impl PlainFormatter {
    pub fn format<T: Serialize + ?Sized>(value: &T) -> Result<String> {
        let json = serde_json::to_value(value)?;
        let mut out = String::new();
        Self::write_value(&mut out, &json, 0);
        Ok(out.trim_end().to_string())
    }

    fn write_value(out: &mut String, value: &Value, indent: usize) {
        let pad = "  ".repeat(indent);
        match value {
            Value::Array(items) => {
                for item in items {
                    if item.is_object() || item.is_array() {
                        out.push_str(&format!("{}-\n", pad));
                        Self::write_value(out, item, indent + 1);
                    } else {
                        out.push_str(&format!("{}- {}\n", pad, scalar(item)));
                    }
                }
            }
            Value::Object(fields) => {
                for (key, field) in fields {
                    if field.is_object() || field.is_array() {
                        out.push_str(&format!("{}{}:\n", pad, key));
                        Self::write_value(out, field, indent + 1);
                    } else {
                        out.push_str(&format!("{}{}: {}\n", pad, key, scalar(field)));
                    }
                }
            }
            other => out.push_str(&format!("{}{}\n", pad, scalar(other))),
        }
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Summary {
        name: String,
        count: u64,
        sources: Vec<Option<String>>,
    }

    #[test]
    fn test_plain_nested() {
        let summary = Summary {
            name: "news".to_string(),
            count: 3,
            sources: vec![Some("Campus Daily".to_string()), None],
        };
        let out = PlainFormatter::format(&summary).unwrap();
        // keys come out sorted
        assert_eq!(out, "count: 3\nname: news\nsources:\n  - Campus Daily\n  - -");
    }
}
