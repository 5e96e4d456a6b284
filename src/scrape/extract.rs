//! Declarative field extraction from DOM nodes.
//!
//! Each field in a [`SelectorMap`] is resolved independently: zero
//! matches simply omits the field (optional metadata is normal), the
//! first match wins for scalar fields, and `multiple` fields collect
//! every match in document order. Per-field independence is what lets
//! heterogeneous site markup share one interpreter.

use scraper::{ElementRef, Selector};
use tracing::{debug, warn};

use crate::config::{SelectorMap, SelectorSpec};

/// A single extracted value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::List(_) => None,
        }
    }

    /// Every textual value carried, one for scalars.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        match self {
            FieldValue::Text(s) => std::slice::from_ref(s).iter(),
            FieldValue::List(items) => items.iter(),
        }
        .map(String::as_str)
    }
}

/// Field name to value mapping for one listing entry or detail page.
/// Schema-less by design: which fields exist depends entirely on the
/// site config.
pub type ItemRecord = indexmap::IndexMap<String, FieldValue>;

/// Apply `specs` to `node`, producing a record. Never fails; fields
/// that do not resolve are absent from the result.
pub fn extract(node: ElementRef<'_>, specs: &SelectorMap) -> ItemRecord {
    let mut record = ItemRecord::new();
    for (field, spec) in specs {
        if let Some(value) = extract_field(node, field, spec) {
            record.insert(field.clone(), value);
        }
    }
    record
}

fn extract_field(node: ElementRef<'_>, field: &str, spec: &SelectorSpec) -> Option<FieldValue> {
    let matches: Vec<ElementRef<'_>> = match &spec.selector {
        Some(raw) => {
            let selector = match Selector::parse(raw) {
                Ok(s) => s,
                Err(err) => {
                    warn!(field, selector = raw, %err, "invalid selector, skipping field");
                    return None;
                }
            };
            node.select(&selector).collect()
        }
        // Attribute with no selector reads off the current node itself.
        None => vec![node],
    };

    if matches.is_empty() {
        debug!(field, "no matches");
        return None;
    }

    if spec.multiple {
        let values: Vec<String> = matches
            .iter()
            .filter_map(|el| element_value(el, spec))
            .collect();
        if values.is_empty() {
            return None;
        }
        return Some(FieldValue::List(values));
    }

    let mut value = element_value(&matches[0], spec)?;
    if let Some(key) = &spec.json_key {
        value = project_json_key(field, value, key);
    }
    Some(FieldValue::Text(value))
}

fn element_value(el: &ElementRef<'_>, spec: &SelectorSpec) -> Option<String> {
    match &spec.attribute {
        Some(attr) => el.value().attr(attr).map(str::to_string),
        None => Some(el.text().collect::<String>().trim().to_string()),
    }
}

/// Parse `value` as JSON and project `key` out. Parse failures and
/// missing keys are logged and leave the raw string in place; extraction
/// continues.
fn project_json_key(field: &str, value: String, key: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(&value) {
        Ok(json) => match json.get(key) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                warn!(field, key, "json key absent, keeping raw value");
                value
            }
        },
        Err(err) => {
            warn!(field, %err, "failed to parse JSON, keeping raw value");
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectorSpec;
    use scraper::Html;

    fn specs(entries: Vec<(&str, SelectorSpec)>) -> SelectorMap {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    fn structured(
        selector: Option<&str>,
        attribute: Option<&str>,
        json_key: Option<&str>,
        multiple: bool,
    ) -> SelectorSpec {
        SelectorSpec {
            selector: selector.map(str::to_string),
            attribute: attribute.map(str::to_string),
            json_key: json_key.map(str::to_string),
            multiple,
        }
    }

    #[test]
    fn test_zero_matches_omits_field() {
        let doc = Html::parse_fragment("<div><p>hello</p></div>");
        let record = extract(
            doc.root_element(),
            &specs(vec![
                ("present", SelectorSpec::simple("p")),
                ("absent", SelectorSpec::simple(".nope")),
            ]),
        );
        assert_eq!(
            record.get("present"),
            Some(&FieldValue::Text("hello".to_string()))
        );
        assert!(!record.contains_key("absent"));
    }

    #[test]
    fn test_first_match_trimmed_text() {
        let doc = Html::parse_fragment("<ul><li>  one  </li><li>two</li></ul>");
        let record = extract(
            doc.root_element(),
            &specs(vec![("item", SelectorSpec::simple("li"))]),
        );
        assert_eq!(record.get("item"), Some(&FieldValue::Text("one".to_string())));
    }

    #[test]
    fn test_multiple_preserves_document_order() {
        let doc = Html::parse_fragment(
            "<div><span class='tag'>c</span><span class='tag'>a</span><span class='tag'>b</span></div>",
        );
        let record = extract(
            doc.root_element(),
            &specs(vec![("tags", structured(Some(".tag"), None, None, true))]),
        );
        assert_eq!(
            record.get("tags"),
            Some(&FieldValue::List(vec![
                "c".to_string(),
                "a".to_string(),
                "b".to_string()
            ]))
        );
    }

    #[test]
    fn test_attribute_extraction() {
        let doc = Html::parse_fragment("<a href='/video/9'>watch</a>");
        let record = extract(
            doc.root_element(),
            &specs(vec![("url", structured(Some("a"), Some("href"), None, false))]),
        );
        assert_eq!(
            record.get("url"),
            Some(&FieldValue::Text("/video/9".to_string()))
        );
    }

    #[test]
    fn test_attribute_without_selector_reads_current_node() {
        let doc = Html::parse_fragment("<div data-key='abc123'>x</div>");
        let div = doc
            .select(&Selector::parse("div").unwrap())
            .next()
            .unwrap();
        let record = extract(
            div,
            &specs(vec![("key", structured(None, Some("data-key"), None, false))]),
        );
        assert_eq!(
            record.get("key"),
            Some(&FieldValue::Text("abc123".to_string()))
        );
    }

    #[test]
    fn test_missing_attribute_omits_field() {
        let doc = Html::parse_fragment("<a>no href here</a>");
        let record = extract(
            doc.root_element(),
            &specs(vec![("url", structured(Some("a"), Some("href"), None, false))]),
        );
        assert!(!record.contains_key("url"));
    }

    #[test]
    fn test_json_key_projection() {
        let html = r#"<script type="application/ld+json">{"contentUrl": "https://cdn/x.mp4", "name": "t"}</script>"#;
        let doc = Html::parse_fragment(html);
        let record = extract(
            doc.root_element(),
            &specs(vec![(
                "download_url",
                structured(Some("script"), None, Some("contentUrl"), false),
            )]),
        );
        assert_eq!(
            record.get("download_url"),
            Some(&FieldValue::Text("https://cdn/x.mp4".to_string()))
        );
    }

    #[test]
    fn test_json_parse_failure_keeps_raw_value() {
        let doc = Html::parse_fragment("<script>not json at all</script>");
        let record = extract(
            doc.root_element(),
            &specs(vec![(
                "download_url",
                structured(Some("script"), None, Some("contentUrl"), false),
            )]),
        );
        assert_eq!(
            record.get("download_url"),
            Some(&FieldValue::Text("not json at all".to_string()))
        );
    }

    #[test]
    fn test_specification_order_preserved() {
        let doc = Html::parse_fragment("<div><b>b</b><i>i</i></div>");
        let record = extract(
            doc.root_element(),
            &specs(vec![
                ("second", SelectorSpec::simple("i")),
                ("first", SelectorSpec::simple("b")),
            ]),
        );
        let keys: Vec<&String> = record.keys().collect();
        assert_eq!(keys, ["second", "first"]);
    }
}
