//! Form interaction capture

use serde::Deserialize;
use serde_json::json;

use crate::types::Properties;

/// Tags whose focus is reported
const FOCUSABLE_FIELDS: &[&str] = &["input", "textarea", "select"];

/// A form control that received focus
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FormField {
    pub tag: String,
    pub name: String,
    pub id: String,
    pub field_type: String,
    /// `id` of the enclosing form
    pub form_id: Option<String>,
}

impl FormField {
    /// Whether focusing this element counts as a form interaction
    pub fn is_trackable(&self) -> bool {
        FOCUSABLE_FIELDS
            .iter()
            .any(|tag| self.tag.eq_ignore_ascii_case(tag))
    }

    /// Properties for `form_field_focus`
    pub fn properties(&self) -> Properties {
        let name = if self.name.is_empty() { &self.id } else { &self.name };
        let mut properties = Properties::new();
        properties.insert("field_name".to_string(), json!(name));
        properties.insert("field_type".to_string(), json!(self.field_type));
        properties.insert(
            "form_id".to_string(),
            json!(non_empty(self.form_id.as_deref()).unwrap_or("unknown")),
        );
        properties
    }
}

/// A submitted form
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FormSubmission {
    pub id: String,
    pub action: String,
    pub method: String,
    pub field_count: usize,
}

impl FormSubmission {
    /// Properties for `form_submission`
    pub fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.insert(
            "form_id".to_string(),
            json!(non_empty(Some(&self.id)).unwrap_or("unknown")),
        );
        properties.insert("form_action".to_string(), json!(self.action));
        properties.insert("form_method".to_string(), json!(self.method));
        properties.insert("field_count".to_string(), json!(self.field_count));
        properties
    }

    /// Properties for the `form_submission` conversion
    pub fn conversion_properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.insert(
            "form_type".to_string(),
            json!(non_empty(Some(&self.id)).unwrap_or("contact_form")),
        );
        properties
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_form_controls_are_trackable() {
        let field = |tag: &str| FormField {
            tag: tag.to_string(),
            ..Default::default()
        };
        assert!(field("INPUT").is_trackable());
        assert!(field("textarea").is_trackable());
        assert!(field("select").is_trackable());
        assert!(!field("button").is_trackable());
    }

    #[test]
    fn test_field_name_falls_back_to_id() {
        let field = FormField {
            tag: "input".to_string(),
            id: "email".to_string(),
            field_type: "email".to_string(),
            ..Default::default()
        };
        let props = field.properties();
        assert_eq!(props["field_name"], "email");
        assert_eq!(props["form_id"], "unknown");
    }

    #[test]
    fn test_submission_defaults() {
        let submission = FormSubmission {
            method: "post".to_string(),
            field_count: 4,
            ..Default::default()
        };
        assert_eq!(submission.properties()["form_id"], "unknown");
        assert_eq!(submission.properties()["field_count"], 4);
        assert_eq!(submission.conversion_properties()["form_type"], "contact_form");
    }
}
