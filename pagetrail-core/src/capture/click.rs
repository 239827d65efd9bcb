//! Click classification
//!
//! A click is described by the element that received it plus its ancestor
//! chain. Classification walks a fixed precedence list and stops at the first
//! rule that matches, so a link inside `.social-links` is a social click even
//! though it is also an external link.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::types::Properties;

/// Longest `element_text` kept on a click event, in characters
const MAX_ELEMENT_TEXT: usize = 100;

/// Known social domains, checked in order
const SOCIAL_PLATFORMS: &[(&str, &str)] = &[
    ("github.com", "github"),
    ("linkedin.com", "linkedin"),
    ("twitter.com", "twitter"),
    ("facebook.com", "facebook"),
    ("instagram.com", "instagram"),
];

/// Minimal description of a DOM element
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ElementInfo {
    pub tag: String,
    pub id: String,
    pub classes: Vec<String>,
}

impl ElementInfo {
    fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    fn is_tag(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }
}

/// The clicked element and its surroundings
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClickTarget {
    #[serde(flatten)]
    pub element: ElementInfo,
    /// Visible text content
    pub text: String,
    /// Resolved `href` for anchors
    pub href: Option<String>,
    /// `type` attribute for buttons
    pub button_type: Option<String>,
    /// Ancestors, nearest first
    pub ancestors: Vec<ElementInfo>,
    /// Title of the enclosing portfolio/project card, if any
    pub project_title: Option<String>,
}

impl ClickTarget {
    /// Like `Element.closest`: the element itself, then its ancestors
    fn closest(&self, predicate: impl Fn(&ElementInfo) -> bool) -> bool {
        predicate(&self.element) || self.ancestors.iter().any(predicate)
    }

    fn is_anchor(&self) -> bool {
        self.element.is_tag("a")
    }
}

/// Semantic click categories, highest precedence first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Social,
    Portfolio,
    ExternalLink,
    ContactAction,
    Navigation,
    Button,
    Link,
    General,
}

impl ClickKind {
    /// Event name recorded for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ClickKind::Social => "social_click",
            ClickKind::Portfolio => "portfolio_click",
            ClickKind::ExternalLink => "external_link_click",
            ClickKind::ContactAction => "contact_action",
            ClickKind::Navigation => "navigation_click",
            ClickKind::Button => "button_click",
            ClickKind::Link => "link_click",
            ClickKind::General => "general_click",
        }
    }
}

/// Outcome of [`classify_click`]
#[derive(Debug, Clone, PartialEq)]
pub struct ClickClassification {
    pub kind: ClickKind,
    pub properties: Properties,
}

/// Classify a click.
///
/// `page_host` is the host of the current page; a link is external when its
/// host differs. With `track_external` off, external links fall through to the
/// remaining rules.
pub fn classify_click(
    target: &ClickTarget,
    page_host: Option<&str>,
    track_external: bool,
) -> ClickClassification {
    let text = truncate_chars(target.text.trim(), MAX_ELEMENT_TEXT);
    let mut properties = base_properties(target, &text);

    let kind = if target.closest(|el| el.has_class("social-links")) {
        properties.insert(
            "social_platform".to_string(),
            json!(social_platform(target.href.as_deref())),
        );
        insert_opt(&mut properties, "link_url", target.href.as_deref());
        ClickKind::Social
    } else if target.closest(|el| el.has_class("portfolio-item") || el.has_class("project-item"))
    {
        properties.insert(
            "project_name".to_string(),
            json!(target.project_title.as_deref().unwrap_or("").trim()),
        );
        ClickKind::Portfolio
    } else if let Some(domain) = external_domain(target, page_host).filter(|_| track_external) {
        insert_opt(&mut properties, "link_url", target.href.as_deref());
        properties.insert("link_text".to_string(), json!(text));
        properties.insert("external_domain".to_string(), json!(domain));
        ClickKind::ExternalLink
    } else if target.closest(|el| el.id == "contact") || target.element.has_class("contact-btn") {
        ClickKind::ContactAction
    } else if target.closest(|el| el.is_tag("nav") || el.has_class("navmenu")) {
        properties.insert("nav_item".to_string(), json!(text));
        ClickKind::Navigation
    } else if target.element.is_tag("button") || target.element.has_class("btn") {
        properties.insert(
            "button_type".to_string(),
            json!(target.button_type.as_deref().unwrap_or("button")),
        );
        properties.insert("button_text".to_string(), json!(text));
        ClickKind::Button
    } else if target.is_anchor() {
        insert_opt(&mut properties, "link_url", target.href.as_deref());
        properties.insert("link_text".to_string(), json!(text));
        ClickKind::Link
    } else {
        ClickKind::General
    };

    ClickClassification { kind, properties }
}

/// Map a URL to a social platform label
pub fn social_platform(url: Option<&str>) -> &'static str {
    let Some(url) = url.filter(|u| !u.is_empty()) else {
        return "unknown";
    };
    SOCIAL_PLATFORMS
        .iter()
        .find(|(domain, _)| url.contains(domain))
        .map(|(_, platform)| *platform)
        .unwrap_or("other")
}

/// Host of an anchor's href when it points away from `page_host`
fn external_domain(target: &ClickTarget, page_host: Option<&str>) -> Option<String> {
    if !target.is_anchor() {
        return None;
    }
    let url = reqwest::Url::parse(target.href.as_deref()?).ok()?;
    let host = url.host_str()?;
    match page_host {
        Some(page_host) if page_host.eq_ignore_ascii_case(host) => None,
        _ => Some(host.to_string()),
    }
}

fn base_properties(target: &ClickTarget, text: &str) -> Properties {
    let tag = target.element.tag.to_ascii_lowercase();
    let classes = target.element.classes.join(" ");
    let element_id = if !target.element.id.is_empty() {
        target.element.id.clone()
    } else if !classes.is_empty() {
        classes.clone()
    } else {
        tag.clone()
    };

    let mut properties = Properties::new();
    properties.insert("element_tag".to_string(), json!(tag));
    properties.insert("element_id".to_string(), json!(element_id));
    properties.insert("element_text".to_string(), json!(text));
    properties.insert("element_classes".to_string(), json!(classes));
    properties
}

fn insert_opt(properties: &mut Properties, key: &str, value: Option<&str>) {
    properties.insert(
        key.to_string(),
        value.map(|v| json!(v)).unwrap_or(Value::Null),
    );
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tag: &str, id: &str, classes: &[&str]) -> ElementInfo {
        ElementInfo {
            tag: tag.to_string(),
            id: id.to_string(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn link(href: &str) -> ClickTarget {
        ClickTarget {
            element: element("a", "", &[]),
            text: "  Visit  ".to_string(),
            href: Some(href.to_string()),
            ..Default::default()
        }
    }

    const HOST: Option<&str> = Some("portfolio.example.com");

    #[test]
    fn test_social_beats_external() {
        let mut target = link("https://github.com/someone");
        target.ancestors = vec![element("div", "", &["social-links"])];

        let result = classify_click(&target, HOST, true);
        assert_eq!(result.kind, ClickKind::Social);
        assert_eq!(result.properties["social_platform"], "github");
    }

    #[test]
    fn test_portfolio_beats_external_and_contact() {
        let mut target = link("https://demo.example.org/");
        target.ancestors = vec![
            element("div", "", &["portfolio-item"]),
            element("section", "contact", &[]),
        ];
        target.project_title = Some(" Data Lake ".to_string());

        let result = classify_click(&target, HOST, true);
        assert_eq!(result.kind, ClickKind::Portfolio);
        assert_eq!(result.properties["project_name"], "Data Lake");
    }

    #[test]
    fn test_external_beats_contact() {
        let mut target = link("https://calendly.com/book");
        target.ancestors = vec![element("section", "contact", &[])];

        let result = classify_click(&target, HOST, true);
        assert_eq!(result.kind, ClickKind::ExternalLink);
        assert_eq!(result.properties["external_domain"], "calendly.com");
        assert_eq!(result.properties["link_text"], "Visit");
    }

    #[test]
    fn test_same_host_link_is_not_external() {
        let target = link("https://portfolio.example.com/#about");
        let result = classify_click(&target, HOST, true);
        assert_eq!(result.kind, ClickKind::Link);
        assert_eq!(result.properties["link_url"], "https://portfolio.example.com/#about");
    }

    #[test]
    fn test_external_tracking_disabled_falls_through() {
        let target = link("https://elsewhere.example.net/");
        let result = classify_click(&target, HOST, false);
        assert_eq!(result.kind, ClickKind::Link);
    }

    #[test]
    fn test_contact_beats_navigation_and_button() {
        let target = ClickTarget {
            element: element("button", "", &["btn", "contact-btn"]),
            ancestors: vec![element("nav", "", &[])],
            ..Default::default()
        };
        assert_eq!(classify_click(&target, HOST, true).kind, ClickKind::ContactAction);
    }

    #[test]
    fn test_navigation_beats_button() {
        let target = ClickTarget {
            element: element("button", "", &["btn"]),
            text: "Menu".to_string(),
            ancestors: vec![element("ul", "", &["navmenu"])],
            ..Default::default()
        };
        let result = classify_click(&target, HOST, true);
        assert_eq!(result.kind, ClickKind::Navigation);
        assert_eq!(result.properties["nav_item"], "Menu");
    }

    #[test]
    fn test_button_defaults() {
        let target = ClickTarget {
            element: element("BUTTON", "", &[]),
            text: "Download CV".to_string(),
            ..Default::default()
        };
        let result = classify_click(&target, HOST, true);
        assert_eq!(result.kind, ClickKind::Button);
        assert_eq!(result.properties["button_type"], "button");
        assert_eq!(result.properties["element_tag"], "button");
        assert_eq!(result.properties["element_id"], "button");
    }

    #[test]
    fn test_general_click_properties() {
        let target = ClickTarget {
            element: element("div", "", &["hero", "dark"]),
            text: "x".repeat(150),
            ..Default::default()
        };
        let result = classify_click(&target, HOST, true);
        assert_eq!(result.kind, ClickKind::General);
        assert_eq!(result.properties["element_id"], "hero dark");
        assert_eq!(
            result.properties["element_text"].as_str().unwrap().len(),
            MAX_ELEMENT_TEXT
        );
    }

    #[test]
    fn test_social_platform_lookup() {
        assert_eq!(social_platform(Some("https://www.linkedin.com/in/x")), "linkedin");
        assert_eq!(social_platform(Some("https://mastodon.social/@x")), "other");
        assert_eq!(social_platform(None), "unknown");
        assert_eq!(social_platform(Some("")), "unknown");
    }

    #[test]
    fn test_click_target_from_json() {
        let target: ClickTarget = serde_json::from_str(
            r#"{"tag": "a", "classes": ["btn"], "href": "https://x.com", "ancestors": [{"tag": "footer"}]}"#,
        )
        .unwrap();
        assert_eq!(target.element.tag, "a");
        assert_eq!(target.ancestors.len(), 1);
    }
}
