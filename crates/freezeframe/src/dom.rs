//! DOM element snapshots and accessible-name computation.
//!
//! The page driver returns flat [`ElementSnapshot`]s (one per candidate
//! element). Role and accessible name are computed here, so the same rules
//! apply to a real browser and to in-memory test pages.
//!
//! Name precedence: `aria-labelledby` text, then `aria-label`, then the native
//! label (`<label>`, `alt`, button `value`), then content for roles that take
//! their name from content, then `title`. An `aria-label` therefore always wins
//! over visible text.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Roles whose accessible name may come from their content
const NAME_FROM_CONTENT: &[&str] = &[
    "button",
    "cell",
    "checkbox",
    "columnheader",
    "heading",
    "link",
    "listitem",
    "menuitem",
    "option",
    "radio",
    "row",
    "rowheader",
    "switch",
    "tab",
    "tooltip",
    "treeitem",
];

/// A flattened view of one DOM element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementSnapshot {
    /// Page-unique reference used to act on the element later
    pub ref_id: u64,
    /// Lower-case tag name
    pub tag: String,
    /// Explicit `role` attribute
    pub role_attr: Option<String>,
    /// `type` attribute (inputs and buttons)
    pub type_attr: Option<String>,
    /// Whether the element carries an `href`
    pub has_href: bool,
    /// `aria-label` attribute
    pub aria_label: Option<String>,
    /// Text of the elements referenced by `aria-labelledby`
    pub labelledby_text: Option<String>,
    /// Text of an associated `<label>`
    pub label_text: Option<String>,
    /// `alt` attribute
    pub alt: Option<String>,
    /// `title` attribute
    pub title: Option<String>,
    /// Full text content
    pub text: String,
    /// Text of direct child text nodes
    pub own_text: String,
    /// Rendered with a non-empty box and not hidden by style
    pub visible: bool,
    /// `disabled` property or `aria-disabled="true"`
    pub disabled: bool,
    /// Remaining attributes
    pub attributes: BTreeMap<String, String>,
}

impl ElementSnapshot {
    /// A visible, enabled element with no attributes
    #[must_use]
    pub fn new(ref_id: u64, tag: &str) -> Self {
        Self {
            ref_id,
            tag: tag.to_ascii_lowercase(),
            visible: true,
            ..Self::default()
        }
    }

    /// Set text content (own text and full text alike)
    #[must_use]
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self.own_text = text.to_string();
        self
    }

    /// Set an attribute. Attributes that take part in role or name
    /// computation are stored in their dedicated fields.
    #[must_use]
    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        let value = value.to_string();
        match name {
            "role" => self.role_attr = Some(value),
            "type" => self.type_attr = Some(value),
            "aria-label" => self.aria_label = Some(value),
            "alt" => self.alt = Some(value),
            "title" => self.title = Some(value),
            "href" => {
                self.has_href = true;
                self.attributes.insert(name.to_string(), value);
            }
            "disabled" => self.disabled = true,
            _ => {
                self.attributes.insert(name.to_string(), value);
            }
        }
        self
    }

    /// Set the text of the `aria-labelledby` targets
    #[must_use]
    pub fn with_labelledby(mut self, text: &str) -> Self {
        self.labelledby_text = Some(text.to_string());
        self
    }

    /// Set the text of an associated `<label>`
    #[must_use]
    pub fn with_label(mut self, text: &str) -> Self {
        self.label_text = Some(text.to_string());
        self
    }

    /// Mark as not rendered
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Set the disabled state
    #[must_use]
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Attribute value, including the ones stored in dedicated fields
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        match name {
            "role" => self.role_attr.as_deref(),
            "type" => self.type_attr.as_deref(),
            "aria-label" => self.aria_label.as_deref(),
            "alt" => self.alt.as_deref(),
            "title" => self.title.as_deref(),
            _ => self.attributes.get(name).map(String::as_str),
        }
    }

    /// Computed role: explicit `role` attribute first, else the implicit one
    #[must_use]
    pub fn role(&self) -> Option<String> {
        if let Some(explicit) = self
            .role_attr
            .as_deref()
            .and_then(|r| r.split_whitespace().next())
        {
            return Some(explicit.to_ascii_lowercase());
        }
        self.implicit_role().map(str::to_string)
    }

    fn input_type(&self) -> String {
        self.type_attr
            .as_deref()
            .unwrap_or("text")
            .trim()
            .to_ascii_lowercase()
    }

    fn implicit_role(&self) -> Option<&'static str> {
        let role = match self.tag.as_str() {
            "a" | "area" if self.has_href => "link",
            "button" => "button",
            "input" => match self.input_type().as_str() {
                "button" | "submit" | "reset" | "image" => "button",
                "checkbox" => "checkbox",
                "radio" => "radio",
                "range" => "slider",
                "number" => "spinbutton",
                "hidden" => return None,
                _ => "textbox",
            },
            "textarea" => "textbox",
            "select" => "combobox",
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => "heading",
            "li" => "listitem",
            "ul" | "ol" => "list",
            "img" if self.alt.as_deref().is_some_and(|alt| !alt.is_empty()) => "img",
            "nav" => "navigation",
            "main" => "main",
            "table" => "table",
            "tr" => "row",
            "td" => "cell",
            "th" => "columnheader",
            "dialog" => "dialog",
            "option" => "option",
            "progress" => "progressbar",
            _ => return None,
        };
        Some(role)
    }

    /// Computed accessible name, whitespace-normalised
    #[must_use]
    pub fn accessible_name(&self) -> String {
        let non_empty = |value: Option<&str>| {
            value
                .map(normalize_whitespace)
                .filter(|v| !v.is_empty())
        };

        if let Some(name) = non_empty(self.labelledby_text.as_deref()) {
            return name;
        }
        if let Some(name) = non_empty(self.aria_label.as_deref()) {
            return name;
        }
        if let Some(name) = self.native_label() {
            return name;
        }
        if self
            .role()
            .is_some_and(|role| NAME_FROM_CONTENT.contains(&role.as_str()))
        {
            let content = normalize_whitespace(&self.text);
            if !content.is_empty() {
                return content;
            }
        }
        non_empty(self.title.as_deref()).unwrap_or_default()
    }

    fn native_label(&self) -> Option<String> {
        let pick = |value: Option<&str>| {
            value
                .map(normalize_whitespace)
                .filter(|v| !v.is_empty())
        };
        match self.tag.as_str() {
            "img" | "area" => pick(self.alt.as_deref()),
            "input" => match self.input_type().as_str() {
                "image" => pick(self.alt.as_deref()),
                "button" | "submit" | "reset" => pick(self.attributes.get("value").map(String::as_str)),
                _ => pick(self.label_text.as_deref()),
            },
            "select" | "textarea" => pick(self.label_text.as_deref()),
            _ => None,
        }
    }

    /// Whitespace-normalised full text
    #[must_use]
    pub fn normalized_text(&self) -> String {
        normalize_whitespace(&self.text)
    }

    /// Short description for error messages
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = format!("<{}", self.tag);
        if let Some(role) = self.role() {
            out.push_str(&format!(" role={role}"));
        }
        let name = self.accessible_name();
        if !name.is_empty() {
            out.push_str(&format!(" name={name:?}"));
        }
        let text = self.normalized_text();
        if !text.is_empty() && text != name {
            out.push_str(&format!(" text={:?}", truncate(&text, 60)));
        }
        if !self.visible {
            out.push_str(" hidden");
        }
        if self.disabled {
            out.push_str(" disabled");
        }
        out.push('>');
        out
    }
}

impl fmt::Display for ElementSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Collapse runs of whitespace to single spaces and trim
#[must_use]
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}

/// Summarise a list of snapshots for diagnostics
#[must_use]
pub fn describe_all(elements: &[ElementSnapshot]) -> String {
    match elements.len() {
        0 => "0 elements".to_string(),
        n => {
            let shown: Vec<String> = elements.iter().take(5).map(ElementSnapshot::describe).collect();
            let more = if n > 5 { format!(" (+{} more)", n - 5) } else { String::new() };
            format!("{n} element(s): {}{more}", shown.join(", "))
        }
    }
}
