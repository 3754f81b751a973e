//! `{{variable}}` substitution for campaign subjects and bodies.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::model::Recipient;

static VAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").unwrap());

static BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>|</(p|div|li|h[1-6]|tr)\s*>").unwrap());

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Values available to a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars<'a> {
    pub company_name: &'a str,
    pub address: &'a str,
    pub phone: &'a str,
    pub website: &'a str,
}

impl<'a> TemplateVars<'a> {
    pub fn from_recipient(recipient: &'a Recipient) -> Self {
        Self {
            company_name: &recipient.company_name,
            address: &recipient.address,
            phone: recipient.phone.as_deref().unwrap_or_default(),
            website: recipient.website.as_deref().unwrap_or_default(),
        }
    }

    fn lookup(&self, name: &str) -> Option<&'a str> {
        match name {
            "company_name" => Some(self.company_name),
            "address" => Some(self.address),
            "phone" => Some(self.phone),
            "website" => Some(self.website),
            _ => None,
        }
    }
}

/// Replace every known `{{variable}}`. Unknown names are left untouched.
pub fn render(template: &str, vars: &TemplateVars<'_>) -> String {
    VAR_RE
        .replace_all(template, |caps: &Captures<'_>| match vars.lookup(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Plain-text alternative for a rendered HTML body.
///
/// Block ends become line breaks, tags are dropped and the common entities
/// are decoded. Blank lines are removed.
pub fn html_to_text(html: &str) -> String {
    let text = BREAK_RE.replace_all(html, "\n");
    let text = TAG_RE
        .replace_all(&text, "")
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
