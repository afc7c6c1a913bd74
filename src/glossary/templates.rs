/*!
 * Glossary rendering.
 *
 * Templates use `{name}` placeholders. Each template has a fixed set of
 * variables; custom templates are validated when the configuration loads.
 */

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::app_config::GeneralConfig;
use crate::text_utils::Script;

use super::model::{AnnotationResult, CharacterAnnotation};

static PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Template validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template '{template}' uses unknown variable {{{name}}}")]
    UnknownVariable { template: String, name: String },

    #[error("Template '{template}' is missing required variable {{{name}}}")]
    MissingVariable { template: String, name: String },

    #[error("Template '{template}' has an unbalanced brace")]
    UnbalancedBrace { template: String },
}

/// Check that `template` only uses placeholders from `variables`
pub fn validate_template(name: &str, template: &str, variables: &[&str]) -> Result<(), TemplateError> {
    for caps in PLACEHOLDER_REGEX.captures_iter(template) {
        let var = &caps[1];
        if !variables.contains(&var) {
            return Err(TemplateError::UnknownVariable {
                template: name.to_string(),
                name: var.to_string(),
            });
        }
    }

    let stripped = PLACEHOLDER_REGEX.replace_all(template, "");
    if stripped.contains('{') || stripped.contains('}') {
        return Err(TemplateError::UnbalancedBrace {
            template: name.to_string(),
        });
    }
    Ok(())
}

/// Check that `template` uses every placeholder in `required`
pub fn require_variables(name: &str, template: &str, required: &[&str]) -> Result<(), TemplateError> {
    let used: Vec<&str> = PLACEHOLDER_REGEX
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    match required.iter().find(|var| !used.contains(var)) {
        Some(var) => Err(TemplateError::MissingVariable {
            template: name.to_string(),
            name: var.to_string(),
        }),
        None => Ok(()),
    }
}

/// Substitute every `{name}` in one pass; values are inserted verbatim
pub fn fill(template: &str, values: &HashMap<&str, String>) -> String {
    PLACEHOLDER_REGEX
        .replace_all(template, |caps: &Captures| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Escape text for inclusion in HTML
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Customizable HTML templates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlossaryTemplates {
    /// Variables: `{kana}`, `{romaji}`
    #[serde(default = "default_kana_entry")]
    pub kana_entry: String,

    /// Variables: `{kanji}`, `{readings_html}`, `{meanings_html}`
    #[serde(default = "default_kanji_entry")]
    pub kanji_entry: String,

    /// Variables: `{type}`, `{reading}`, `{romaji}`
    #[serde(default = "default_kanji_reading")]
    pub kanji_reading: String,

    /// Variables: `{type}`, `{reading}`
    #[serde(default = "default_kanji_reading_no_romaji")]
    pub kanji_reading_no_romaji: String,

    /// Variables: `{meanings}`
    #[serde(default = "default_kanji_meanings")]
    pub kanji_meanings: String,

    /// Variables: `{entries}`
    #[serde(default = "default_hiragana_section")]
    pub hiragana_section: String,

    /// Variables: `{entries}`
    #[serde(default = "default_katakana_section")]
    pub katakana_section: String,

    /// Variables: `{entries}`
    #[serde(default = "default_kanji_section")]
    pub kanji_section: String,
}

impl Default for GlossaryTemplates {
    fn default() -> Self {
        Self {
            kana_entry: default_kana_entry(),
            kanji_entry: default_kanji_entry(),
            kanji_reading: default_kanji_reading(),
            kanji_reading_no_romaji: default_kanji_reading_no_romaji(),
            kanji_meanings: default_kanji_meanings(),
            hiragana_section: default_hiragana_section(),
            katakana_section: default_katakana_section(),
            kanji_section: default_kanji_section(),
        }
    }
}

impl GlossaryTemplates {
    /// Every template with the variables it may use
    pub fn variables(&self) -> Vec<(&'static str, &str, &'static [&'static str])> {
        const KANA_ENTRY: &[&str] = &["kana", "romaji"];
        const KANJI_ENTRY: &[&str] = &["kanji", "readings_html", "meanings_html"];
        const KANJI_READING: &[&str] = &["type", "reading", "romaji"];
        const KANJI_READING_NO_ROMAJI: &[&str] = &["type", "reading"];
        const KANJI_MEANINGS: &[&str] = &["meanings"];
        const SECTION: &[&str] = &["entries"];

        vec![
            ("kana_entry", self.kana_entry.as_str(), KANA_ENTRY),
            ("kanji_entry", self.kanji_entry.as_str(), KANJI_ENTRY),
            ("kanji_reading", self.kanji_reading.as_str(), KANJI_READING),
            ("kanji_reading_no_romaji", self.kanji_reading_no_romaji.as_str(), KANJI_READING_NO_ROMAJI),
            ("kanji_meanings", self.kanji_meanings.as_str(), KANJI_MEANINGS),
            ("hiragana_section", self.hiragana_section.as_str(), SECTION),
            ("katakana_section", self.katakana_section.as_str(), SECTION),
            ("kanji_section", self.kanji_section.as_str(), SECTION),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        for (name, template, variables) in self.variables() {
            validate_template(name, template, variables).map_err(|e| anyhow!("{}", e))?;
        }
        // sections must place their entries
        for (name, template) in [
            ("hiragana_section", &self.hiragana_section),
            ("katakana_section", &self.katakana_section),
            ("kanji_section", &self.kanji_section),
        ] {
            require_variables(name, template, &["entries"]).map_err(|e| anyhow!("{}", e))?;
        }
        Ok(())
    }
}

fn default_kana_entry() -> String {
    "<li><span>{kana}</span>: <span>{romaji}</span></li>".to_string()
}

fn default_kanji_entry() -> String {
    "<table>\n<tr>\n<th>Kanji</th>\n<td>{kanji}</td>\n</tr>\n<tr>\n<th>Readings</th>\n<td>\n<ul>\n{readings_html}\n</ul>\n</td>\n</tr>\n<tr>\n<th>Meanings</th>\n<td>{meanings_html}</td>\n</tr>\n</table>".to_string()
}

fn default_kanji_reading() -> String {
    "<li><strong>{type}:</strong> {reading} <span>({romaji})</span></li>".to_string()
}

fn default_kanji_reading_no_romaji() -> String {
    "<li><strong>{type}:</strong> {reading}</li>".to_string()
}

fn default_kanji_meanings() -> String {
    "{meanings}".to_string()
}

fn default_hiragana_section() -> String {
    "<h3>Hiragana</h3><ul>{entries}</ul>".to_string()
}

fn default_katakana_section() -> String {
    "<h3>Katakana</h3><ul>{entries}</ul>".to_string()
}

fn default_kanji_section() -> String {
    "<h3>Kanji</h3>{entries}".to_string()
}

/// Turns an annotation result into the markup stored in the target field
pub trait Renderer: Send + Sync {
    fn render(&self, result: &AnnotationResult, general: &GeneralConfig) -> String;
}

/// Default renderer producing the HTML glossary
#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer {
    templates: GlossaryTemplates,
}

impl HtmlRenderer {
    pub fn new(templates: GlossaryTemplates) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &GlossaryTemplates {
        &self.templates
    }

    fn render_kana(&self, character: char, romaji: &str) -> String {
        let values = HashMap::from([
            ("kana", escape_html(&character.to_string())),
            ("romaji", escape_html(romaji)),
        ]);
        fill(&self.templates.kana_entry, &values)
    }

    fn render_kanji(&self, annotation: &CharacterAnnotation, general: &GeneralConfig) -> String {
        let CharacterAnnotation::Kanji { character, info, readings } = annotation else {
            return String::new();
        };

        let mut sorted: Vec<_> = readings.iter().collect();
        sorted.sort_by(|a, b| (a.kind, &a.reading).cmp(&(b.kind, &b.reading)));

        let readings_html: String = sorted
            .into_iter()
            .map(|r| {
                let mut values = HashMap::from([
                    ("type", r.kind.to_string()),
                    ("reading", escape_html(&r.reading)),
                ]);
                match &r.romaji {
                    Some(romaji) => {
                        values.insert("romaji", escape_html(romaji));
                        fill(&self.templates.kanji_reading, &values)
                    }
                    None => fill(&self.templates.kanji_reading_no_romaji, &values),
                }
            })
            .collect();

        let meanings_html = if general.include_meanings && !info.meanings.is_empty() {
            let meanings = HashMap::from([("meanings", escape_html(&info.meanings.join(", ")))]);
            fill(&self.templates.kanji_meanings, &meanings)
        } else {
            String::new()
        };

        let values = HashMap::from([
            ("kanji", escape_html(&character.to_string())),
            ("readings_html", readings_html),
            ("meanings_html", meanings_html),
        ]);
        fill(&self.templates.kanji_entry, &values)
    }
}

impl Renderer for HtmlRenderer {
    fn render(&self, result: &AnnotationResult, general: &GeneralConfig) -> String {
        let mut hiragana = String::new();
        let mut katakana = String::new();
        let mut kanji = String::new();

        for entry in &result.entries {
            match entry {
                CharacterAnnotation::Kana { character, script, romaji } => match script {
                    Script::Hiragana if general.include_hiragana => hiragana.push_str(&self.render_kana(*character, romaji)),
                    Script::Katakana if general.include_katakana => katakana.push_str(&self.render_kana(*character, romaji)),
                    _ => {}
                },
                CharacterAnnotation::Kanji { .. } if general.include_kanji => {
                    kanji.push_str(&self.render_kanji(entry, general));
                }
                CharacterAnnotation::Kanji { .. } => {}
            }
        }

        let sections = [
            (hiragana, &self.templates.hiragana_section),
            (katakana, &self.templates.katakana_section),
            (kanji, &self.templates.kanji_section),
        ];

        sections
            .into_iter()
            .filter(|(entries, _)| !entries.is_empty())
            .map(|(entries, template)| fill(template, &HashMap::from([("entries", entries)])))
            .collect()
    }
}
