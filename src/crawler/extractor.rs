//! Extractor: rendered page snapshot to ordered records
//!
//! A single generic routine interprets a [`RuleTable`]. Extraction is a pure
//! function of the snapshot: no navigation, no session access, and identical
//! snapshots always give identical record sequences.

use crate::crawler::rules::{FieldRule, Normalizer, Query, RuleTable, SectionRule};
use crate::crawler::site::slug_from_href;
use crate::crawler::{PageSnapshot, ResourceKind};
use crate::output::{FieldValue, PartialDate, Record};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Errors raised while building or applying a rule table
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Invalid selector '{selector}' in section '{section}'")]
    InvalidSelector { section: String, selector: String },

    #[error("Rule table '{table}' does not match the {kind} page at {url}: {reason}")]
    Schema {
        table: String,
        kind: ResourceKind,
        url: String,
        reason: String,
    },
}

struct CompiledField {
    rule: FieldRule,
    query: CompiledQuery,
}

enum CompiledQuery {
    Item(Selector),
    Itself,
    Ancestor { ancestor: Selector, selector: Selector },
    Document(Selector),
    PageSlug,
}

struct CompiledSection {
    rule: SectionRule,
    provenance: String,
    anchor: Selector,
    item: Option<Selector>,
    item_filter: Option<Selector>,
    fields: Vec<CompiledField>,
}

/// Compiled rule table
pub struct Extractor {
    table_name: String,
    sections: Vec<CompiledSection>,
}

fn compile(section: &SectionRule, selector: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(selector).map_err(|_| ExtractionError::InvalidSelector {
        section: section.name.clone(),
        selector: selector.to_string(),
    })
}

impl Extractor {
    /// Compiles every selector of the table up front
    ///
    /// # Returns
    ///
    /// * `Err(ExtractionError::InvalidSelector)` - A selector does not parse
    pub fn new(table: RuleTable) -> Result<Self, ExtractionError> {
        let mut sections = Vec::with_capacity(table.sections.len());

        for rule in table.sections {
            let anchor = compile(&rule, &rule.anchor)?;
            let item = rule.item.as_deref().map(|s| compile(&rule, s)).transpose()?;
            let item_filter = rule
                .item_filter
                .as_deref()
                .map(|s| compile(&rule, s))
                .transpose()?;

            let mut fields = Vec::with_capacity(rule.fields.len());
            for field in &rule.fields {
                let query = match &field.query {
                    Query::Item(s) => CompiledQuery::Item(compile(&rule, s)?),
                    Query::Itself => CompiledQuery::Itself,
                    Query::Ancestor { ancestor, selector } => CompiledQuery::Ancestor {
                        ancestor: compile(&rule, ancestor)?,
                        selector: compile(&rule, selector)?,
                    },
                    Query::Document(s) => CompiledQuery::Document(compile(&rule, s)?),
                    Query::PageSlug => CompiledQuery::PageSlug,
                };
                fields.push(CompiledField {
                    rule: field.clone(),
                    query,
                });
            }

            let provenance = format!("{}/{}@{}", table.name, rule.name, rule.fingerprint());
            sections.push(CompiledSection {
                rule,
                provenance,
                anchor,
                item,
                item_filter,
                fields,
            });
        }

        Ok(Self {
            table_name: table.name,
            sections,
        })
    }

    /// Extractor over the bundled site rules
    pub fn linkedin() -> Result<Self, ExtractionError> {
        Self::new(RuleTable::linkedin())
    }

    /// Maps a page snapshot to its records, in section then document order
    ///
    /// # Returns
    ///
    /// * `Ok(records)` - Possibly empty; records missing required fields are flagged partial
    /// * `Err(ExtractionError::Schema)` - The page does not match the rule table at all
    pub fn extract(&self, page: &PageSnapshot) -> Result<Vec<Record>, ExtractionError> {
        let document = Html::parse_document(&page.html);
        let mut records = Vec::new();
        let mut has_primary = false;
        let mut primary_found = false;
        // (required fields, missing required fields) per record
        let mut required_stats: Vec<(usize, usize)> = Vec::new();

        for section in self.sections.iter().filter(|s| s.rule.resource == page.kind) {
            has_primary |= section.rule.primary;

            let Some(anchor) = document.select(&section.anchor).next() else {
                continue;
            };
            if section.rule.primary {
                primary_found = true;
            }

            let items: Vec<ElementRef> = match &section.item {
                Some(selector) => anchor.select(selector).collect(),
                None => vec![anchor],
            };
            let offset = if section.rule.paged { page.item_offset } else { 0 };

            for item in items
                .into_iter()
                .filter(|item| match &section.item_filter {
                    Some(filter) => item.select(filter).next().is_some(),
                    None => true,
                })
                .skip(offset)
            {
                let mut fields = BTreeMap::new();
                let mut required = 0;
                let mut missing = 0;

                for field in &section.fields {
                    let value = evaluate(field, item, &document, page);
                    if field.rule.required {
                        required += 1;
                        if value.is_null() {
                            missing += 1;
                        }
                    }
                    fields.insert(field.rule.field.clone(), value);
                }

                required_stats.push((required, missing));
                records.push(Record {
                    kind: section.rule.record,
                    fields,
                    provenance: section.provenance.clone(),
                    partial: missing > 0,
                    origin: page.resource_id.clone(),
                    cursor: page.cursor,
                });
            }
        }

        if has_primary && !primary_found {
            return Err(self.schema_error(page, "no primary section found"));
        }

        let constrained: Vec<&(usize, usize)> =
            required_stats.iter().filter(|(req, _)| *req > 0).collect();
        if !constrained.is_empty() && constrained.iter().all(|(req, miss)| req == miss) {
            return Err(self.schema_error(page, "no record resolved any required field"));
        }

        debug!(
            resource = %page.resource_id,
            cursor = %page.cursor,
            records = records.len(),
            "Extracted page"
        );
        Ok(records)
    }

    fn schema_error(&self, page: &PageSnapshot, reason: &str) -> ExtractionError {
        ExtractionError::Schema {
            table: self.table_name.clone(),
            kind: page.kind,
            url: page.url.clone(),
            reason: reason.to_string(),
        }
    }
}

fn evaluate(
    field: &CompiledField,
    item: ElementRef<'_>,
    document: &Html,
    page: &PageSnapshot,
) -> FieldValue {
    let element = match &field.query {
        CompiledQuery::PageSlug => return FieldValue::Text(page.slug.clone()),
        CompiledQuery::Item(selector) => item.select(selector).next(),
        CompiledQuery::Itself => Some(item),
        CompiledQuery::Ancestor { ancestor, selector } => item
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| ancestor.matches(el))
            .and_then(|el| el.select(selector).next()),
        CompiledQuery::Document(selector) => document.select(selector).next(),
    };

    match element {
        Some(element) => normalize(field.rule.normalizer, element),
        None => FieldValue::Null,
    }
}

fn normalize(normalizer: Normalizer, element: ElementRef<'_>) -> FieldValue {
    let text = || collapse(&element.text().collect::<String>());

    let value = match normalizer {
        Normalizer::Text => non_empty(text()),
        Normalizer::Prose => non_empty(strip_controls(&text())),
        Normalizer::CompanyName => non_empty(company_name(&text())),
        Normalizer::ProfileSlug => element
            .value()
            .attr("href")
            .and_then(slug_from_href)
            .map(FieldValue::Text),
        Normalizer::Degree => degree(&text()).map(FieldValue::Text),
        Normalizer::RangeStart => range_part(&text(), 0).map(FieldValue::Date),
        Normalizer::RangeEnd => range_part(&text(), 1).map(FieldValue::Date),
        Normalizer::Date => PartialDate::parse(&text()).map(FieldValue::Date),
    };

    value.unwrap_or(FieldValue::Null)
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(text: String) -> Option<FieldValue> {
    if text.is_empty() {
        None
    } else {
        Some(FieldValue::Text(text))
    }
}

fn strip_controls(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in ["…see more", "...see more", "see more", "see less"] {
        out = remove_ignore_case(&out, pattern);
    }
    collapse(out.trim_end_matches('…'))
}

fn remove_ignore_case(text: &str, pattern: &str) -> String {
    // ASCII-only folding keeps every byte offset valid in `text`
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut rest = 0;
    for (start, matched) in lower.match_indices(pattern) {
        out.push_str(&text[rest..start]);
        rest = start + matched.len();
    }
    out.push_str(&text[rest..]);
    out
}

const EMPLOYMENT_TYPES: &[&str] = &[
    "full-time",
    "part-time",
    "self-employed",
    "freelance",
    "contract",
    "internship",
    "apprenticeship",
    "seasonal",
];

fn company_name(text: &str) -> String {
    text.split_whitespace()
        .filter(|token| *token != "·" && !EMPLOYMENT_TYPES.contains(&token.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn degree(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric() && c != '+'))
        .find(|token| {
            let core = token.trim_end_matches('+');
            core.len() >= 3
                && core.chars().next().is_some_and(|c| c.is_ascii_digit())
                && ["st", "nd", "rd", "th"].iter().any(|suffix| core.ends_with(suffix))
        })
        .map(str::to_string)
}

fn range_part(text: &str, index: usize) -> Option<PartialDate> {
    let part = text.split(['–', '—']).nth(index).or_else(|| text.split(" - ").nth(index))?;
    // "Present · 2 yrs 3 mos"
    let part = part.split('·').next().unwrap_or(part);
    PartialDate::parse(part)
}
