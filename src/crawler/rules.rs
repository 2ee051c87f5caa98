//! Declarative extraction rules
//!
//! A [`RuleTable`] maps each resource kind to named sections. A section
//! anchors on one element of the page, splits it into items, and turns every
//! item into one record by evaluating its field rules. A field rule is a
//! (field name, query, normalizer, required) tuple; nothing in here runs code
//! specific to a section.
//!
//! The selectors of [`RuleTable::linkedin`] track the site's markup and are
//! expected to need maintenance. A table that no longer matches is reported
//! as a schema error rather than producing empty records.

use crate::crawler::ResourceKind;
use crate::output::RecordKind;
use sha2::{Digest, Sha256};

/// Where a field's value is looked up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// First match of a selector inside the item
    Item(String),
    /// The item element itself
    Itself,
    /// First match of `selector` inside the closest ancestor of the item
    /// matching `ancestor`
    Ancestor { ancestor: String, selector: String },
    /// First match of a selector anywhere in the document
    Document(String),
    /// The slug of the resource the page belongs to
    PageSlug,
}

impl Query {
    pub fn item(selector: &str) -> Self {
        Self::Item(selector.to_string())
    }

    pub fn ancestor(ancestor: &str, selector: &str) -> Self {
        Self::Ancestor {
            ancestor: ancestor.to_string(),
            selector: selector.to_string(),
        }
    }

    pub fn document(selector: &str) -> Self {
        Self::Document(selector.to_string())
    }
}

/// Turns a matched element into a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalizer {
    /// Text content with whitespace collapsed
    Text,
    /// Free text without "see more" / "see less" controls
    Prose,
    /// Company name without employment-type tokens ("Full-time", ...)
    CompanyName,
    /// Profile slug from the element's `/in/<slug>/` link
    ProfileSlug,
    /// Connection degree such as "1st", "2nd", "3rd+"
    Degree,
    /// Start of a "Jan 2019 – Present" range
    RangeStart,
    /// End of a date range; "Present" is null
    RangeEnd,
    /// A single month-year or year
    Date,
}

/// One field of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRule {
    pub field: String,
    pub query: Query,
    pub normalizer: Normalizer,
    /// A miss flags the record as partial
    pub required: bool,
}

impl FieldRule {
    pub fn new(field: &str, query: Query, normalizer: Normalizer) -> Self {
        Self {
            field: field.to_string(),
            query,
            normalizer,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A group of records of one kind found under one anchor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionRule {
    pub name: String,
    pub resource: ResourceKind,
    pub record: RecordKind,
    /// Scope root; the first match in the document is used
    pub anchor: String,
    /// Items inside the anchor, one record each; the anchor itself when `None`
    pub item: Option<String>,
    /// Only items containing a match of this selector are kept
    pub item_filter: Option<String>,
    /// The page does not match the table unless some primary anchor is found
    pub primary: bool,
    /// Items before the page's item offset were emitted with an earlier page
    pub paged: bool,
    pub fields: Vec<FieldRule>,
}

impl SectionRule {
    pub fn new(name: &str, resource: ResourceKind, record: RecordKind, anchor: &str) -> Self {
        Self {
            name: name.to_string(),
            resource,
            record,
            anchor: anchor.to_string(),
            item: None,
            item_filter: None,
            primary: false,
            paged: false,
            fields: Vec::new(),
        }
    }

    pub fn items(mut self, selector: &str) -> Self {
        self.item = Some(selector.to_string());
        self
    }

    pub fn only_with(mut self, selector: &str) -> Self {
        self.item_filter = Some(selector.to_string());
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn paged(mut self) -> Self {
        self.paged = true;
        self
    }

    pub fn field(mut self, rule: FieldRule) -> Self {
        self.fields.push(rule);
        self
    }

    /// Short content hash of this section's rules
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(format!("{:?}", self).as_bytes());
        hex::encode(digest)[..12].to_string()
    }

    /// Every selector string the section uses
    pub fn selectors(&self) -> Vec<&str> {
        let mut selectors = vec![self.anchor.as_str()];
        selectors.extend(self.item.as_deref());
        selectors.extend(self.item_filter.as_deref());
        for field in &self.fields {
            match &field.query {
                Query::Item(s) | Query::Document(s) => selectors.push(s),
                Query::Ancestor { ancestor, selector } => {
                    selectors.push(ancestor);
                    selectors.push(selector);
                }
                Query::Itself | Query::PageSlug => {}
            }
        }
        selectors
    }
}

/// Named collection of section rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTable {
    pub name: String,
    pub sections: Vec<SectionRule>,
}

impl RuleTable {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sections: Vec::new(),
        }
    }

    pub fn section(mut self, section: SectionRule) -> Self {
        self.sections.push(section);
        self
    }

    /// Sections applying to one resource kind, in table order
    pub fn sections_for(&self, kind: ResourceKind) -> impl Iterator<Item = &SectionRule> {
        self.sections.iter().filter(move |s| s.resource == kind)
    }

    /// Rules for the networking site's profile and connection pages
    pub fn linkedin() -> Self {
        use Normalizer::*;
        use ResourceKind::{ConnectionList, Profile};

        Self::new("linkedin")
            .section(
                SectionRule::new("identity", Profile, RecordKind::Profile, "main")
                    .primary()
                    .field(FieldRule::new("slug", Query::PageSlug, Text))
                    .field(FieldRule::new("name", Query::item("h1.text-heading-xlarge, h1.pv-top-card--name"), Text).required())
                    .field(FieldRule::new("headline", Query::item(".pv-top-card .text-body-medium, h2.pv-top-card--headline"), Text))
                    .field(FieldRule::new("location", Query::item(".pv-top-card .text-body-small.inline, .pv-top-card--location"), Text))
                    .field(FieldRule::new("about", Query::item(".pv-about-section .pv-about__summary-text, .pv-about-section p"), Prose)),
            )
            .section(
                SectionRule::new("experience", Profile, RecordKind::Experience, ".experience-section")
                    .items("li.pv-position-entity")
                    .only_with(".pv-entity__secondary-title")
                    .field(FieldRule::new("position", Query::item("h3"), Text).required())
                    .field(FieldRule::new("company", Query::item(".pv-entity__secondary-title"), CompanyName).required())
                    .field(FieldRule::new("start_date", Query::item(".pv-entity__date-range span:nth-child(2)"), RangeStart))
                    .field(FieldRule::new("end_date", Query::item(".pv-entity__date-range span:nth-child(2)"), RangeEnd))
                    .field(FieldRule::new("location", Query::item(".pv-entity__location span:last-child"), Text))
                    .field(FieldRule::new("description", Query::item(".pv-entity__description"), Prose)),
            )
            .section(
                SectionRule::new("experience_grouped", Profile, RecordKind::Experience, ".experience-section")
                    .items(".pv-entity__role-details")
                    .field(FieldRule::new("position", Query::item("h3 span:last-child"), Text).required())
                    .field(
                        FieldRule::new(
                            "company",
                            Query::ancestor(".pv-entity__position-group-pager", ".pv-entity__company-summary-info h3 span:last-child"),
                            CompanyName,
                        )
                        .required(),
                    )
                    .field(FieldRule::new("start_date", Query::item(".pv-entity__date-range span:nth-child(2)"), RangeStart))
                    .field(FieldRule::new("end_date", Query::item(".pv-entity__date-range span:nth-child(2)"), RangeEnd))
                    .field(FieldRule::new("location", Query::item(".pv-entity__location span:last-child"), Text))
                    .field(FieldRule::new("description", Query::item(".pv-entity__description"), Prose)),
            )
            .section(
                SectionRule::new("education", Profile, RecordKind::Education, ".education-section")
                    .items("li.pv-education-entity")
                    .field(FieldRule::new("school", Query::item(".pv-entity__school-name"), Text).required())
                    .field(FieldRule::new("degree", Query::item(".pv-entity__degree-name .pv-entity__comma-item"), Text))
                    .field(FieldRule::new("field_of_study", Query::item(".pv-entity__fos .pv-entity__comma-item"), Text))
                    .field(FieldRule::new("start_date", Query::item(".pv-entity__dates time:nth-of-type(1)"), Date))
                    .field(FieldRule::new("end_date", Query::item(".pv-entity__dates time:nth-of-type(2)"), Date)),
            )
            .section(
                SectionRule::new("certification", Profile, RecordKind::Certification, ".certification-section")
                    .items("li.pv-certification-entity")
                    .field(FieldRule::new("title", Query::item("h3"), Text).required())
                    .field(FieldRule::new("issuer", Query::item(".pv-certifications__summary-info p span:last-child"), Text))
                    .field(FieldRule::new("issue_date", Query::item(".pv-certifications__summary-info time:nth-of-type(1)"), Date))
                    .field(FieldRule::new("expiry_date", Query::item(".pv-certifications__summary-info time:nth-of-type(2)"), Date))
                    .field(FieldRule::new("credential", Query::item(".pv-certifications__credential-id"), Text)),
            )
            .section(
                SectionRule::new("skills", Profile, RecordKind::Skill, ".pv-skill-categories-section")
                    .items(".pv-skill-category-entity__name-text")
                    .field(FieldRule::new("name", Query::Itself, Text).required()),
            )
            .section(
                SectionRule::new("connections", ConnectionList, RecordKind::Connection, "ul.reusable-search__entity-result-list")
                    .items("li.reusable-search__result-container")
                    .primary()
                    .paged()
                    .field(FieldRule::new("connection_of", Query::PageSlug, Text))
                    .field(FieldRule::new("slug", Query::item(r#"a.app-aware-link[href*="/in/"]"#), ProfileSlug).required())
                    .field(FieldRule::new("name", Query::item(r#".entity-result__title-text a span[aria-hidden="true"]"#), Text).required())
                    .field(FieldRule::new("headline", Query::item(".entity-result__primary-subtitle"), Text))
                    .field(FieldRule::new("location", Query::item(".entity-result__secondary-subtitle"), Text))
                    .field(FieldRule::new("degree", Query::item(".entity-result__badge-text"), Degree)),
            )
            .section(
                SectionRule::new("own_connections", ConnectionList, RecordKind::Connection, ".mn-connections")
                    .items("li.mn-connection-card")
                    .primary()
                    .paged()
                    .field(FieldRule::new("connection_of", Query::PageSlug, Text))
                    .field(FieldRule::new("slug", Query::item("a.mn-connection-card__link"), ProfileSlug).required())
                    .field(FieldRule::new("name", Query::item(".mn-connection-card__name"), Text).required())
                    .field(FieldRule::new("headline", Query::item(".mn-connection-card__occupation"), Text)),
            )
    }
}
