//! Tolerant typed view of the FHIR resources the crawler reads.
//!
//! Every field is optional or defaults to empty. Explicit JSON `null`s and
//! values of the wrong JSON type read as the default, numbers in text fields
//! read as their decimal text, so one odd field never costs the whole record.

use reqwest::Url;
use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Text field that some servers send as a number or boolean. Objects and
/// arrays read as `None`.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(Value::deserialize(deserializer)?))
}

/// Nested value that reads as its default when it has the wrong shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + DeserializeOwned,
{
    Ok(serde_json::from_value(Value::deserialize(deserializer)?).unwrap_or_default())
}

fn list_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    }
}

/// List that may arrive as `null` or as a bare element. Elements with the
/// wrong shape are dropped.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(list_items(Value::deserialize(deserializer)?)
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(list_items(Value::deserialize(deserializer)?)
        .into_iter()
        .filter_map(scalar_text)
        .collect())
}

/// A referenced resource kind that can be fetched and cached on its own.
pub trait FhirEntity: DeserializeOwned {
    const RESOURCE_TYPE: &'static str;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Bundle {
    #[serde(default, deserialize_with = "lenient_list")]
    pub entry: Vec<BundleEntry>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub link: Vec<BundleLink>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleEntry {
    #[serde(default)]
    pub resource: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleLink {
    #[serde(default, deserialize_with = "lenient_string")]
    pub relation: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
}

impl Bundle {
    pub fn next_link(&self) -> Option<&str> {
        self.link
            .iter()
            .find(|link| link.relation.as_deref() == Some("next"))
            .and_then(|link| link.url.as_deref())
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

impl BundleEntry {
    pub fn resource_type(&self) -> Option<&str> {
        self.resource.as_ref()?.get("resourceType")?.as_str()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Reference {
    #[serde(default, deserialize_with = "lenient_string")]
    pub reference: Option<String>,
}

impl Reference {
    pub fn as_str(&self) -> &str {
        self.reference.as_deref().unwrap_or("")
    }
}

/// A reference slot that upstream servers sometimes send as a list even when
/// the resource definition allows only one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ReferenceField {
    Many(Vec<Reference>),
    One(Reference),
}

impl ReferenceField {
    pub fn references(&self) -> &[Reference] {
        match self {
            ReferenceField::One(reference) => std::slice::from_ref(reference),
            ReferenceField::Many(references) => references,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Extension {
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
    #[serde(default, rename = "valueReference", deserialize_with = "lenient")]
    pub value_reference: Option<Reference>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Coding {
    #[serde(default, deserialize_with = "lenient_string")]
    pub system: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodeableConcept {
    #[serde(default, deserialize_with = "lenient_list")]
    pub coding: Vec<Coding>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactPoint {
    #[serde(default, deserialize_with = "lenient_string")]
    pub system: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: Option<String>,
    #[serde(default, rename = "use", deserialize_with = "lenient_string")]
    pub contact_use: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Address {
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub line: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: Option<String>,
    #[serde(default, rename = "postalCode", deserialize_with = "lenient_string")]
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PractitionerRole {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub practitioner: Option<ReferenceField>,
    #[serde(default, deserialize_with = "lenient")]
    pub organization: Option<Reference>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub location: Vec<Reference>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub specialty: Vec<CodeableConcept>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub telecom: Vec<ContactPoint>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub extension: Vec<Extension>,
}

impl PractitionerRole {
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    pub fn practitioner_references(&self) -> &[Reference] {
        self.practitioner
            .as_ref()
            .map(ReferenceField::references)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Identifier {
    #[serde(default, rename = "type", deserialize_with = "lenient")]
    pub identifier_type: Option<CodeableConcept>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HumanName {
    #[serde(default, deserialize_with = "lenient_string")]
    pub family: Option<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub given: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Practitioner {
    #[serde(default, deserialize_with = "lenient_list")]
    pub identifier: Vec<Identifier>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub name: Vec<HumanName>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Organization {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient_list")]
    pub org_type: Vec<CodeableConcept>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub address: Vec<Address>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Location {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub address: Option<Address>,
}

impl FhirEntity for Practitioner {
    const RESOURCE_TYPE: &'static str = "Practitioner";
}

impl FhirEntity for Organization {
    const RESOURCE_TYPE: &'static str = "Organization";
}

impl FhirEntity for Location {
    const RESOURCE_TYPE: &'static str = "Location";
}

/// Id of a `"<Type>/<id>"` reference, or `None` when the type prefix does not
/// match or the id is empty. The id is everything after the last `/`.
pub fn reference_id<'a>(reference: &'a str, resource_type: &str) -> Option<&'a str> {
    let rest = reference.strip_prefix(resource_type)?.strip_prefix('/')?;
    let id = rest.rsplit('/').next().unwrap_or(rest);
    (!id.is_empty()).then_some(id)
}

/// Joins a relative reference such as `Organization/123` onto a normalized base URL.
pub fn resolve_url(base_url: &Url, relative: &str) -> Option<Url> {
    base_url.join(relative).ok()
}
