//! Flat projections of fetched entities. All of these accept a missing entity
//! and fall back to empty strings (or `"0"` for the NPI).

use crate::fhir::{Address, Location, Organization, Practitioner};

pub const NPI_IDENTIFIER_CODE: &str = "NPI";
pub const MISSING_NPI: &str = "0";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PractitionerName {
    pub family: String,
    pub given: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizationSummary {
    pub name: String,
    pub org_type: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationSummary {
    pub name: String,
    pub status: String,
    pub address: String,
}

/// First listed name; given names joined with a single space.
pub fn practitioner_name(practitioner: Option<&Practitioner>) -> PractitionerName {
    let Some(name) = practitioner.and_then(|p| p.name.first()) else {
        return PractitionerName::default();
    };
    PractitionerName {
        family: name.family.clone().unwrap_or_default(),
        given: name.given.join(" "),
    }
}

/// Value of the first identifier typed with code `NPI`, else `"0"`.
pub fn practitioner_npi(practitioner: Option<&Practitioner>) -> String {
    let Some(practitioner) = practitioner else {
        return MISSING_NPI.to_string();
    };
    practitioner
        .identifier
        .iter()
        .find(|identifier| {
            identifier.identifier_type.as_ref().is_some_and(|concept| {
                concept
                    .coding
                    .iter()
                    .any(|coding| coding.code.as_deref() == Some(NPI_IDENTIFIER_CODE))
            })
        })
        .map(|identifier| {
            identifier
                .value
                .clone()
                .unwrap_or_else(|| MISSING_NPI.to_string())
        })
        .unwrap_or_else(|| MISSING_NPI.to_string())
}

pub fn organization_summary(organization: Option<&Organization>) -> OrganizationSummary {
    let Some(organization) = organization else {
        return OrganizationSummary::default();
    };
    let org_type = organization
        .org_type
        .first()
        .and_then(|concept| concept.coding.first())
        .and_then(|coding| coding.display.clone().or_else(|| coding.code.clone()))
        .unwrap_or_default();
    OrganizationSummary {
        name: organization.name.clone().unwrap_or_default(),
        org_type,
        address: organization
            .address
            .first()
            .map(format_address)
            .unwrap_or_default(),
    }
}

pub fn location_summary(location: Option<&Location>) -> LocationSummary {
    let Some(location) = location else {
        return LocationSummary::default();
    };
    LocationSummary {
        name: location.name.clone().unwrap_or_default(),
        status: location.status.clone().unwrap_or_default(),
        address: location
            .address
            .as_ref()
            .map(format_address)
            .unwrap_or_default(),
    }
}

/// Lines, city, state and postal code joined with `", "`, empty parts omitted.
pub fn format_address(address: &Address) -> String {
    let parts: Vec<&str> = address
        .line
        .iter()
        .map(String::as_str)
        .chain(address.city.as_deref())
        .chain(address.state.as_deref())
        .chain(address.postal_code.as_deref())
        .filter(|part| !part.is_empty())
        .collect();
    parts.join(", ")
}
