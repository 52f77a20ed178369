use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    io::IsTerminal,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{info, warn};

use crate::{
    constants::{NETWORK_REFERENCE_EXTENSION_URL, PRIMARY_COLLECTION},
    extract::{location_summary, organization_summary, practitioner_name, practitioner_npi},
    fetch::{FetchCounts, Fetcher},
    fhir::{FhirEntity, Location, Organization, PractitionerRole, resolve_url},
    paginate::fetch_all_practitioner_roles,
    payers::PayerEndpoint,
    resolve::Resolver,
    tables::{
        LocationRow, LocationToPrRow, OrgRow, OrgToPrRow, PToPrRow, PayerTables, SpecToPrRow,
        TeleToPrRow,
    },
};

/// NPI validity is not checked yet; every practitioner row carries this marker.
pub const NPI_VALIDITY_UNKNOWN: &str = "?";

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub page_size: usize,
    /// Record cap, set only in test mode.
    pub limit: Option<usize>,
    pub absent_refetch_limit: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayerSummary {
    pub records: usize,
    pub pages: usize,
    pub skipped_records: usize,
    pub limited: bool,
    pub organizations: usize,
    pub locations: usize,
    pub practitioners: usize,
    pub absent_entities: usize,
    pub entity_fetches: usize,
    pub org_to_pr: usize,
    pub location_to_pr: usize,
    pub p_to_pr: usize,
    pub spec_to_pr: usize,
    pub tele_to_pr: usize,
    pub fetch: FetchCounts,
}

/// `<output_root>/<payer_stub>`; the stub must be a plain directory name.
pub fn payer_output_dir(output_root: &Path, payer: &PayerEndpoint) -> Result<PathBuf> {
    let stub = payer.stub.trim();
    if stub.is_empty() || stub == "." || stub == ".." || stub.contains(['/', '\\']) {
        bail!("Payer stub {:?} is not usable as a directory name", payer.stub);
    }
    Ok(output_root.join(stub))
}

/// Runs the whole pipeline for one payer and replaces its output tables.
pub async fn crawl_payer(
    fetcher: &Fetcher,
    payer: &PayerEndpoint,
    output_dir: &Path,
    options: &CrawlOptions,
) -> Result<PayerSummary> {
    let base_url = payer.normalized_base_url()?;
    info!(payer = %payer.name, stub = %payer.stub, %base_url, "processing payer");

    let crawl =
        fetch_all_practitioner_roles(fetcher, &base_url, options.page_size, options.limit).await?;
    if crawl.records.is_empty() {
        warn!(payer = %payer.name, "no {PRIMARY_COLLECTION} entries found");
    }

    let mut resolver = Resolver::new(base_url, options.absent_refetch_limit);
    let mut tables = PayerTables::default();

    let progress = new_progress_bar(crawl.records.len(), &payer.stub);
    for role in &crawl.records {
        progress.set_message(role.id().to_string());
        add_role_rows(fetcher, &mut resolver, &mut tables, role).await?;
        progress.inc(1);
    }
    progress.finish_and_clear();

    add_entity_rows(&resolver, &mut tables)?;

    info!(output_dir = %output_dir.display(), "writing CSV tables");
    tables
        .write_all(output_dir)
        .with_context(|| format!("Failed writing tables for payer {}", payer.stub))?;

    Ok(PayerSummary {
        records: crawl.records.len(),
        pages: crawl.pages,
        skipped_records: crawl.skipped,
        limited: crawl.limited,
        organizations: resolver.organizations.len(),
        locations: resolver.locations.len(),
        practitioners: resolver.practitioners.len(),
        absent_entities: resolver.organizations.absent()
            + resolver.locations.absent()
            + resolver.practitioners.absent(),
        entity_fetches: resolver.entity_fetches(),
        org_to_pr: tables.org_to_pr.len(),
        location_to_pr: tables.location_to_pr.len(),
        p_to_pr: tables.p_to_pr.len(),
        spec_to_pr: tables.spec_to_pr.len(),
        tele_to_pr: tables.tele_to_pr.len(),
        fetch: fetcher.counts(),
    })
}

/// Resolves one record's references and appends its relationship rows.
pub async fn add_role_rows(
    fetcher: &Fetcher,
    resolver: &mut Resolver,
    tables: &mut PayerTables,
    role: &PractitionerRole,
) -> Result<()> {
    let role_id = role.id();
    let practitioner_refs = role.practitioner_references();
    if practitioner_refs.len() > 1 {
        bail!(
            "Data integrity violation: {PRIMARY_COLLECTION} {role_id} carries {} practitioner references (at most one allowed)",
            practitioner_refs.len()
        );
    }
    if role_id.is_empty() {
        warn!("{PRIMARY_COLLECTION} entry without an id");
    }

    let role_url = resolve_url(resolver.base_url(), &format!("{PRIMARY_COLLECTION}/{role_id}"))
        .with_context(|| format!("Failed building URL for {PRIMARY_COLLECTION} {role_id}"))?
        .to_string();

    let network_refs = role
        .extension
        .iter()
        .filter(|ext| ext.url.as_deref() == Some(NETWORK_REFERENCE_EXTENSION_URL))
        .filter_map(|ext| ext.value_reference.as_ref());
    let org_refs: Vec<&str> = network_refs
        .chain(role.organization.as_ref())
        .map(|reference| reference.as_str())
        .collect();
    for reference in org_refs {
        if let Some(resolved) = resolver.organization(fetcher, reference).await {
            tables.org_to_pr.push(OrgToPrRow {
                practitioner_role_fhir_url: role_url.clone(),
                organization_fhir_url: resolved.url.to_string(),
                organization_reference: reference.to_string(),
            });
        }
    }

    if let Some(reference) = practitioner_refs.first().map(|r| r.as_str()) {
        if let Some(resolved) = resolver.practitioner(fetcher, reference).await {
            let practitioner = resolver.practitioners.get(&resolved.id);
            let name = practitioner_name(practitioner);
            tables.p_to_pr.push(PToPrRow {
                practitioner_role_fhir_url: role_url.clone(),
                practitioner_fhir_url: resolved.url.to_string(),
                practitioner_reference: reference.to_string(),
                npi: practitioner_npi(practitioner),
                is_npi_invalid: NPI_VALIDITY_UNKNOWN.to_string(),
                family_name: name.family,
                given_name: name.given,
            });
        }
    }

    for reference in role.location.iter().map(|r| r.as_str()) {
        if let Some(resolved) = resolver.location(fetcher, reference).await {
            tables.location_to_pr.push(LocationToPrRow {
                practitioner_role_fhir_url: role_url.clone(),
                location_fhir_url: resolved.url.to_string(),
                location_reference: reference.to_string(),
            });
        }
    }

    for coding in role.specialty.iter().flat_map(|concept| &concept.coding) {
        tables.spec_to_pr.push(SpecToPrRow {
            practitioner_role_fhir_url: role_url.clone(),
            specialty_code: coding.code.clone().unwrap_or_default(),
            specialty_display: coding.display.clone().unwrap_or_default(),
            specialty_system: coding.system.clone().unwrap_or_default(),
        });
    }

    for telecom in &role.telecom {
        tables.tele_to_pr.push(TeleToPrRow {
            practitioner_role_fhir_url: role_url.clone(),
            telecom_system: telecom.system.clone().unwrap_or_default(),
            telecom_value: telecom.value.clone().unwrap_or_default(),
            telecom_use: telecom.contact_use.clone().unwrap_or_default(),
        });
    }

    Ok(())
}

/// One `org`/`location` row per distinct id seen this run; unavailable
/// entities keep their URL with empty fields.
pub fn add_entity_rows(resolver: &Resolver, tables: &mut PayerTables) -> Result<()> {
    for (id, organization) in resolver.organizations.iter() {
        let summary = organization_summary(organization);
        tables.org.push(OrgRow {
            organization_fhir_url: entity_url(resolver, Organization::RESOURCE_TYPE, id)?,
            name: summary.name,
            org_type: summary.org_type,
            address: summary.address,
        });
    }
    for (id, location) in resolver.locations.iter() {
        let summary = location_summary(location);
        tables.location.push(LocationRow {
            location_fhir_url: entity_url(resolver, Location::RESOURCE_TYPE, id)?,
            name: summary.name,
            status: summary.status,
            address: summary.address,
        });
    }
    Ok(())
}

fn entity_url(resolver: &Resolver, resource_type: &str, id: &str) -> Result<String> {
    resolve_url(resolver.base_url(), &format!("{resource_type}/{id}"))
        .map(|url| url.to_string())
        .with_context(|| format!("Failed building URL for {resource_type} {id}"))
}

fn new_progress_bar(total: usize, stub: &str) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let progress = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} {prefix:.bold} [{elapsed_precise}] [{bar:32.cyan/blue}] \
{pos}/{len} ({percent}%) {per_sec} eta {eta_precise} {msg}",
    ) {
        progress.set_style(style.progress_chars("=> "));
    }
    progress.set_prefix(stub.to_string());
    progress.enable_steady_tick(Duration::from_millis(250));
    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchConfig, build_client};
    use crate::payers::normalize_base_url;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn fetcher() -> Fetcher {
        Fetcher::new(
            build_client().unwrap(),
            FetchConfig {
                max_retries: 2,
                timeout: Duration::from_secs(5),
                backoff_unit: Duration::from_millis(1),
            },
        )
    }

    fn role(value: serde_json::Value) -> PractitionerRole {
        serde_json::from_value(value).unwrap()
    }

    fn payer(stub: &str) -> PayerEndpoint {
        PayerEndpoint {
            name: "Acme".to_string(),
            stub: stub.to_string(),
            base_url: "https://x.org/fhir".to_string(),
        }
    }

    #[test]
    fn output_dir_rejects_path_like_stubs() {
        let root = Path::new("/out");
        assert_eq!(
            payer_output_dir(root, &payer("acme")).unwrap(),
            PathBuf::from("/out/acme")
        );
        assert!(payer_output_dir(root, &payer("")).is_err());
        assert!(payer_output_dir(root, &payer("..")).is_err());
        assert!(payer_output_dir(root, &payer("a/b")).is_err());
    }

    #[tokio::test]
    async fn multiple_practitioner_references_fail_loudly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let fetcher = fetcher();
        let mut resolver = Resolver::new(normalize_base_url(&server.uri()).unwrap(), 0);
        let mut tables = PayerTables::default();
        let bad = role(json!({
            "id": "pr-dup",
            "practitioner": [
                {"reference": "Practitioner/p1"},
                {"reference": "Practitioner/p2"}
            ]
        }));

        let err = add_role_rows(&fetcher, &mut resolver, &mut tables, &bad)
            .await
            .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("Data integrity violation"));
        assert!(message.contains("pr-dup"));
        assert!(tables.p_to_pr.is_empty());
    }

    #[tokio::test]
    async fn role_rows_link_back_to_the_practitioner_role_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fhir/Organization/net-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Network One"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fhir/Organization/org-1"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fhir/Practitioner/p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "identifier": [{"type": {"coding": [{"code": "NPI"}]}, "value": "1234567890"}],
                "name": [{"family": "Lee", "given": ["Ana", "B"]}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fhir/Location/loc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Clinic", "status": "active", "address": {"city": "Austin", "state": "TX"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher();
        let base = normalize_base_url(&format!("{}/fhir", server.uri())).unwrap();
        let role_url = format!("{}/fhir/PractitionerRole/pr1", server.uri());
        let mut resolver = Resolver::new(base, 0);
        let mut tables = PayerTables::default();
        let pr = role(json!({
            "resourceType": "PractitionerRole",
            "id": "pr1",
            "extension": [
                {"url": NETWORK_REFERENCE_EXTENSION_URL, "valueReference": {"reference": "Organization/net-1"}},
                {"url": "http://example.org/other", "valueReference": {"reference": "Organization/ignored"}}
            ],
            "organization": {"reference": "Organization/org-1"},
            "practitioner": {"reference": "Practitioner/p1"},
            "location": [{"reference": "Location/loc-1"}, {"reference": "Organization/wrong-type"}],
            "specialty": [
                {"coding": [{"code": "207Q00000X", "display": "Family Medicine", "system": "http://nucc.org/provider-taxonomy"}]},
                {"coding": [{"code": "208D00000X"}, {"code": "363L00000X"}]}
            ],
            "telecom": [{"system": "phone", "value": "555-0100", "use": "work"}]
        }));

        add_role_rows(&fetcher, &mut resolver, &mut tables, &pr)
            .await
            .unwrap();
        add_entity_rows(&resolver, &mut tables).unwrap();

        let org_refs: Vec<&str> = tables
            .org_to_pr
            .iter()
            .map(|row| row.organization_reference.as_str())
            .collect();
        assert_eq!(org_refs, vec!["Organization/net-1", "Organization/org-1"]);
        assert_eq!(tables.location_to_pr.len(), 1);
        assert_eq!(tables.spec_to_pr.len(), 3);
        assert_eq!(tables.spec_to_pr[0].specialty_display, "Family Medicine");
        assert_eq!(tables.tele_to_pr[0].telecom_use, "work");

        let practitioner = &tables.p_to_pr[0];
        assert_eq!(practitioner.npi, "1234567890");
        assert_eq!(practitioner.is_npi_invalid, "?");
        assert_eq!(practitioner.family_name, "Lee");
        assert_eq!(practitioner.given_name, "Ana B");

        let first_columns = tables
            .org_to_pr
            .iter()
            .map(|r| &r.practitioner_role_fhir_url)
            .chain(tables.location_to_pr.iter().map(|r| &r.practitioner_role_fhir_url))
            .chain(tables.p_to_pr.iter().map(|r| &r.practitioner_role_fhir_url))
            .chain(tables.spec_to_pr.iter().map(|r| &r.practitioner_role_fhir_url))
            .chain(tables.tele_to_pr.iter().map(|r| &r.practitioner_role_fhir_url));
        for url in first_columns {
            assert_eq!(url, &role_url);
        }

        // Unavailable org-1 still gets a row, with empty fields.
        assert_eq!(tables.org.len(), 2);
        let org_1 = tables
            .org
            .iter()
            .find(|row| row.organization_fhir_url.ends_with("/Organization/org-1"))
            .unwrap();
        assert_eq!(org_1.name, "");
        assert_eq!(tables.location[0].address, "Austin, TX");
    }
}
