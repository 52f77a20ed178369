use anyhow::{Context, Result, bail};
use reqwest::Url;
use serde::Deserialize;
use std::path::Path;

/// One row of the payer endpoint table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PayerEndpoint {
    #[serde(rename = "payer_name")]
    pub name: String,
    #[serde(rename = "payer_stub")]
    pub stub: String,
    #[serde(rename = "payer_provider_directory_fhir_url")]
    pub base_url: String,
}

impl PayerEndpoint {
    /// Base URL with a trailing `/`, so relative joins keep the last path segment.
    pub fn normalized_base_url(&self) -> Result<Url> {
        normalize_base_url(&self.base_url)
            .with_context(|| format!("Invalid FHIR base URL for payer {}", self.stub))
    }
}

pub fn normalize_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("FHIR base URL is empty");
    }
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash).with_context(|| format!("Failed parsing FHIR base URL {trimmed}"))
}

pub fn load_payer_endpoints(path: &Path) -> Result<Vec<PayerEndpoint>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed opening payer endpoint list {}", path.display()))?;
    let mut payers = Vec::new();
    for (idx, row) in reader.deserialize::<PayerEndpoint>().enumerate() {
        let payer = row.with_context(|| {
            format!(
                "Failed reading payer endpoint row {} of {}",
                idx + 1,
                path.display()
            )
        })?;
        payers.push(payer);
    }
    Ok(payers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn base_url_gains_trailing_slash() {
        let url = normalize_base_url("https://x.org/fhir").unwrap();
        assert_eq!(url.as_str(), "https://x.org/fhir/");
        assert_eq!(
            url.join("PractitionerRole?_count=100").unwrap().as_str(),
            "https://x.org/fhir/PractitionerRole?_count=100"
        );
    }

    #[test]
    fn base_url_with_slash_is_unchanged() {
        let url = normalize_base_url(" https://x.org/fhir/ ").unwrap();
        assert_eq!(url.as_str(), "https://x.org/fhir/");
    }

    #[test]
    fn empty_base_url_is_rejected() {
        assert!(normalize_base_url("   ").is_err());
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn loads_payer_rows_with_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("good_payer_endpoints.csv");
        fs::write(
            &path,
            "payer_name,payer_stub,payer_provider_directory_fhir_url,notes\n\
             Acme Health,acme,https://fhir.acme.test/r4,ok\n\
             Zenith Care,zenith,https://zenith.test/fhir/,\n",
        )
        .unwrap();

        let payers = load_payer_endpoints(&path).unwrap();
        assert_eq!(payers.len(), 2);
        assert_eq!(payers[0].name, "Acme Health");
        assert_eq!(payers[0].stub, "acme");
        assert_eq!(
            payers[1].normalized_base_url().unwrap().as_str(),
            "https://zenith.test/fhir/"
        );
    }

    #[test]
    fn missing_payer_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_payer_endpoints(&dir.path().join("nope.csv")).unwrap_err();
        assert!(format!("{err:#}").contains("Failed opening payer endpoint list"));
    }
}
