use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::warn;

use crate::common::{backup_path_for, delete_if_exists, tmp_path_for};

/// A row type of one output table. `HEADER` lists the columns in field order.
pub trait TableRow: Serialize {
    const FILE_NAME: &'static str;
    const HEADER: &'static [&'static str];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrgToPrRow {
    pub practitioner_role_fhir_url: String,
    pub organization_fhir_url: String,
    pub organization_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrgRow {
    pub organization_fhir_url: String,
    pub name: String,
    #[serde(rename = "type")]
    pub org_type: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationToPrRow {
    pub practitioner_role_fhir_url: String,
    pub location_fhir_url: String,
    pub location_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationRow {
    pub location_fhir_url: String,
    pub name: String,
    pub status: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PToPrRow {
    pub practitioner_role_fhir_url: String,
    pub practitioner_fhir_url: String,
    pub practitioner_reference: String,
    pub npi: String,
    pub is_npi_invalid: String,
    pub family_name: String,
    pub given_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecToPrRow {
    pub practitioner_role_fhir_url: String,
    pub specialty_code: String,
    pub specialty_display: String,
    pub specialty_system: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeleToPrRow {
    pub practitioner_role_fhir_url: String,
    pub telecom_system: String,
    pub telecom_value: String,
    pub telecom_use: String,
}

impl TableRow for OrgToPrRow {
    const FILE_NAME: &'static str = "org_to_pr.csv";
    const HEADER: &'static [&'static str] = &[
        "practitioner_role_fhir_url",
        "organization_fhir_url",
        "organization_reference",
    ];
}

impl TableRow for OrgRow {
    const FILE_NAME: &'static str = "org.csv";
    const HEADER: &'static [&'static str] = &["organization_fhir_url", "name", "type", "address"];
}

impl TableRow for LocationToPrRow {
    const FILE_NAME: &'static str = "location_to_pr.csv";
    const HEADER: &'static [&'static str] = &[
        "practitioner_role_fhir_url",
        "location_fhir_url",
        "location_reference",
    ];
}

impl TableRow for LocationRow {
    const FILE_NAME: &'static str = "location.csv";
    const HEADER: &'static [&'static str] = &["location_fhir_url", "name", "status", "address"];
}

impl TableRow for PToPrRow {
    const FILE_NAME: &'static str = "p_to_pr.csv";
    const HEADER: &'static [&'static str] = &[
        "practitioner_role_fhir_url",
        "practitioner_fhir_url",
        "practitioner_reference",
        "npi",
        "is_npi_invalid",
        "family_name",
        "given_name",
    ];
}

impl TableRow for SpecToPrRow {
    const FILE_NAME: &'static str = "spec_to_pr.csv";
    const HEADER: &'static [&'static str] = &[
        "practitioner_role_fhir_url",
        "specialty_code",
        "specialty_display",
        "specialty_system",
    ];
}

impl TableRow for TeleToPrRow {
    const FILE_NAME: &'static str = "tele_to_pr.csv";
    const HEADER: &'static [&'static str] = &[
        "practitioner_role_fhir_url",
        "telecom_system",
        "telecom_value",
        "telecom_use",
    ];
}

/// All rows produced for one payer.
#[derive(Debug, Default)]
pub struct PayerTables {
    pub org_to_pr: Vec<OrgToPrRow>,
    pub org: Vec<OrgRow>,
    pub location_to_pr: Vec<LocationToPrRow>,
    pub location: Vec<LocationRow>,
    pub p_to_pr: Vec<PToPrRow>,
    pub spec_to_pr: Vec<SpecToPrRow>,
    pub tele_to_pr: Vec<TeleToPrRow>,
}

pub const TABLE_FILE_NAMES: [&str; 7] = [
    OrgToPrRow::FILE_NAME,
    OrgRow::FILE_NAME,
    LocationToPrRow::FILE_NAME,
    LocationRow::FILE_NAME,
    PToPrRow::FILE_NAME,
    SpecToPrRow::FILE_NAME,
    TeleToPrRow::FILE_NAME,
];

impl PayerTables {
    /// Replaces the payer's output files. Every table is first written to a
    /// `.tmp` sibling; the renames only start once all of them are flushed.
    /// The previous tables are moved to `.bak` siblings first and put back if
    /// any rename fails, so the directory never mixes two runs.
    pub fn write_all(&self, output_dir: &Path) -> Result<()> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed creating {}", output_dir.display()))?;

        let staged = [
            write_staged_table(output_dir, &self.org_to_pr),
            write_staged_table(output_dir, &self.org),
            write_staged_table(output_dir, &self.location_to_pr),
            write_staged_table(output_dir, &self.location),
            write_staged_table(output_dir, &self.p_to_pr),
            write_staged_table(output_dir, &self.spec_to_pr),
            write_staged_table(output_dir, &self.tele_to_pr),
        ];
        if staged.iter().any(Result::is_err) {
            for file_name in TABLE_FILE_NAMES {
                let _ = delete_if_exists(&tmp_path_for(&output_dir.join(file_name)));
            }
        }
        let staged = staged.into_iter().collect::<Result<Vec<_>>>()?;

        install_staged(&staged)
    }
}

fn install_staged(staged: &[(PathBuf, PathBuf)]) -> Result<()> {
    let mut set_aside = Vec::new();
    let mut installed = Vec::new();
    let Err(err) = move_aside_and_install(staged, &mut set_aside, &mut installed) else {
        for (backup_path, _) in &set_aside {
            delete_if_exists(backup_path)?;
        }
        return Ok(());
    };

    for output_path in &installed {
        if !set_aside.iter().any(|(_, previous)| previous == output_path) {
            let _ = delete_if_exists(output_path);
        }
    }
    for (backup_path, output_path) in &set_aside {
        if let Err(restore_err) = fs::rename(backup_path, output_path) {
            warn!(
                backup = %backup_path.display(),
                error = %restore_err,
                "failed restoring previous table"
            );
        }
    }
    for (tmp_path, _) in staged {
        let _ = delete_if_exists(tmp_path);
    }
    Err(err)
}

fn move_aside_and_install(
    staged: &[(PathBuf, PathBuf)],
    set_aside: &mut Vec<(PathBuf, PathBuf)>,
    installed: &mut Vec<PathBuf>,
) -> Result<()> {
    for (_, output_path) in staged {
        if output_path.exists() {
            let backup_path = backup_path_for(output_path);
            delete_if_exists(&backup_path)?;
            fs::rename(output_path, &backup_path).with_context(|| {
                format!(
                    "Failed moving {} to {}",
                    output_path.display(),
                    backup_path.display()
                )
            })?;
            set_aside.push((backup_path, output_path.clone()));
        }
    }
    for (tmp_path, output_path) in staged {
        fs::rename(tmp_path, output_path).with_context(|| {
            format!(
                "Failed moving {} to {}",
                tmp_path.display(),
                output_path.display()
            )
        })?;
        installed.push(output_path.clone());
    }
    Ok(())
}

fn write_staged_table<R: TableRow>(output_dir: &Path, rows: &[R]) -> Result<(PathBuf, PathBuf)> {
    let output_path = output_dir.join(R::FILE_NAME);
    let tmp_path = tmp_path_for(&output_path);
    delete_if_exists(&tmp_path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(&tmp_path)
        .with_context(|| format!("Failed creating {}", tmp_path.display()))?;
    writer
        .write_record(R::HEADER)
        .with_context(|| format!("Failed writing {} header", R::FILE_NAME))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Failed writing {} row", R::FILE_NAME))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed flushing {}", tmp_path.display()))?;
    Ok((tmp_path, output_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serde_header<R: TableRow>(row: &R) -> Vec<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(row).unwrap();
        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        text.lines()
            .next()
            .unwrap()
            .split(',')
            .map(ToOwned::to_owned)
            .collect()
    }

    fn read_csv(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(ToOwned::to_owned).collect())
            .collect()
    }

    fn org_row(id: &str) -> OrgRow {
        OrgRow {
            organization_fhir_url: format!("https://x.org/fhir/Organization/{id}"),
            name: format!("Org {id}"),
            org_type: "prov".to_string(),
            address: "1 Main St, Springfield, IL".to_string(),
        }
    }

    #[test]
    fn declared_headers_match_row_fields() {
        let s = String::new;
        assert_eq!(
            serde_header(&OrgToPrRow {
                practitioner_role_fhir_url: s(),
                organization_fhir_url: s(),
                organization_reference: s(),
            }),
            OrgToPrRow::HEADER
        );
        assert_eq!(serde_header(&org_row("1")), OrgRow::HEADER);
        assert_eq!(
            serde_header(&LocationToPrRow {
                practitioner_role_fhir_url: s(),
                location_fhir_url: s(),
                location_reference: s(),
            }),
            LocationToPrRow::HEADER
        );
        assert_eq!(
            serde_header(&LocationRow {
                location_fhir_url: s(),
                name: s(),
                status: s(),
                address: s(),
            }),
            LocationRow::HEADER
        );
        assert_eq!(
            serde_header(&PToPrRow {
                practitioner_role_fhir_url: s(),
                practitioner_fhir_url: s(),
                practitioner_reference: s(),
                npi: s(),
                is_npi_invalid: s(),
                family_name: s(),
                given_name: s(),
            }),
            PToPrRow::HEADER
        );
        assert_eq!(
            serde_header(&SpecToPrRow {
                practitioner_role_fhir_url: s(),
                specialty_code: s(),
                specialty_display: s(),
                specialty_system: s(),
            }),
            SpecToPrRow::HEADER
        );
        assert_eq!(
            serde_header(&TeleToPrRow {
                practitioner_role_fhir_url: s(),
                telecom_system: s(),
                telecom_value: s(),
                telecom_use: s(),
            }),
            TeleToPrRow::HEADER
        );
    }

    #[test]
    fn empty_tables_still_get_headers() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("acme");
        PayerTables::default().write_all(&out).unwrap();

        for file_name in TABLE_FILE_NAMES {
            let rows = read_csv(&out.join(file_name));
            assert_eq!(rows.len(), 1, "{file_name} should hold only its header");
            assert!(!out.join(format!("{file_name}.tmp")).exists());
        }
        assert_eq!(read_csv(&out.join("org.csv"))[0], OrgRow::HEADER);
    }

    #[test]
    fn rewrite_replaces_previous_rows() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("acme");

        let first = PayerTables {
            org: vec![org_row("1"), org_row("2"), org_row("3")],
            ..PayerTables::default()
        };
        first.write_all(&out).unwrap();
        assert_eq!(read_csv(&out.join("org.csv")).len(), 4);

        let second = PayerTables {
            org: vec![org_row("2")],
            ..PayerTables::default()
        };
        second.write_all(&out).unwrap();
        let rows = read_csv(&out.join("org.csv"));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], "https://x.org/fhir/Organization/2");
        assert_eq!(rows[1][3], "1 Main St, Springfield, IL");
    }

    #[test]
    fn successful_rewrite_leaves_no_backups() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("acme");
        PayerTables::default().write_all(&out).unwrap();
        PayerTables::default().write_all(&out).unwrap();

        for file_name in TABLE_FILE_NAMES {
            assert!(out.join(file_name).exists());
            assert!(!out.join(format!("{file_name}.bak")).exists());
        }
    }

    #[test]
    fn failed_replace_restores_every_previous_table() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("acme");
        let first = PayerTables {
            org: vec![org_row("1"), org_row("2"), org_row("3")],
            ..PayerTables::default()
        };
        first.write_all(&out).unwrap();

        // A directory where the last table's backup would go blocks the replace
        // after the earlier tables were already moved aside.
        let blocker = out.join("tele_to_pr.csv.bak");
        fs::create_dir_all(&blocker).unwrap();
        fs::write(blocker.join("keep"), "x").unwrap();

        let second = PayerTables {
            org: vec![org_row("9")],
            ..PayerTables::default()
        };
        assert!(second.write_all(&out).is_err());

        let rows = read_csv(&out.join("org.csv"));
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1][0], "https://x.org/fhir/Organization/1");
        for file_name in TABLE_FILE_NAMES {
            assert!(out.join(file_name).is_file(), "{file_name} missing after rollback");
            assert!(!out.join(format!("{file_name}.tmp")).exists());
            if file_name != "tele_to_pr.csv" {
                assert!(!out.join(format!("{file_name}.bak")).exists());
            }
        }
    }
}
