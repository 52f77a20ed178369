pub const FHIR_JSON_MEDIA_TYPE: &str = "application/fhir+json";
pub const PRIMARY_COLLECTION: &str = "PractitionerRole";
pub const NETWORK_REFERENCE_EXTENSION_URL: &str =
    "http://hl7.org/fhir/us/davinci-pdex-plan-net/StructureDefinition/network-reference";

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_TEST_LIMIT: usize = 100;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

pub const DEFAULT_PAYERS_CSV: &str = "good_payer_endpoints.csv";
pub const DEFAULT_OUTPUT_DIR: &str = "payer_slurp_results";
pub const DEFAULT_TEST_OUTPUT_DIR: &str = "payer_slurp_test_results";

pub const USER_AGENT: &str = "payer-network-slurp/0.1";
