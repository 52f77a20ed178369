pub mod args;
pub mod common;
pub mod constants;
pub mod crawl;
pub mod extract;
pub mod fetch;
pub mod fhir;
pub mod paginate;
pub mod payers;
pub mod resolve;
pub mod run;
pub mod tables;
