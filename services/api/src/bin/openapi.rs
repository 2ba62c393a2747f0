//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI 3 document of the REST API, `openapi.json` by default.

use api_lib::web::rest::ApiDoc;
use clap::Parser;
use std::path::{Path, PathBuf};
use utoipa::OpenApi;

#[derive(Parser)]
#[command(about = "Generate the Sprachwelt OpenAPI document")]
struct Args {
    /// Output file.
    #[arg(default_value = "openapi.json")]
    output: PathBuf,
}

/// Generates the OpenAPI specification and writes it to a file.
fn generate_spec(
    api_doc: utoipa::openapi::OpenApi,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let spec_json = api_doc.to_pretty_json()?;
    std::fs::write(path, spec_json)?;
    println!("OpenAPI specification written to {}", path.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    generate_spec(ApiDoc::openapi(), &args.output)
}
