use utoipa::OpenApi;
use vpe_api::router::ApiDoc;

/// Generates the OpenAPI document and writes it to a file.
fn write_openapi_document(
    api_doc: utoipa::openapi::OpenApi,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = api_doc.to_pretty_json()?;
    std::fs::write(path, json)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    write_openapi_document(ApiDoc::openapi(), "openapi.json")?;
    Ok(())
}
