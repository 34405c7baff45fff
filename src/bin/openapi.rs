use anyhow::Result;

/// Print the OpenAPI document for the HTTP surface.
fn main() -> Result<()> {
    let spec = vestibule::api::openapi();
    println!("{}", spec.to_pretty_json()?);
    Ok(())
}
