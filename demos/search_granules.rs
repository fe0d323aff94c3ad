use anyhow::Result;
use earthdata::{CatalogQuery, Client, CollectionQuery, LinkKind};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Example program that calls the library API.
    // Configure the login via env vars, `~/.netrc` or the terminal prompt.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = Client::from_env()?;

    for c in client.collections(&CollectionQuery::for_project("LPCLOUD", "ECOSTRESS"))? {
        println!(
            "{} {} v{}",
            c.concept_id,
            c.short_name.as_deref().unwrap_or("-"),
            c.version.as_deref().unwrap_or("-")
        );
    }

    let query = CatalogQuery::new("C2076090826-LPCLOUD")
        .bounding_box("-120.45,34.51,-120.40,34.53")?
        .temporal("2022-12-01T00:00:00Z,2022-12-07T23:59:59Z")?;

    let granules = client.search(&query)?;
    for g in &granules {
        println!("{} {} .. {}", g.id, g.time_start, g.time_end);
        for href in g.links_for(LinkKind::S3) {
            println!("  {href}");
        }
    }

    if !granules.is_empty() {
        let creds = client.provider_credentials("lpdaac")?;
        println!("lpdaac credentials expire at {}", creds.expiration);
    }
    Ok(())
}
