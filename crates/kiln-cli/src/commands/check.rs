//! `kiln check`: configuration sanity check

use anyhow::{bail, Result};
use kiln_gen::KilnConfig;

pub fn run(include_storage: bool) -> Result<()> {
    let config = KilnConfig::load()?;

    println!("Provider: {}", config.provider_kind());
    let missing = config.missing_required(include_storage);
    if missing.is_empty() {
        println!("  Credentials: configured");
        if include_storage {
            println!(
                "  Storage: {} ({})",
                config.storage.bucket.as_deref().unwrap_or_default(),
                config.storage.region.as_deref().unwrap_or_default()
            );
            println!("  Upload prefix: {}", config.upload_prefix());
        }
        return Ok(());
    }

    println!("  Missing: {}\n", missing.join(", "));
    println!("{}", KilnConfig::setup_help());
    bail!("{} required setting(s) missing", missing.len())
}
