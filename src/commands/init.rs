//! Init command: write sample config, sites list and credentials template.

use std::path::Path;

use anyhow::{Context, Result};
use sharepoint_backup::config::write_sample_config;
use sharepoint_backup::graph::write_template;
use sharepoint_backup::sites::write_sample_sites;

/// Credentials file name the template is derived from.
const CREDENTIALS_FILE: &str = "credentials.txt";

pub(crate) fn run_init_command(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory '{}'", dir.display()))?;

    let written = [
        write_sample_config(dir).context("Failed to write sample config")?,
        write_sample_sites(dir).context("Failed to write sample sites list")?,
        write_template(&dir.join(CREDENTIALS_FILE))
            .context("Failed to write credentials template")?,
    ];

    println!("Created sample files:");
    for path in &written {
        println!("  {}", path.display());
    }
    println!();
    println!("Next steps:");
    println!("  1. Copy each file without its .sample/.template suffix and edit it");
    println!("  2. Register an app with Files.Read.All and Sites.Read.All permissions");
    println!("  3. Run: sharepoint-backup run");
    Ok(())
}
