use tracing::info;

use crate::error::Result;
use crate::session::Session;
use crate::version::{group_versions, version_source, VersionLister};

/// `<command>:?`: prints the available versions grouped by major.minor.
pub async fn execute(session: &Session, command: &str) -> Result<()> {
    let project = session.load_catalog()?;
    let source = version_source(command, &project.resolve_command(command))?;

    let lister = VersionLister::new(&session.env)?;
    let mut raw_versions = lister.list(&source).await?;
    raw_versions.sort();
    raw_versions.dedup();
    info!("Raw versions:\n{}", raw_versions.join("\n"));

    for line in group_versions(command, &raw_versions)? {
        println!("{}", line);
    }
    Ok(())
}
