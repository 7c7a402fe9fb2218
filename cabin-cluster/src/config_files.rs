//! Per-member configuration files for the server under test.

use cabin_core::{ClusterSpec, HarnessConfig, MemberIdentity, Result};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};

/// File name of a member's config, relative to the working directory.
pub fn config_file_name(config: &HarnessConfig, member: &MemberIdentity) -> String {
    format!("{}-{}.conf", config.config_prefix, member.id)
}

pub fn render_member_config(
    cluster: &ClusterSpec,
    config: &HarnessConfig,
    member: &MemberIdentity,
    extra: Option<&str>,
) -> String {
    let mut text = format!(
        "serverId = {}\nlistenAddresses = {}\nclusterUUID = {}\nsnapshotMinLogSize = {}\n\n",
        member.id,
        member.address,
        cluster.cluster_uuid(),
        config.snapshot_min_log_size
    );
    if let Some(extra) = extra {
        text.push_str(extra);
    }
    text
}

/// Writes one config file per member and returns their paths.
///
/// A configured extra config that does not exist is skipped with a warning.
pub async fn write_member_configs(
    cluster: &ClusterSpec,
    config: &HarnessConfig,
) -> Result<Vec<PathBuf>> {
    let extra = match &config.extra_config {
        Some(path) => match fs::read_to_string(config.work_dir.join(path)).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Skipping extra config {}: {}", path.display(), e);
                None
            }
        },
        None => None,
    };

    let mut written = Vec::with_capacity(cluster.total_members());
    for member in cluster.members() {
        let path = config.work_dir.join(config_file_name(config, member));
        let text = render_member_config(cluster, config, member, extra.as_deref());
        fs::write(&path, text).await?;
        debug!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

pub async fn remove_member_configs(cluster: &ClusterSpec, config: &HarnessConfig) -> Result<()> {
    for member in cluster.members() {
        let path = config.work_dir.join(config_file_name(config, member));
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
