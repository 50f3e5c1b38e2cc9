// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The operations plans are made of

use plan::{OpId, Operation, Outcome};
use tracing::{debug, info};

use crate::context::{ConfFile, UpdateContext};
use crate::errors::UpdateError;
use crate::planner::{devices, dhcp, firewall, haproxy, network, state, traffic, wifi};

/// An operation of an update. Operations carry their arguments so that two plans doing the
/// same thing compare equal and run once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    SecurityCheck,
    LoadHostConfig,
    GetNetworkConfig,
    GetWirelessConfig,
    GetFirewallConfig,
    GetDhcpConfig,
    GetTrafficConfig,
    GetHostSections,
    SetUci(ConfFile),
    RestoreUci(ConfFile),
    Reload(ConfFile),
    SetHostConfig,
    RestoreHostConfig,
    ReleaseNewResources,
    PrepareImage { service: String },
    RemoveImage { service: String },
    StopContainers,
    StartOldContainers,
    RemoveOldContainers,
    StartContainers,
    RemoveNewContainers,
    Haproxy { with_update: bool },
    CleanupOldImages,
    SaveState,
    ReleaseChuteResources,
}

fn reload_id(file: ConfFile) -> OpId {
    match file {
        ConfFile::Network => "reload_network",
        ConfFile::Wireless => "reload_wireless",
        ConfFile::Firewall => "reload_firewall",
        ConfFile::Dhcp => "reload_dhcp",
        ConfFile::Qos => "reload_qos",
    }
}

impl Operation for Op {
    type Context = UpdateContext;
    type Error = UpdateError;

    fn id(&self) -> OpId {
        match self {
            Op::SecurityCheck => "security_check",
            Op::LoadHostConfig => "load_host_config",
            Op::GetNetworkConfig => "get_network_config",
            Op::GetWirelessConfig => "get_wireless_config",
            Op::GetFirewallConfig => "get_firewall_config",
            Op::GetDhcpConfig => "get_dhcp_config",
            Op::GetTrafficConfig => "get_traffic_config",
            Op::GetHostSections => "get_host_sections",
            Op::SetUci(ConfFile::Network) => "set_network",
            Op::SetUci(ConfFile::Wireless) => "set_wireless",
            Op::SetUci(ConfFile::Firewall) => "set_firewall",
            Op::SetUci(ConfFile::Dhcp) => "set_dhcp",
            Op::SetUci(ConfFile::Qos) => "set_qos",
            Op::RestoreUci(_) => "restore_uci",
            Op::Reload(file) => reload_id(*file),
            Op::SetHostConfig => "set_host_config",
            Op::RestoreHostConfig => "restore_host_config",
            Op::ReleaseNewResources => "release_new_resources",
            Op::PrepareImage { .. } => "prepare_image",
            Op::RemoveImage { .. } => "remove_image",
            Op::StopContainers => "stop_containers",
            Op::StartOldContainers => "start_old_containers",
            Op::RemoveOldContainers => "remove_old_containers",
            Op::StartContainers => "start_containers",
            Op::RemoveNewContainers => "remove_new_containers",
            Op::Haproxy { .. } => "haproxy",
            Op::CleanupOldImages => "cleanup_old_images",
            Op::SaveState => "save_state",
            Op::ReleaseChuteResources => "release_chute_resources",
        }
    }

    async fn run(&self, ctx: &mut UpdateContext) -> Result<Outcome, UpdateError> {
        debug!("Running {self:?} for {}", ctx.name);
        match self {
            Op::SecurityCheck => state::security_check(ctx)?,
            Op::LoadHostConfig => devices::load_host_config(ctx)?,
            Op::GetNetworkConfig => network::get_network_config(ctx)?,
            Op::GetWirelessConfig => wifi::get_wireless_config(ctx)?,
            Op::GetFirewallConfig => firewall::get_firewall_config(ctx)?,
            Op::GetDhcpConfig => dhcp::get_dhcp_config(ctx)?,
            Op::GetTrafficConfig => traffic::get_traffic_config(ctx)?,
            Op::GetHostSections => devices::get_host_sections(ctx).await?,
            Op::SetUci(file) => return set_uci(ctx, *file),
            Op::RestoreUci(file) => restore_uci(ctx, *file)?,
            Op::Reload(file) => reload(ctx, *file).await?,
            Op::SetHostConfig => devices::set_host_config(ctx)?,
            Op::RestoreHostConfig => devices::restore_host_config(ctx)?,
            Op::ReleaseNewResources => release_new_resources(ctx),
            Op::PrepareImage { service } => state::prepare_image(ctx, service).await?,
            Op::RemoveImage { service } => state::remove_image(ctx, service).await,
            Op::StopContainers => state::stop_containers(ctx).await?,
            Op::StartOldContainers => state::start_old_containers(ctx).await?,
            Op::RemoveOldContainers => state::remove_old_containers(ctx).await?,
            Op::StartContainers => state::start_containers(ctx).await?,
            Op::RemoveNewContainers => state::remove_new_containers(ctx).await?,
            Op::Haproxy { with_update } => haproxy::reconfigure(ctx, *with_update).await?,
            Op::CleanupOldImages => state::cleanup_old_images(ctx).await,
            Op::SaveState => state::save_state(ctx)?,
            Op::ReleaseChuteResources => state::release_chute_resources(ctx),
        }
        Ok(Outcome::Continue)
    }
}

/// Write the owner's sections of `file`. An unchanged file needs no reload.
fn set_uci(ctx: &mut UpdateContext, file: ConfFile) -> Result<Outcome, UpdateError> {
    let name = file.as_ref();
    if !ctx.snapshots.contains_key(&file) {
        let before = ctx.env.uci.read(name)?;
        ctx.snapshots.insert(file, before);
    }
    let sections = ctx.sections.get(&file).cloned().unwrap_or_default();
    let owner = ctx.owner().to_string();
    if ctx.env.uci.set_owner_sections(name, &owner, sections)? {
        info!("Updated {name} sections of {owner}");
        Ok(Outcome::Continue)
    } else {
        debug!("Sections of {owner} in {name} are unchanged");
        Ok(Outcome::Skip(vec![reload_id(file)]))
    }
}

fn restore_uci(ctx: &mut UpdateContext, file: ConfFile) -> Result<(), UpdateError> {
    if let Some(snapshot) = ctx.snapshots.get(&file) {
        debug!("Restoring {file}");
        ctx.env
            .uci
            .restore(&[(file.to_string(), snapshot.clone())])?;
    }
    Ok(())
}

/// Have confd apply the files, then fail if a section of the owner in `file` did not apply
async fn reload(ctx: &mut UpdateContext, file: ConfFile) -> Result<(), UpdateError> {
    ctx.env.confd.load().await?;
    let failed = ctx
        .env
        .confd
        .failures_of(ctx.owner())
        .await
        .into_iter()
        .find(|status| status.file == file.as_ref());
    match failed {
        Some(status) => Err(UpdateError::SectionFailed {
            file: status.file,
            section: format!("{} '{}'", status.kind, status.name),
            reason: status.error.unwrap_or_default(),
        }),
        None => Ok(()),
    }
}

fn release_new_resources(ctx: &mut UpdateContext) {
    for allocation in std::mem::take(&mut ctx.allocations) {
        debug!("Releasing {allocation:?}");
        ctx.pools.release(allocation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_ids_are_distinct() {
        let ids: std::collections::BTreeSet<OpId> =
            ConfFile::ALL.iter().map(|f| Op::Reload(*f).id()).collect();
        assert_eq!(ids.len(), ConfFile::ALL.len());
        assert_eq!(Op::Reload(ConfFile::Firewall).id(), "reload_firewall");
    }

    #[test]
    fn operations_compare_by_arguments() {
        let a = Op::PrepareImage {
            service: "main".to_string(),
        };
        assert_eq!(a.clone(), a);
        assert_ne!(
            a,
            Op::PrepareImage {
                service: "db".to_string()
            }
        );
        assert_eq!(a.id(), "prepare_image");
    }
}
