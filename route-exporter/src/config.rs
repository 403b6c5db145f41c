// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The raw configuration surface and its validation into typed settings.

use derive_builder::Builder;
use net::interface::{InterfaceName, InterfaceNameError};
use net::route::{AddressFamily, RouteProtocolId, RouteProtocolIdError, RouteTableId};
use route_manager::route::RoutePartition;
use route_manager::vrf::VrfSpec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The raw, option-shaped configuration of the route exporters.
///
/// Zero means "unset" for the numeric fields, mirroring how the options
/// arrive from the configuration surface. [`ExporterSettings::validate`]
/// turns this into typed settings or fails startup.
#[derive(Builder, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[builder(default)]
pub struct RouteExporterConfig {
    /// Enable the pod-CIDR exporter.
    pub export_pod_cidr: bool,
    /// The VRF device the pod-CIDR exporter installs routes through.
    pub pod_cidr_vrf_name: Option<String>,
    /// The route table the pod-CIDR exporter owns.
    pub pod_cidr_table_id: u32,
    /// The protocol id the pod-CIDR exporter stamps on its routes.
    pub pod_cidr_protocol_id: u8,
    /// Enable the LB-VIP exporter.
    pub export_lb_vip: bool,
    /// The VRF device the LB-VIP exporter installs routes through.
    pub lb_vip_vrf_name: Option<String>,
    /// The route table the LB-VIP exporter owns.
    pub lb_vip_table_id: u32,
    /// The protocol id the LB-VIP exporter stamps on its routes.
    pub lb_vip_protocol_id: u8,
    /// The address families listed when diffing. Empty means both.
    pub address_families: Vec<AddressFamily>,
}

/// Which exporter a configuration error is about.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Concern {
    /// The pod-CIDR exporter.
    PodCidr,
    /// The LB-VIP exporter.
    LbVip,
}

impl std::fmt::Display for Concern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Concern::PodCidr => write!(f, "pod-CIDR"),
            Concern::LbVip => write!(f, "LB-VIP"),
        }
    }
}

/// Why a configuration failed validation. All of these abort startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An enabled exporter has no VRF name.
    #[error("no VRF name specified for the {0} exporter")]
    MissingVrfName(Concern),

    /// An enabled exporter's VRF name does not validate.
    #[error("invalid VRF name for the {0} exporter")]
    InvalidVrfName(Concern, #[source] InterfaceNameError),

    /// An enabled exporter has no table id.
    #[error("no table ID specified for the {0} exporter")]
    MissingTableId(Concern),

    /// An enabled exporter has no protocol id.
    #[error("no protocol ID specified for the {0} exporter")]
    MissingProtocolId(Concern),

    /// An enabled exporter's protocol id falls in the reserved range.
    #[error("invalid protocol ID for the {0} exporter")]
    ReservedProtocolId(Concern, #[source] RouteProtocolIdError),

    /// Both exporters claim the same `{table, protocol}` partition.
    #[error("the pod-CIDR and LB-VIP exporters share {0}")]
    PartitionCollision(RoutePartition),
}

/// One exporter's identity: the VRF it routes through and the partition
/// it owns.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExportTarget {
    /// The VRF device routes are installed through.
    pub vrf_name: InterfaceName,
    /// The `{table, protocol}` pair this exporter owns.
    pub partition: RoutePartition,
}

impl ExportTarget {
    /// The VRF device requirement of this target.
    #[must_use]
    pub fn vrf_spec(&self) -> VrfSpec {
        VrfSpec {
            name: self.vrf_name.clone(),
            table_id: self.partition.table,
        }
    }
}

/// Validated exporter settings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExporterSettings {
    /// The pod-CIDR exporter's identity, when enabled.
    pub pod_cidr: Option<ExportTarget>,
    /// The LB-VIP exporter's identity, when enabled.
    pub lb_vip: Option<ExportTarget>,
    /// The address families listed when diffing.
    pub address_families: Vec<AddressFamily>,
}

fn validate_target(
    concern: Concern,
    vrf_name: Option<&String>,
    table_id: u32,
    protocol_id: u8,
) -> Result<ExportTarget, ConfigError> {
    let name = vrf_name.ok_or(ConfigError::MissingVrfName(concern))?;
    let vrf_name = InterfaceName::try_new(name.clone())
        .map_err(|err| ConfigError::InvalidVrfName(concern, err))?;
    let table =
        RouteTableId::try_from(table_id).map_err(|_| ConfigError::MissingTableId(concern))?;
    if protocol_id == 0 {
        return Err(ConfigError::MissingProtocolId(concern));
    }
    let protocol = RouteProtocolId::try_new(protocol_id)
        .map_err(|err| ConfigError::ReservedProtocolId(concern, err))?;
    Ok(ExportTarget {
        vrf_name,
        partition: RoutePartition { table, protocol },
    })
}

impl ExporterSettings {
    /// Validate a raw configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found; any error here is fatal
    /// for startup.
    pub fn validate(config: &RouteExporterConfig) -> Result<ExporterSettings, ConfigError> {
        let pod_cidr = config
            .export_pod_cidr
            .then(|| {
                validate_target(
                    Concern::PodCidr,
                    config.pod_cidr_vrf_name.as_ref(),
                    config.pod_cidr_table_id,
                    config.pod_cidr_protocol_id,
                )
            })
            .transpose()?;

        // the LB protocol id is validated on its own, never through the
        // pod-CIDR exporter's fields
        let lb_vip = config
            .export_lb_vip
            .then(|| {
                validate_target(
                    Concern::LbVip,
                    config.lb_vip_vrf_name.as_ref(),
                    config.lb_vip_table_id,
                    config.lb_vip_protocol_id,
                )
            })
            .transpose()?;

        if let (Some(pod_cidr), Some(lb_vip)) = (&pod_cidr, &lb_vip) {
            if pod_cidr.partition == lb_vip.partition {
                return Err(ConfigError::PartitionCollision(pod_cidr.partition));
            }
        }

        let address_families = if config.address_families.is_empty() {
            vec![AddressFamily::Ipv4, AddressFamily::Ipv6]
        } else {
            config.address_families.clone()
        };

        Ok(ExporterSettings {
            pod_cidr,
            lb_vip,
            address_families,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn pod_cidr_config() -> RouteExporterConfig {
        RouteExporterConfigBuilder::default()
            .export_pod_cidr(true)
            .pod_cidr_vrf_name(Some("vrf-pod".to_string()))
            .pod_cidr_table_id(100u32)
            .pod_cidr_protocol_id(201u8)
            .build()
            .unwrap_or_default()
    }

    #[test]
    fn disabled_exporters_need_no_identity() {
        let settings = ExporterSettings::validate(&RouteExporterConfig::default()).unwrap();
        assert_eq!(settings.pod_cidr, None);
        assert_eq!(settings.lb_vip, None);
        assert_eq!(
            settings.address_families,
            vec![AddressFamily::Ipv4, AddressFamily::Ipv6]
        );
    }

    #[test]
    fn valid_pod_cidr_config_passes() {
        let settings = ExporterSettings::validate(&pod_cidr_config()).unwrap();
        let target = settings.pod_cidr.unwrap();
        assert_eq!(target.vrf_name.as_ref(), "vrf-pod");
        assert_eq!(target.partition.table.to_u32(), 100);
        assert_eq!(target.partition.protocol.to_u8(), 201);
    }

    #[test]
    fn missing_fields_are_fatal() {
        let mut config = pod_cidr_config();
        config.pod_cidr_vrf_name = None;
        assert!(matches!(
            ExporterSettings::validate(&config),
            Err(ConfigError::MissingVrfName(Concern::PodCidr))
        ));

        let mut config = pod_cidr_config();
        config.pod_cidr_table_id = 0;
        assert!(matches!(
            ExporterSettings::validate(&config),
            Err(ConfigError::MissingTableId(Concern::PodCidr))
        ));

        let mut config = pod_cidr_config();
        config.pod_cidr_protocol_id = 0;
        assert!(matches!(
            ExporterSettings::validate(&config),
            Err(ConfigError::MissingProtocolId(Concern::PodCidr))
        ));
    }

    #[test]
    fn reserved_protocol_ids_are_fatal() {
        let mut config = pod_cidr_config();
        config.pod_cidr_protocol_id = 3; // below the kernel-reserved threshold
        assert!(matches!(
            ExporterSettings::validate(&config),
            Err(ConfigError::ReservedProtocolId(Concern::PodCidr, _))
        ));
    }

    #[test]
    fn lb_vip_protocol_is_validated_independently() {
        // a valid pod-CIDR protocol must not mask a bad LB protocol
        let mut config = pod_cidr_config();
        config.export_lb_vip = true;
        config.lb_vip_vrf_name = Some("vrf-lb".to_string());
        config.lb_vip_table_id = 101;
        config.lb_vip_protocol_id = 2;
        assert!(matches!(
            ExporterSettings::validate(&config),
            Err(ConfigError::ReservedProtocolId(Concern::LbVip, _))
        ));
    }

    #[test]
    fn partition_collisions_are_fatal() {
        let mut config = pod_cidr_config();
        config.export_lb_vip = true;
        config.lb_vip_vrf_name = Some("vrf-lb".to_string());
        config.lb_vip_table_id = config.pod_cidr_table_id;
        config.lb_vip_protocol_id = config.pod_cidr_protocol_id;
        assert!(matches!(
            ExporterSettings::validate(&config),
            Err(ConfigError::PartitionCollision(_))
        ));

        // same table with distinct protocols is a legal partitioning
        config.lb_vip_protocol_id = 202;
        let settings = ExporterSettings::validate(&config).unwrap();
        assert!(settings.lb_vip.is_some());
    }
}
