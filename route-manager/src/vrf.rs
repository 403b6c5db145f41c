// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Reconcile the intended set of VRF devices with the kernel's links.

use crate::{KernelError, Manager};
use derive_builder::Builder;
use futures::TryStreamExt;
use multi_index_map::MultiIndexMap;
use net::interface::{AdminState, InterfaceIndex, InterfaceName};
use net::route::RouteTableId;
use rekon::{AsRequirement, Create, Observe, Op, Reconcile, Remove, Update};
use rtnetlink::packet_route::link::{
    InfoData, InfoKind, InfoVrf, LinkAttribute, LinkFlags, LinkInfo, LinkMessage,
};
use rtnetlink::{LinkUnspec, LinkVrf};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The planned properties of a VRF device.
#[derive(
    Builder,
    Clone,
    Debug,
    Eq,
    Hash,
    MultiIndexMap,
    Ord,
    PartialEq,
    PartialOrd,
    Deserialize,
    Serialize,
)]
#[multi_index_derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VrfSpec {
    /// The name of the VRF device.
    #[multi_index(hashed_unique)]
    pub name: InterfaceName,
    /// The route table the VRF device binds to.
    #[multi_index(ordered_non_unique)]
    pub table_id: RouteTableId,
}

/// A VRF device as observed in the kernel.
#[derive(
    Builder,
    Clone,
    Debug,
    Eq,
    Hash,
    MultiIndexMap,
    Ord,
    PartialEq,
    PartialOrd,
    Deserialize,
    Serialize,
)]
#[multi_index_derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VrfDevice {
    /// The name of the VRF device.
    #[multi_index(hashed_unique)]
    pub name: InterfaceName,
    /// The route table the VRF device binds to.
    #[multi_index(ordered_non_unique)]
    pub table_id: RouteTableId,
    /// The kernel interface index of the device.
    pub index: InterfaceIndex,
    /// Whether the device is administratively enabled.
    pub admin_state: AdminState,
}

impl AsRequirement<VrfSpec> for VrfDevice {
    type Requirement<'a>
        = VrfSpec
    where
        Self: 'a;

    fn as_requirement<'a>(&self) -> Self::Requirement<'a> {
        VrfSpec {
            name: self.name.clone(),
            table_id: self.table_id,
        }
    }
}

impl PartialEq<VrfDevice> for VrfSpec {
    fn eq(&self, other: &VrfDevice) -> bool {
        // a VRF that is administratively down still needs an update pass
        *self == other.as_requirement() && other.admin_state == AdminState::Up
    }
}

/// Why a link message could not be decoded as a [`VrfDevice`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VrfDecodeError {
    /// The link is not of kind `vrf`.
    #[error("link is not a VRF")]
    NotAVrf,
    /// The link message carried no interface name.
    #[error("link message carries no interface name")]
    MissingName,
    /// The interface name did not validate.
    #[error("link message carries an invalid interface name")]
    InvalidName,
    /// The VRF info carried no table id.
    #[error("VRF link info carries no table id")]
    MissingTableId,
    /// The kernel reported a zero table id or interface index.
    #[error("link message carries a zero table id or interface index")]
    Zero,
}

impl VrfDevice {
    /// Decode a netlink link message into a [`VrfDevice`].
    ///
    /// # Errors
    ///
    /// Returns a [`VrfDecodeError`] for links that are not VRFs or carry
    /// incomplete VRF info.
    pub fn try_from_link_message(message: &LinkMessage) -> Result<VrfDevice, VrfDecodeError> {
        let index =
            InterfaceIndex::try_new(message.header.index).map_err(|_| VrfDecodeError::Zero)?;
        let admin_state = if message.header.flags.contains(LinkFlags::Up) {
            AdminState::Up
        } else {
            AdminState::Down
        };

        let mut name = None;
        let mut table_id = None;
        let mut is_vrf = false;
        for attribute in &message.attributes {
            match attribute {
                LinkAttribute::IfName(ifname) => name = Some(ifname.clone()),
                LinkAttribute::LinkInfo(infos) => {
                    for info in infos {
                        match info {
                            LinkInfo::Kind(InfoKind::Vrf) => is_vrf = true,
                            LinkInfo::Data(InfoData::Vrf(data)) => {
                                is_vrf = true;
                                for datum in data {
                                    if let InfoVrf::TableId(raw) = datum {
                                        table_id = Some(*raw);
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        if !is_vrf {
            return Err(VrfDecodeError::NotAVrf);
        }
        let name = name.ok_or(VrfDecodeError::MissingName)?;
        let name = InterfaceName::try_new(name).map_err(|_| VrfDecodeError::InvalidName)?;
        let table_id = table_id.ok_or(VrfDecodeError::MissingTableId)?;
        let table_id = RouteTableId::try_from(table_id).map_err(|_| VrfDecodeError::Zero)?;

        Ok(VrfDevice {
            name,
            table_id,
            index,
            admin_state,
        })
    }
}

impl Manager<VrfDevice> {
    /// Fetch the link with the given name, if any.
    async fn fetch_message(
        &self,
        name: &InterfaceName,
    ) -> Result<Option<LinkMessage>, KernelError> {
        let request = self
            .handle()
            .link()
            .get()
            .match_name(name.to_string())
            .execute();
        match request.try_collect::<Vec<_>>().await {
            Ok(mut messages) => Ok(messages.pop()),
            Err(err) => {
                let err = KernelError::from(err);
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Fetch the VRF device with the given name, if any.
    ///
    /// # Errors
    ///
    /// A link of the right name but the wrong kind is an invariant
    /// violation, not an absence.
    pub async fn fetch(&self, name: &InterfaceName) -> Result<Option<VrfDevice>, KernelError> {
        match self.fetch_message(name).await? {
            None => Ok(None),
            Some(message) => VrfDevice::try_from_link_message(&message)
                .map(Some)
                .map_err(|_| KernelError::NotAVrf(name.clone())),
        }
    }

    async fn set_admin_up(&self, index: InterfaceIndex) -> Result<(), KernelError> {
        self.handle()
            .link()
            .set(LinkUnspec::new_with_index(index.to_u32()).up().build())
            .execute()
            .await?;
        Ok(())
    }

    /// Make sure a VRF device exists per `spec`, is administratively up,
    /// and return its interface index.
    pub async fn ensure(&self, spec: &VrfSpec) -> Result<InterfaceIndex, KernelError> {
        let observed = self.fetch(&spec.name).await?;
        match self.reconcile(spec, observed.as_ref()).await {
            None => {}
            Some(Op::Create(outcome) | Op::Update(outcome) | Op::Remove(outcome)) => outcome?,
        }
        let device = self
            .fetch(&spec.name)
            .await?
            .ok_or_else(|| KernelError::Vanished(spec.name.clone()))?;
        if device.admin_state != AdminState::Up {
            self.set_admin_up(device.index).await?;
        }
        Ok(device.index)
    }

    /// Delete the VRF device with the given name. Absence is success.
    pub async fn delete(&self, name: &InterfaceName) -> Result<(), KernelError> {
        match self.fetch(name).await? {
            None => Ok(()),
            Some(device) => {
                debug!("deleting VRF {name} (ifindex {index})", index = device.index);
                self.remove(&device).await
            }
        }
    }

    /// List every VRF device present in the kernel.
    pub async fn list(&self) -> Result<Vec<VrfDevice>, KernelError> {
        let observation = self.observe().await?;
        Ok(observation
            .iter()
            .map(|(_, device)| device.clone())
            .collect())
    }
}

impl Observe for Manager<VrfDevice> {
    type Observation<'a>
        = Result<MultiIndexVrfDeviceMap, KernelError>
    where
        Self: 'a;

    async fn observe<'a>(&self) -> Self::Observation<'a>
    where
        Self: 'a,
    {
        let mut devices = MultiIndexVrfDeviceMap::default();
        let mut request = self.handle().link().get().execute();
        while let Some(message) = request.try_next().await? {
            match VrfDevice::try_from_link_message(&message) {
                Ok(device) => match devices.try_insert(device) {
                    Ok(_) => {}
                    Err(uniqueness_error) => {
                        warn!("{uniqueness_error:?}");
                    }
                },
                Err(VrfDecodeError::NotAVrf) => {}
                Err(err) => {
                    debug!("skipping undecodable VRF link: {err}");
                }
            }
        }
        Ok(devices)
    }
}

impl Create for Manager<VrfDevice> {
    type Requirement<'a>
        = &'a VrfSpec
    where
        Self: 'a;
    type Outcome<'a>
        = Result<(), KernelError>
    where
        Self: 'a;

    async fn create<'a>(&self, requirement: &'a VrfSpec) -> Self::Outcome<'a>
    where
        Self: 'a,
    {
        debug!(
            "creating VRF {name} bound to table {table}",
            name = requirement.name,
            table = requirement.table_id
        );
        self.handle()
            .link()
            .add(LinkVrf::new(requirement.name.as_ref(), requirement.table_id.to_u32()).build())
            .execute()
            .await?;
        Ok(())
    }
}

impl Update for Manager<VrfDevice> {
    type Requirement<'a>
        = &'a VrfSpec
    where
        Self: 'a;
    type Observation<'a>
        = &'a VrfDevice
    where
        Self: 'a;
    type Outcome<'a>
        = Result<(), KernelError>
    where
        Self: 'a;

    async fn update<'a>(
        &self,
        requirement: &'a VrfSpec,
        observation: &'a VrfDevice,
    ) -> Self::Outcome<'a>
    where
        Self: 'a,
    {
        if observation.table_id != requirement.table_id {
            // never rebind a live VRF: surface the conflict instead
            return Err(KernelError::VrfMismatch {
                name: requirement.name.clone(),
                expected: requirement.table_id,
                found: observation.table_id,
            });
        }
        if observation.admin_state != AdminState::Up {
            self.set_admin_up(observation.index).await?;
        }
        Ok(())
    }
}

impl Remove for Manager<VrfDevice> {
    type Observation<'a>
        = &'a VrfDevice
    where
        Self: 'a;
    type Outcome<'a>
        = Result<(), KernelError>
    where
        Self: 'a;

    async fn remove<'a>(&self, observation: &'a VrfDevice) -> Self::Outcome<'a>
    where
        Self: 'a,
    {
        match self
            .handle()
            .link()
            .del(observation.index.to_u32())
            .execute()
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = KernelError::from(err);
                if err.is_not_found() { Ok(()) } else { Err(err) }
            }
        }
    }
}

impl Reconcile for Manager<VrfDevice> {
    type Requirement<'a>
        = &'a VrfSpec
    where
        Self: 'a;
    type Observation<'a>
        = Option<&'a VrfDevice>
    where
        Self: 'a;
    type Outcome<'a>
        = Option<Op<'a, Self>>
    where
        Self: 'a;

    async fn reconcile<'a>(
        &self,
        requirement: &'a VrfSpec,
        observation: Option<&'a VrfDevice>,
    ) -> Self::Outcome<'a>
    where
        Self: 'a,
    {
        match observation {
            None => Some(Op::Create(self.create(requirement).await)),
            Some(observed) => {
                if requirement == observed {
                    return None;
                }
                Some(Op::Update(self.update(requirement, observed).await))
            }
        }
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use crate::vrf::{VrfDevice, VrfSpec};
    use bolero::{Driver, TypeGenerator};

    impl TypeGenerator for VrfSpec {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(Self {
                name: driver.produce()?,
                table_id: driver.produce()?,
            })
        }
    }

    impl TypeGenerator for VrfDevice {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(Self {
                name: driver.produce()?,
                table_id: driver.produce()?,
                index: driver.produce()?,
                admin_state: driver.produce()?,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use net::interface::AdminState;

    fn vrf_link_message(index: u32, name: &str, table: u32, up: bool) -> LinkMessage {
        let mut message = LinkMessage::default();
        message.header.index = index;
        if up {
            message.header.flags = LinkFlags::Up;
        }
        message
            .attributes
            .push(LinkAttribute::IfName(name.to_string()));
        message.attributes.push(LinkAttribute::LinkInfo(vec![
            LinkInfo::Kind(InfoKind::Vrf),
            LinkInfo::Data(InfoData::Vrf(vec![InfoVrf::TableId(table)])),
        ]));
        message
    }

    #[test]
    fn decodes_vrf_link_message() {
        let message = vrf_link_message(7, "vrf-pod", 100, true);
        let device = VrfDevice::try_from_link_message(&message).unwrap();
        assert_eq!(device.name.as_ref(), "vrf-pod");
        assert_eq!(device.table_id.to_u32(), 100);
        assert_eq!(device.index.to_u32(), 7);
        assert_eq!(device.admin_state, AdminState::Up);
    }

    #[test]
    fn decodes_admin_down() {
        let message = vrf_link_message(7, "vrf-pod", 100, false);
        let device = VrfDevice::try_from_link_message(&message).unwrap();
        assert_eq!(device.admin_state, AdminState::Down);
    }

    #[test]
    fn rejects_non_vrf_links() {
        let mut message = LinkMessage::default();
        message.header.index = 1;
        message
            .attributes
            .push(LinkAttribute::IfName("lo".to_string()));
        assert_eq!(
            VrfDevice::try_from_link_message(&message),
            Err(VrfDecodeError::NotAVrf)
        );
    }

    #[test]
    fn rejects_vrf_without_table() {
        let mut message = LinkMessage::default();
        message.header.index = 2;
        message
            .attributes
            .push(LinkAttribute::IfName("vrf-x".to_string()));
        message
            .attributes
            .push(LinkAttribute::LinkInfo(vec![LinkInfo::Kind(InfoKind::Vrf)]));
        assert_eq!(
            VrfDevice::try_from_link_message(&message),
            Err(VrfDecodeError::MissingTableId)
        );
    }

    #[test]
    fn as_requirement_obeys_contract() {
        bolero::check!().with_type().for_each(|device: &VrfDevice| {
            let requirement = device.as_requirement();
            assert_eq!(requirement.name, device.name);
            assert_eq!(requirement.table_id, device.table_id);
            if device.admin_state == AdminState::Up {
                assert_eq!(requirement, *device);
            } else {
                assert_ne!(requirement, *device);
            }
        });
    }
}
