/// Action payloads — the closed set of membership events that can appear
/// on the graph. The reducer is a total match over this enum.

use serde::{Deserialize, Serialize};

use crate::ids::{DeviceId, InvitationId};
use crate::invite::{Invitation, ProofOfInvitation};
use crate::keyset::{Lockbox, PublicKeyset};

// ---------------------------------------------------------------------------
// Principals
// ---------------------------------------------------------------------------

/// A member as recorded on the graph: public keys only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: String,
    pub keys: PublicKeyset,
    pub roles: Vec<String>,
    pub devices: Vec<Device>,
}

/// A device belonging to a member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub user_id: String,
    pub device_id: DeviceId,
    pub keys: PublicKeyset,
}

/// A non-voting relay principal. Servers hold keys and replicate the
/// graph but never author membership changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub keys: PublicKeyset,
}

/// A named role. The built-in `admin` role is created at root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Every link body carries exactly one of these payloads. Lockboxes ride
/// along with the action that makes them necessary, so a peer replaying
/// the graph always has the key material the action implies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// The founding link: establishes the team, the founder as the first
    /// admin, and the initial key material.
    Root {
        team_name: String,
        root_member: Member,
        lockboxes: Vec<Lockbox>,
    },
    AddMember {
        member: Member,
        roles: Vec<String>,
        lockboxes: Vec<Lockbox>,
    },
    RemoveMember {
        user_id: String,
        lockboxes: Vec<Lockbox>,
    },
    AddRole {
        role: Role,
        lockboxes: Vec<Lockbox>,
    },
    RemoveRole {
        role_name: String,
    },
    AddMemberRole {
        user_id: String,
        role_name: String,
        lockboxes: Vec<Lockbox>,
    },
    RemoveMemberRole {
        user_id: String,
        role_name: String,
        lockboxes: Vec<Lockbox>,
    },
    AddDevice {
        device: Device,
        lockboxes: Vec<Lockbox>,
    },
    RemoveDevice {
        device_id: DeviceId,
        lockboxes: Vec<Lockbox>,
    },
    ChangeMemberKeys {
        keys: PublicKeyset,
        lockboxes: Vec<Lockbox>,
    },
    ChangeDeviceKeys {
        keys: PublicKeyset,
        lockboxes: Vec<Lockbox>,
    },
    Invite {
        invitation: Invitation,
    },
    RevokeInvitation {
        id: InvitationId,
    },
    Admit {
        id: InvitationId,
        proof: ProofOfInvitation,
        member: Member,
        lockboxes: Vec<Lockbox>,
    },
    AddServer {
        server: Server,
        lockboxes: Vec<Lockbox>,
    },
    RemoveServer {
        host: String,
        lockboxes: Vec<Lockbox>,
    },
    ChangeServerKeys {
        keys: PublicKeyset,
        lockboxes: Vec<Lockbox>,
    },
    SetTeamName {
        team_name: String,
    },
    AddMessage {
        message: Vec<u8>,
    },
}

impl Action {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Root { .. } => "Root",
            Action::AddMember { .. } => "AddMember",
            Action::RemoveMember { .. } => "RemoveMember",
            Action::AddRole { .. } => "AddRole",
            Action::RemoveRole { .. } => "RemoveRole",
            Action::AddMemberRole { .. } => "AddMemberRole",
            Action::RemoveMemberRole { .. } => "RemoveMemberRole",
            Action::AddDevice { .. } => "AddDevice",
            Action::RemoveDevice { .. } => "RemoveDevice",
            Action::ChangeMemberKeys { .. } => "ChangeMemberKeys",
            Action::ChangeDeviceKeys { .. } => "ChangeDeviceKeys",
            Action::Invite { .. } => "Invite",
            Action::RevokeInvitation { .. } => "RevokeInvitation",
            Action::Admit { .. } => "Admit",
            Action::AddServer { .. } => "AddServer",
            Action::RemoveServer { .. } => "RemoveServer",
            Action::ChangeServerKeys { .. } => "ChangeServerKeys",
            Action::SetTeamName { .. } => "SetTeamName",
            Action::AddMessage { .. } => "AddMessage",
        }
    }

    /// The lockboxes this action carries, if any.
    pub fn lockboxes(&self) -> &[Lockbox] {
        match self {
            Action::Root { lockboxes, .. }
            | Action::AddMember { lockboxes, .. }
            | Action::RemoveMember { lockboxes, .. }
            | Action::AddRole { lockboxes, .. }
            | Action::AddMemberRole { lockboxes, .. }
            | Action::RemoveMemberRole { lockboxes, .. }
            | Action::AddDevice { lockboxes, .. }
            | Action::RemoveDevice { lockboxes, .. }
            | Action::ChangeMemberKeys { lockboxes, .. }
            | Action::ChangeDeviceKeys { lockboxes, .. }
            | Action::Admit { lockboxes, .. }
            | Action::AddServer { lockboxes, .. }
            | Action::RemoveServer { lockboxes, .. }
            | Action::ChangeServerKeys { lockboxes, .. } => lockboxes,
            _ => &[],
        }
    }
}
