/// Shared fixtures for graph-level tests.

use crate::crypto::hashing::Hash;
use crate::graph::graph::SignedGraph;
use crate::graph::link::AuthorContext;
use crate::ids::DeviceId;
use crate::keyset::{Scope, SecretKeyset};
use crate::team::actions::{Action, Device, Member};

pub struct TestAuthor {
    pub user_id: String,
    pub member_keys: SecretKeyset,
    pub device_keys: SecretKeyset,
}

impl TestAuthor {
    pub fn new(user_id: &str) -> Self {
        TestAuthor {
            user_id: user_id.to_string(),
            member_keys: SecretKeyset::random(Scope::member(user_id)),
            device_keys: SecretKeyset::random(Scope::device(format!("{user_id}-dev"))),
        }
    }

    pub fn device_id(&self) -> DeviceId {
        DeviceId::from_pubkey(&self.device_keys.signing)
    }

    pub fn context(&self) -> AuthorContext {
        AuthorContext {
            user_id: self.user_id.clone(),
            device_id: self.device_id(),
            device_signing_key: self.device_keys.signing,
        }
    }

    pub fn device(&self) -> Device {
        Device {
            user_id: self.user_id.clone(),
            device_id: self.device_id(),
            keys: self.device_keys.public(),
        }
    }

    pub fn member(&self) -> Member {
        Member {
            user_id: self.user_id.clone(),
            keys: self.member_keys.public(),
            roles: vec![],
            devices: vec![self.device()],
        }
    }

    pub fn append(&self, graph: &mut SignedGraph, action: Action, timestamp_ms: u64) -> Hash {
        graph
            .append(
                &action,
                self.context(),
                self.device_keys.signing_secret(),
                timestamp_ms,
            )
            .unwrap()
    }
}

/// A one-link graph founded by `author`.
pub fn graph_with_author(author: &TestAuthor) -> SignedGraph {
    let root_action = Action::Root {
        team_name: "test team".to_string(),
        root_member: author.member(),
        lockboxes: vec![],
    };
    SignedGraph::create(
        &root_action,
        author.context(),
        author.device_keys.signing_secret(),
        1000,
    )
    .unwrap()
}

pub fn action_rename(name: &str) -> Action {
    Action::SetTeamName {
        team_name: name.to_string(),
    }
}
