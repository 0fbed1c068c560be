//! Shared fixtures for the engine integration tests

#![allow(dead_code)]

use chainstate_core::{ObjectId, ObjectType};
use serde::{Deserialize, Serialize};

/// Object type with a secondary unique key (the name).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: ObjectId,
    pub name: String,
    pub balance: i64,
}

impl ObjectType for Account {
    const SPACE_ID: u8 = 1;
    const TYPE_ID: u8 = 1;
    type Key = String;

    fn id(&self) -> ObjectId {
        self.id
    }

    fn assign_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    fn unique_key(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

/// Object type with no secondary uniqueness constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gadget {
    pub id: ObjectId,
    pub label: String,
    pub weight: u32,
}

impl ObjectType for Gadget {
    const SPACE_ID: u8 = 1;
    const TYPE_ID: u8 = 2;
    type Key = ();

    fn id(&self) -> ObjectId {
        self.id
    }

    fn assign_id(&mut self, id: ObjectId) {
        self.id = id;
    }
}

pub fn account_id(instance: u64) -> ObjectId {
    ObjectId::new(1, 1, instance)
}

pub fn gadget_id(instance: u64) -> ObjectId {
    ObjectId::new(1, 2, instance)
}
