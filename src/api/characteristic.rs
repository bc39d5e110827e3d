use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Ord, Eq, PartialEq, PartialOrd, Clone)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub properties: Vec<CharacteristicProperty>,
}

impl Characteristic {
    pub fn new(service_uuid: Uuid, uuid: Uuid) -> Self {
        Characteristic {
            uuid,
            service_uuid,
            properties: vec![
                CharacteristicProperty::Read,
                CharacteristicProperty::Write,
            ],
        }
    }
}

#[derive(Debug, Clone, PartialOrd, Ord, Eq, PartialEq)]
pub enum CharacteristicProperty {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    AuthenticatedSignedWrites,
    Notify,
    Indicate,
    ExtendedProperties,
}

#[derive(Debug, Clone, Copy, Default, PartialOrd, Ord, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacteristicWriteType {
    WriteWithoutResponse,
    #[default]
    WriteWithResponse,
}
