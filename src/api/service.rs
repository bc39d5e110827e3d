use uuid::Uuid;

use crate::api::characteristic::Characteristic;

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct Service {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new(uuid: Uuid, characteristics: impl IntoIterator<Item = Uuid>) -> Self {
        Service {
            uuid,
            primary: true,
            characteristics: characteristics
                .into_iter()
                .map(|c| Characteristic::new(uuid, c))
                .collect(),
        }
    }

    pub fn characteristic(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| &c.uuid == uuid)
    }
}

/// Services resolved on a connected peripheral.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Capabilities(Vec<Service>);

impl Capabilities {
    pub fn new(services: Vec<Service>) -> Self {
        Self(services)
    }

    pub fn service(&self, uuid: &Uuid) -> Option<&Service> {
        self.0.iter().find(|s| &s.uuid == uuid)
    }

    pub fn services(&self) -> &[Service] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}
