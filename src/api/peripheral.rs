use std::fmt;

/// Platform identifier of a peripheral (a MAC address on Android and BlueZ,
/// a UUID on CoreBluetooth).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PeripheralId(pub String);

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A discovered device. Read-only to discovery; owned by the connection
/// lifecycle once a connect attempt starts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeripheralHandle {
    pub id: PeripheralId,
    pub name: Option<String>,
}

impl PeripheralHandle {
    pub fn new(id: impl Into<String>, name: Option<&str>) -> Self {
        PeripheralHandle {
            id: PeripheralId(id.into()),
            name: name.map(str::to_string),
        }
    }

    /// Exact, case-sensitive name comparison.
    pub fn name_matches(&self, filter: &str) -> bool {
        self.name.as_deref() == Some(filter)
    }
}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}
