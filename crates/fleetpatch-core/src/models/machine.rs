use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct MachineId(pub u64);

impl Display for MachineId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered fleet host. `ip` is the address playbooks are dispatched to.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    pub hostname: String,
    pub ip: String,
    pub username: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewMachine {
    pub hostname: String,
    pub ip: String,
    pub username: String,
}

impl NewMachine {
    pub fn new(
        hostname: impl Into<String>,
        ip: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            ip: ip.into(),
            username: username.into(),
        }
    }
}
