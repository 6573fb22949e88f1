use crate::models::MachineId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    Configuration,
    InvalidInput,
    InvalidSelection,
    NotFound,
    Timeout,
    ProcessFailure,
    StorageFailure,
    Internal,
}

/// The dispatch a failure belongs to, when there is one.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Operation {
    Scan,
    Update,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Update => "update",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub machine: Option<MachineId>,
    pub operation: Option<Operation>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            machine: None,
            operation: None,
            kind,
            message: message.into(),
        }
    }

    pub fn machine(mut self, machine: MachineId) -> Self {
        self.machine = Some(machine);
        self
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }
}
