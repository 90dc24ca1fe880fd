//! Operation kinds and the per-operation scope marker.

use std::fmt;

/// The interception points every data-access call passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Insert statements.
    Create,
    /// Multi-row reads.
    Query,
    /// Update statements.
    Update,
    /// Delete statements.
    Delete,
    /// Arbitrary statements executed verbatim.
    Raw,
    /// Single-row reads.
    Row,
}

impl OperationKind {
    /// Every interception point, in dispatch-table order.
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Create,
        OperationKind::Query,
        OperationKind::Update,
        OperationKind::Delete,
        OperationKind::Raw,
        OperationKind::Row,
    ];

    /// Index of this kind in [`OperationKind::ALL`].
    pub const fn index(self) -> usize {
        match self {
            OperationKind::Create => 0,
            OperationKind::Query => 1,
            OperationKind::Update => 2,
            OperationKind::Delete => 3,
            OperationKind::Raw => 4,
            OperationKind::Row => 5,
        }
    }

    /// Returns `true` if this kind returns rows rather than an affected count.
    pub fn returns_rows(self) -> bool {
        matches!(self, OperationKind::Query | OperationKind::Row)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Create => "create",
            OperationKind::Query => "query",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Raw => "raw",
            OperationKind::Row => "row",
        };
        write!(f, "{}", name)
    }
}

/// Lifetime object for one statement or one transaction.
///
/// Carries the "search path already switched" marker. A scope is created when
/// an operation or transaction begins and dropped with it, so the marker can
/// never outlive the connection checkout it describes. There is no way to
/// clear the marker once set.
#[derive(Debug, Default)]
pub struct OperationScope {
    switched: bool,
    transactional: bool,
}

impl OperationScope {
    /// Creates a scope for a single statement.
    pub fn statement() -> Self {
        Self {
            switched: false,
            transactional: false,
        }
    }

    /// Creates a scope spanning a transaction.
    pub fn transaction() -> Self {
        Self {
            switched: false,
            transactional: true,
        }
    }

    /// Returns `true` once the search path has been switched in this scope.
    pub fn is_switched(&self) -> bool {
        self.switched
    }

    /// Returns `true` if this scope spans a transaction.
    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// Records a successful search path switch.
    pub fn mark_switched(&mut self) {
        self.switched = true;
    }
}
