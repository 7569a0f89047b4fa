use thiserror::Error;

/// Failures surfaced by a [`ControllerClient`](crate::controller::ControllerClient)
/// or while decoding what it returned.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("HTTP request to {path} failed: {source}")]
    Http {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("controller returned {status} for {method} {path}: {body}")]
    Status {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    #[error("malformed {kind} in response to {path}: {source}")]
    Decode {
        kind: &'static str,
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} {name} does not exist on the controller")]
    NotFound { kind: &'static str, name: String },
}

/// Which remote operation was running when a controller call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Lookup,
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::Lookup => "lookup",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Errors produced while converging the load balancer.
#[derive(Debug, Error)]
pub enum LbError {
    #[error("{op} of {kind} {name} failed: {source}")]
    Controller {
        op: Operation,
        kind: &'static str,
        name: String,
        #[source]
        source: ControllerError,
    },

    #[error("{op} of members in pool {pool} failed: {source}")]
    Pool {
        op: Operation,
        pool: String,
        #[source]
        source: ControllerError,
    },

    #[error("VS with name {0} already exists")]
    DuplicateVirtualService(String),

    #[error("pool {0} does not exist")]
    MissingPool(String),

    #[error("virtual service {vs} deleted but pool {pool} was left behind: {source}")]
    OrphanedPool {
        vs: String,
        pool: String,
        #[source]
        source: Box<LbError>,
    },

    #[error("work queue for service {0} is closed")]
    QueueClosed(String),
}

impl LbError {
    pub(crate) fn controller(
        op: Operation,
        kind: &'static str,
        name: &str,
    ) -> impl FnOnce(ControllerError) -> LbError {
        let name = name.to_string();
        move |source| LbError::Controller {
            op,
            kind,
            name,
            source,
        }
    }

    pub(crate) fn pool(op: Operation, pool: &str) -> impl FnOnce(ControllerError) -> LbError {
        let pool = pool.to_string();
        move |source| LbError::Pool { op, pool, source }
    }
}

pub type Result<T, E = LbError> = std::result::Result<T, E>;
