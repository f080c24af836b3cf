use crate::RuntimeError;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use testbed_schema::{ConnectionProfile, Dialect};

/// A connection able to run the dialect's provisioning scripts.
///
/// Statement failures do not surface as `Err`: they are collected and read
/// back through `no_errors()`/`errors()`, so a caller can decide whether a
/// step failed after it ran. `Err` is reserved for a connection that can no
/// longer be used. With `abort_on_error` set, a script stops at its first
/// failing statement; otherwise the remaining statements still run.
pub trait SetupConnection: Send {
    fn create_database(
        &mut self,
        dialect: Dialect,
        substitutions: &BTreeMap<String, String>,
        abort_on_error: bool,
    ) -> Result<(), RuntimeError>;

    fn create_tables(
        &mut self,
        dialect: Dialect,
        substitutions: &BTreeMap<String, String>,
        abort_on_error: bool,
    ) -> Result<(), RuntimeError>;

    fn drop_tables(
        &mut self,
        dialect: Dialect,
        substitutions: &BTreeMap<String, String>,
        abort_on_error: bool,
    ) -> Result<(), RuntimeError>;

    fn drop_database(
        &mut self,
        dialect: Dialect,
        substitutions: &BTreeMap<String, String>,
        abort_on_error: bool,
    ) -> Result<(), RuntimeError>;

    fn close(&mut self);

    fn no_errors(&self) -> bool {
        self.errors().is_empty()
    }

    /// Every error collected since the connection was opened, in order.
    fn errors(&self) -> Vec<String>;
}

pub trait Connector: Send + Sync {
    fn connect(&self, profile: &ConnectionProfile) -> Result<Box<dyn SetupConnection>, RuntimeError>;
}

/// Closes the wrapped connection when dropped.
pub struct ConnectionGuard {
    conn: Box<dyn SetupConnection>,
}

impl ConnectionGuard {
    pub fn open(connector: &dyn Connector, profile: &ConnectionProfile) -> Result<Self, RuntimeError> {
        Ok(Self {
            conn: connector.connect(profile)?,
        })
    }
}

impl Deref for ConnectionGuard {
    type Target = dyn SetupConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl DerefMut for ConnectionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.conn.close();
    }
}
