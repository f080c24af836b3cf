use serde::Serialize;
use std::sync::Arc;
use testbed_runtime::{ConnectionGuard, Connector, RuntimeError, SetupConnection};
use testbed_schema::{ConnectionProfile, Dialect, ProfileSet, Tablespaces};
use tracing::{debug, info, warn};

/// Outcome of provisioning or deprovisioning one target profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningResult {
    pub profile: String,
    pub success: bool,
    pub errors: Vec<String>,
    pub attempts: u32,
}

impl ProvisioningResult {
    fn new(profile: &ConnectionProfile) -> Self {
        Self {
            profile: profile.name().to_string(),
            success: false,
            errors: Vec::new(),
            attempts: 1,
        }
    }
}

/// Creates and drops the backing store of each target profile.
///
/// Databases are created and dropped through the `setup` profile; tables
/// through the target profile itself.
pub struct ResourceProvisioner {
    connector: Arc<dyn Connector>,
    dialect: Dialect,
    tablespaces: Tablespaces,
}

impl ResourceProvisioner {
    pub fn new(connector: Arc<dyn Connector>, dialect: Dialect, tablespaces: Tablespaces) -> Self {
        Self {
            connector,
            dialect,
            tablespaces,
        }
    }

    /// Create the database, then its tables.
    ///
    /// With `handle_errors`, a failed attempt is followed by one forced
    /// deprovision (whose outcome is ignored) and one more provision without
    /// error handling.
    pub fn provision(
        &self,
        setup: &ConnectionProfile,
        target: &ConnectionProfile,
        handle_errors: bool,
    ) -> ProvisioningResult {
        info!("provisioning '{}'", target.name());
        let mut result = ProvisioningResult::new(target);
        let subs = target.substitutions(&self.tablespaces);
        let dialect = self.dialect;

        let created = self.step(&mut result, setup, "create database", |c| {
            c.create_database(dialect, &subs, handle_errors)
        });
        if !handle_errors || created {
            self.step(&mut result, target, "create tables", |c| {
                c.create_tables(dialect, &subs, handle_errors)
            });
        }
        result.success = result.errors.is_empty();

        if handle_errors && !result.success {
            warn!(
                "provisioning '{}' failed, dropping and retrying: {}",
                target.name(),
                result.errors.join("; ")
            );
            let dropped = self.deprovision(setup, target, false);
            debug!("forced deprovision before retry: {:?}", dropped.errors);
            let mut retry = self.provision(setup, target, false);
            retry.attempts = result.attempts + 1;
            return retry;
        }
        result
    }

    /// Drop the tables, then the database.
    pub fn deprovision(
        &self,
        setup: &ConnectionProfile,
        target: &ConnectionProfile,
        handle_errors: bool,
    ) -> ProvisioningResult {
        info!("deprovisioning '{}'", target.name());
        let mut result = ProvisioningResult::new(target);
        let subs = target.substitutions(&self.tablespaces);
        let dialect = self.dialect;

        let dropped = self.step(&mut result, target, "drop tables", |c| {
            c.drop_tables(dialect, &subs, handle_errors)
        });
        if !handle_errors || dropped {
            self.step(&mut result, setup, "drop database", |c| {
                c.drop_database(dialect, &subs, handle_errors)
            });
        }
        result.success = result.errors.is_empty();
        result
    }

    /// Provision every target profile in order. Each is handled
    /// independently; one failing does not stop the next.
    pub fn provision_all(&self, profiles: &ProfileSet, handle_errors: bool) -> Vec<ProvisioningResult> {
        profiles
            .targets()
            .map(|target| self.provision(&profiles.setup, target, handle_errors))
            .collect()
    }

    pub fn deprovision_all(&self, profiles: &ProfileSet, handle_errors: bool) -> Vec<ProvisioningResult> {
        profiles
            .targets()
            .map(|target| self.deprovision(&profiles.setup, target, handle_errors))
            .collect()
    }

    /// Run one statement group on a fresh connection. Returns whether the
    /// step succeeded; every error is appended to `result`.
    fn step(
        &self,
        result: &mut ProvisioningResult,
        profile: &ConnectionProfile,
        op: &str,
        run: impl FnOnce(&mut dyn SetupConnection) -> Result<(), RuntimeError>,
    ) -> bool {
        let mut conn = match ConnectionGuard::open(self.connector.as_ref(), profile) {
            Ok(conn) => conn,
            Err(e) => {
                result.errors.push(format!("{op}: {e}"));
                return false;
            }
        };

        let baseline = conn.errors().len();
        if baseline > 0 {
            if self.dialect.tolerates_connect_errors() {
                debug!(
                    "ignoring {baseline} connection warnings for '{}' ({})",
                    profile.name(),
                    self.dialect
                );
            } else {
                result.errors.extend(conn.errors());
                return false;
            }
        }

        if let Err(e) = run(&mut *conn) {
            result.errors.push(format!("{op}: {e}"));
            return false;
        }

        let before = result.errors.len();
        result
            .errors
            .extend(conn.errors().into_iter().skip(baseline));
        result.errors.len() == before
    }
}
