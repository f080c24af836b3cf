use crate::profile::{ConnectionProfile, Dialect};
use crate::properties::Properties;
use crate::ConfigError;
use serde::Serialize;

/// Namespace prefix for connection pool keys: `pool.<profile>.<field>`.
pub const POOL_PREFIX: &str = "pool";
/// Indexed list of additional test data search paths.
pub const KEY_TEST_DATA_PATH: &str = "testDataPath";
/// Presence of this key keeps the search index across teardown.
pub const KEY_KEEP_SEARCH_INDEX: &str = "test.keep.searchIndex";

pub const SETUP_PROFILE: &str = "setup";
pub const DEFAULT_PROFILE: &str = "default";

/// Tablespace names substituted into provisioning scripts. Only meaningful
/// for dialects that use tablespaces; absent keys stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tablespaces {
    pub default: Option<String>,
    pub index: Option<String>,
    pub temporary: Option<String>,
}

impl Tablespaces {
    pub fn from_properties(props: &Properties, dialect: Dialect) -> Self {
        let key = |kind: &str| {
            props
                .get(&format!("db.{}.{kind}Tablespace", dialect.tag()))
                .map(str::to_owned)
        };
        Self {
            default: key("default"),
            index: key("index"),
            temporary: key("temporary"),
        }
    }
}

/// The connection profiles known to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSet {
    pub setup: ConnectionProfile,
    pub default: ConnectionProfile,
    pub additional: Option<ConnectionProfile>,
}

impl ProfileSet {
    /// Target profiles in provisioning order: `default`, then `additional`.
    pub fn targets(&self) -> impl Iterator<Item = &ConnectionProfile> {
        std::iter::once(&self.default).chain(self.additional.as_ref())
    }
}

/// Database configuration resolved from the run's properties file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbConfig {
    pub dialect: Dialect,
    pub profiles: ProfileSet,
    pub tablespaces: Tablespaces,
    pub test_data_paths: Vec<String>,
    pub keep_search_index: bool,
}

impl DbConfig {
    /// Resolve profiles from `props`.
    ///
    /// `setup` must carry a `jdbcUrl`; `default` is always built from
    /// whatever keys exist; the additional profile is only built when its
    /// `dbName` key is present.
    pub fn from_properties(
        props: &Properties,
        dialect: Dialect,
        additional_profile: &str,
    ) -> Result<Self, ConfigError> {
        let setup_url_key = pool_key(SETUP_PROFILE, "jdbcUrl");
        if !props.contains_key(&setup_url_key) {
            return Err(ConfigError::MissingKey(setup_url_key));
        }

        let setup = read_profile(props, SETUP_PROFILE);
        let default = read_profile(props, DEFAULT_PROFILE);
        let additional = props
            .contains_key(&pool_key(additional_profile, "dbName"))
            .then(|| read_profile(props, additional_profile));

        Ok(Self {
            dialect,
            profiles: ProfileSet {
                setup,
                default,
                additional,
            },
            tablespaces: Tablespaces::from_properties(props, dialect),
            test_data_paths: props.indexed(KEY_TEST_DATA_PATH),
            keep_search_index: props.contains_key(KEY_KEEP_SEARCH_INDEX),
        })
    }
}

pub fn pool_key(profile: &str, field: &str) -> String {
    format!("{POOL_PREFIX}.{profile}.{field}")
}

fn read_profile(props: &Properties, name: &str) -> ConnectionProfile {
    let field = |f: &str| props.get(&pool_key(name, f)).unwrap_or_default().to_owned();
    ConnectionProfile::new(
        name,
        field("dbName"),
        field("jdbcDriver"),
        field("jdbcUrl"),
        field("jdbcUrlParams"),
        field("user"),
        field("password"),
    )
}
