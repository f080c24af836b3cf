use crate::config::Tablespaces;
use crate::types::ProfileName;
use crate::ConfigError;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Backing-store product the provisioning scripts are written for.
///
/// The dialect decides how noisy a fresh provisioning run is allowed to be:
/// a tolerant dialect ignores errors reported right after connecting (the
/// store may legitimately complain about objects that do not exist yet),
/// a strict one treats them as step failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Mysql,
    Oracle,
}

impl Dialect {
    pub fn tag(self) -> &'static str {
        match self {
            Dialect::Mysql => "mysql",
            Dialect::Oracle => "oracle",
        }
    }

    pub fn tolerates_connect_errors(self) -> bool {
        matches!(self, Dialect::Oracle)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Dialect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(Dialect::Mysql),
            "oracle" => Ok(Dialect::Oracle),
            other => Err(ConfigError::UnknownDialect(other.to_owned())),
        }
    }
}

/// Named database connection descriptor.
///
/// Immutable once built; the password never appears in `Debug` or
/// serialized output.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    name: ProfileName,
    db_name: String,
    driver: String,
    url: String,
    url_params: String,
    user: String,
    password: String,
}

impl ConnectionProfile {
    pub fn new(
        name: impl Into<ProfileName>,
        db_name: impl Into<String>,
        driver: impl Into<String>,
        url: impl Into<String>,
        url_params: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            db_name: db_name.into(),
            driver: driver.into(),
            url: url.into(),
            url_params: url_params.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn name(&self) -> &ProfileName {
        &self.name
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn url_params(&self) -> &str {
        &self.url_params
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Placeholder values substituted into the dialect's provisioning scripts.
    pub fn substitutions(&self, tablespaces: &Tablespaces) -> BTreeMap<String, String> {
        let ts = |v: &Option<String>| v.clone().unwrap_or_default();
        BTreeMap::from([
            ("${database}".to_owned(), self.db_name.clone()),
            ("${user}".to_owned(), self.user.clone()),
            ("${password}".to_owned(), self.password.clone()),
            ("${defaultTablespace}".to_owned(), ts(&tablespaces.default)),
            ("${indexTablespace}".to_owned(), ts(&tablespaces.index)),
            ("${temporaryTablespace}".to_owned(), ts(&tablespaces.temporary)),
        ])
    }
}

const REDACTED: &str = "********";

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("name", &self.name)
            .field("db_name", &self.db_name)
            .field("driver", &self.driver)
            .field("url", &self.url)
            .field("url_params", &self.url_params)
            .field("user", &self.user)
            .field("password", &REDACTED)
            .finish()
    }
}

impl Serialize for ConnectionProfile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("ConnectionProfile", 7)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("db_name", &self.db_name)?;
        s.serialize_field("driver", &self.driver)?;
        s.serialize_field("url", &self.url)?;
        s.serialize_field("url_params", &self.url_params)?;
        s.serialize_field("user", &self.user)?;
        s.serialize_field("password", REDACTED)?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ConnectionProfile {
        ConnectionProfile::new(
            "default",
            "testbed_db",
            "com.mysql.Driver",
            "jdbc:mysql://localhost:3306/",
            "?useUnicode=true",
            "tester",
            "s3cret",
        )
    }

    #[test]
    fn dialect_parse_is_case_insensitive() {
        assert_eq!("MySQL".parse::<Dialect>().unwrap(), Dialect::Mysql);
        assert_eq!(" oracle ".parse::<Dialect>().unwrap(), Dialect::Oracle);
        assert!("postgres".parse::<Dialect>().is_err());
    }

    #[test]
    fn only_oracle_tolerates_connect_errors() {
        assert!(Dialect::Oracle.tolerates_connect_errors());
        assert!(!Dialect::Mysql.tolerates_connect_errors());
    }

    #[test]
    fn substitutions_cover_all_placeholders() {
        let ts = Tablespaces {
            default: Some("users".to_owned()),
            index: None,
            temporary: Some("temp".to_owned()),
        };
        let subs = profile().substitutions(&ts);
        assert_eq!(subs["${database}"], "testbed_db");
        assert_eq!(subs["${user}"], "tester");
        assert_eq!(subs["${password}"], "s3cret");
        assert_eq!(subs["${defaultTablespace}"], "users");
        assert_eq!(subs["${indexTablespace}"], "");
        assert_eq!(subs["${temporaryTablespace}"], "temp");
    }

    #[test]
    fn debug_redacts_password() {
        let out = format!("{:?}", profile());
        assert!(!out.contains("s3cret"));
        assert!(out.contains("tester"));
    }

    #[test]
    fn serialize_redacts_password() {
        let json = serde_json::to_string(&profile()).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(json.contains("\"db_name\":\"testbed_db\""));
    }
}
