//! Connection credentials handed to the connection factory.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::PoolError;

/// Endpoint and login information for opening physical connections.
///
/// The pool never interprets these values; it passes them unchanged to
/// [`ConnectionFactory::open`](crate::ConnectionFactory::open) each time it
/// needs a new connection.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Server host name or address.
    pub host: String,
    /// Server port, if not the backend default.
    pub port: Option<u16>,
    /// Login user.
    pub user: Option<String>,
    password: Option<String>,
    /// Initial database.
    pub database: Option<String>,
    /// Backend-specific options not understood by the pool, keyed by lowercase name.
    pub properties: BTreeMap<String, String>,
}

impl Credentials {
    /// Create credentials for the given host.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Set the server port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the login user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the login password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Add a backend-specific property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties
            .insert(key.into().to_lowercase(), value.into());
        self
    }

    /// The login password, if any.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// The `host[:port]` endpoint string.
    #[must_use]
    pub fn endpoint(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        }
    }

    /// Parse credentials from a `key=value;` connection string.
    ///
    /// Recognized keys (case-insensitive):
    ///
    /// - `Server`, `Host`, `Data Source`: host, optionally `host,port` or `host:port`
    /// - `Port`
    /// - `Database`, `Initial Catalog`
    /// - `User Id`, `Uid`, `User`
    /// - `Password`, `Pwd`
    ///
    /// Any other key is kept in [`Credentials::properties`].
    ///
    /// ```rust
    /// use wirepool::Credentials;
    ///
    /// let creds = Credentials::from_connection_string(
    ///     "Server=db.local,3306;Database=shop;User Id=app;Password=secret;AutoCommit=false",
    /// )
    /// .unwrap();
    ///
    /// assert_eq!(creds.endpoint(), "db.local:3306");
    /// assert_eq!(creds.properties.get("autocommit").map(String::as_str), Some("false"));
    /// ```
    pub fn from_connection_string(conn_str: &str) -> Result<Self, PoolError> {
        let mut creds = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| PoolError::Configuration(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "host" | "data source" => {
                    match value.split_once(',').or_else(|| value.split_once(':')) {
                        Some((host, port)) => {
                            creds.host = host.trim().to_string();
                            creds.port = Some(parse_port(port.trim())?);
                        }
                        None => creds.host = value.to_string(),
                    }
                }
                "port" => creds.port = Some(parse_port(value)?),
                "database" | "initial catalog" => creds.database = Some(value.to_string()),
                "user id" | "uid" | "user" => creds.user = Some(value.to_string()),
                "password" | "pwd" => creds.password = Some(value.to_string()),
                _ => {
                    creds.properties.insert(key, value.to_string());
                }
            }
        }

        if creds.host.is_empty() {
            return Err(PoolError::Configuration(
                "connection string has no server".into(),
            ));
        }

        Ok(creds)
    }
}

fn parse_port(value: &str) -> Result<u16, PoolError> {
    value
        .parse()
        .map_err(|_| PoolError::Configuration(format!("invalid port: {value}")))
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("properties", &self.properties)
            .finish()
    }
}
