/**
 * ICE server descriptions and their validation
 * URL syntax per RFC 7064 (stun/stuns) and RFC 7065 (turn/turns)
 */
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IceError;

/// A server is configured with a single URL or a list of them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Urls {
    One(String),
    Many(Vec<String>),
}

impl Urls {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let urls: &[String] = match self {
            Urls::One(url) => std::slice::from_ref(url),
            Urls::Many(urls) => urls,
        };
        urls.iter().map(String::as_str)
    }
}

impl From<&str> for Urls {
    fn from(url: &str) -> Self {
        Urls::One(url.to_string())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialType {
    #[default]
    Password,
    Oauth,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct OAuthCredential {
    #[serde(default, alias = "macKey")]
    pub mac_key: Option<String>,
    #[serde(default, alias = "accessToken")]
    pub access_token: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum IceCredential {
    Password(String),
    OAuth(OAuthCredential),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Urls,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<IceCredential>,
    #[serde(default, alias = "credentialType")]
    pub credential_type: CredentialType,
}

impl IceServer {
    pub fn new(urls: impl Into<Urls>) -> Self {
        Self {
            urls: urls.into(),
            username: None,
            credential: None,
            credential_type: CredentialType::Password,
        }
    }

    pub fn with_password(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.credential = Some(IceCredential::Password(password.to_string()));
        self.credential_type = CredentialType::Password;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerScheme {
    Stun,
    Stuns,
    Turn,
    Turns,
}

impl ServerScheme {
    fn parse(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "stun" => Some(ServerScheme::Stun),
            "stuns" => Some(ServerScheme::Stuns),
            "turn" => Some(ServerScheme::Turn),
            "turns" => Some(ServerScheme::Turns),
            _ => None,
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            ServerScheme::Turns => 5349,
            _ => 3478,
        }
    }

    pub fn is_turn(self) -> bool {
        matches!(self, ServerScheme::Turn | ServerScheme::Turns)
    }

    /// Probe order, higher first.
    pub fn preference(self) -> u8 {
        match self {
            ServerScheme::Stun => 4,
            ServerScheme::Stuns => 3,
            ServerScheme::Turns => 2,
            ServerScheme::Turn => 1,
        }
    }
}

impl fmt::Display for ServerScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerScheme::Stun => "stun",
            ServerScheme::Stuns => "stuns",
            ServerScheme::Turn => "turn",
            ServerScheme::Turns => "turns",
        };
        f.write_str(s)
    }
}

/**
 * One URL of a configured server, parsed and checked.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedServer {
    pub url: String,
    pub scheme: ServerScheme,
    pub address: String,
    pub port: u16,
    pub username: Option<String>,
    pub credential: Option<IceCredential>,
}

fn check_turn_credentials(url: &str, server: &IceServer) -> Result<(), IceError> {
    match server.credential_type {
        CredentialType::Password => {
            let has_username = server.username.as_deref().is_some_and(|u| !u.is_empty());
            match (&server.credential, has_username) {
                (Some(IceCredential::Password(_)), true) => Ok(()),
                _ => Err(IceError::InvalidAccess(format!(
                    "{url}: password credentials need a username and a string credential"
                ))),
            }
        }
        CredentialType::Oauth => match &server.credential {
            Some(IceCredential::Password(_)) => Err(IceError::Syntax(format!(
                "{url}: oauth credential must be an object"
            ))),
            Some(IceCredential::OAuth(oauth))
                if oauth.mac_key.as_deref().is_some_and(|k| !k.is_empty())
                    && oauth.access_token.as_deref().is_some_and(|t| !t.is_empty()) =>
            {
                Ok(())
            }
            _ => Err(IceError::InvalidAccess(format!(
                "{url}: oauth credential needs macKey and accessToken"
            ))),
        },
    }
}

/**
 * Parse `scheme:host[:port][?query]`. The query part (RFC 7065
 * `?transport=`) is accepted and ignored.
 *
 * @param url The URL as configured
 * @param server The server the URL belongs to, for its credentials
 * @return The parsed server, or Syntax / InvalidAccess / NotSupported
 */
pub fn validate_server_url(url: &str, server: &IceServer) -> Result<ValidatedServer, IceError> {
    let without_query = url.split('?').next().unwrap_or_default();

    // IPv6 literals are bracketed, keep their colons out of the split
    let (scheme, rest) = without_query
        .split_once(':')
        .ok_or_else(|| IceError::Syntax(format!("{url}: missing scheme")))?;
    let (address, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| IceError::Syntax(format!("{url}: unterminated address")))?;
        match tail {
            "" => (host, None),
            _ => match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => return Err(IceError::Syntax(format!("{url}: malformed address"))),
            },
        }
    } else {
        let mut parts = rest.split(':');
        let host = parts.next().unwrap_or_default();
        let port = parts.next();
        if parts.next().is_some() {
            return Err(IceError::Syntax(format!("{url}: too many ':' separators")));
        }
        (host, port)
    };

    if address.is_empty() {
        return Err(IceError::Syntax(format!("{url}: empty address")));
    }

    let scheme = ServerScheme::parse(scheme)
        .ok_or_else(|| IceError::NotSupported(format!("{url}: unknown scheme {scheme}")))?;

    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| IceError::Syntax(format!("{url}: invalid port {port}")))?,
        None => scheme.default_port(),
    };

    if scheme.is_turn() {
        check_turn_credentials(url, server)?;
    }

    Ok(ValidatedServer {
        url: url.to_string(),
        scheme,
        address: address.to_string(),
        port,
        username: server.username.clone(),
        credential: server.credential.clone(),
    })
}

/**
 * Validate every URL of every server. The first invalid URL fails the
 * whole list.
 */
pub fn validate_servers(servers: &[IceServer]) -> Result<Vec<ValidatedServer>, IceError> {
    servers
        .iter()
        .flat_map(|server| server.urls.iter().map(move |url| validate_server_url(url, server)))
        .collect()
}

/**
 * Order servers for probing: stun, stuns, turns, then turn. The sort is
 * stable so configuration order is kept within a scheme.
 */
pub fn sort_by_preference(servers: &mut [ValidatedServer]) {
    servers.sort_by(|a, b| b.scheme.preference().cmp(&a.scheme.preference()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stun(url: &str) -> Result<ValidatedServer, IceError> {
        validate_server_url(url, &IceServer::new(url))
    }

    #[test]
    fn test_default_ports() {
        let s = stun("stun:stun.example.org").unwrap();
        assert_eq!(s.scheme, ServerScheme::Stun);
        assert_eq!(s.address, "stun.example.org");
        assert_eq!(s.port, 3478);

        assert_eq!(stun("stuns:example.org").unwrap().port, 3478);

        let turn = IceServer::new("turns:example.org").with_password("u", "p");
        assert_eq!(validate_server_url("turns:example.org", &turn).unwrap().port, 5349);
        let turn = IceServer::new("turn:example.org").with_password("u", "p");
        assert_eq!(validate_server_url("turn:example.org", &turn).unwrap().port, 3478);
    }

    #[test]
    fn test_explicit_port_and_query() {
        let s = stun("stun:10.0.0.1:19302").unwrap();
        assert_eq!(s.address, "10.0.0.1");
        assert_eq!(s.port, 19302);

        let server = IceServer::new("turn:example.org:3479?transport=tcp").with_password("u", "p");
        let v = validate_server_url("turn:example.org:3479?transport=tcp", &server).unwrap();
        assert_eq!(v.port, 3479);
        assert_eq!(v.url, "turn:example.org:3479?transport=tcp");

        let v6 = stun("stun:[2001:db8::1]:3480").unwrap();
        assert_eq!(v6.address, "2001:db8::1");
        assert_eq!(v6.port, 3480);
    }

    #[test]
    fn test_syntax_errors() {
        for url in ["stun", "stun:", "stun:host:1:2", "stun:host:port", "stun:host:70000"] {
            assert!(matches!(stun(url), Err(IceError::Syntax(_))), "{url}");
        }
    }

    #[test]
    fn test_unknown_scheme() {
        assert!(matches!(stun("http:example.org"), Err(IceError::NotSupported(_))));
    }

    #[test]
    fn test_turn_password_credentials() {
        let url = "turn:example.org";
        let missing = IceServer::new(url);
        assert!(matches!(
            validate_server_url(url, &missing),
            Err(IceError::InvalidAccess(_))
        ));

        let empty_user = IceServer::new(url).with_password("", "p");
        assert!(matches!(
            validate_server_url(url, &empty_user),
            Err(IceError::InvalidAccess(_))
        ));

        let mut object_credential = IceServer::new(url);
        object_credential.username = Some("u".to_string());
        object_credential.credential = Some(IceCredential::OAuth(OAuthCredential::default()));
        assert!(matches!(
            validate_server_url(url, &object_credential),
            Err(IceError::InvalidAccess(_))
        ));
    }

    #[test]
    fn test_turn_oauth_credentials() {
        let url = "turns:example.org";
        let mut server = IceServer::new(url);
        server.credential_type = CredentialType::Oauth;

        server.credential = Some(IceCredential::Password("token".to_string()));
        assert!(matches!(validate_server_url(url, &server), Err(IceError::Syntax(_))));

        server.credential = Some(IceCredential::OAuth(OAuthCredential {
            mac_key: Some("key".to_string()),
            access_token: None,
        }));
        assert!(matches!(
            validate_server_url(url, &server),
            Err(IceError::InvalidAccess(_))
        ));

        server.credential = Some(IceCredential::OAuth(OAuthCredential {
            mac_key: Some("key".to_string()),
            access_token: Some("token".to_string()),
        }));
        assert!(validate_server_url(url, &server).is_ok());
    }

    #[test]
    fn test_stun_ignores_credentials() {
        let mut server = IceServer::new("stun:example.org");
        server.credential_type = CredentialType::Oauth;
        assert!(validate_server_url("stun:example.org", &server).is_ok());
    }

    #[test]
    fn test_validate_and_sort() {
        let servers = vec![
            IceServer::new(Urls::Many(vec![
                "turn:a.example.org".to_string(),
                "turns:b.example.org".to_string(),
            ]))
            .with_password("u", "p"),
            IceServer::new("stuns:c.example.org"),
            IceServer::new("stun:d.example.org"),
            IceServer::new("stun:e.example.org"),
        ];
        let mut validated = validate_servers(&servers).unwrap();
        assert_eq!(validated.len(), 5);
        sort_by_preference(&mut validated);
        let order: Vec<&str> = validated.iter().map(|s| s.address.as_str()).collect();
        assert_eq!(
            order,
            vec!["d.example.org", "e.example.org", "c.example.org", "b.example.org", "a.example.org"]
        );

        let bad = vec![IceServer::new("stun:ok.example.org"), IceServer::new("bogus:x")];
        assert!(matches!(validate_servers(&bad), Err(IceError::NotSupported(_))));
    }
}
