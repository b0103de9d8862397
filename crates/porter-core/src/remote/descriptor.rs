//! Out-of-band connection descriptor (`nostrconnect://` URI).
//!
//! ```text
//! nostrconnect://<client pubkey>?relay=<url>&secret=<secret>&name=<app>&perms=sign_event
//! ```

use std::fmt;
use std::str::FromStr;

use url::Url;
use url::form_urlencoded;

use super::HandshakeError;
use crate::crypto::PublicKey;

pub const SCHEME: &str = "nostrconnect";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectDescriptor {
    pub client_pubkey: PublicKey,
    pub relays: Vec<String>,
    pub secret: String,
    pub name: Option<String>,
    pub perms: Vec<String>,
}

impl ConnectDescriptor {
    pub fn to_uri(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        for relay in &self.relays {
            query.append_pair("relay", relay);
        }
        query.append_pair("secret", &self.secret);
        if let Some(name) = &self.name {
            query.append_pair("name", name);
        }
        if !self.perms.is_empty() {
            query.append_pair("perms", &self.perms.join(","));
        }
        format!("{SCHEME}://{}?{}", self.client_pubkey, query.finish())
    }

    pub fn parse(uri: &str) -> Result<Self, HandshakeError> {
        let invalid = |why: &str| HandshakeError::InvalidDescriptor(format!("{why}: {uri}"));

        let url = Url::parse(uri).map_err(|_| invalid("not a URI"))?;
        if url.scheme() != SCHEME {
            return Err(invalid("wrong scheme"));
        }
        let client_pubkey = url
            .host_str()
            .ok_or_else(|| invalid("missing client key"))?
            .parse::<PublicKey>()
            .map_err(|_| invalid("bad client key"))?;

        let mut relays = Vec::new();
        let mut secret = None;
        let mut name = None;
        let mut perms = Vec::new();
        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "relay" => relays.push(v.into_owned()),
                "secret" => secret = Some(v.into_owned()),
                "name" => name = Some(v.into_owned()),
                "perms" => perms.extend(v.split(',').filter(|p| !p.is_empty()).map(str::to_string)),
                _ => {}
            }
        }
        if relays.is_empty() {
            return Err(invalid("missing relay"));
        }
        let secret = secret
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing secret"))?;

        Ok(Self {
            client_pubkey,
            relays,
            secret,
            name,
            perms,
        })
    }
}

impl fmt::Display for ConnectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl FromStr for ConnectDescriptor {
    type Err = HandshakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
