use std::fmt;
use std::net::SocketAddr;

use crate::identity::{HashName, Identity};
use telehash_core::crypto::{self, CryptoResult, RsaPublicKey};

/// A remote peer: its RSA public key and, when known, its UDP endpoint.
/// The hashname is derived from the key; the endpoint is learned from
/// configuration or captured from inbound datagrams and may improve over
/// time.
#[derive(Clone)]
pub struct Node {
    public: RsaPublicKey,
    public_der: Vec<u8>,
    hashname: HashName,
    endpoint: Option<SocketAddr>,
}

impl Node {
    pub fn new(public: RsaPublicKey, endpoint: Option<SocketAddr>) -> CryptoResult<Node> {
        let public_der = crypto::rsa_public_der(&public)?;
        let hashname = HashName::from_public_der(&public_der);

        Ok(Node {
            public,
            public_der,
            hashname,
            endpoint,
        })
    }

    pub fn from_public_der(der: &[u8], endpoint: Option<SocketAddr>) -> CryptoResult<Node> {
        let public = crypto::rsa_public_from_der(der)?;
        Self::new(public, endpoint)
    }

    /// The advertised view of a local identity, as handed to remote peers.
    pub fn from_identity(identity: &Identity, endpoint: Option<SocketAddr>) -> Node {
        Node {
            public: identity.public().clone(),
            public_der: identity.public_der().to_vec(),
            hashname: *identity.hashname(),
            endpoint,
        }
    }

    #[inline]
    pub fn public(&self) -> &RsaPublicKey {
        &self.public
    }

    #[inline]
    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    #[inline]
    pub fn hashname(&self) -> &HashName {
        &self.hashname
    }

    #[inline]
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    #[inline]
    pub fn set_endpoint(&mut self, endpoint: SocketAddr) {
        self.endpoint = Some(endpoint);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Node")
            .field("hashname", &self.hashname)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
