use std::net::SocketAddr;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use rand::{CryptoRng, RngCore};
use serde_json::Value;

use crate::net::channel::{Channel, ChannelId};
use crate::net::packet::{self, Fields};
use crate::net::shared::{ChannelError, NetError, NetResult};
use crate::node::Node;
use telehash_core::crypto::{self, IV_SIZE, KEY_SIZE};
use telehash_core::encoding::hex;
use telehash_core::logging;
use telehash_core::LINE_ID_SIZE;

/// Derives the per-direction AES keys for a line.
///
/// Encryption uses the id travelling in our outgoing packets (chosen by the
/// remote peer), decryption the id we chose ourselves. The asymmetry means a
/// reflected packet never decrypts.
pub fn derive_keys(
    shared: &[u8; KEY_SIZE],
    line_out: &[u8; LINE_ID_SIZE],
    line_in: &[u8; LINE_ID_SIZE],
) -> ([u8; KEY_SIZE], [u8; KEY_SIZE]) {
    (
        crypto::sha256(&[shared, line_out]),
        crypto::sha256(&[shared, line_in]),
    )
}

/// An established encrypted session with one remote peer. Owns the channels
/// multiplexed over it; all mutation happens on the reactor thread.
pub struct Line {
    remote: Node,
    line_in: [u8; LINE_ID_SIZE],
    line_out: [u8; LINE_ID_SIZE],
    enc_key: [u8; KEY_SIZE],
    dec_key: [u8; KEY_SIZE],
    channels: HashMap<ChannelId, Channel>,
    last_ingress: Instant,
    last_egress: Instant,
    log: logging::Logger,
}

impl Line {
    pub fn new(
        remote: Node,
        line_in: [u8; LINE_ID_SIZE],
        line_out: [u8; LINE_ID_SIZE],
        shared: [u8; KEY_SIZE],
        log: logging::Logger,
    ) -> Line {
        let (enc_key, dec_key) = derive_keys(&shared, &line_out, &line_in);
        let now = Instant::now();

        Line {
            remote,
            line_in,
            line_out,
            enc_key,
            dec_key,
            channels: HashMap::new(),
            last_ingress: now,
            last_egress: now,
            log,
        }
    }

    #[inline]
    pub fn remote(&self) -> &Node {
        &self.remote
    }

    #[inline]
    pub fn line_in(&self) -> &[u8; LINE_ID_SIZE] {
        &self.line_in
    }

    #[inline]
    pub fn line_out(&self) -> &[u8; LINE_ID_SIZE] {
        &self.line_out
    }

    #[inline]
    pub fn last_ingress_elapsed(&self, now: Instant) -> Duration {
        now.duration_since(self.last_ingress)
    }

    #[inline]
    pub fn last_egress_elapsed(&self, now: Instant) -> Duration {
        now.duration_since(self.last_egress)
    }

    /// Endpoint for outgoing datagrams on this line.
    #[inline]
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.remote.endpoint()
    }

    /// Encrypts and frames an inner packet for this line.
    pub fn render_packet<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        inner_json: &Fields,
        inner_body: &[u8],
        now: Instant,
    ) -> NetResult<Vec<u8>> {
        let mut inner = packet::frame(inner_json, inner_body)?;

        let mut iv = [0u8; IV_SIZE];
        crypto::random_bytes(rng, &mut iv);
        crypto::aes_ctr(&self.enc_key, &iv, &mut inner);

        let mut outer = Fields::new();
        outer.insert("type".to_string(), Value::from("line"));
        outer.insert("line".to_string(), Value::from(hex::encode(&self.line_out)));
        outer.insert("iv".to_string(), Value::from(hex::encode(&iv)));

        let rendered = packet::frame(&outer, &inner)?;
        packet::check_size(&rendered)?;

        self.last_egress = now;
        Ok(rendered)
    }

    /// Decrypts an inbound line packet body into its inner JSON and payload.
    /// Any valid packet refreshes the idle clock.
    pub fn parse_packet(
        &mut self,
        iv: &[u8; IV_SIZE],
        body: &[u8],
        now: Instant,
    ) -> NetResult<(Fields, Vec<u8>)> {
        let mut inner = body.to_vec();
        crypto::aes_ctr(&self.dec_key, iv, &mut inner);

        let (json, rest) = match packet::unframe(&inner) {
            Ok(parts) => parts,
            // A framing failure after decryption means the keys or the
            // ciphertext are wrong.
            Err(NetError::Malformed(_)) => return Err(NetError::Crypto),
            Err(err) => return Err(err),
        };

        let rest = rest.to_vec();
        self.last_ingress = now;

        Ok((json, rest))
    }

    #[inline]
    pub fn channel_mut(&mut self, id: &ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(id)
    }

    #[inline]
    pub fn insert_channel(&mut self, channel: Channel) {
        logging::debug!(self.log, "channel installed";
                        "context" => "insert_channel",
                        "channel" => hex::encode(channel.id()),
                        "kind" => channel.kind());

        self.channels.insert(*channel.id(), channel);
    }

    #[inline]
    pub fn remove_channel(&mut self, id: &ChannelId) {
        self.channels.remove(id);
    }

    /// Fails every channel and clears the table. Used on replacement, idle
    /// teardown and switch stop.
    pub fn teardown(&mut self, error: ChannelError) {
        logging::debug!(self.log, "line teardown";
                        "context" => "teardown",
                        "remote" => %self.remote.hashname(),
                        "channels" => self.channels.len(),
                        "error" => ?error);

        for (_, mut channel) in self.channels.drain() {
            channel.fail(error);
        }
    }
}
