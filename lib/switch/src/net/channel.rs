use std::collections::VecDeque;

use serde_json::Value;

use crate::net::packet::Fields;
use crate::net::shared::{ChannelError, NetError, NetResult};
use telehash_core::encoding::hex;
use telehash_core::logging;
use telehash_core::LINE_ID_SIZE;

/// Channel identifiers are 16 random bytes, hex encoded on the wire.
pub const CHANNEL_ID_SIZE: usize = LINE_ID_SIZE;

pub type ChannelId = [u8; CHANNEL_ID_SIZE];

/// Packets buffered on a channel before the application installs a handler.
pub const BACKLOG_LIMIT: usize = 32;

/// A decoded channel-level packet: the channel metadata stripped out, the
/// application fields and opaque payload left intact.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPacket {
    /// Channel type, present on the first packet of a channel.
    pub kind: Option<String>,
    pub seq: Option<u64>,
    /// Terminator flag; the channel is gone once this is delivered.
    pub end: bool,
    pub fields: Fields,
    pub body: Vec<u8>,
}

impl ChannelPacket {
    /// Splits a decrypted line inner packet into the target channel id and
    /// the channel packet. Packets with no `c` are line keep-alives.
    pub fn from_inner(mut json: Fields, body: Vec<u8>) -> NetResult<(Option<ChannelId>, ChannelPacket)> {
        let channel_id = match json.remove("c") {
            Some(Value::String(text)) => Some(
                hex::decode_exact(&text).map_err(|_| NetError::Malformed("channel id"))?,
            ),
            Some(_) => return Err(NetError::Malformed("channel id")),
            None => None,
        };

        let kind = match json.remove("type") {
            Some(Value::String(text)) => Some(text),
            Some(_) => return Err(NetError::Malformed("channel type")),
            None => None,
        };

        let seq = json.remove("seq").as_ref().and_then(Value::as_u64);
        let end = json
            .remove("end")
            .as_ref()
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok((
            channel_id,
            ChannelPacket {
                kind,
                seq,
                end,
                fields: json,
                body,
            },
        ))
    }
}

/// Application-side handler for a channel. Callbacks run on the reactor
/// thread, in receive order for any one channel.
pub trait ChannelListener: Send {
    fn handle_incoming(&mut self, packet: ChannelPacket);
    fn handle_error(&mut self, error: ChannelError);
}

/// One logical stream multiplexed over a line. Owned by its line; destroyed
/// on explicit close, line replacement or switch teardown.
pub struct Channel {
    id: ChannelId,
    kind: String,
    seq: u64,
    listener: Option<Box<dyn ChannelListener>>,
    backlog: VecDeque<ChannelPacket>,
    log: logging::Logger,
}

impl Channel {
    /// A locally opened channel with its handler already installed.
    pub fn new_outbound(
        id: ChannelId,
        kind: String,
        listener: Box<dyn ChannelListener>,
        log: logging::Logger,
    ) -> Channel {
        Channel {
            id,
            kind,
            seq: 0,
            listener: Some(listener),
            backlog: VecDeque::new(),
            log,
        }
    }

    /// A remotely opened channel. Packets queue until a listener arrives.
    pub fn new_inbound(id: ChannelId, kind: String, log: logging::Logger) -> Channel {
        Channel {
            id,
            kind,
            seq: 0,
            listener: None,
            backlog: VecDeque::new(),
            log,
        }
    }

    #[inline]
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Stamps the channel metadata onto an outgoing packet's fields. The
    /// first packet carries the channel type; every packet carries a
    /// monotonic sequence number.
    pub fn outgoing_fields(&mut self, mut fields: Fields, end: bool) -> Fields {
        fields.insert("c".to_string(), Value::from(hex::encode(&self.id)));

        if self.seq == 0 {
            fields.insert("type".to_string(), Value::from(self.kind.clone()));
        }

        fields.insert("seq".to_string(), Value::from(self.seq));

        if end {
            fields.insert("end".to_string(), Value::from(true));
        }

        self.seq += 1;
        fields
    }

    /// Installs the handler and drains any packets that raced ahead of it.
    pub fn set_listener(&mut self, mut listener: Box<dyn ChannelListener>) {
        for packet in self.backlog.drain(..) {
            listener.handle_incoming(packet);
        }

        self.listener = Some(listener);
    }

    /// Hands an inbound packet to the listener, or parks it on the backlog.
    pub fn deliver(&mut self, packet: ChannelPacket) {
        match self.listener.as_mut() {
            Some(listener) => listener.handle_incoming(packet),
            None => {
                if self.backlog.len() >= BACKLOG_LIMIT {
                    logging::warn!(self.log, "channel backlog overflow, dropping packet";
                                   "context" => "deliver",
                                   "channel" => hex::encode(&self.id));
                    return;
                }

                self.backlog.push_back(packet);
            }
        }
    }

    /// Surfaces a terminal error to the listener, if one is installed.
    pub fn fail(&mut self, error: ChannelError) {
        if let Some(listener) = self.listener.as_mut() {
            listener.handle_error(error);
        }
    }
}
