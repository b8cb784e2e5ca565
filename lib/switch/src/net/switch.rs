use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use hashbrown::HashMap;
use mio::net::UdpSocket;
use mio::{Events, Poll, PollOpt, Ready, Registration, Token};
use rand::rngs::OsRng;
use serde_derive::Deserialize;

use crate::identity::{HashName, Identity};
use crate::net::channel::{Channel, ChannelId, ChannelListener, ChannelPacket};
use crate::net::line::Line;
use crate::net::open;
use crate::net::packet::{self, Fields, PacketKind};
use crate::net::queue::{command_queue, Command, CommandQueue};
use crate::net::shared::{
    ChannelError, NetError, NetResult, OpenFailure, RejectReason, SendError, StartError,
    DEFAULT_PORT, MAX_PACKET_SIZE,
};
use crate::node::Node;
use telehash_core::crypto::{self, IV_SIZE};
use telehash_core::logging;
use telehash_core::time;
use telehash_core::LINE_ID_SIZE;

const SOCKET_TOKEN: Token = Token(0);
const WAKE_TOKEN: Token = Token(1);

/// Upper bound on how long the reactor sleeps between housekeeping passes.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

const RECV_BUF_SIZE: usize = 1500;

/// Completion handler for `open_line`: exactly one of the two callbacks
/// fires, on the reactor thread.
pub trait OpenListener: Send {
    fn completed(self: Box<Self>, line: LineHandle);
    fn failed(self: Box<Self>, error: OpenFailure);
}

/// Creates handlers for channels opened by remote peers, registered per
/// channel type before the switch starts.
pub trait ChannelFactory: Send {
    fn accept(&mut self, channel: ChannelHandle) -> Box<dyn ChannelListener>;
}

/// Application-side handle onto an established line. Cheap to clone and
/// usable from any thread; operations are relayed to the reactor.
#[derive(Clone)]
pub struct LineHandle {
    remote: HashName,
    endpoint: SocketAddr,
    queue: CommandQueue,
}

impl LineHandle {
    #[inline]
    pub fn hashname(&self) -> &HashName {
        &self.remote
    }

    #[inline]
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Opens a channel of the given type over this line. The first packet
    /// sent on the returned handle carries the type to the peer.
    pub fn open_channel(
        &self,
        kind: &str,
        listener: Box<dyn ChannelListener>,
    ) -> Result<ChannelHandle, SendError> {
        let id: ChannelId = rand::random();

        self.queue.push(Command::OpenChannel {
            line: self.remote,
            id,
            kind: kind.to_string(),
            listener,
        })?;

        Ok(ChannelHandle {
            line: self.remote,
            id,
            queue: self.queue.clone(),
        })
    }
}

/// Application-side handle onto one channel.
#[derive(Clone)]
pub struct ChannelHandle {
    line: HashName,
    id: ChannelId,
    queue: CommandQueue,
}

impl ChannelHandle {
    #[inline]
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn send(&self, fields: Fields, body: Vec<u8>) -> Result<(), SendError> {
        // Leave headroom for the line envelope and channel metadata; the
        // exact bound is enforced again at render time.
        if body.len() + 256 > MAX_PACKET_SIZE {
            return Err(SendError::PayloadTooLarge);
        }

        self.queue.push(Command::ChannelSend {
            line: self.line,
            id: self.id,
            fields,
            body,
            end: false,
        })
    }

    /// Sends the terminating packet and releases the channel on both sides.
    pub fn close(&self) -> Result<(), SendError> {
        self.queue.push(Command::CloseChannel {
            line: self.line,
            id: self.id,
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    /// UDP port to bind; 0 selects an ephemeral port.
    pub port: u16,
    pub queue_capacity: usize,
    pub open_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub keepalive_ms: u64,
    /// Bootstrap nodes supplied at construction.
    #[serde(skip)]
    pub seeds: Vec<Node>,
}

impl Default for SwitchConfig {
    fn default() -> SwitchConfig {
        SwitchConfig {
            port: DEFAULT_PORT,
            queue_capacity: 256,
            open_timeout_ms: 10_000,
            idle_timeout_ms: 60_000,
            keepalive_ms: 25_000,
            seeds: Vec::new(),
        }
    }
}

impl SwitchConfig {
    #[inline]
    fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    #[inline]
    fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[inline]
    fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }
}

/// The per-process switch: owns the socket, the identity, the line and
/// pending-open tables and the reactor thread driving them.
pub struct Switch {
    identity: Arc<Identity>,
    config: SwitchConfig,
    factories: HashMap<String, Box<dyn ChannelFactory>>,
    queue: Option<CommandQueue>,
    local_addr: Option<SocketAddr>,
    thread: Option<thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    log: logging::Logger,
}

impl Switch {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        identity: Identity,
        config: SwitchConfig,
        log: L,
    ) -> Switch {
        let log = match log.into() {
            Some(log) => log.new(logging::o!()),
            None => logging::Logger::root(logging::Discard, logging::o!()),
        };

        Switch {
            identity: Arc::new(identity),
            config,
            factories: HashMap::new(),
            queue: None,
            local_addr: None,
            thread: None,
            stop: Arc::new(AtomicBool::new(false)),
            log,
        }
    }

    #[inline]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    #[inline]
    pub fn hashname(&self) -> &HashName {
        self.identity.hashname()
    }

    /// Bound address once the switch is running.
    #[inline]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    #[inline]
    pub fn seeds(&self) -> &[Node] {
        &self.config.seeds
    }

    /// Registers a handler factory for channels opened by remote peers.
    /// Must be called before `start`; the registry moves onto the reactor.
    pub fn register_channel_type(&mut self, kind: &str, factory: Box<dyn ChannelFactory>) {
        self.factories.insert(kind.to_string(), factory);
    }

    /// Binds the socket and spawns the reactor thread. Returns once the
    /// thread is running; any bind error leaves no partial state behind.
    pub fn start(&mut self) -> Result<(), StartError> {
        if self.thread.is_some() {
            return Err(StartError::AlreadyRunning);
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let socket = UdpSocket::bind(&addr).map_err(StartError::Bind)?;
        let local_addr = socket.local_addr().map_err(StartError::Bind)?;

        let poll = Poll::new().map_err(StartError::Bind)?;
        poll.register(&socket, SOCKET_TOKEN, Ready::readable(), PollOpt::level())
            .map_err(StartError::Bind)?;

        let (queue, rx, registration) = command_queue(self.config.queue_capacity);
        poll.register(&registration, WAKE_TOKEN, Ready::readable(), PollOpt::level())
            .map_err(StartError::Bind)?;

        self.stop.store(false, Ordering::Relaxed);

        let reactor = Reactor {
            identity: self.identity.clone(),
            config: self.config.clone(),
            socket,
            poll,
            events: Events::with_capacity(64),
            _registration: registration,
            rx,
            queue: queue.clone(),
            local_addr,
            egress: VecDeque::new(),
            pending: HashMap::new(),
            lines: HashMap::new(),
            by_peer: HashMap::new(),
            last_open_at: HashMap::new(),
            factories: std::mem::take(&mut self.factories),
            stop: self.stop.clone(),
            write_interest: false,
            buf: [0u8; RECV_BUF_SIZE],
            log: self.log.new(logging::o!()),
        };

        let thread = thread::Builder::new()
            .name("telehash-switch".to_string())
            .spawn(move || reactor.run())
            .map_err(StartError::Bind)?;

        self.queue = Some(queue);
        self.local_addr = Some(local_addr);
        self.thread = Some(thread);

        Ok(())
    }

    /// Requests the reactor to exit. Idempotent and non-blocking; pending
    /// completions and live channels receive `SwitchStopped` during
    /// teardown.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);

        if let Some(queue) = &self.queue {
            drop(queue.push(Command::Stop));
        }
    }

    /// Waits for the reactor thread to exit.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            drop(thread.join());
        }
    }

    /// Initiates the open handshake towards `node`. The completion fires on
    /// the reactor thread, exactly once.
    pub fn open_line(
        &self,
        node: Node,
        completion: Box<dyn OpenListener>,
    ) -> Result<(), SendError> {
        match &self.queue {
            Some(queue) => queue.push(Command::OpenLine { node, completion }),
            None => Err(SendError::SwitchStopped),
        }
    }
}

impl Drop for Switch {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One outstanding open towards a peer: the ephemeral keypair and line half
/// that a matching inbound open will complete.
struct PendingOpen {
    node: Node,
    ec: crypto::EcKeyPair,
    line_id: [u8; LINE_ID_SIZE],
    at: u64,
    deadline: Instant,
    completion: Box<dyn OpenListener>,
}

/// The single-threaded reactor. Every table below is touched exclusively
/// from `run`; application threads reach it only through the command queue.
struct Reactor {
    identity: Arc<Identity>,
    config: SwitchConfig,
    socket: UdpSocket,
    poll: Poll,
    events: Events,
    _registration: Registration,
    rx: Receiver<Command>,
    queue: CommandQueue,
    local_addr: SocketAddr,
    egress: VecDeque<(SocketAddr, Vec<u8>)>,
    pending: HashMap<HashName, VecDeque<PendingOpen>>,
    lines: HashMap<[u8; LINE_ID_SIZE], Line>,
    by_peer: HashMap<HashName, [u8; LINE_ID_SIZE]>,
    last_open_at: HashMap<HashName, u64>,
    factories: HashMap<String, Box<dyn ChannelFactory>>,
    stop: Arc<AtomicBool>,
    write_interest: bool,
    buf: [u8; RECV_BUF_SIZE],
    log: logging::Logger,
}

impl Reactor {
    fn run(mut self) {
        logging::info!(self.log, "switch started";
                       "context" => "run",
                       "local" => %self.local_addr,
                       "hashname" => %self.identity.hashname());

        while !self.stop.load(Ordering::Relaxed) {
            if let Err(err) = self.poll.poll(&mut self.events, Some(POLL_INTERVAL)) {
                // Only an unrecoverable selector error exits the loop.
                logging::error!(self.log, "selector poll failed";
                                "context" => "run",
                                "error" => %err);
                break;
            }

            let mut readable = false;
            let mut writable = false;

            // The wake token only forces the poll to return early; commands
            // are drained unconditionally below.
            for event in &self.events {
                if event.token() == SOCKET_TOKEN {
                    if event.readiness().is_readable() {
                        readable = true;
                    }
                    if event.readiness().is_writable() {
                        writable = true;
                    }
                }
            }

            self.drain_commands();

            if readable {
                self.receive_one();
            }

            if writable {
                self.flush_one();
            }

            self.housekeeping(Instant::now());
            self.update_interest();
        }

        self.shutdown();
    }

    /// Drains every queued command. Readiness is cleared first so a racing
    /// push re-arms the wake-up rather than getting lost.
    fn drain_commands(&mut self) {
        self.queue.clear_wake();

        while let Ok(command) = self.rx.try_recv() {
            self.handle_command(command);
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::OpenLine { node, completion } => self.start_open(node, completion),
            Command::OpenChannel {
                line,
                id,
                kind,
                listener,
            } => self.open_channel(line, id, kind, listener),
            Command::ChannelSend {
                line,
                id,
                fields,
                body,
                end,
            } => self.channel_send(line, id, fields, body, end),
            Command::CloseChannel { line, id } => {
                self.channel_send(line, id, Fields::new(), Vec::new(), true)
            }
            Command::Stop => self.stop.store(true, Ordering::Relaxed),
        }
    }

    /// Renders and queues a fresh open towards `node` and records the
    /// pending half until the peer answers or the deadline passes.
    fn start_open(&mut self, node: Node, completion: Box<dyn OpenListener>) {
        let endpoint = match node.endpoint() {
            Some(endpoint) => endpoint,
            None => {
                completion.failed(OpenFailure::NoEndpoint);
                return;
            }
        };

        let mut rng = OsRng;
        let ec = crypto::ec_generate(&mut rng);
        let mut line_id = [0u8; LINE_ID_SIZE];
        crypto::random_bytes(&mut rng, &mut line_id);
        let at = time::timestamp_millis();

        let rendered = match open::render(
            &mut rng,
            &self.identity,
            &node,
            &ec.public_bytes(),
            &line_id,
            at,
        ) {
            Ok(rendered) => rendered,
            Err(err) => {
                logging::warn!(self.log, "failed to render open";
                               "context" => "start_open",
                               "remote" => %node.hashname(),
                               "error" => ?err);
                completion.failed(OpenFailure::Crypto);
                return;
            }
        };

        logging::debug!(self.log, "sending open";
                        "context" => "start_open",
                        "remote" => %node.hashname(),
                        "endpoint" => %endpoint,
                        "at" => at);

        self.egress.push_back((endpoint, rendered));

        let deadline = Instant::now() + self.config.open_timeout();
        let peer = *node.hashname();

        self.pending
            .entry(peer)
            .or_insert_with(VecDeque::new)
            .push_back(PendingOpen {
                node,
                ec,
                line_id,
                at,
                deadline,
                completion,
            });
    }

    fn open_channel(
        &mut self,
        peer: HashName,
        id: ChannelId,
        kind: String,
        mut listener: Box<dyn ChannelListener>,
    ) {
        let line_in = match self.by_peer.get(&peer).copied() {
            Some(line_in) => line_in,
            None => {
                listener.handle_error(ChannelError::LineClosed);
                return;
            }
        };

        if let Some(line) = self.lines.get_mut(&line_in) {
            let log = self.log.new(logging::o!());
            line.insert_channel(Channel::new_outbound(id, kind, listener, log));
        } else {
            listener.handle_error(ChannelError::LineClosed);
        }
    }

    fn channel_send(
        &mut self,
        peer: HashName,
        id: ChannelId,
        fields: Fields,
        body: Vec<u8>,
        end: bool,
    ) {
        let line_in = match self.by_peer.get(&peer).copied() {
            Some(line_in) => line_in,
            None => {
                logging::warn!(self.log, "send on unknown line";
                               "context" => "channel_send",
                               "remote" => %peer);
                return;
            }
        };

        let line = match self.lines.get_mut(&line_in) {
            Some(line) => line,
            None => return,
        };

        let endpoint = match line.endpoint() {
            Some(endpoint) => endpoint,
            None => return,
        };

        let inner = match line.channel_mut(&id) {
            Some(channel) => channel.outgoing_fields(fields, end),
            None => {
                logging::warn!(self.log, "send on unknown channel";
                               "context" => "channel_send",
                               "remote" => %peer);
                return;
            }
        };

        let mut rng = OsRng;
        match line.render_packet(&mut rng, &inner, &body, Instant::now()) {
            Ok(rendered) => self.egress.push_back((endpoint, rendered)),
            Err(err) => {
                logging::warn!(self.log, "failed to render channel packet";
                               "context" => "channel_send",
                               "remote" => %peer,
                               "error" => ?err);
            }
        }

        if end {
            line.remove_channel(&id);
        }
    }

    fn receive_one(&mut self) {
        let (len, source) = match self.socket.recv_from(&mut self.buf) {
            Ok(pair) => pair,
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return,
            Err(err) => {
                logging::warn!(self.log, "socket receive failed";
                               "context" => "receive",
                               "error" => %err);
                return;
            }
        };

        let datagram = self.buf[..len].to_vec();

        if let Err(err) = self.handle_datagram(&datagram, source) {
            // Anything originating on the wire is logged and dropped.
            logging::debug!(self.log, "dropping packet";
                            "context" => "receive",
                            "source" => %source,
                            "size" => len,
                            "error" => ?err);
        }
    }

    fn handle_datagram(&mut self, datagram: &[u8], source: SocketAddr) -> NetResult<()> {
        let (json, body) = packet::unframe(datagram)?;

        match packet::classify(&json)? {
            PacketKind::Open => self.handle_open(&json, body, source),
            PacketKind::Line => self.handle_line(&json, body),
        }
    }

    fn handle_open(&mut self, json: &Fields, body: &[u8], source: SocketAddr) -> NetResult<()> {
        let open = open::parse(&self.identity, json, body, source, time::timestamp_millis())?;
        let peer = *open.sender.hashname();

        if peer == *self.identity.hashname() {
            return Err(NetError::Malformed("open from self"));
        }

        // Open times must strictly increase per sender; an equal or older
        // value is a replay (or an already superseded line attempt).
        if let Some(&last) = self.last_open_at.get(&peer) {
            if open.at <= last {
                return Err(NetError::Rejected(RejectReason::Replay));
            }
        }
        self.last_open_at.insert(peer, open.at);

        let pending_entry = self
            .pending
            .get_mut(&peer)
            .and_then(|queue| queue.pop_front());
        if self.pending.get(&peer).map_or(false, VecDeque::is_empty) {
            self.pending.remove(&peer);
        }

        match pending_entry {
            Some(pending) => {
                // The answer to an open we sent: both halves are known.
                let shared = pending.ec.agree(&open.ec_public);
                let mut node = pending.node;
                node.set_endpoint(source);

                let handle = self.install_line(node, source, pending.line_id, open.line_id, shared);
                pending.completion.completed(handle);
            }
            None => {
                // Unsolicited open: send our own half back, then establish.
                let mut rng = OsRng;
                let ec = crypto::ec_generate(&mut rng);
                let mut line_id = [0u8; LINE_ID_SIZE];
                crypto::random_bytes(&mut rng, &mut line_id);
                let at = time::timestamp_millis();

                let node = open.sender.clone();
                let rendered = open::render(
                    &mut rng,
                    &self.identity,
                    &node,
                    &ec.public_bytes(),
                    &line_id,
                    at,
                )?;

                logging::debug!(self.log, "answering unsolicited open";
                                "context" => "handle_open",
                                "remote" => %peer,
                                "endpoint" => %source);

                self.egress.push_back((source, rendered));

                let shared = ec.agree(&open.ec_public);
                self.install_line(node, source, line_id, open.line_id, shared);
            }
        }

        Ok(())
    }

    /// Installs a freshly negotiated line, superseding any previous line
    /// with the same peer.
    fn install_line(
        &mut self,
        node: Node,
        endpoint: SocketAddr,
        line_in: [u8; LINE_ID_SIZE],
        line_out: [u8; LINE_ID_SIZE],
        shared: [u8; crypto::KEY_SIZE],
    ) -> LineHandle {
        let peer = *node.hashname();

        if let Some(old_in) = self.by_peer.remove(&peer) {
            if let Some(mut old) = self.lines.remove(&old_in) {
                logging::info!(self.log, "line replaced";
                               "context" => "install_line",
                               "remote" => %peer);
                old.teardown(ChannelError::LineReplaced);
            }
        }

        let log = self.log.new(logging::o!());
        self.lines
            .insert(line_in, Line::new(node, line_in, line_out, shared, log));
        self.by_peer.insert(peer, line_in);

        logging::info!(self.log, "line established";
                       "context" => "install_line",
                       "remote" => %peer,
                       "endpoint" => %endpoint);

        LineHandle {
            remote: peer,
            endpoint,
            queue: self.queue.clone(),
        }
    }

    fn handle_line(&mut self, json: &Fields, body: &[u8]) -> NetResult<()> {
        let line_id: [u8; LINE_ID_SIZE] = packet::hex_field(json, "line")?;
        let iv: [u8; IV_SIZE] = packet::hex_field(json, "iv")?;

        let line = self
            .lines
            .get_mut(&line_id)
            .ok_or(NetError::Malformed("unknown line"))?;

        let (inner_json, inner_body) = line.parse_packet(&iv, body, Instant::now())?;
        let (channel_id, packet) = ChannelPacket::from_inner(inner_json, inner_body)?;

        let channel_id = match channel_id {
            // No channel id: a bare keep-alive, already accounted for by the
            // refreshed ingress clock.
            None => return Ok(()),
            Some(channel_id) => channel_id,
        };

        let end = packet.end;

        if let Some(channel) = line.channel_mut(&channel_id) {
            channel.deliver(packet);

            if end {
                line.remove_channel(&channel_id);
            }

            return Ok(());
        }

        // Unknown channel: a `type` makes it a new inbound channel, handed
        // to the registered factory for its kind.
        let kind = match packet.kind.clone() {
            Some(kind) => kind,
            None => return Err(NetError::Malformed("unknown channel")),
        };

        let peer = *line.remote().hashname();

        let factory = match self.factories.get_mut(&kind) {
            Some(factory) => factory,
            None => {
                logging::debug!(self.log, "no handler for inbound channel";
                                "context" => "handle_line",
                                "remote" => %peer,
                                "kind" => kind);
                return Ok(());
            }
        };

        let handle = ChannelHandle {
            line: peer,
            id: channel_id,
            queue: self.queue.clone(),
        };
        let listener = factory.accept(handle);

        let mut channel = Channel::new_inbound(channel_id, kind, self.log.new(logging::o!()));
        channel.set_listener(listener);
        channel.deliver(packet);

        if !end {
            line.insert_channel(channel);
        }

        Ok(())
    }

    fn flush_one(&mut self) {
        if let Some((dest, datagram)) = self.egress.pop_front() {
            match self.socket.send_to(&datagram, &dest) {
                Ok(_) => {
                    logging::trace!(self.log, "datagram sent";
                                    "context" => "flush",
                                    "dest" => %dest,
                                    "size" => datagram.len());
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.egress.push_front((dest, datagram));
                }
                Err(err) => {
                    logging::warn!(self.log, "send failed, dropping datagram";
                                   "context" => "flush",
                                   "dest" => %dest,
                                   "error" => %err);
                }
            }
        }
    }

    fn housekeeping(&mut self, now: Instant) {
        // Expired pending opens fire their completions with a timeout.
        let mut expired = Vec::new();

        self.pending.retain(|_, queue| {
            loop {
                match queue.front() {
                    Some(entry) if entry.deadline <= now => {
                        if let Some(entry) = queue.pop_front() {
                            expired.push(entry);
                        }
                    }
                    _ => break,
                }
            }

            !queue.is_empty()
        });

        for entry in expired {
            logging::info!(self.log, "open timed out";
                           "context" => "housekeeping",
                           "remote" => %entry.node.hashname(),
                           "at" => entry.at);
            entry.completion.failed(OpenFailure::Timeout);
        }

        // Idle lines are torn down; quiet ones get a keep-alive.
        let idle_timeout = self.config.idle_timeout();
        let keepalive = self.config.keepalive();

        let mut dead = Vec::new();
        let mut quiet = Vec::new();

        for (line_in, line) in self.lines.iter() {
            if line.last_ingress_elapsed(now) >= idle_timeout {
                dead.push(*line_in);
            } else if line.last_egress_elapsed(now) >= keepalive {
                quiet.push(*line_in);
            }
        }

        for line_in in dead {
            if let Some(mut line) = self.lines.remove(&line_in) {
                logging::info!(self.log, "line idle, tearing down";
                               "context" => "housekeeping",
                               "remote" => %line.remote().hashname());
                self.by_peer.remove(line.remote().hashname());
                line.teardown(ChannelError::LineClosed);
            }
        }

        let mut rng = OsRng;
        for line_in in quiet {
            if let Some(line) = self.lines.get_mut(&line_in) {
                let endpoint = match line.endpoint() {
                    Some(endpoint) => endpoint,
                    None => continue,
                };

                match line.render_packet(&mut rng, &Fields::new(), &[], now) {
                    Ok(rendered) => self.egress.push_back((endpoint, rendered)),
                    Err(err) => {
                        logging::warn!(self.log, "keep-alive render failed";
                                       "context" => "housekeeping",
                                       "error" => ?err);
                    }
                }
            }
        }
    }

    /// Registers WRITE interest only while there is something to send.
    fn update_interest(&mut self) {
        let want_write = !self.egress.is_empty();

        if want_write == self.write_interest {
            return;
        }

        let mut ready = Ready::readable();
        if want_write {
            ready = ready | Ready::writable();
        }

        match self
            .poll
            .reregister(&self.socket, SOCKET_TOKEN, ready, PollOpt::level())
        {
            Ok(()) => self.write_interest = want_write,
            Err(err) => {
                logging::error!(self.log, "selector reregistration failed";
                                "context" => "update_interest",
                                "error" => %err);
            }
        }
    }

    /// Drains every outstanding completion and channel with `SwitchStopped`.
    /// The socket and selector close when `self` drops, on every exit path.
    fn shutdown(mut self) {
        logging::info!(self.log, "switch stopping"; "context" => "shutdown");

        for (_, queue) in self.pending.drain() {
            for entry in queue {
                entry.completion.failed(OpenFailure::SwitchStopped);
            }
        }

        for (_, mut line) in self.lines.drain() {
            line.teardown(ChannelError::SwitchStopped);
        }

        // Commands that raced the stop flag still carry completions.
        while let Ok(command) = self.rx.try_recv() {
            match command {
                Command::OpenLine { completion, .. } => {
                    completion.failed(OpenFailure::SwitchStopped)
                }
                Command::OpenChannel { mut listener, .. } => {
                    listener.handle_error(ChannelError::SwitchStopped)
                }
                _ => (),
            }
        }

        logging::info!(self.log, "switch stopped"; "context" => "shutdown");
    }
}
