//! Thin smoke client: opens a line to a seed node and runs one `seek`
//! query over it, printing whatever comes back.

use std::fs;
use std::net::SocketAddr;
use std::sync::mpsc;
use std::time::Duration;

use clap::{App, Arg};
use rand::rngs::OsRng;
use serde_json::Value;

use telehash_core::logging;
use telehash_switch::identity::Identity;
use telehash_switch::net::packet::Fields;
use telehash_switch::net::shared::{ChannelError, OpenFailure};
use telehash_switch::net::switch::{LineHandle, OpenListener, Switch, SwitchConfig};
use telehash_switch::net::channel::{ChannelListener, ChannelPacket};
use telehash_switch::node::Node;
use telehash_switch::storage::{FileStorage, Storage, StorageError};

struct Completion(mpsc::Sender<Result<LineHandle, OpenFailure>>);

impl OpenListener for Completion {
    fn completed(self: Box<Self>, line: LineHandle) {
        self.0.send(Ok(line)).expect("Main thread went away");
    }

    fn failed(self: Box<Self>, error: OpenFailure) {
        self.0.send(Err(error)).expect("Main thread went away");
    }
}

struct Printer(mpsc::Sender<ChannelPacket>);

impl ChannelListener for Printer {
    fn handle_incoming(&mut self, packet: ChannelPacket) {
        self.0.send(packet).expect("Main thread went away");
    }

    fn handle_error(&mut self, error: ChannelError) {
        eprintln!("seek channel error: {:?}", error);
    }
}

fn main() {
    let matches = App::new("Seeker")
        .version("1.0")
        .about("Opens a line to a seed node and runs a single seek query.")
        .arg(
            Arg::with_name("SEED_ADDR")
                .help("Seed endpoint, e.g. 1.2.3.4:42424")
                .required(true),
        )
        .arg(
            Arg::with_name("SEED_KEY")
                .help("Path to the seed's DER encoded RSA public key")
                .required(true),
        )
        .arg(
            Arg::with_name("IDENTITY_DIR")
                .help("Directory holding (or receiving) our identity files")
                .required(true),
        )
        .arg(
            Arg::with_name("PORT")
                .help("Local UDP port (defaults to an ephemeral one)")
                .required(false),
        )
        .get_matches();

    let log = logging::init();

    let seed_addr: SocketAddr = matches
        .value_of("SEED_ADDR")
        .unwrap()
        .parse()
        .expect("Seed address must be ip:port");
    let seed_der = fs::read(matches.value_of("SEED_KEY").unwrap()).expect("Error reading seed key");
    let seed = Node::from_public_der(&seed_der, Some(seed_addr)).expect("Seed key is not valid DER");

    let storage = FileStorage::new(matches.value_of("IDENTITY_DIR").unwrap());
    let identity = match storage.read_identity("seeker") {
        Ok(identity) => identity,
        Err(StorageError::NotFound) => {
            logging::info!(log, "no identity found, generating one");
            let identity = Identity::generate(&mut OsRng).expect("Identity generation failed");
            storage
                .write_identity(&identity, "seeker")
                .expect("Failed writing identity files");
            identity
        }
        Err(err) => panic!("Failed reading identity: {:?}", err),
    };

    logging::info!(log, "seeker starting";
                   "hashname" => %identity.hashname(),
                   "seed" => %seed.hashname());

    let mut config = SwitchConfig::default();
    config.port = matches
        .value_of("PORT")
        .map(|port| port.parse().expect("Port must be an integer"))
        .unwrap_or(0);
    config.seeds = vec![seed.clone()];

    let local_hashname = identity.hashname().to_hex();

    let mut switch = Switch::new(identity, config, &log);
    switch.start().expect("Switch failed to start");

    let (line_tx, line_rx) = mpsc::channel();
    switch
        .open_line(seed, Box::new(Completion(line_tx)))
        .expect("Failed to queue the open");

    let line = line_rx
        .recv_timeout(Duration::from_secs(15))
        .expect("No handshake result")
        .expect("Handshake failed");

    logging::info!(log, "line established"; "remote" => %line.hashname());

    let (packet_tx, packet_rx) = mpsc::channel();
    let channel = line
        .open_channel("seek", Box::new(Printer(packet_tx)))
        .expect("Failed to open the seek channel");

    let mut fields = Fields::new();
    fields.insert("seek".to_string(), Value::from(local_hashname));
    channel.send(fields, Vec::new()).expect("Failed to send the seek");

    // Print replies until the seed goes quiet.
    while let Ok(packet) = packet_rx.recv_timeout(Duration::from_secs(5)) {
        println!(
            "seek reply: {} ({} byte body)",
            Value::Object(packet.fields),
            packet.body.len()
        );

        if packet.end {
            break;
        }
    }

    switch.stop();
    switch.join();
}
