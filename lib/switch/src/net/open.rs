use std::net::SocketAddr;

use rand::{CryptoRng, RngCore};
use serde_json::Value;

use crate::identity::Identity;
use crate::net::packet::{self, Fields};
use crate::net::shared::{NetError, NetResult, RejectReason};
use crate::node::Node;
use telehash_core::crypto::{self, EcPublicKey, EC_POINT_SIZE, IV_SIZE};
use telehash_core::encoding::{base64, hex};
use telehash_core::LINE_ID_SIZE;

/// Opens older or newer than this window around the local clock are stale.
pub const OPEN_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

/// A verified inbound open: the sender's identity and endpoint, its
/// ephemeral EC key and the line half it proposes.
#[derive(Debug)]
pub struct OpenPacket {
    pub sender: Node,
    pub ec_public: EcPublicKey,
    pub at: u64,
    pub line_id: [u8; LINE_ID_SIZE],
}

/// Renders an open packet with a random IV and a freshly computed `open`
/// parameter.
pub fn render<R: RngCore + CryptoRng>(
    rng: &mut R,
    identity: &Identity,
    dest: &Node,
    ec_public: &[u8; EC_POINT_SIZE],
    line_id: &[u8; LINE_ID_SIZE],
    at: u64,
) -> NetResult<Vec<u8>> {
    let mut iv = [0u8; IV_SIZE];
    crypto::random_bytes(rng, &mut iv);

    let open_param = crypto::rsa_oaep_encrypt(rng, dest.public(), ec_public)?;

    render_with(identity, dest, ec_public, line_id, at, iv, open_param)
}

/// Renders an open packet from fully specified inputs. Pure given its
/// arguments; the random variant above is a thin shell over this one.
pub fn render_with(
    identity: &Identity,
    dest: &Node,
    ec_public: &[u8; EC_POINT_SIZE],
    line_id: &[u8; LINE_ID_SIZE],
    at: u64,
    iv: [u8; IV_SIZE],
    open_param: Vec<u8>,
) -> NetResult<Vec<u8>> {
    let mut inner_json = Fields::new();
    inner_json.insert("at".to_string(), Value::from(at));
    inner_json.insert("to".to_string(), Value::from(dest.hashname().to_hex()));
    inner_json.insert("line".to_string(), Value::from(hex::encode(line_id)));

    // The inner packet carries the sender's public key as its body, bound to
    // the handshake by the signature over the ciphertext.
    let mut inner = packet::frame(&inner_json, identity.public_der())?;

    let inner_key = crypto::sha256(&[ec_public]);
    crypto::aes_ctr(&inner_key, &iv, &mut inner);

    let mut signature = crypto::rsa_sign(identity.private(), &inner)?;

    let sig_key = crypto::sha256(&[ec_public, line_id]);
    crypto::aes_ctr(&sig_key, &iv, &mut signature);

    let mut outer = Fields::new();
    outer.insert("type".to_string(), Value::from("open"));
    outer.insert("iv".to_string(), Value::from(hex::encode(&iv)));
    outer.insert("sig".to_string(), Value::from(base64::encode(&signature)));
    outer.insert("open".to_string(), Value::from(base64::encode(&open_param)));

    let rendered = packet::frame(&outer, &inner)?;
    packet::check_size(&rendered)?;

    Ok(rendered)
}

/// Parses and verifies an inbound open against the local identity.
///
/// Replay ordering against previously accepted opens is the switch's
/// responsibility; everything else (structure, destination, staleness,
/// signature) is checked here. Pure given its arguments.
pub fn parse(
    identity: &Identity,
    json: &Fields,
    body: &[u8],
    source: SocketAddr,
    now_ms: u64,
) -> NetResult<OpenPacket> {
    let iv: [u8; IV_SIZE] = packet::hex_field(json, "iv")?;
    let open_param = packet::b64_field(json, "open")?;
    let enc_sig = packet::b64_field(json, "sig")?;

    let ec_raw = crypto::rsa_oaep_decrypt(identity.private(), &open_param)
        .map_err(|_| NetError::Rejected(RejectReason::DecryptFailure))?;
    let ec_public = crypto::ec_public_from_bytes(&ec_raw)
        .map_err(|_| NetError::Rejected(RejectReason::DecryptFailure))?;

    let inner_key = crypto::sha256(&[&ec_raw]);
    let mut inner = body.to_vec();
    crypto::aes_ctr(&inner_key, &iv, &mut inner);

    // A wrong inner key produces garbage, which surfaces as a framing error.
    let (inner_json, sender_der) =
        packet::unframe(&inner).map_err(|_| NetError::Rejected(RejectReason::DecryptFailure))?;

    let at = inner_json
        .get("at")
        .and_then(Value::as_u64)
        .ok_or(NetError::Malformed("at"))?;
    let to: [u8; telehash_core::HASHNAME_SIZE] = packet::hex_field(&inner_json, "to")?;
    let line_id: [u8; LINE_ID_SIZE] = packet::hex_field(&inner_json, "line")?;

    if &to != identity.hashname().as_bytes() {
        return Err(NetError::Rejected(RejectReason::WrongDestination));
    }

    let skew = if now_ms > at { now_ms - at } else { at - now_ms };
    if skew > OPEN_WINDOW_MS {
        return Err(NetError::Rejected(RejectReason::Stale));
    }

    let sig_key = crypto::sha256(&[&ec_raw, &line_id]);
    let mut signature = enc_sig;
    crypto::aes_ctr(&sig_key, &iv, &mut signature);

    let sender_key = crypto::rsa_public_from_der(sender_der)
        .map_err(|_| NetError::Rejected(RejectReason::DecryptFailure))?;

    if !crypto::rsa_verify(&sender_key, body, &signature) {
        return Err(NetError::Rejected(RejectReason::BadSignature));
    }

    let sender = Node::new(sender_key, Some(source))?;

    Ok(OpenPacket {
        sender,
        ec_public,
        at,
        line_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::packet::PacketKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const NOW_MS: u64 = 1_500_000_000_000;

    struct Setup {
        rng: StdRng,
        sender: Identity,
        receiver: Identity,
    }

    fn setup(seed: u64) -> Setup {
        let mut rng = StdRng::seed_from_u64(seed);
        let sender = Identity::generate_bits(&mut rng, 1024).unwrap();
        let receiver = Identity::generate_bits(&mut rng, 1024).unwrap();

        Setup {
            rng,
            sender,
            receiver,
        }
    }

    fn source() -> SocketAddr {
        "10.0.0.1:42424".parse().unwrap()
    }

    fn render_open(setup: &mut Setup, at: u64) -> (Vec<u8>, [u8; EC_POINT_SIZE], [u8; LINE_ID_SIZE]) {
        let dest = Node::from_identity(&setup.receiver, None);
        let ec = crypto::ec_generate(&mut setup.rng);
        let ec_public = ec.public_bytes();

        let mut line_id = [0u8; LINE_ID_SIZE];
        crypto::random_bytes(&mut setup.rng, &mut line_id);

        let rendered = render(
            &mut setup.rng,
            &setup.sender,
            &dest,
            &ec_public,
            &line_id,
            at,
        )
        .unwrap();

        (rendered, ec_public, line_id)
    }

    fn parse_rendered(setup: &Setup, rendered: &[u8]) -> NetResult<OpenPacket> {
        let (json, body) = packet::unframe(rendered).unwrap();
        assert_eq!(packet::classify(&json).unwrap(), PacketKind::Open);

        parse(&setup.receiver, &json, body, source(), NOW_MS)
    }

    #[test]
    fn test_render_parse_roundtrip() {
        let mut setup = setup(40);
        let (rendered, ec_public, line_id) = render_open(&mut setup, NOW_MS - 5_000);

        let open = parse_rendered(&setup, &rendered).unwrap();

        assert_eq!(open.sender.hashname(), setup.sender.hashname());
        assert_eq!(open.sender.endpoint(), Some(source()));
        assert_eq!(crypto::ec_public_bytes(&open.ec_public), ec_public);
        assert_eq!(open.at, NOW_MS - 5_000);
        assert_eq!(open.line_id, line_id);
    }

    #[test]
    fn test_render_with_is_deterministic() {
        let mut setup = setup(41);
        let dest = Node::from_identity(&setup.receiver, None);
        let ec = crypto::ec_generate(&mut setup.rng);
        let ec_public = ec.public_bytes();
        let line_id = [3u8; LINE_ID_SIZE];
        let iv = [5u8; IV_SIZE];
        let open_param = crypto::rsa_oaep_encrypt(&mut setup.rng, dest.public(), &ec_public).unwrap();

        let first = render_with(
            &setup.sender,
            &dest,
            &ec_public,
            &line_id,
            NOW_MS,
            iv,
            open_param.clone(),
        )
        .unwrap();
        let second = render_with(
            &setup.sender,
            &dest,
            &ec_public,
            &line_id,
            NOW_MS,
            iv,
            open_param,
        )
        .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_rejects_stale() {
        let mut setup = setup(42);
        let (rendered, _, _) = render_open(&mut setup, NOW_MS - OPEN_WINDOW_MS - 60 * 60 * 1000);

        assert_eq!(
            parse_rendered(&setup, &rendered).unwrap_err(),
            NetError::Rejected(RejectReason::Stale)
        );
    }

    #[test]
    fn test_parse_rejects_future_skew() {
        let mut setup = setup(43);
        let (rendered, _, _) = render_open(&mut setup, NOW_MS + OPEN_WINDOW_MS + 60 * 60 * 1000);

        assert_eq!(
            parse_rendered(&setup, &rendered).unwrap_err(),
            NetError::Rejected(RejectReason::Stale)
        );
    }

    #[test]
    fn test_parse_rejects_wrong_destination() {
        let mut setup = setup(44);
        let third = Identity::generate_bits(&mut setup.rng, 1024).unwrap();

        // Address the inner packet to a third identity.
        let dest = Node::from_identity(&third, None);
        let ec = crypto::ec_generate(&mut setup.rng);
        let ec_public = ec.public_bytes();
        let line_id = [7u8; LINE_ID_SIZE];

        // Encrypt the open parameter for the actual receiver so decryption
        // succeeds and the destination check is what trips.
        let open_param = crypto::rsa_oaep_encrypt(
            &mut setup.rng,
            Node::from_identity(&setup.receiver, None).public(),
            &ec_public,
        )
        .unwrap();

        let rendered = render_with(
            &setup.sender,
            &dest,
            &ec_public,
            &line_id,
            NOW_MS,
            [1u8; IV_SIZE],
            open_param,
        )
        .unwrap();

        assert_eq!(
            parse_rendered(&setup, &rendered).unwrap_err(),
            NetError::Rejected(RejectReason::WrongDestination)
        );
    }

    #[test]
    fn test_parse_rejects_wrong_recipient_key() {
        let mut setup = setup(45);
        let (rendered, _, _) = render_open(&mut setup, NOW_MS);

        // A bystander cannot decrypt the open parameter.
        let bystander = Identity::generate_bits(&mut setup.rng, 1024).unwrap();
        let (json, body) = packet::unframe(&rendered).unwrap();

        assert_eq!(
            parse(&bystander, &json, body, source(), NOW_MS).unwrap_err(),
            NetError::Rejected(RejectReason::DecryptFailure)
        );
    }

    #[test]
    fn test_parse_rejects_tampered_body() {
        let mut setup = setup(46);
        let (mut rendered, _, _) = render_open(&mut setup, NOW_MS);

        let last = rendered.len() - 1;
        rendered[last] ^= 0xff;

        let err = parse_rendered(&setup, &rendered).unwrap_err();
        match err {
            // Flipping ciphertext bits either breaks the signature or the
            // DER tail, depending on where the flip lands.
            NetError::Rejected(RejectReason::BadSignature)
            | NetError::Rejected(RejectReason::DecryptFailure) => (),
            other => panic!("Unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_tampered_signature() {
        let mut setup = setup(47);
        let (rendered, _, _) = render_open(&mut setup, NOW_MS);

        let (mut json, body) = packet::unframe(&rendered).unwrap();
        json.insert(
            "sig".to_string(),
            Value::from(base64::encode(&[0u8; 128])),
        );

        assert_eq!(
            parse(&setup.receiver, &json, body, source(), NOW_MS).unwrap_err(),
            NetError::Rejected(RejectReason::BadSignature)
        );
    }

    #[test]
    fn test_parse_rejects_garbage_open_param() {
        let mut setup = setup(48);
        let (rendered, _, _) = render_open(&mut setup, NOW_MS);

        let (mut json, body) = packet::unframe(&rendered).unwrap();
        json.insert("open".to_string(), Value::from(base64::encode(&[9u8; 128])));

        assert_eq!(
            parse(&setup.receiver, &json, body, source(), NOW_MS).unwrap_err(),
            NetError::Rejected(RejectReason::DecryptFailure)
        );
    }

    #[test]
    fn test_parse_rejects_bad_iv() {
        let mut setup = setup(49);
        let (rendered, _, _) = render_open(&mut setup, NOW_MS);

        let (mut json, body) = packet::unframe(&rendered).unwrap();
        json.insert("iv".to_string(), Value::from("nothex"));

        assert_eq!(
            parse(&setup.receiver, &json, body, source(), NOW_MS).unwrap_err(),
            NetError::Malformed("iv")
        );
    }

    #[test]
    fn test_exchanged_opens_agree_on_the_secret() {
        let mut rng = StdRng::seed_from_u64(50);
        let alice = Identity::generate_bits(&mut rng, 1024).unwrap();
        let bob = Identity::generate_bits(&mut rng, 1024).unwrap();

        let alice_ec = crypto::ec_generate(&mut rng);
        let bob_ec = crypto::ec_generate(&mut rng);

        let to_bob = render(
            &mut rng,
            &alice,
            &Node::from_identity(&bob, None),
            &alice_ec.public_bytes(),
            &[1u8; LINE_ID_SIZE],
            NOW_MS,
        )
        .unwrap();
        let to_alice = render(
            &mut rng,
            &bob,
            &Node::from_identity(&alice, None),
            &bob_ec.public_bytes(),
            &[2u8; LINE_ID_SIZE],
            NOW_MS,
        )
        .unwrap();

        let (json, body) = packet::unframe(&to_bob).unwrap();
        let at_bob = parse(&bob, &json, body, source(), NOW_MS).unwrap();

        let (json, body) = packet::unframe(&to_alice).unwrap();
        let at_alice = parse(&alice, &json, body, source(), NOW_MS).unwrap();

        assert_eq!(
            bob_ec.agree(&at_bob.ec_public),
            alice_ec.agree(&at_alice.ec_public)
        );
    }
}
