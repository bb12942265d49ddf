//! End-to-end runs of the ticket exchange between a publisher, a client and a set of caches,
//! using the in-memory stores.
use bandwidth_proof::batchsignature::TrivialBatchSigner;
use bandwidth_proof::blockcipher::encrypt_buffer;
use bandwidth_proof::bundle::{BundleEntryParams, BundleGenerator, BundleParams, ParticipatingCache};
use bandwidth_proof::cache::{Cache, ClientCacheRequest, ClientCacheResponse, Escrow, ResponseMsg};
use bandwidth_proof::client::{decrypt_layers, session_key, solve_bundle_puzzle};
use bandwidth_proof::content::ContentBuffer;
use bandwidth_proof::storage::MemoryStore;
use bandwidth_proof::ticket::{Ticket, TicketBundle, TicketRequest};
use bandwidth_proof::traits::ContentObject;
use bandwidth_proof::{Error, ErrorKind, EscrowId, MasterKey, PublicKey, SessionKey};
use ed25519_dalek::SigningKey;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::thread;

type MemoryCache = Cache<MemoryStore, MemoryStore, MemoryStore>;

const BLOCK_QTY: usize = 4;
const BLOCK_SIZE: usize = 16 * 64;
const OBJECT_ID: u64 = 1;
const ESCROW_ID: EscrowId = EscrowId([0x42; 16]);

struct CacheNode {
    cache: MemoryCache,
    store: MemoryStore,
    outer_master_key: MasterKey,
    participating: ParticipatingCache,
}

struct Fixture {
    nodes: Vec<CacheNode>,
    content: ContentBuffer,
    bundle: TicketBundle,
    client: PublicKey,
    publisher: PublicKey,
}

fn master_key(rng: &mut StdRng) -> MasterKey {
    MasterKey::from_bytes(&rng.gen::<[u8; 16]>()).unwrap()
}

fn setup(cache_qty: usize) -> Fixture {
    let mut rng = StdRng::seed_from_u64(7);
    let content = ContentBuffer::random(BLOCK_QTY, BLOCK_SIZE, &mut rng);
    setup_with(content, 1, cache_qty, &mut rng)
}

/// Cache `i` serves block `first_block + i` of `content`.
fn setup_with(
    content: ContentBuffer,
    first_block: u64,
    cache_qty: usize,
    rng: &mut StdRng,
) -> Fixture {

    let nodes: Vec<CacheNode> = (0..cache_qty)
        .map(|_| {
            let inner = master_key(rng);
            let outer = master_key(rng);
            let store = MemoryStore::new();
            store.add_escrow(Escrow::new(ESCROW_ID, inner.clone(), outer.clone()));
            store.put_object(ESCROW_ID, OBJECT_ID, content.clone());
            CacheNode {
                cache: Cache::new(store.clone(), store.clone(), store.clone()),
                store,
                outer_master_key: outer,
                participating: ParticipatingCache {
                    public_key: SigningKey::generate(rng).verifying_key().into(),
                    inner_master_key: inner,
                },
            }
        })
        .collect();

    let publisher_key = SigningKey::generate(rng);
    let publisher: PublicKey = publisher_key.verifying_key().into();
    let generator = BundleGenerator::new(TrivialBatchSigner::new(publisher_key));
    let client: PublicKey = SigningKey::generate(rng).verifying_key().into();

    let bundle = {
        let params = BundleParams {
            escrow_id: ESCROW_ID,
            object_id: OBJECT_ID,
            object: &content,
            request_sequence_no: 0x1_0000_0005,
            client_public_key: client,
            entries: nodes
                .iter()
                .enumerate()
                .map(|(i, n)| BundleEntryParams {
                    ticket_no: 100 + i as u64,
                    block_idx: first_block + i as u64,
                    cache: &n.participating,
                })
                .collect(),
        };
        generator.generate_ticket_bundle(&params, rng).unwrap()
    };

    Fixture {
        nodes,
        content,
        bundle,
        client,
        publisher,
    }
}

impl Fixture {
    fn data_request(&self, i: usize) -> ClientCacheRequest {
        self.bundle
            .build_client_cache_request(Ticket::Request(self.bundle.ticket_requests[i].clone()))
    }

    fn l1_request(&self, i: usize) -> ClientCacheRequest {
        self.bundle
            .build_client_cache_request(Ticket::L1(self.bundle.ticket_l1s[i].clone()))
    }

    fn seq(&self) -> u32 {
        self.bundle.remainder.sequence_no()
    }

    fn session_keys(&self, i: usize) -> (SessionKey, SessionKey) {
        let node = &self.nodes[i];
        let outer = session_key(self.client.as_bytes(), self.seq(), &node.outer_master_key).unwrap();
        let inner = session_key(
            self.client.as_bytes(),
            self.seq(),
            &node.participating.inner_master_key,
        )
        .unwrap();
        (outer, inner)
    }
}

fn data(resp: ClientCacheResponse) -> Vec<u8> {
    match resp.msg {
        ResponseMsg::Data(d) => d,
        other => panic!("expected data, got {:?}", other),
    }
}

fn error_kind(resp: &ClientCacheResponse) -> ErrorKind {
    match &resp.msg {
        ResponseMsg::Error { kind, .. } => *kind,
        other => panic!("expected an error, got {:?}", other),
    }
}

#[test]
fn data_ticket_returns_double_encrypted_block() {
    let f = setup(1);
    let req = f.data_request(0);
    let resp = f.nodes[0].cache.handle_request(&req).unwrap();
    assert_eq!(resp.request_sequence_no, 0x1_0000_0005);

    let ciphertext = data(resp);
    let plaintext = f.content.get_block(1).unwrap();
    assert_ne!(&ciphertext[..], plaintext);

    let (outer, inner) = f.session_keys(0);
    assert_eq!(decrypt_layers(1, f.seq(), &outer, &inner, &ciphertext).unwrap(), plaintext);
}

#[test]
fn omitted_ticket_digest_is_rejected() {
    let f = setup(1);
    let mut req = f.data_request(0);
    let digest = f.bundle.ticket_requests[0].canonical_digest();
    req.ticket_bundle_subdigests
        .ticket_request_digest
        .retain(|d| d != &digest);

    assert!(matches!(
        f.nodes[0].cache.handle_request(&req),
        Err(Error::DigestMismatch(_))
    ));
}

#[test]
fn foreign_ticket_is_rejected() {
    let f = setup(2);
    let forged = TicketRequest {
        block_idx: 3,
        ..f.bundle.ticket_requests[0].clone()
    };
    let req = f.bundle.build_client_cache_request(Ticket::Request(forged));
    let resp = f.nodes[0].cache.respond(&req);
    assert_eq!(error_kind(&resp), ErrorKind::Integrity);
}

#[test]
fn tampered_remainder_is_rejected() {
    let f = setup(1);
    let mut req = f.data_request(0);
    req.bundle_remainder.request_sequence_no += 1;
    assert!(matches!(
        f.nodes[0].cache.handle_request(&req),
        Err(Error::DigestMismatch(_))
    ));
}

#[test]
fn bad_signature_is_rejected() {
    let f = setup(1);
    let mut req = f.data_request(0);
    req.bundle_sig.root_signature[0] ^= 1;
    assert!(matches!(
        f.nodes[0].cache.handle_request(&req),
        Err(Error::InvalidBatchSignature)
    ));

    // Subdigests re-signed by someone else.
    let mut req = f.data_request(0);
    let forger = TrivialBatchSigner::new(SigningKey::from_bytes(&[1u8; 32]));
    req.bundle_sig = bandwidth_proof::traits::BatchSigner::batch_sign(
        &forger,
        &req.ticket_bundle_subdigests.canonical_digest(),
    )
    .unwrap();
    let node = &f.nodes[0];
    let strict = Cache::new(node.store.clone(), node.store.clone(), node.store.clone())
        .with_trusted_signer(f.publisher);
    assert!(node.cache.handle_request(&req).is_ok());
    assert!(matches!(
        strict.handle_request(&req),
        Err(Error::InvalidBatchSignature)
    ));
    assert!(strict.handle_request(&f.data_request(0)).is_ok());
}

#[test]
fn unknown_and_inactive_escrows() {
    let f = setup(1);
    let req = f.data_request(0);

    let empty = MemoryStore::new();
    let cache = Cache::new(empty.clone(), empty.clone(), empty);
    assert!(matches!(
        cache.handle_request(&req),
        Err(Error::EscrowNotFound(id)) if id == ESCROW_ID
    ));
    assert_eq!(error_kind(&cache.respond(&req)), ErrorKind::NotFound);

    let store = MemoryStore::new();
    store.add_escrow(
        Escrow::new(
            ESCROW_ID,
            MasterKey::from_bytes(&[1u8; 16]).unwrap(),
            MasterKey::from_bytes(&[2u8; 16]).unwrap(),
        )
        .deactivated(),
    );
    let cache = Cache::new(store.clone(), store.clone(), store);
    assert!(matches!(
        cache.handle_request(&req),
        Err(Error::EscrowInactive(_))
    ));
}

#[test]
fn missing_ticket_is_unsupported() {
    let f = setup(1);
    let mut req = f.data_request(0);
    req.ticket = None;
    assert!(matches!(
        f.nodes[0].cache.handle_request(&req),
        Err(Error::UnsupportedTicketType)
    ));
    assert_eq!(
        error_kind(&f.nodes[0].cache.respond(&req)),
        ErrorKind::Unsupported
    );
}

#[test]
fn missing_object_is_not_found() {
    let f = setup(1);
    let store = MemoryStore::new();
    store.add_escrow(Escrow::new(
        ESCROW_ID,
        f.nodes[0].participating.inner_master_key.clone(),
        f.nodes[0].outer_master_key.clone(),
    ));
    let cache = Cache::new(store.clone(), store.clone(), store);
    assert!(matches!(
        cache.handle_request(&f.data_request(0)),
        Err(Error::ObjectNotFound(OBJECT_ID))
    ));
}

#[test]
fn missing_block_is_not_found() {
    let f = setup(1);
    let store = MemoryStore::new();
    store.add_escrow(Escrow::new(
        ESCROW_ID,
        f.nodes[0].participating.inner_master_key.clone(),
        f.nodes[0].outer_master_key.clone(),
    ));
    // Only block 0 is held; the bundle asks for block 1.
    store.put_object(
        ESCROW_ID,
        OBJECT_ID,
        ContentBuffer::new(vec![f.content.get_block(0).unwrap().to_vec()]).unwrap(),
    );
    let cache = Cache::new(store.clone(), store.clone(), store);
    assert!(matches!(
        cache.handle_request(&f.data_request(0)),
        Err(Error::BlockNotFound(1))
    ));
}

#[test]
fn l1_ticket_releases_outer_key_once() {
    let f = setup(2);
    let node = &f.nodes[1];
    let resp = node.cache.handle_request(&f.l1_request(1)).unwrap();
    let (outer, _) = f.session_keys(1);
    assert_eq!(
        resp.msg,
        ResponseMsg::L1 {
            outer_session_key: outer.as_bytes().to_vec()
        }
    );
    assert!(node.store.ticket_l1(&ESCROW_ID, 101).is_some());

    assert!(matches!(
        node.cache.handle_request(&f.l1_request(1)),
        Err(Error::DuplicateTicket)
    ));
    assert_eq!(
        error_kind(&node.cache.respond(&f.l1_request(1))),
        ErrorKind::Integrity
    );
}

#[test]
fn full_client_flow() {
    let f = setup(3);
    let seq = f.seq();

    // Data, then L1: strip the outer layer of every block.
    let mut inner_blocks = Vec::new();
    for (i, node) in f.nodes.iter().enumerate() {
        let block_idx = f.bundle.ticket_requests[i].block_idx;
        let ciphertext = data(node.cache.handle_request(&f.data_request(i)).unwrap());
        let outer = match node.cache.handle_request(&f.l1_request(i)).unwrap().msg {
            ResponseMsg::L1 { outer_session_key } => outer_session_key,
            other => panic!("expected an outer key, got {:?}", other),
        };
        inner_blocks.push(encrypt_buffer(block_idx, seq, &outer, &ciphertext).unwrap());
    }

    // The inner-encrypted blocks solve the puzzle and unlock the L2 ticket.
    let solution = solve_bundle_puzzle(&f.bundle, &inner_blocks).unwrap();
    let inner_keys = solution.inner_session_keys().unwrap();
    assert_eq!(inner_keys.len(), f.nodes.len());
    for (i, inner_block) in inner_blocks.iter().enumerate() {
        let block_idx = f.bundle.ticket_requests[i].block_idx;
        let plaintext = encrypt_buffer(block_idx, seq, inner_keys[i].as_bytes(), inner_block).unwrap();
        assert_eq!(&plaintext[..], f.content.get_block(block_idx).unwrap());
        assert_eq!(inner_keys[i], f.session_keys(i).1);
    }

    // Every cache accepts the L2 claim once.
    let claim = f.bundle.ticket_l2_info(&solution.secret);
    for node in &f.nodes {
        let req = f.bundle.build_client_cache_request(Ticket::L2(claim.clone()));
        assert_eq!(node.cache.handle_request(&req).unwrap().msg, ResponseMsg::L2Ack);
        assert!(matches!(
            node.cache.handle_request(&req),
            Err(Error::DuplicateTicket)
        ));
    }
}

#[test]
fn unaligned_object_tail_is_bundled() {
    let mut rng = StdRng::seed_from_u64(11);
    let raw: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let content = ContentBuffer::from_bytes(&raw, 256).unwrap();
    assert_eq!(content.block_count(), 4);

    // Blocks 2 and 3, the second one being the padded tail.
    let f = setup_with(content, 2, 2, &mut rng);
    let seq = f.seq();
    let mut inner_blocks = Vec::new();
    for (i, node) in f.nodes.iter().enumerate() {
        let block_idx = 2 + i as u64;
        let ciphertext = data(node.cache.handle_request(&f.data_request(i)).unwrap());
        let (outer, _) = f.session_keys(i);
        inner_blocks.push(encrypt_buffer(block_idx, seq, outer.as_bytes(), &ciphertext).unwrap());
    }

    let solution = solve_bundle_puzzle(&f.bundle, &inner_blocks).unwrap();
    let inner_keys = solution.inner_session_keys().unwrap();
    let tail = encrypt_buffer(3, seq, inner_keys[1].as_bytes(), &inner_blocks[1]).unwrap();
    assert_eq!(tail.len(), 240);
    assert_eq!(&tail[..232], &raw[768..]);
    assert!(tail[232..].iter().all(|&b| b == 0));
}

#[test]
fn concurrent_requests_share_one_cache() {
    const THREADS: usize = 8;
    let f = setup(1);
    let node = &f.nodes[0];

    // Only one of the racing L1 submissions is accepted.
    let l1 = f.l1_request(0);
    let results: Vec<Result<ClientCacheResponse, Error>> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| s.spawn(|| node.cache.handle_request(&l1)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    let granted = results
        .iter()
        .filter(|r| matches!(r, Ok(ClientCacheResponse { msg: ResponseMsg::L1 { .. }, .. })))
        .count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(Error::DuplicateTicket)))
        .count();
    assert_eq!(granted, 1);
    assert_eq!(duplicates, THREADS - 1);

    // Data requests do not interfere with one another.
    let req = f.data_request(0);
    let (outer, inner) = f.session_keys(0);
    let plaintext = f.content.get_block(1).unwrap();
    let seq = f.seq();
    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let ciphertext = data(node.cache.handle_request(&req).unwrap());
                let decrypted = decrypt_layers(1, seq, &outer, &inner, &ciphertext).unwrap();
                assert_eq!(decrypted, plaintext);
            });
        }
    });
}

#[test]
fn puzzle_needs_every_block() {
    let f = setup(2);
    let seq = f.seq();
    let mut inner_blocks = Vec::new();
    for (i, node) in f.nodes.iter().enumerate() {
        let ciphertext = data(node.cache.handle_request(&f.data_request(i)).unwrap());
        let (outer, _) = f.session_keys(i);
        inner_blocks.push(encrypt_buffer(1 + i as u64, seq, outer.as_bytes(), &ciphertext).unwrap());
    }
    // A changed byte only matters if the chain visits it, so change them all.
    for b in inner_blocks[1].iter_mut() {
        *b ^= 0x5a;
    }
    assert!(matches!(
        solve_bundle_puzzle(&f.bundle, &inner_blocks),
        Err(Error::NoSolutionFound)
    ));
}

#[test]
fn forged_l2_claim_is_rejected() {
    let f = setup(1);
    let mut claim = f.bundle.ticket_l2_info(&[0u8; 48]);
    claim.encrypted_ticket_l2[0] ^= 1;
    let req = f.bundle.build_client_cache_request(Ticket::L2(claim));
    assert!(matches!(
        f.nodes[0].cache.handle_request(&req),
        Err(Error::DigestMismatch(_))
    ));

    let short = f.bundle.ticket_l2_info(&[0u8; 16]);
    let req = f.bundle.build_client_cache_request(Ticket::L2(short));
    assert!(matches!(
        f.nodes[0].cache.handle_request(&req),
        Err(Error::InvalidDigestLength(16))
    ));
}

#[test]
fn messages_survive_serialization() {
    let f = setup(2);
    let req = f.data_request(1);
    let json = serde_json::to_string(&req).unwrap();
    let back: ClientCacheRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(back, req);

    let bundle: TicketBundle =
        serde_json::from_str(&serde_json::to_string(&f.bundle).unwrap()).unwrap();
    assert_eq!(bundle, f.bundle);

    let resp = f.nodes[1].cache.respond(&back);
    let json = serde_json::to_string(&resp).unwrap();
    let back: ClientCacheResponse = serde_json::from_str(&json).unwrap();
    assert_eq!(back, resp);
    assert!(matches!(back.msg, ResponseMsg::Data(_)));
}
