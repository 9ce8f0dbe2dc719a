//! Cross-process tests: spawn the plugin binary, connect over real TCP, and
//! drive the whole provider surface from the host side.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use num_bigint::BigInt;
use oracle_over_passerelle::{descriptor, PROTOCOL_VERSION};
use passerelle_core::{HandshakeDescriptor, StreamTransport};
use passerelle_oracle::{
    connect_provider, AttributedObservation, AttributedSignature, ConfigDigestPrefix,
    ConnectError, ProviderClient, ProviderSpec, ReportContext, ReportTimestamp,
};
use tokio::net::TcpStream;
use uuid::Uuid;

/// Kills and waits on the plugin process when dropped, so a panicking test
/// does not leave a zombie behind.
struct ChildGuard(Option<Child>);

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self(Some(child))
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.0.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

static TRACING_INIT: AtomicBool = AtomicBool::new(false);

fn init_tracing() {
    if TRACING_INIT
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();
    }
}

/// Spawn the plugin binary and read its `LISTENING <addr>` announcement.
fn spawn_plugin() -> (ChildGuard, String) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_plugin"))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn plugin binary");

    let stdout = child.stdout.take().expect("plugin stdout not captured");
    let guard = ChildGuard::new(child);

    let first = BufReader::new(stdout)
        .lines()
        .next()
        .expect("plugin exited before announcing its address")
        .expect("failed to read plugin stdout");
    let addr = first
        .strip_prefix("LISTENING ")
        .unwrap_or_else(|| panic!("unexpected announcement line: {first:?}"))
        .to_string();
    eprintln!("[test] plugin listening on {addr}");
    (guard, addr)
}

async fn connect(addr: &str) -> ProviderClient {
    let stream = tokio::time::timeout(Duration::from_secs(5), TcpStream::connect(addr))
        .await
        .expect("TCP connect timed out")
        .expect("TCP connect failed");
    connect_provider(StreamTransport::new(stream), &descriptor())
        .await
        .expect("handshake with plugin failed")
}

fn demo_spec() -> ProviderSpec {
    ProviderSpec {
        id: 42,
        node_endpoint_http: "http://127.0.0.1:8899".to_string(),
        program_address: "ProgAcc11111111111111111111111111".to_string(),
        state_address: "StateAcc1111111111111111111111111".to_string(),
        store_program_address: "StoreAcc1111111111111111111111111".to_string(),
        transmissions_address: "FeedAcc111111111111111111111111111".to_string(),
        ..ProviderSpec::default()
    }
}

#[tokio::test]
async fn full_scenario_across_processes() {
    init_tracing();
    let (_guard, addr) = spawn_plugin();
    let client = connect(&addr).await;

    tokio::time::timeout(Duration::from_secs(15), async {
        let instance = client
            .create_instance(Uuid::new_v4(), &demo_spec())
            .await
            .expect("create_instance failed");
        instance.start().await.expect("start failed");
        instance.ready().await.expect("ready failed");
        instance.healthy().await.expect("healthy failed");

        let tracker = instance.config_tracker().await.expect("tracker stream");
        let h1 = tracker.latest_block_height().await.expect("block height");
        assert!(h1 >= 1_001, "unexpected starting height {h1}");
        let h2 = tracker.latest_block_height().await.expect("block height");
        assert!(h2 > h1, "chain did not advance: {h1} -> {h2}");

        let (changed_in_block, digest) =
            tracker.latest_config_details().await.expect("config details");
        assert_eq!(changed_in_block, 900);
        assert_eq!(digest.prefix(), ConfigDigestPrefix(3));

        let digester = instance.config_digester().await.expect("digester stream");
        assert_eq!(
            digester.config_digest_prefix().await.expect("prefix"),
            ConfigDigestPrefix(3)
        );
        let config = tracker
            .latest_config(changed_in_block)
            .await
            .expect("latest config");
        let recomputed = digester.config_digest(&config).await.expect("digest");
        assert_eq!(recomputed, digest, "digester disagrees with the tracker");

        let codec = instance.report_codec().await.expect("codec stream");
        let observations: Vec<AttributedObservation> = [12i64, 7, 9]
            .iter()
            .enumerate()
            .map(|(i, v)| AttributedObservation {
                timestamp: 1_700_000_000,
                value: BigInt::from(*v),
                juels_per_fee_coin: BigInt::from(10i64),
                observer: i as u8,
            })
            .collect();
        let report = codec.build_report(&observations).await.expect("build report");
        let median = codec.median_from_report(&report).await.expect("median");
        assert_eq!(median, BigInt::from(9));

        let transmitter = instance.transmitter().await.expect("transmitter stream");
        assert_eq!(
            transmitter.own_account().await.expect("own account"),
            format!("sim-transmitter-{}", demo_spec().transmissions_address)
        );
        let context = ReportContext {
            report_timestamp: ReportTimestamp {
                config_digest: digest,
                epoch: 5,
                round: 2,
            },
            extra_hash: [0; 32],
        };
        let signatures = vec![AttributedSignature {
            signature: vec![0xcc; 64],
            signer: 0,
        }];
        transmitter
            .submit(context, report, signatures)
            .await
            .expect("submit failed");

        let reader = instance.contract_reader().await.expect("reader stream");
        let details = reader
            .latest_transmission_details()
            .await
            .expect("transmission details");
        assert_eq!(details.latest_answer, BigInt::from(9));
        assert_eq!(details.epoch, 5);
        assert_eq!(details.round, 2);
        let round = reader
            .latest_round_requested(Duration::from_secs(600))
            .await
            .expect("round requested");
        assert_eq!(round.epoch, 5);
        assert_eq!(round.round, 2);

        instance.close().await.expect("close failed");
        let err = instance.ready().await.expect_err("closed instance answered");
        assert!(err.is_transport(), "expected a transport error, got {err}");
    })
    .await
    .expect("scenario timed out");

    eprintln!("[test] scenario complete");
}

#[tokio::test]
async fn wrong_magic_value_is_rejected_without_killing_the_plugin() {
    init_tracing();
    let (_guard, addr) = spawn_plugin();

    let imposter = HandshakeDescriptor::new(
        PROTOCOL_VERSION,
        "PASSERELLE_ORACLE_PLUGIN",
        "not-the-real-cookie",
    );
    let stream = TcpStream::connect(&addr).await.expect("TCP connect failed");
    let err = connect_provider(StreamTransport::new(stream), &imposter)
        .await
        .expect_err("handshake with a wrong magic value succeeded");
    assert!(
        matches!(err, ConnectError::Handshake(_)),
        "expected a handshake failure, got {err}"
    );

    // The plugin treats the mismatch as fatal for that connection only.
    let client = connect(&addr).await;
    tokio::time::timeout(Duration::from_secs(15), async {
        let instance = client
            .create_instance(Uuid::new_v4(), &demo_spec())
            .await
            .expect("create_instance failed");
        instance.start().await.expect("start failed");
        let tracker = instance.config_tracker().await.expect("tracker stream");
        assert!(tracker.latest_block_height().await.expect("block height") >= 1_001);
        instance.close().await.expect("close failed");
    })
    .await
    .expect("scenario timed out");
}
