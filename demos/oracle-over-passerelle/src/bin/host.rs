//! Host side of the demo: connects to a running plugin, creates a provider
//! instance, and walks every capability once.
//!
//! Usage: `host <plugin-addr>` where the address comes from the plugin's
//! `LISTENING <addr>` line.

use std::time::Duration;

use num_bigint::BigInt;
use oracle_over_passerelle::descriptor;
use passerelle_core::StreamTransport;
use passerelle_oracle::{
    connect_provider, AttributedObservation, AttributedSignature, ProviderSpec, ReportContext,
    ReportTimestamp,
};
use tokio::net::TcpStream;
use uuid::Uuid;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .ok_or("usage: host <plugin-addr>")?;

    println!("=== median oracle over passerelle ===");
    let stream = TcpStream::connect(&addr).await?;
    let client = connect_provider(StreamTransport::new(stream), &descriptor()).await?;
    println!("connected to plugin at {addr}");

    let spec = ProviderSpec {
        id: 1,
        node_endpoint_http: "http://127.0.0.1:8899".into(),
        program_address: "SimProgram1111111111111111111111".into(),
        state_address: "SimState111111111111111111111111".into(),
        store_program_address: "SimStore111111111111111111111111".into(),
        transmissions_address: "SimFeed1111111111111111111111111".into(),
        ..ProviderSpec::default()
    };
    let job_id = Uuid::new_v4();
    let instance = client.create_instance(job_id, &spec).await?;
    instance.start().await?;
    instance.ready().await?;
    println!("instance for job {job_id} is ready");

    println!("\n--- config tracker ---");
    let tracker = instance.config_tracker().await?;
    let (changed_in_block, digest) = tracker.latest_config_details().await?;
    println!("latest config {digest} set in block {changed_in_block}");
    let config = tracker.latest_config(changed_in_block).await?;
    println!(
        "{} signers, {} transmitters, f = {}",
        config.signers.len(),
        config.transmitters.len(),
        config.f
    );
    println!("block height {}", tracker.latest_block_height().await?);

    println!("\n--- config digester ---");
    let digester = instance.config_digester().await?;
    let prefix = digester.config_digest_prefix().await?;
    let recomputed = digester.config_digest(&config).await?;
    let verdict = if recomputed == digest { "matches" } else { "DOES NOT MATCH" };
    println!("prefix {prefix}, recomputed digest {verdict} the tracker's");

    println!("\n--- report codec ---");
    let codec = instance.report_codec().await?;
    let observations: Vec<AttributedObservation> = [101i64, 99, 104, 97, 103]
        .iter()
        .enumerate()
        .map(|(i, v)| AttributedObservation {
            timestamp: 1_700_000_000,
            value: BigInt::from(*v),
            juels_per_fee_coin: BigInt::from(1_000_000i64),
            observer: i as u8,
        })
        .collect();
    let report = codec.build_report(&observations).await?;
    let median = codec.median_from_report(&report).await?;
    println!("median of {} observations is {median}", observations.len());

    println!("\n--- transmitter ---");
    let transmitter = instance.transmitter().await?;
    println!("transmitting as {}", transmitter.own_account().await?);
    let context = ReportContext {
        report_timestamp: ReportTimestamp {
            config_digest: digest,
            epoch: 2,
            round: 1,
        },
        extra_hash: [0; 32],
    };
    let signatures = vec![
        AttributedSignature {
            signature: vec![0xaa; 64],
            signer: 0,
        },
        AttributedSignature {
            signature: vec![0xbb; 64],
            signer: 1,
        },
    ];
    transmitter.submit(context, report, signatures).await?;
    let (digest_now, epoch_now) = transmitter.latest_config_digest_and_epoch().await?;
    println!("accepted; chain reports {digest_now} at epoch {epoch_now}");

    println!("\n--- contract reader ---");
    let reader = instance.contract_reader().await?;
    let details = reader.latest_transmission_details().await?;
    println!(
        "latest answer {} at epoch {} round {}",
        details.latest_answer, details.epoch, details.round
    );
    let round = reader
        .latest_round_requested(Duration::from_secs(600))
        .await?;
    println!("latest round requested: epoch {} round {}", round.epoch, round.round);

    instance.close().await?;
    println!("\ninstance closed, all done");
    Ok(())
}
