//! calcgraph command line runner
//!
//! Loads a graph file, feeds integer packets into its input streams and
//! prints whatever arrives on its output streams.
//!
//! ```text
//! calcgraph graph.toml --feed in=1,2,3 --feed select=0,1,0 --side offset=5
//! ```

use anyhow::{anyhow, bail, Context};
use calcgraph::{CalculatorGraph, CalculatorRegistry, GraphConfig, OutputStreamPoller, Packet, Timestamp};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "usage: calcgraph <graph.toml|graph.json> [--feed STREAM=v1,v2,...]... [--side NAME=v]...";

#[derive(Debug, Default)]
struct Args {
    graph: PathBuf,
    feeds: Vec<(String, Vec<i64>)>,
    side_packets: HashMap<String, i64>,
}

fn split_assignment(arg: &str) -> anyhow::Result<(&str, &str)> {
    arg.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| anyhow!("expected NAME=VALUE, got \"{}\"", arg))
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut parsed = Args::default();
    let mut graph = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--feed" => {
                let value = args.next().ok_or_else(|| anyhow!("--feed needs a value"))?;
                let (stream, values) = split_assignment(&value)?;
                let values = values
                    .split(',')
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| v.trim().parse::<i64>())
                    .collect::<Result<Vec<_>, _>>()
                    .with_context(|| format!("invalid values for stream \"{}\"", stream))?;
                parsed.feeds.push((stream.to_string(), values));
            }
            "--side" => {
                let value = args.next().ok_or_else(|| anyhow!("--side needs a value"))?;
                let (name, v) = split_assignment(&value)?;
                let v = v
                    .trim()
                    .parse::<i64>()
                    .with_context(|| format!("invalid value for side packet \"{}\"", name))?;
                parsed.side_packets.insert(name.to_string(), v);
            }
            "-h" | "--help" => bail!(USAGE),
            other if other.starts_with("--") => bail!("unknown option {}\n{}", other, USAGE),
            other => {
                if graph.replace(PathBuf::from(other)).is_some() {
                    bail!("more than one graph file given\n{}", USAGE);
                }
            }
        }
    }
    parsed.graph = graph.ok_or_else(|| anyhow!(USAGE))?;
    Ok(parsed)
}

fn format_packet(packet: &Packet) -> String {
    if let Ok(v) = packet.get::<i64>() {
        v.to_string()
    } else if let Ok(v) = packet.get::<i32>() {
        v.to_string()
    } else if let Ok(v) = packet.get::<f64>() {
        v.to_string()
    } else if let Ok(v) = packet.get::<f32>() {
        v.to_string()
    } else if let Ok(v) = packet.get::<String>() {
        v.clone()
    } else if let Ok(v) = packet.get::<Vec<i64>>() {
        format!("{:?}", v)
    } else {
        format!("<{}>", packet.type_name())
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = GraphConfig::load(&args.graph)
        .with_context(|| format!("loading {}", args.graph.display()))?;
    let outputs = config.output_stream.clone();
    let graph = CalculatorGraph::from_config(Arc::new(CalculatorRegistry::with_builtins()), config)?;

    let pollers = outputs
        .iter()
        .map(|spec| {
            let name = spec.rsplit(':').next().unwrap_or(spec);
            graph.add_output_stream_poller(name)
        })
        .collect::<calcgraph::Result<Vec<OutputStreamPoller>>>()?;

    let side_packets = args
        .side_packets
        .into_iter()
        .map(|(name, value)| (name, Packet::new(value)))
        .collect();
    graph.start_run(side_packets)?;

    // Interleave feeds by timestamp so synchronized inputs make progress.
    let longest = args.feeds.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
    for t in 0..longest {
        for (stream, values) in &args.feeds {
            if let Some(&value) = values.get(t) {
                let timestamp = Timestamp::new(t as i64);
                graph
                    .add_packet_to_input_stream(stream, Packet::new(value).into_at(timestamp))
                    .with_context(|| format!("feeding {}@{}", stream, timestamp))?;
            }
        }
    }
    graph.close_all_input_streams()?;
    graph.wait_until_done()?;

    for poller in &pollers {
        for packet in poller.iter() {
            println!("{}@{}: {}", poller.stream_name(), packet.timestamp(), format_packet(&packet));
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,calcgraph=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    tracing::info!("Running graph {}", args.graph.display());
    run(args)
}
