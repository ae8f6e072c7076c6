//! Integration tests for select-driven muxing
//!
//! These tests validate:
//! - Stream and side packet selectors
//! - Progress when unselected inputs stay silent
//! - Early release of packets that can never be selected

mod common;

use calcgraph::{Error, Packet, Timestamp};
use common::builders::{mux_graph, mux_inputs, mux_side_graph};
use common::{at, feed, graph, Collector};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

const SELECTORS: [i32; 7] = [1, 2, 0, 2, 0, 1, 2];
const EXPECTED: [i64; 7] = [1, 8, 13, 144, 233, 1597, 10946];

fn run_stream_selector(num_threads: usize) -> Vec<i64> {
    let graph = graph(mux_graph(num_threads));
    let out = Collector::attach(&graph, "out", false);
    graph.start_run(HashMap::new()).unwrap();

    let [in0, in1, in2] = mux_inputs();
    feed(&graph, "in0", &in0);
    feed(&graph, "in1", &in1);
    feed(&graph, "in2", &in2);
    feed(&graph, "select", &SELECTORS);

    graph.close_all_input_streams().unwrap();
    graph.wait_until_done().unwrap();
    out.values::<i64>()
}

#[test]
fn test_stream_selector_on_thread_pool() {
    assert_eq!(run_stream_selector(2), EXPECTED);
}

#[test]
fn test_stream_selector_on_application_thread() {
    assert_eq!(run_stream_selector(0), EXPECTED);
}

#[test]
fn test_output_keeps_select_timestamps() {
    let graph = graph(mux_graph(1));
    let out = Collector::attach(&graph, "out", false);
    graph.start_run(HashMap::new()).unwrap();

    let [in0, in1, in2] = mux_inputs();
    feed(&graph, "in0", &in0);
    feed(&graph, "in1", &in1);
    feed(&graph, "in2", &in2);
    feed(&graph, "select", &SELECTORS);
    graph.close_all_input_streams().unwrap();
    graph.wait_until_done().unwrap();

    assert_eq!(out.timestamps(), (0..7).collect::<Vec<_>>());
}

#[test]
fn test_side_packet_selector_picks_one_input() {
    let graph = graph(mux_side_graph(2));
    let out = Collector::attach(&graph, "out", false);

    let mut side_packets = HashMap::new();
    side_packets.insert("select".to_string(), Packet::new(0i32));
    graph.start_run(side_packets).unwrap();

    let [in0, in1, in2] = mux_inputs();
    feed(&graph, "in0", &in0);
    feed(&graph, "in1", &in1);
    feed(&graph, "in2", &in2);
    graph.close_all_input_streams().unwrap();
    graph.wait_until_done().unwrap();

    assert_eq!(out.values::<i64>(), in0);
}

#[test]
fn test_side_packet_selector_out_of_range_fails_open() {
    let graph = graph(mux_side_graph(1));
    let mut side_packets = HashMap::new();
    side_packets.insert("select".to_string(), Packet::new(3i64));
    graph.start_run(side_packets).unwrap();
    let _ = graph.close_all_input_streams();

    let err = graph.wait_until_done().unwrap_err();
    assert!(
        matches!(err.root_cause(), Error::Calculator { .. }),
        "unexpected error: {err}"
    );
}

#[test]
fn test_silent_unselected_inputs_do_not_block() {
    let graph = graph(mux_graph(0));
    let out = Collector::attach(&graph, "out", false);
    graph.start_run(HashMap::new()).unwrap();

    // in0 and in2 never receive anything and stay open.
    feed(&graph, "in1", &[10i64, 11, 12]);
    feed(&graph, "select", &[1i32, 1, 1]);
    graph.wait_until_idle().unwrap();

    assert_eq!(out.values::<i64>(), vec![10, 11, 12]);

    graph.close_all_input_streams().unwrap();
    graph.wait_until_done().unwrap();
}

#[test]
fn test_unselected_packets_are_released() {
    let graph = graph(mux_graph(0));
    let out = Collector::attach(&graph, "out", false);
    graph.start_run(HashMap::new()).unwrap();

    let mut unselected: Vec<Weak<i64>> = Vec::new();
    for (t, &select) in SELECTORS.iter().enumerate() {
        for input in 0..3 {
            let value = Arc::new((t * 10 + input) as i64);
            if input as i32 != select {
                unselected.push(Arc::downgrade(&value));
            }
            graph
                .add_packet_to_input_stream(&format!("in{}", input), at(value, t as i64))
                .unwrap();
        }
        graph
            .add_packet_to_input_stream("select", at(select, t as i64))
            .unwrap();
    }
    graph.wait_until_idle().unwrap();

    assert_eq!(out.packets().len(), SELECTORS.len());
    assert!(
        unselected.iter().all(|weak| weak.upgrade().is_none()),
        "unselected packets should be dropped once their timestamp passes"
    );

    graph.close_all_input_streams().unwrap();
    graph.wait_until_done().unwrap();
}

#[test]
fn test_selector_out_of_range_fails_run() {
    let graph = graph(mux_graph(1));
    graph.start_run(HashMap::new()).unwrap();

    graph.add_packet_to_input_stream("in0", at(1i64, 0)).unwrap();
    graph.add_packet_to_input_stream("select", at(5i32, 0)).unwrap();
    graph.close_all_input_streams().unwrap();

    // The handler rejects the selection before the calculator runs.
    let err = graph.wait_until_done().unwrap_err();
    assert!(matches!(err.root_cause(), Error::Contract(_)), "{err}");
    assert!(graph.has_error());
}

#[test]
fn test_late_select_drops_older_data() {
    let graph = graph(mux_graph(0));
    let out = Collector::attach(&graph, "out", false);
    graph.start_run(HashMap::new()).unwrap();

    // Data at 0..3 on in0, but the first selection is at 3.
    feed(&graph, "in0", &[5i64, 6, 7, 8]);
    graph
        .add_packet_to_input_stream("select", Packet::new(0i32).into_at(Timestamp::new(3)))
        .unwrap();
    graph.close_all_input_streams().unwrap();
    graph.wait_until_done().unwrap();

    assert_eq!(out.values::<i64>(), vec![8]);
    assert_eq!(out.timestamps(), vec![3]);
}
